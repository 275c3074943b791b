//! GTID (Global Transaction ID) 관리
//!
//! MySQL GTID 형식: `uuid:1-100:200,uuid2:1-50`
//! MariaDB GTID 형식: `domain-server-sequence,...` (도메인당 하나)
//!
//! 파싱 방식은 flavor에 따라 달라지므로 저장 시 flavor를 함께 기록해야 합니다.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 소스 데이터베이스 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavor {
    #[default]
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mariadb")]
    MariaDb,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::MySql => "mysql",
            Flavor::MariaDb => "mariadb",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Flavor::MySql),
            "mariadb" => Ok(Flavor::MariaDb),
            other => Err(CdcError::GtidError(format!("Unknown flavor: {:?}", other))),
        }
    }
}

/// GTID 범위 (sequence 범위, 양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(CdcError::GtidError(format!(
                "Invalid range: {} > {}",
                start, end
            )));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }

    pub fn merge(&self, other: &GtidRange) -> Option<GtidRange> {
        // 연접한 범위 병합
        if self.end.saturating_add(1) >= other.start && other.end.saturating_add(1) >= self.start {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let invalid = || CdcError::GtidError(format!("Invalid interval: {:?}", s));
        match s.split_once('-') {
            Some((start, end)) => {
                let start = start.parse::<u64>().map_err(|_| invalid())?;
                let end = end.parse::<u64>().map_err(|_| invalid())?;
                GtidRange::new(start, end)
            }
            None => {
                let seq = s.parse::<u64>().map_err(|_| invalid())?;
                GtidRange::new(seq, seq)
            }
        }
    }
}

impl fmt::Display for GtidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// UUID별 GTID 범위들 (항상 정렬 + 병합된 상태 유지)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UUIDGtidSet {
    pub uuid: String,
    pub ranges: Vec<GtidRange>,
}

impl UUIDGtidSet {
    pub fn new(uuid: String) -> Self {
        UUIDGtidSet {
            uuid,
            ranges: Vec::new(),
        }
    }

    pub fn add_range(&mut self, range: GtidRange) {
        self.ranges.push(range);
        self.ranges.sort();

        let mut merged: Vec<GtidRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => match last.merge(&r) {
                    Some(m) => *last = m,
                    None => merged.push(r),
                },
                None => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    pub fn add_gtid(&mut self, sequence: u64) {
        self.add_range(GtidRange {
            start: sequence,
            end: sequence,
        });
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(sequence))
    }
}

impl fmt::Display for UUIDGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)?;
        for r in &self.ranges {
            write!(f, ":{}", r)?;
        }
        Ok(())
    }
}

/// MySQL GTID 집합 (여러 UUID)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    pub sets: BTreeMap<String, UUIDGtidSet>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            sets: BTreeMap::new(),
        }
    }

    /// GTID 문자열 파싱 (format: "uuid1:1-100:200,uuid2:1-50")
    ///
    /// `@@gtid_executed`는 항목 사이에 개행을 넣으므로 공백은 무시합니다.
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();
        let gtid_str = gtid_str.trim();

        if gtid_str.is_empty() || gtid_str == "NULL" {
            return Ok(gtid_set);
        }

        for item in gtid_str.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let mut parts = item.split(':');
            let sid = parts.next().unwrap_or_default().trim();
            let uuid = Uuid::parse_str(sid)
                .map_err(|_| CdcError::GtidError(format!("Invalid SID: {:?}", sid)))?
                .hyphenated()
                .to_string();

            let uuid_set = gtid_set
                .sets
                .entry(uuid.clone())
                .or_insert_with(|| UUIDGtidSet::new(uuid));

            let mut any = false;
            for interval in parts {
                uuid_set.add_range(GtidRange::parse(interval.trim())?);
                any = true;
            }
            if !any {
                return Err(CdcError::GtidError(format!(
                    "Missing interval in {:?}",
                    item
                )));
            }
        }

        Ok(gtid_set)
    }

    pub fn add_gtid(&mut self, gtid: &str) -> Result<()> {
        // gtid format: "uuid:sequence"
        let (sid, seq) = gtid
            .split_once(':')
            .ok_or_else(|| CdcError::GtidError(format!("Invalid GTID format: {}", gtid)))?;

        let uuid = Uuid::parse_str(sid)
            .map_err(|_| CdcError::GtidError(format!("Invalid SID: {}", sid)))?
            .hyphenated()
            .to_string();
        let sequence = seq
            .parse::<u64>()
            .map_err(|_| CdcError::GtidError(format!("Invalid sequence: {}", seq)))?;

        self.sets
            .entry(uuid.clone())
            .or_insert_with(|| UUIDGtidSet::new(uuid))
            .add_gtid(sequence);
        Ok(())
    }

    pub fn contains(&self, gtid: &str) -> bool {
        let Some((sid, seq)) = gtid.split_once(':') else {
            return false;
        };
        let (Ok(uuid), Ok(sequence)) = (Uuid::parse_str(sid), seq.parse::<u64>()) else {
            return false;
        };
        self.sets
            .get(&uuid.hyphenated().to_string())
            .map(|s| s.contains(sequence))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|set| set.ranges.is_empty())
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .sets
            .values()
            .filter(|s| !s.ranges.is_empty())
            .map(|s| s.to_string())
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// MariaDB GTID (domain-server-sequence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MariadbGtid {
    pub domain_id: u32,
    pub server_id: u32,
    pub sequence: u64,
}

impl FromStr for MariadbGtid {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CdcError::GtidError(format!("Invalid MariaDB GTID: {:?}", s));
        let mut parts = s.trim().splitn(3, '-');
        let domain_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let server_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let sequence = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        Ok(MariadbGtid {
            domain_id,
            server_id,
            sequence,
        })
    }
}

impl fmt::Display for MariadbGtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.domain_id, self.server_id, self.sequence)
    }
}

/// MariaDB GTID 집합: 도메인별 마지막 GTID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MariadbGtidSet {
    pub domains: BTreeMap<u32, MariadbGtid>,
}

impl MariadbGtidSet {
    pub fn parse(s: &str) -> Result<Self> {
        let mut set = MariadbGtidSet::default();
        let s = s.trim();
        if s.is_empty() || s == "NULL" {
            return Ok(set);
        }

        for item in s.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let gtid: MariadbGtid = item.parse()?;
            if set.domains.insert(gtid.domain_id, gtid).is_some() {
                return Err(CdcError::GtidError(format!(
                    "Duplicate domain {} in {:?}",
                    gtid.domain_id, s
                )));
            }
        }
        Ok(set)
    }

    /// 도메인의 위치를 갱신 (sequence는 줄어들지 않음)
    pub fn update(&mut self, gtid: MariadbGtid) {
        let entry = self.domains.entry(gtid.domain_id).or_insert(gtid);
        if gtid.sequence >= entry.sequence {
            *entry = gtid;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl fmt::Display for MariadbGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.domains.values().map(|g| g.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Flavor가 결정된 트랜잭션 집합
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionSet {
    MySql(GtidSet),
    MariaDb(MariadbGtidSet),
}

impl TransactionSet {
    pub fn parse(flavor: Flavor, s: &str) -> Result<Self> {
        match flavor {
            Flavor::MySql => Ok(TransactionSet::MySql(GtidSet::parse(s)?)),
            Flavor::MariaDb => Ok(TransactionSet::MariaDb(MariadbGtidSet::parse(s)?)),
        }
    }

    pub fn empty(flavor: Flavor) -> Self {
        match flavor {
            Flavor::MySql => TransactionSet::MySql(GtidSet::new()),
            Flavor::MariaDb => TransactionSet::MariaDb(MariadbGtidSet::default()),
        }
    }

    pub fn flavor(&self) -> Flavor {
        match self {
            TransactionSet::MySql(_) => Flavor::MySql,
            TransactionSet::MariaDb(_) => Flavor::MariaDb,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TransactionSet::MySql(s) => s.is_empty(),
            TransactionSet::MariaDb(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for TransactionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionSet::MySql(s) => s.fmt(f),
            TransactionSet::MariaDb(s) => s.fmt(f),
        }
    }
}
