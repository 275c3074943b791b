//! Binlog 처리 위치 추적
//!
//! Binlog 파일명 + 위치로 정확한 재시작 지점을 추적합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Binlog 파일 위치 정보
///
/// `Default`는 "아직 위치 없음"을 뜻하는 zero value (빈 파일명, 0) 입니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.filename
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
    }

    pub fn is_zero(&self) -> bool {
        self.filename.is_empty() && self.position == 0
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BinlogPosition {
    /// 파일 시퀀스 → 오프셋 순. 시퀀스가 없으면 파일명 사전순으로 대체
    fn cmp(&self, other: &Self) -> Ordering {
        let by_file = match (self.file_sequence(), other.file_sequence()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.filename.cmp(&other.filename),
        };
        by_file
            .then_with(|| self.position.cmp(&other.position))
            .then_with(|| self.filename.cmp(&other.filename))
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// CDC 엔진 생명주기 상태
///
/// `Uninitialized → Initializing → Running → Closed`, `Closed`에서 되돌아가지 않음
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Uninitialized,
    /// 체크포인트 확인 / 스냅샷 / 최신 위치 캡처 중
    Initializing,
    /// 스트리밍 처리 중
    Running,
    /// 종료됨
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Uninitialized => "uninitialized",
            ServerState::Initializing => "initializing",
            ServerState::Running => "running",
            ServerState::Closed => "closed",
        };
        f.write_str(s)
    }
}
