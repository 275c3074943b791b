//! 복제 엔진이 전달하는 이벤트와 구독자에게 넘기는 메시지 정의

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// 셀 값 (다양한 MySQL 타입 지원)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Date(String),
    Time(String),
}

impl CellValue {
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::String(s) => Some(s.clone()),
            CellValue::Int64(i) => Some(i.to_string()),
            CellValue::UInt64(u) => Some(u.to_string()),
            CellValue::Double(d) => Some(d.to_string()),
            CellValue::DateTime(dt) => Some(dt.to_rfc3339()),
            CellValue::Date(s) | CellValue::Time(s) => Some(s.clone()),
            CellValue::Null => Some("NULL".to_string()),
            _ => None,
        }
    }

    /// 바이트 배열을 텍스트로 변환 (그 외 값은 그대로)
    pub fn into_text(self) -> CellValue {
        match self {
            CellValue::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => CellValue::String(s),
                Err(e) => CellValue::String(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
            other => other,
        }
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (바이트)
    pub event_size: u32,
    /// 다음 이벤트 위치
    pub log_pos: u32,
}

/// 행 변경 연산 종류
///
/// 복제 엔진은 DDL 등 다른 액션도 넘길 수 있으므로 `Other`로 보존합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowAction {
    Insert,
    Update,
    Delete,
    Other(String),
}

impl RowAction {
    pub fn as_str(&self) -> &str {
        match self {
            RowAction::Insert => "insert",
            RowAction::Update => "update",
            RowAction::Delete => "delete",
            RowAction::Other(s) => s.as_str(),
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, RowAction::Other(_))
    }
}

impl From<&str> for RowAction {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "insert" => RowAction::Insert,
            "update" => RowAction::Update,
            "delete" => RowAction::Delete,
            other => RowAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RowAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 행 이벤트가 가리키는 테이블과 컬럼 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// 컬럼명 (행 값과 같은 순서)
    pub columns: Vec<String>,
}

impl TableInfo {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<String>) -> Self {
        TableInfo {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }

    /// `schema.table` 형태의 이름
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// 한 행의 변경 전/후 이미지
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowChange {
    pub before: Option<Vec<CellValue>>,
    pub after: Option<Vec<CellValue>>,
}

impl RowChange {
    pub fn insert(after: Vec<CellValue>) -> Self {
        RowChange {
            before: None,
            after: Some(after),
        }
    }

    pub fn update(before: Vec<CellValue>, after: Vec<CellValue>) -> Self {
        RowChange {
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(before: Vec<CellValue>) -> Self {
        RowChange {
            before: Some(before),
            after: None,
        }
    }
}

/// 복제 엔진이 전달하는 행 변경 이벤트 (한 statement에 여러 행 가능)
#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent {
    pub action: RowAction,
    pub table: TableInfo,
    pub rows: Vec<RowChange>,
    /// 스냅샷에서 만든 이벤트에는 헤더가 없음
    pub header: Option<EventHeader>,
}

/// 컬럼명 → 값
pub type RowData = HashMap<String, CellValue>;

/// 구독자에게 전달되는 정규화된 메시지
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub action: RowAction,
    pub table: String,
    pub data: RowData,
    /// UPDATE의 변경 전 이미지
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<RowData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_action_from_str() {
        assert_eq!(RowAction::from("UPDATE"), RowAction::Update);
        assert_eq!(RowAction::from("alter"), RowAction::Other("alter".to_string()));
        assert!(!RowAction::from("alter").is_mutation());
    }

    #[test]
    fn test_bytes_into_text() {
        let v = CellValue::Bytes(b"hello".to_vec()).into_text();
        assert_eq!(v, CellValue::String("hello".to_string()));
        assert_eq!(CellValue::Int64(3).into_text(), CellValue::Int64(3));
    }

    #[test]
    fn test_message_json() {
        let mut data = RowData::new();
        data.insert("id".to_string(), CellValue::Int64(7));
        let msg = Message {
            action: RowAction::Insert,
            table: "shop.orders".to_string(),
            data,
            old: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "insert");
        assert_eq!(json["data"]["id"], 7);
        assert!(json.get("old").is_none());
    }
}
