//! MySQL 데이터베이스 연결 관리
//!
//! 마스터 위치 / GTID 조회, 테이블 메타데이터 조회, 스냅샷용 테이블 스캔을 담당합니다.

use crate::error::{CdcError, Result};
use crate::events::{CellValue, RowAction, RowChange, RowsEvent, TableInfo};
use crate::gtid::{Flavor, TransactionSet};
use crate::handler::EventHandler;
use crate::offset::BinlogPosition;
use chrono::NaiveDate;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row, Value};
use std::time::Duration;
use tracing::{debug, info};

/// MySQL 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub server_id: u32,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1001,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn schema(&self) -> &str {
        self.database.as_deref().unwrap_or_default()
    }

    fn build_opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone())
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()))
            .db_name(self.database.clone())
            .into()
    }
}

/// MySQL 연결 래퍼
pub struct MySqlConnection {
    conn: Conn,
    config: ConnectionConfig,
}

impl MySqlConnection {
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let opts = config.build_opts();

        let conn = tokio::time::timeout(config.timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                CdcError::ConnectionError(format!(
                    "Timed out connecting to {}:{}",
                    config.hostname, config.port
                ))
            })?
            .map_err(|e| CdcError::ConnectionError(format!("Failed to connect to MySQL: {}", e)))?;

        debug!("Connected to MySQL at {}:{}", config.hostname, config.port);
        Ok(MySqlConnection { conn, config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// 현재 마스터 binlog 위치
    ///
    /// MySQL 8.4부터 `SHOW MASTER STATUS`가 없어져 `SHOW BINARY LOG STATUS`로 재시도합니다.
    pub async fn get_master_position(&mut self) -> Result<BinlogPosition> {
        let row: Option<Row> = match self.conn.query_first("SHOW MASTER STATUS").await {
            Ok(row) => row,
            Err(e) => {
                debug!("SHOW MASTER STATUS failed ({}), trying SHOW BINARY LOG STATUS", e);
                self.conn
                    .query_first("SHOW BINARY LOG STATUS")
                    .await
                    .map_err(|e| {
                        CdcError::QueryError(format!("Failed to query binlog status: {}", e))
                    })?
            }
        };

        let row = row.ok_or_else(|| {
            CdcError::QueryError("No binlog status available (is log_bin enabled?)".to_string())
        })?;

        let file: String = column(&row, 0, "File")?;
        let position: u64 = column(&row, 1, "Position")?;
        Ok(BinlogPosition::new(file, position))
    }

    /// 현재 실행된 GTID 집합
    pub async fn get_gtid_set(&mut self, flavor: Flavor) -> Result<TransactionSet> {
        let query = match flavor {
            Flavor::MySql => "SELECT @@global.gtid_executed",
            Flavor::MariaDb => "SELECT @@global.gtid_current_pos",
        };

        let result: Option<(Option<String>,)> = self
            .conn
            .query_first(query)
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query gtid set: {}", e)))?;

        let text = result.and_then(|(v,)| v).unwrap_or_default();
        TransactionSet::parse(flavor, &text)
    }

    /// GTID 모드 활성 여부 확인
    pub async fn is_gtid_mode_enabled(&mut self) -> Result<bool> {
        Ok(self
            .get_variable("gtid_mode")
            .await?
            .is_some_and(|v| v.eq_ignore_ascii_case("ON")))
    }

    /// 변수 조회
    pub async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        let query = format!("SHOW GLOBAL VARIABLES LIKE '{}'", name);
        let result: Vec<(String, String)> = self
            .conn
            .query(query)
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query {}: {}", name, e)))?;

        Ok(result.into_iter().next().map(|(_, v)| v))
    }

    /// Binlog 형식 확인 (ROW, STATEMENT, MIXED)
    pub async fn get_binlog_format(&mut self) -> Result<String> {
        self.get_variable("binlog_format")
            .await?
            .ok_or_else(|| CdcError::QueryError("Binlog format not found".to_string()))
    }

    /// 테이블 스키마 조회
    pub async fn get_table_schema(&mut self, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let result: Vec<(String, String, String, String, String)> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, EXTRA \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (database, table),
            )
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query table schema: {}", e)))?;

        Ok(result
            .into_iter()
            .map(|(name, column_type, is_nullable, column_key, extra)| ColumnInfo {
                name,
                column_type,
                nullable: is_nullable == "YES",
                is_key: !column_key.is_empty(),
                extra,
            })
            .collect())
    }

    /// 데이터베이스의 모든 테이블 나열
    pub async fn get_tables(&mut self, database: &str) -> Result<Vec<String>> {
        let result: Vec<(String,)> = self
            .conn
            .exec(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'",
                (database,),
            )
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query tables: {}", e)))?;

        Ok(result.into_iter().map(|(table,)| table).collect())
    }

    /// 테이블 전체를 읽어 INSERT 행 이벤트로 핸들러에 전달
    ///
    /// 한 이벤트에 최대 `batch_size` 행을 담습니다. 읽은 행 수를 반환합니다.
    pub async fn scan_table(
        &mut self,
        database: &str,
        table: &str,
        batch_size: usize,
        handler: &dyn EventHandler,
    ) -> Result<u64> {
        let query = format!(
            "SELECT * FROM `{}`.`{}`",
            database.replace('`', "``"),
            table.replace('`', "``")
        );
        debug!("Snapshot query: {}", query);

        let mut result = self
            .conn
            .query_iter(query)
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to scan {}.{}: {}", database, table, e)))?;

        let mut info = TableInfo::new(database, table, Vec::new());
        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0u64;

        while let Some(row) = result
            .next()
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to scan {}.{}: {}", database, table, e)))?
        {
            if info.columns.is_empty() {
                info.columns = row
                    .columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect();
            }

            let values = (0..row.len())
                .map(|i| row.as_ref(i).cloned().map(cell_value).unwrap_or(CellValue::Null))
                .collect();
            batch.push(RowChange::insert(values));
            total += 1;

            if batch.len() >= batch_size {
                flush(handler, &info, &mut batch).await?;
            }
        }
        flush(handler, &info, &mut batch).await?;

        info!("Snapshot complete for {}.{}: {} rows", database, table, total);
        Ok(total)
    }

    /// 내부 연결을 꺼낸다 (binlog 스트림 요청용)
    pub fn into_inner(self) -> Conn {
        self.conn
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| CdcError::ConnectionError(format!("Failed to disconnect: {}", e)))
    }
}

async fn flush(handler: &dyn EventHandler, info: &TableInfo, batch: &mut Vec<RowChange>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let event = RowsEvent {
        action: RowAction::Insert,
        table: info.clone(),
        rows: std::mem::take(batch),
        header: None,
    };
    handler.on_row(&event).await
}

fn column<T: FromValue>(row: &Row, index: usize, name: &str) -> Result<T> {
    match row.get_opt::<T, usize>(index) {
        Some(Ok(v)) => Ok(v),
        Some(Err(e)) => Err(CdcError::QueryError(format!("Invalid {} column: {:?}", name, e))),
        None => Err(CdcError::QueryError(format!("Missing {} column", name))),
    }
}

/// MySQL 값을 셀 값으로 변환
pub fn cell_value(value: Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(b) => CellValue::Bytes(b),
        Value::Int(i) => CellValue::Int64(i),
        Value::UInt(u) => CellValue::UInt64(u),
        Value::Float(f) => CellValue::Float(f),
        Value::Double(d) => CellValue::Double(d),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| {
                    d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
                })
                .map(|dt| CellValue::DateTime(dt.and_utc()))
                // 0000-00-00 같은 값은 chrono로 표현되지 않음
                .unwrap_or_else(|| {
                    CellValue::Date(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))
                })
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = days * 24 + hours as u32;
            if micros == 0 {
                CellValue::Time(format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds))
            } else {
                CellValue::Time(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, hours, minutes, seconds, micros
                ))
            }
        }
    }
}

/// 테이블 컬럼 정보
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub is_key: bool,
    pub extra: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.schema(), "");
    }

    #[test]
    fn test_connection_config_new() {
        let config = ConnectionConfig::new("127.0.0.1", "root");
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.username, "root");
    }

    #[test]
    fn test_cell_value_dates() {
        let v = cell_value(Value::Date(2024, 2, 29, 13, 5, 0, 0));
        assert_eq!(
            v.as_string().unwrap(),
            "2024-02-29T13:05:00+00:00".to_string()
        );

        let zero = cell_value(Value::Date(0, 0, 0, 0, 0, 0, 0));
        assert_eq!(zero, CellValue::Date("0000-00-00 00:00:00".to_string()));
    }

    #[test]
    fn test_cell_value_time() {
        assert_eq!(
            cell_value(Value::Time(true, 1, 2, 3, 4, 0)),
            CellValue::Time("-26:03:04".to_string())
        );
        assert_eq!(cell_value(Value::NULL), CellValue::Null);
        assert_eq!(
            cell_value(Value::Bytes(b"x".to_vec())),
            CellValue::Bytes(b"x".to_vec())
        );
    }
}
