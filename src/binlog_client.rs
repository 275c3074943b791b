//! MySQL Binlog 클라이언트
//!
//! mysql_async의 binlog 스트림 위에 `ReplicationEngine`을 구현합니다.
//! 프로토콜 디코딩은 mysql_async가 맡고, 여기서는 이벤트를 `RowsEvent`와
//! 위치 동기화 알림으로 바꿔 핸들러에 넘깁니다.

use crate::connection::{cell_value, ConnectionConfig, MySqlConnection};
use crate::engine::ReplicationEngine;
use crate::error::{CdcError, Result};
use crate::events::{CellValue, EventHeader, RowAction, RowChange, RowsEvent, TableInfo};
use crate::gtid::{Flavor, GtidSet, MariadbGtid, TransactionSet};
use crate::handler::{in_schema, table_filter, EventHandler};
use crate::offset::BinlogPosition;
use async_trait::async_trait;
use futures_util::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::prelude::*;
use mysql_async::{BinlogStream, BinlogStreamRequest, Sid};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 스냅샷 시 이벤트 하나에 담는 최대 행 수
const DUMP_BATCH_ROWS: usize = 100;

/// MariaDB GTID_EVENT 타입 코드 (mysql_async가 디코딩하지 않음)
const MARIADB_GTID_EVENT: u8 = 162;

/// 스트리밍 시작 지점
enum StartFrom {
    Position(BinlogPosition),
    Gtid(TransactionSet),
}

/// 커밋을 기다리는 트랜잭션의 GTID
#[derive(Debug, Clone, PartialEq)]
enum PendingGtid {
    MySql(String),
    MariaDb(MariadbGtid),
}

/// Binlog 클라이언트
pub struct BinlogClient {
    config: ConnectionConfig,
    flavor: Flavor,
    tables: Vec<String>,
    filter: HashSet<String>,
    closed: watch::Sender<bool>,
}

impl BinlogClient {
    /// 새 Binlog 클라이언트 생성. `tables`가 비어 있으면 스키마의 모든 테이블
    pub fn new(config: ConnectionConfig, flavor: Flavor, tables: Vec<String>) -> Self {
        let filter = table_filter(config.schema(), &tables);
        let (closed, _) = watch::channel(false);
        BinlogClient {
            config,
            flavor,
            tables,
            filter,
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn includes(&self, schema: &str, table: &str) -> bool {
        let name = format!("{}.{}", schema, table).to_lowercase();
        if self.filter.is_empty() {
            return in_schema(&self.config.schema().to_lowercase(), &name);
        }
        self.filter.contains(&name)
    }

    /// 스냅샷 대상 테이블 (schema, table)
    async fn dump_targets(&self, conn: &mut MySqlConnection) -> Result<Vec<(String, String)>> {
        let schema = self.config.schema().to_string();
        if self.tables.is_empty() {
            let tables = conn.get_tables(&schema).await?;
            return Ok(tables.into_iter().map(|t| (schema.clone(), t)).collect());
        }

        Ok(self
            .tables
            .iter()
            .map(|t| match t.split_once('.') {
                Some((s, t)) => (s.to_string(), t.to_string()),
                None => (schema.clone(), t.clone()),
            })
            .collect())
    }

    async fn open_stream(&self, start: &StartFrom) -> Result<BinlogStream> {
        let mut conn = MySqlConnection::connect(self.config.clone()).await?;

        let format = conn.get_binlog_format().await?;
        if !format.eq_ignore_ascii_case("ROW") {
            warn!("binlog_format is {}, row events will be missing", format);
        }

        let request = BinlogStreamRequest::new(self.config.server_id);
        match start {
            StartFrom::Position(position) => {
                info!("Starting binlog streaming from {}", position);
                let request = request
                    .with_filename(position.filename.as_bytes())
                    .with_pos(position.position);
                Ok(conn.into_inner().get_binlog_stream(request).await?)
            }
            StartFrom::Gtid(TransactionSet::MySql(set)) => {
                if !conn.is_gtid_mode_enabled().await? {
                    return Err(CdcError::ConfigError(
                        "gtid replay requested but gtid_mode is not ON".to_string(),
                    ));
                }
                info!("Starting binlog streaming from gtid set {:?}", set.to_string());
                let sids = to_sids(set)?;
                let request = request.with_gtid().with_gtid_set(sids);
                Ok(conn.into_inner().get_binlog_stream(request).await?)
            }
            StartFrom::Gtid(TransactionSet::MariaDb(set)) => {
                info!("Starting binlog streaming from MariaDB gtid {:?}", set.to_string());
                let mut conn = conn.into_inner();
                // MariaDB는 세션 변수로 시작 GTID를 지정하고 파일명 없이 덤프를 요청
                conn.query_drop("SET @mariadb_slave_capability = 4").await?;
                conn.exec_drop("SET @slave_connect_state = ?", (set.to_string(),))
                    .await?;
                conn.query_drop("SET @slave_gtid_strict_mode = 0").await?;
                Ok(conn.get_binlog_stream(request).await?)
            }
        }
    }

    async fn stream(&self, start: StartFrom, handler: Arc<dyn EventHandler>) -> Result<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(());
        }

        let mut meta = MySqlConnection::connect(self.config.clone()).await?;
        let stream = self.open_stream(&start).await?;
        tokio::pin!(stream);

        let mut filename = match &start {
            StartFrom::Position(p) => p.filename.clone(),
            StartFrom::Gtid(_) => String::new(),
        };
        let mut gtid_state = match start {
            StartFrom::Gtid(set) => Some(set),
            StartFrom::Position(_) => None,
        };
        let mut pending_gtid: Option<PendingGtid> = None;
        let mut columns: HashMap<String, Vec<String>> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = closed.changed() => {
                    info!("Binlog stream closed");
                    break;
                }
                next = stream.next() => match next {
                    Some(event) => event?,
                    None => {
                        info!("Binlog streaming ended");
                        break;
                    }
                },
            };

            let raw = event.header();
            let header = EventHeader {
                timestamp: raw.timestamp(),
                server_id: raw.server_id(),
                event_size: raw.event_size(),
                log_pos: raw.log_pos(),
            };

            if self.flavor == Flavor::MariaDb && raw.event_type_raw() == MARIADB_GTID_EVENT {
                pending_gtid = Some(PendingGtid::MariaDb(decode_mariadb_gtid(
                    header.server_id,
                    event.data(),
                )?));
                continue;
            }

            match event.read_data()? {
                Some(EventData::RotateEvent(e)) => {
                    filename = e.name().into_owned();
                    let position = BinlogPosition::new(filename.clone(), e.position());
                    debug!("Rotate to {}", position);
                    handler
                        .on_pos_synced(Some(&header), &position, gtid_state.as_ref(), true)
                        .await?;
                }
                Some(EventData::GtidEvent(e)) => {
                    pending_gtid = Some(PendingGtid::MySql(format!(
                        "{}:{}",
                        Uuid::from_bytes(e.sid()),
                        e.gno()
                    )));
                }
                Some(EventData::XidEvent(_)) => {
                    commit_gtid(&mut gtid_state, pending_gtid.take())?;
                    let position = BinlogPosition::new(filename.clone(), header.log_pos as u64);
                    handler
                        .on_pos_synced(Some(&header), &position, gtid_state.as_ref(), false)
                        .await?;
                }
                Some(EventData::QueryEvent(q)) => {
                    let query = q.query();
                    if query.eq_ignore_ascii_case("BEGIN") {
                        continue;
                    }
                    // DDL: 컬럼 구성이 바뀌었을 수 있음
                    debug!("Query event on {}: {}", q.schema(), query);
                    columns.clear();
                    commit_gtid(&mut gtid_state, pending_gtid.take())?;
                    let position = BinlogPosition::new(filename.clone(), header.log_pos as u64);
                    handler
                        .on_pos_synced(Some(&header), &position, gtid_state.as_ref(), true)
                        .await?;
                }
                Some(EventData::RowsEvent(rows)) => {
                    let Some(tme) = stream.get_tme(rows.table_id()) else {
                        warn!("Rows event for unknown table id {}", rows.table_id());
                        continue;
                    };
                    let schema = tme.database_name().into_owned();
                    let table = tme.table_name().into_owned();
                    if !self.includes(&schema, &table) {
                        continue;
                    }

                    let key = format!("{}.{}", schema, table);
                    if !columns.contains_key(&key) {
                        let names = meta
                            .get_table_schema(&schema, &table)
                            .await?
                            .into_iter()
                            .map(|c| c.name)
                            .collect();
                        columns.insert(key.clone(), names);
                    }

                    let action = match &rows {
                        RowsEventData::WriteRowsEventV1(_) | RowsEventData::WriteRowsEvent(_) => {
                            RowAction::Insert
                        }
                        RowsEventData::DeleteRowsEventV1(_) | RowsEventData::DeleteRowsEvent(_) => {
                            RowAction::Delete
                        }
                        _ => RowAction::Update,
                    };

                    let mut changes = Vec::new();
                    for row in rows.rows(tme) {
                        let (before, after) = row?;
                        changes.push(RowChange {
                            before: before.map(row_values),
                            after: after.map(row_values),
                        });
                    }

                    let event = RowsEvent {
                        action,
                        table: TableInfo::new(schema, table, columns[&key].clone()),
                        rows: changes,
                        header: Some(header),
                    };
                    handler.on_row(&event).await?;
                }
                _ => {}
            }
        }

        meta.close().await
    }
}

/// 커밋된 트랜잭션의 GTID를 누적 집합에 반영
fn commit_gtid(state: &mut Option<TransactionSet>, gtid: Option<PendingGtid>) -> Result<()> {
    match (state.as_mut(), gtid) {
        (Some(TransactionSet::MySql(set)), Some(PendingGtid::MySql(gtid))) => set.add_gtid(&gtid)?,
        (Some(TransactionSet::MariaDb(set)), Some(PendingGtid::MariaDb(gtid))) => set.update(gtid),
        _ => {}
    }
    Ok(())
}

/// MariaDB GTID_EVENT 본문: seq_no(u64 LE), domain_id(u32 LE), flags ...
/// server_id는 이벤트 헤더에서 가져온다.
fn decode_mariadb_gtid(server_id: u32, data: &[u8]) -> Result<MariadbGtid> {
    let short = || CdcError::GtidError(format!("MariaDB GTID event too short: {} bytes", data.len()));
    let sequence = data
        .get(0..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(short)?;
    let domain_id = data
        .get(8..12)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(short)?;

    Ok(MariadbGtid {
        domain_id,
        server_id,
        sequence,
    })
}

fn to_sids(set: &GtidSet) -> Result<Vec<Sid<'static>>> {
    set.sets
        .values()
        .filter(|s| !s.ranges.is_empty())
        .map(|s| {
            s.to_string()
                .parse::<Sid<'static>>()
                .map_err(|e| CdcError::GtidError(format!("Invalid SID {}: {:?}", s, e)))
        })
        .collect()
}

fn row_values(row: BinlogRow) -> Vec<CellValue> {
    (0..row.len())
        .map(|i| match row.as_ref(i) {
            Some(BinlogValue::Value(v)) => cell_value(v.clone()),
            // JSON 부분 업데이트 등은 원문 표현으로 전달
            Some(other) => CellValue::String(format!("{:?}", other)),
            None => CellValue::Null,
        })
        .collect()
}

#[async_trait]
impl ReplicationEngine for BinlogClient {
    async fn dump(&self, handler: Arc<dyn EventHandler>) -> Result<()> {
        let mut conn = MySqlConnection::connect(self.config.clone()).await?;

        // 스냅샷 전에 위치를 잡아 두면 스냅샷 중 변경분은 스트림에서 다시 전달됨
        let position = conn.get_master_position().await?;
        let set = conn.get_gtid_set(self.flavor).await?;
        info!("Snapshot starting at {}", position);

        for (schema, table) in self.dump_targets(&mut conn).await? {
            if self.is_closed() {
                info!("Snapshot interrupted by close");
                return conn.close().await;
            }
            conn.scan_table(&schema, &table, DUMP_BATCH_ROWS, handler.as_ref())
                .await?;
        }

        handler
            .on_pos_synced(None, &position, Some(&set), true)
            .await?;
        conn.close().await
    }

    async fn master_position(&self) -> Result<BinlogPosition> {
        let mut conn = MySqlConnection::connect(self.config.clone()).await?;
        let position = conn.get_master_position().await?;
        conn.close().await?;
        Ok(position)
    }

    async fn master_gtid_set(&self) -> Result<TransactionSet> {
        let mut conn = MySqlConnection::connect(self.config.clone()).await?;
        let set = conn.get_gtid_set(self.flavor).await?;
        conn.close().await?;
        Ok(set)
    }

    async fn run_from(
        &self,
        position: BinlogPosition,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        self.stream(StartFrom::Position(position), handler).await
    }

    async fn start_from_gtid(
        &self,
        set: TransactionSet,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        self.stream(StartFrom::Gtid(set), handler).await
    }

    fn close(&self) {
        info!("Closing binlog client");
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_inclusion() {
        let mut config = ConnectionConfig::new("localhost", "root");
        config.database = Some("shop".to_string());
        let client = BinlogClient::new(config, Flavor::MySql, vec!["orders".to_string()]);

        assert!(client.includes("shop", "orders"));
        assert!(client.includes("SHOP", "Orders"));
        assert!(!client.includes("shop", "logs"));
    }

    #[test]
    fn test_empty_table_list_stays_in_schema() {
        let mut config = ConnectionConfig::new("localhost", "root");
        config.database = Some("Shop".to_string());
        let client = BinlogClient::new(config, Flavor::MySql, Vec::new());

        assert!(client.includes("shop", "logs"));
        assert!(!client.includes("mysql", "user"));
    }

    #[test]
    fn test_close_is_sticky() {
        let client = BinlogClient::new(ConnectionConfig::default(), Flavor::MySql, Vec::new());
        assert!(!client.is_closed());
        client.close();
        client.close();
        assert!(client.is_closed());
    }

    #[test]
    fn test_commit_gtid_accumulates() {
        let sid = "550e8400-e29b-41d4-a716-446655440000";
        let mut state = Some(TransactionSet::MySql(
            GtidSet::parse(&format!("{}:1-4", sid)).unwrap(),
        ));
        commit_gtid(&mut state, Some(PendingGtid::MySql(format!("{}:5", sid)))).unwrap();
        assert_eq!(state.unwrap().to_string(), format!("{}:1-5", sid));

        let mut none = None;
        commit_gtid(&mut none, Some(PendingGtid::MySql(format!("{}:5", sid)))).unwrap();
        assert!(none.is_none());
    }

    fn mariadb_gtid_payload(sequence: u64, domain_id: u32) -> Vec<u8> {
        let mut data = sequence.to_le_bytes().to_vec();
        data.extend_from_slice(&domain_id.to_le_bytes());
        // flags
        data.push(0x01);
        data
    }

    #[test]
    fn test_decode_mariadb_gtid() {
        let gtid = decode_mariadb_gtid(7, &mariadb_gtid_payload(101, 2)).unwrap();
        assert_eq!(gtid.to_string(), "2-7-101");

        let err = decode_mariadb_gtid(7, &[0u8; 10]).unwrap_err();
        assert!(matches!(err, CdcError::GtidError(_)));
    }

    #[test]
    fn test_mariadb_set_advances_on_commit() {
        let mut state = Some(TransactionSet::parse(Flavor::MariaDb, "0-1-100").unwrap());

        for sequence in 101..=103 {
            let gtid = decode_mariadb_gtid(1, &mariadb_gtid_payload(sequence, 0)).unwrap();
            commit_gtid(&mut state, Some(PendingGtid::MariaDb(gtid))).unwrap();
        }
        let gtid = decode_mariadb_gtid(5, &mariadb_gtid_payload(9, 3)).unwrap();
        commit_gtid(&mut state, Some(PendingGtid::MariaDb(gtid))).unwrap();

        assert_eq!(state.unwrap().to_string(), "0-1-103,3-5-9");
    }

    #[test]
    fn test_commit_ignores_other_flavor_gtid() {
        let mut state = Some(TransactionSet::parse(Flavor::MariaDb, "0-1-100").unwrap());
        commit_gtid(
            &mut state,
            Some(PendingGtid::MySql("550e8400-e29b-41d4-a716-446655440000:1".to_string())),
        )
        .unwrap();
        assert_eq!(state.unwrap().to_string(), "0-1-100");
    }
}
