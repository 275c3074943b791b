//! MySQL Binlog CDC 릴레이 핵심 구현
//!
//! MySQL/MariaDB 바이너리 로그를 읽어 행 변경 사항을 구독자 콜백으로 전달합니다.
//! 주요 기능:
//! - 체크포인트 저장소 (메모리, Redis)
//! - 테이블/액션 필터링 및 행 단위 메시지 생성
//! - 재개 / 스냅샷 / 최신 위치 시작 전략
//! - GTID 집합 및 binlog 위치 관리

pub mod binlog_client;
pub mod cdc_engine;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod gtid;
pub mod handler;
pub mod offset;
pub mod store;

pub use binlog_client::BinlogClient;
pub use cdc_engine::CdcEngine;
pub use config::{CdcConfig, ReplayMode};
pub use connection::MySqlConnection;
pub use engine::ReplicationEngine;
pub use error::{CdcError, Phase, Result};
pub use events::{CellValue, Message, RowAction, RowsEvent};
pub use gtid::{Flavor, GtidSet, MariadbGtidSet, TransactionSet};
pub use handler::{EventHandler, EventRouter, OnMessage, RowBatchMode};
pub use offset::{BinlogPosition, ServerState};
pub use store::{BinlogStore, MemoryStore, RedisStore};
