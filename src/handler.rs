//! 이벤트 필터링 및 전달
//!
//! 복제 엔진이 넘기는 행 이벤트를 테이블/액션 기준으로 거르고, 행마다
//! `Message`를 만들어 구독자 콜백에 동기적으로 넘깁니다. 위치 동기화 알림은
//! 체크포인트 저장소에 기록합니다.

use crate::error::{Phase, PhaseExt, Result};
use crate::events::{
    CellValue, EventHeader, Message, RowAction, RowChange, RowData, RowsEvent, TableInfo,
};
use crate::gtid::TransactionSet;
use crate::offset::BinlogPosition;
use crate::store::BinlogStore;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// 구독자 콜백
pub type OnMessage = Arc<dyn Fn(Message) -> Result<()> + Send + Sync>;

/// 복제 엔진이 호출하는 핸들러
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 행 변경 이벤트
    async fn on_row(&self, event: &RowsEvent) -> Result<()>;

    /// 위치 전진 알림. `set`은 해당 재생 모드가 GTID 집합을 제공할 때만 있음
    async fn on_pos_synced(
        &self,
        header: Option<&EventHeader>,
        position: &BinlogPosition,
        set: Option<&TransactionSet>,
        force: bool,
    ) -> Result<()>;
}

/// 여러 행을 가진 이벤트의 메시지 생성 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowBatchMode {
    /// 행마다 메시지 하나
    #[default]
    PerRow,
    /// 이벤트당 마지막 행 하나만
    LastRowOnly,
}

/// 기본 콜백: 로그만 남기고 버림
pub fn log_message() -> OnMessage {
    Arc::new(|m: Message| {
        info!(table = %m.table, action = %m.action, data = ?m.data, "onMessage");
        Ok(())
    })
}

/// 설정의 테이블 목록을 소문자 `schema.table` 집합으로 만든다.
///
/// 이미 `.`을 포함한 항목은 다른 스키마를 지정한 것으로 보고 그대로 쓴다.
pub fn table_filter(schema: &str, tables: &[String]) -> HashSet<String> {
    tables
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t.contains('.') {
                t.to_lowercase()
            } else {
                format!("{}.{}", schema, t).to_lowercase()
            }
        })
        .collect()
}

/// 소문자 `schema.table` 이름이 `schema`에 속하는지. 스키마가 비어 있으면 항상 true
pub fn in_schema(schema: &str, table: &str) -> bool {
    schema.is_empty()
        || table
            .strip_prefix(schema)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// 이벤트 라우터
pub struct EventRouter {
    store: Arc<dyn BinlogStore>,
    tables: HashSet<String>,
    schema: String,
    batch_mode: RowBatchMode,
    on_message: OnMessage,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn BinlogStore>,
        schema: impl Into<String>,
        tables: &[String],
        on_message: OnMessage,
    ) -> Self {
        let schema: String = schema.into();
        let schema = schema.to_lowercase();
        EventRouter {
            store,
            tables: table_filter(&schema, tables),
            schema,
            batch_mode: RowBatchMode::default(),
            on_message,
        }
    }

    pub fn with_batch_mode(mut self, mode: RowBatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    /// 필터가 비어 있으면 라우터 스키마의 모든 테이블, 아니면 집합에 있는 테이블만
    pub fn check_table(&self, table: &str) -> bool {
        if self.tables.is_empty() {
            return in_schema(&self.schema, table);
        }
        self.tables.contains(table)
    }

    pub fn check_action(&self, action: &RowAction) -> bool {
        action.is_mutation()
    }

    fn build_message(
        &self,
        action: &RowAction,
        table: &TableInfo,
        name: &str,
        row: &RowChange,
    ) -> Message {
        let (data, old) = match action {
            RowAction::Delete => (row.before.as_deref(), None),
            RowAction::Update => (row.after.as_deref(), row.before.as_deref()),
            _ => (row.after.as_deref(), None),
        };

        Message {
            action: action.clone(),
            table: name.to_string(),
            data: data.map(|v| zip_row(&table.columns, v)).unwrap_or_default(),
            old: old.map(|v| zip_row(&table.columns, v)),
        }
    }
}

/// 컬럼명과 값을 묶는다. 메타데이터보다 값이 많으면 `@n` 이름을 붙임
fn zip_row(columns: &[String], values: &[CellValue]) -> RowData {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let name = columns
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("@{}", i + 1));
            (name, v.clone().into_text())
        })
        .collect()
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn on_row(&self, event: &RowsEvent) -> Result<()> {
        let table = event.table.qualified_name().to_lowercase();

        if !self.check_action(&event.action) {
            debug!("action skip: {}", event.action);
            return Ok(());
        }
        if !self.check_table(&table) {
            debug!("table skip: {}", table);
            return Ok(());
        }

        let rows: &[RowChange] = match self.batch_mode {
            RowBatchMode::PerRow => &event.rows,
            RowBatchMode::LastRowOnly => match event.rows.last() {
                Some(last) => std::slice::from_ref(last),
                None => &[],
            },
        };

        for row in rows {
            let message = self.build_message(&event.action, &event.table, &table, row);
            (self.on_message)(message).phase(Phase::Callback)?;
        }
        Ok(())
    }

    async fn on_pos_synced(
        &self,
        _header: Option<&EventHeader>,
        position: &BinlogPosition,
        set: Option<&TransactionSet>,
        force: bool,
    ) -> Result<()> {
        debug!(
            "OnPosSynced: position={}, set={:?}, force={}",
            position,
            set.map(|s| s.to_string()),
            force
        );

        self.store
            .set_position(position)
            .await
            .phase(Phase::CheckpointWrite)?;
        if let Some(set) = set {
            self.store
                .set_gtid_set(set)
                .await
                .phase(Phase::CheckpointWrite)?;
        }
        Ok(())
    }
}
