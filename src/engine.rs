//! 외부 복제 엔진과의 계약
//!
//! binlog 프로토콜 디코딩, 접속, 스냅샷은 엔진이 담당합니다. `CdcEngine`은
//! 아래 기능만 사용합니다.

use crate::error::Result;
use crate::gtid::TransactionSet;
use crate::handler::EventHandler;
use crate::offset::BinlogPosition;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    /// 설정된 테이블 전체 스냅샷. 완료 시 `on_pos_synced`로 체크포인트를 채운다
    async fn dump(&self, handler: Arc<dyn EventHandler>) -> Result<()>;

    /// 소스의 현재 binlog 위치
    async fn master_position(&self) -> Result<BinlogPosition>;

    /// 소스의 현재 실행된 GTID 집합
    async fn master_gtid_set(&self) -> Result<TransactionSet>;

    /// 위치 모드 스트리밍. 스트림이 끝나거나 `close()`될 때까지 반환하지 않음
    async fn run_from(&self, position: BinlogPosition, handler: Arc<dyn EventHandler>)
        -> Result<()>;

    /// GTID 모드 스트리밍. 빈 집합이면 엔진이 보존 중인 가장 오래된 지점부터
    async fn start_from_gtid(
        &self,
        set: TransactionSet,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()>;

    /// 연결 해제. 진행 중인 콜백을 중단하지 않음
    fn close(&self);
}
