//! Binlog 체크포인트 저장소
//!
//! 스트림이 어디까지 처리했는지(binlog 위치 / GTID 집합)를 기록합니다.
//!
//! | 저장소 | 용도 |
//! |--------|------|
//! | `MemoryStore` | 테스트, 프로세스 수명 동안만 유지 |
//! | `RedisStore` | 재시작 후 재개가 필요한 운영 환경 |
//!
//! 쓰기는 스트림 하나가 순차적으로 하고, 읽기(진단용 위치 조회 등)는
//! 여러 곳에서 동시에 일어날 수 있습니다.

use crate::error::{CdcError, Result};
use crate::gtid::{Flavor, TransactionSet};
use crate::offset::BinlogPosition;
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::debug;

const FIELD_NAME: &str = "name";
const FIELD_POS: &str = "pos";
const FIELD_FLAVOR: &str = "flavor";
const FIELD_SET: &str = "set";

/// 체크포인트 저장소
#[async_trait]
pub trait BinlogStore: Send + Sync {
    /// 모든 필드 삭제. 레코드가 없어도 에러가 아님
    async fn reset(&self) -> Result<()>;

    /// GTID 집합 또는 binlog 파일명 중 하나라도 저장되어 있으면 true
    async fn exists(&self) -> Result<bool>;

    /// 저장된 위치. 없으면 zero value
    async fn get_position(&self) -> Result<BinlogPosition>;

    async fn set_position(&self, position: &BinlogPosition) -> Result<()>;

    /// 저장된 GTID 집합. 없으면 `None`, 저장된 문자열이 깨졌으면 `GtidError`
    async fn get_gtid_set(&self) -> Result<Option<TransactionSet>>;

    /// flavor와 직렬화된 집합을 함께 기록
    async fn set_gtid_set(&self, set: &TransactionSet) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    set: String,
    flavor: Option<Flavor>,
    position: BinlogPosition,
}

/// 메모리 저장소 (프로세스 종료 시 사라짐)
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BinlogStore for MemoryStore {
    async fn reset(&self) -> Result<()> {
        *self.inner.write() = MemoryState::default();
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let state = self.inner.read();
        Ok(!(state.set.is_empty() && state.position.filename.is_empty()))
    }

    async fn get_position(&self) -> Result<BinlogPosition> {
        Ok(self.inner.read().position.clone())
    }

    async fn set_position(&self, position: &BinlogPosition) -> Result<()> {
        self.inner.write().position = position.clone();
        Ok(())
    }

    async fn get_gtid_set(&self) -> Result<Option<TransactionSet>> {
        let state = self.inner.read();
        match state.flavor {
            Some(flavor) => TransactionSet::parse(flavor, &state.set).map(Some),
            None => Ok(None),
        }
    }

    async fn set_gtid_set(&self, set: &TransactionSet) -> Result<()> {
        let mut state = self.inner.write();
        state.flavor = Some(set.flavor());
        state.set = set.to_string();
        Ok(())
    }
}

/// Redis 저장소
///
/// 스트림 이름을 키로 하는 hash 하나에 `name`, `pos`, `flavor`, `set` 필드를 둡니다.
/// 위치와 GTID 집합은 별도의 HSET으로 기록되며 필드 간 원자성은 없습니다.
#[derive(Clone)]
pub struct RedisStore {
    name: String,
    redis: ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager, name: impl Into<String>) -> Self {
        RedisStore {
            name: name.into(),
            redis,
        }
    }

    /// URL로 접속해 저장소 생성
    pub async fn connect(redis_url: &str, name: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager, name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn fields(&self) -> Result<HashMap<String, String>> {
        let mut conn = self.redis.clone();
        let data: HashMap<String, String> = conn.hgetall(&self.name).await?;
        Ok(data)
    }
}

#[async_trait]
impl BinlogStore for RedisStore {
    async fn reset(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(&self.name).await?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let mut conn = self.redis.clone();
        let (name, set): (Option<String>, Option<String>) =
            conn.hget(&self.name, &[FIELD_NAME, FIELD_SET]).await?;
        let non_empty = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        Ok(non_empty(&name) || non_empty(&set))
    }

    async fn get_position(&self) -> Result<BinlogPosition> {
        let data = self.fields().await?;
        let mut position = BinlogPosition::default();

        if let Some(name) = data.get(FIELD_NAME) {
            position.filename = name.clone();
        }
        if let Some(pos) = data.get(FIELD_POS) {
            position.position = pos.parse().map_err(|_| {
                CdcError::StoreError(format!("{}: invalid pos field {:?}", self.name, pos))
            })?;
        }

        Ok(position)
    }

    async fn set_position(&self, position: &BinlogPosition) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .hset_multiple(
                &self.name,
                &[
                    (FIELD_NAME, position.filename.clone()),
                    (FIELD_POS, position.position.to_string()),
                ],
            )
            .await?;
        debug!("Stored position {} in {}", position, self.name);
        Ok(())
    }

    async fn get_gtid_set(&self) -> Result<Option<TransactionSet>> {
        let data = self.fields().await?;
        let Some(set) = data.get(FIELD_SET) else {
            return Ok(None);
        };

        let flavor: Flavor = match data.get(FIELD_FLAVOR) {
            Some(f) => f.parse()?,
            None => Flavor::default(),
        };
        TransactionSet::parse(flavor, set).map(Some)
    }

    async fn set_gtid_set(&self, set: &TransactionSet) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .hset_multiple(
                &self.name,
                &[
                    (FIELD_FLAVOR, set.flavor().to_string()),
                    (FIELD_SET, set.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

/// 읽기 또는 쓰기가 항상 실패하는 테스트용 저장소
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    pub inner: MemoryStore,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

#[cfg(test)]
impl FailingStore {
    fn check(&self, failing: bool, op: &str) -> Result<()> {
        if failing {
            return Err(CdcError::StoreError(format!("{} unavailable", op)));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl BinlogStore for FailingStore {
    async fn reset(&self) -> Result<()> {
        self.check(self.fail_writes, "reset")?;
        self.inner.reset().await
    }

    async fn exists(&self) -> Result<bool> {
        self.check(self.fail_reads, "exists")?;
        self.inner.exists().await
    }

    async fn get_position(&self) -> Result<BinlogPosition> {
        self.check(self.fail_reads, "get_position")?;
        self.inner.get_position().await
    }

    async fn set_position(&self, position: &BinlogPosition) -> Result<()> {
        self.check(self.fail_writes, "set_position")?;
        self.inner.set_position(position).await
    }

    async fn get_gtid_set(&self) -> Result<Option<TransactionSet>> {
        self.check(self.fail_reads, "get_gtid_set")?;
        self.inner.get_gtid_set().await
    }

    async fn set_gtid_set(&self, set: &TransactionSet) -> Result<()> {
        self.check(self.fail_writes, "set_gtid_set")?;
        self.inner.set_gtid_set(set).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtid::GtidSet;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    const SID: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn sample_set() -> TransactionSet {
        TransactionSet::MySql(GtidSet::parse(&format!("{}:1-42", SID)).unwrap())
    }

    #[tokio::test]
    async fn test_memory_position_round_trip() {
        let store = MemoryStore::new();
        let pos = BinlogPosition::new("mysql-bin.000004", 1_234);

        assert_ok!(store.set_position(&pos).await);
        assert_eq!(store.get_position().await.unwrap(), pos);
        assert!(store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_empty_store() {
        let store = MemoryStore::new();
        assert!(!store.exists().await.unwrap());
        assert!(store.get_position().await.unwrap().is_zero());
        assert!(store.get_gtid_set().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_gtid_set_alone_counts_as_checkpoint() {
        let store = MemoryStore::new();
        store.set_gtid_set(&sample_set()).await.unwrap();

        assert!(store.exists().await.unwrap());
        assert_eq!(store.get_gtid_set().await.unwrap(), Some(sample_set()));
    }

    #[tokio::test]
    async fn test_memory_reset_clears_everything() {
        let store = MemoryStore::new();
        store
            .set_position(&BinlogPosition::new("mysql-bin.000001", 4))
            .await
            .unwrap();
        store.set_gtid_set(&sample_set()).await.unwrap();

        assert_ok!(store.reset().await);
        assert_ok!(store.reset().await);
        assert!(!store.exists().await.unwrap());
        assert_eq!(store.get_position().await.unwrap(), BinlogPosition::default());
        assert!(store.get_gtid_set().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_concurrent_readers() {
        let store = Arc::new(MemoryStore::new());
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for offset in 4..200u64 {
                    store
                        .set_position(&BinlogPosition::new("mysql-bin.000001", offset))
                        .await
                        .unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                let mut last = 0;
                for _ in 0..100 {
                    let pos = store.get_position().await.unwrap();
                    assert!(pos.position >= last);
                    last = pos.position;
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
        assert_eq!(store.get_position().await.unwrap().position, 199);
    }

    #[tokio::test]
    #[ignore] // 실제 Redis 연결 필요 (REDIS_URL)
    async fn test_redis_store_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let store = RedisStore::connect(&url, "binlog-relay:test").await.unwrap();
        store.reset().await.unwrap();
        assert!(!store.exists().await.unwrap());

        let pos = BinlogPosition::new("mysql-bin.000002", 77);
        store.set_position(&pos).await.unwrap();
        store.set_gtid_set(&sample_set()).await.unwrap();

        assert!(store.exists().await.unwrap());
        assert_eq!(store.get_position().await.unwrap(), pos);
        assert_eq!(store.get_gtid_set().await.unwrap(), Some(sample_set()));

        store.reset().await.unwrap();
        assert!(store.get_gtid_set().await.unwrap().is_none());
    }
}
