//! CDC 관련 에러 타입

use std::fmt;
use std::io;
use thiserror::Error;

/// 에러가 발생한 처리 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 초기 스냅샷 (덤프)
    Dump,
    /// 마스터 위치 / GTID 조회
    MasterQuery,
    /// 체크포인트 읽기
    CheckpointRead,
    /// 체크포인트 쓰기
    CheckpointWrite,
    /// 구독자 콜백
    Callback,
    /// Binlog 스트리밍
    Stream,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Dump => "dump",
            Phase::MasterQuery => "master query",
            Phase::CheckpointRead => "checkpoint read",
            Phase::CheckpointWrite => "checkpoint write",
            Phase::Callback => "callback",
            Phase::Stream => "stream",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("체크포인트 저장소 에러: {0}")]
    StoreError(String),

    #[error("구독자 콜백 에러: {0}")]
    CallbackError(String),

    #[error("MySQL 에러: {0}")]
    Mysql(#[from] mysql_async::Error),

    #[error("Redis 에러: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{phase} 단계 실패: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<CdcError>,
    },
}

impl CdcError {
    /// 처리 단계 정보를 붙여 감싼다
    pub fn in_phase(self, phase: Phase) -> Self {
        CdcError::Phase {
            phase,
            source: Box::new(self),
        }
    }

    /// 가장 바깥쪽 처리 단계
    pub fn phase(&self) -> Option<Phase> {
        match self {
            CdcError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Phase 래퍼를 벗겨낸 원인 에러
    pub fn root(&self) -> &CdcError {
        match self {
            CdcError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self.root(), CdcError::ConfigError(_))
    }
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

/// `Result`에 처리 단계를 붙이는 헬퍼
pub trait PhaseExt<T> {
    fn phase(self, phase: Phase) -> Result<T>;
}

impl<T> PhaseExt<T> for Result<T> {
    fn phase(self, phase: Phase) -> Result<T> {
        self.map_err(|e| e.in_phase(phase))
    }
}
