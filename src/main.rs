/// MySQL Binlog CDC 릴레이
///
/// 환경 변수로 설정을 읽고 행 변경 메시지를 한 줄짜리 JSON으로 표준 출력에 씁니다.
/// `REDIS_URL`이 있으면 체크포인트를 Redis에 저장합니다.
use binlog_relay::{CdcConfig, CdcEngine, Message, RedisStore};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = CdcConfig::from_env()?;
    let store_name = config.store_name.clone();
    let mut engine = CdcEngine::connect(config)?;

    if let Ok(url) = env::var("REDIS_URL") {
        info!("Using redis checkpoint store {:?}", store_name);
        let store = RedisStore::connect(&url, store_name).await?;
        engine.set_store(Arc::new(store))?;
    }

    engine.on_message(|message: Message| {
        println!("{}", serde_json::to_string(&message)?);
        Ok(())
    })?;

    let engine = Arc::new(engine);
    let runner = engine.clone();
    let mut task = tokio::spawn(async move { runner.start().await });

    let result = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
            engine.close();
            task.await
        }
    };

    match result? {
        Ok(()) => {
            info!("CDC Engine stopped at {}", engine.position().await?);
            Ok(())
        }
        Err(e) => {
            error!("CDC Engine failed: {}", e);
            Err(e.into())
        }
    }
}
