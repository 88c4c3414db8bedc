use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use olympiad_judge::engine::Sandbox;
use olympiad_judge::worker::{self, WorkerOptions};
use olympiad_judge::{JudgeConfig, JudgeScheduler, Judger, LanguageRegistry, RedisStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("olympiad_judge=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = JudgeConfig::from_env().context("Failed to load configuration")?;

    let languages = match &config.languages_path {
        Some(path) => {
            let registry = LanguageRegistry::load(path)?;
            info!("Loaded language configurations from {}", path.display());
            registry
        }
        None => {
            info!("Using built-in language configurations");
            LanguageRegistry::builtin()?
        }
    };
    info!("Supported languages: {}", languages.supported_languages().join(", "));

    info!("Starting Judge Worker...");

    let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let sandbox = Arc::new(Sandbox::new(config.sandbox.clone()));
    let judger = Arc::new(Judger::new(store.clone(), Arc::new(languages), sandbox));
    let scheduler = JudgeScheduler::start(judger, config.scheduler.clone());

    // The queue poll is never cancelled: ctrl-c only flips the flag it checks
    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        shutdown_tx.send_replace(true);
    });

    worker::run(store.as_ref(), &scheduler, &WorkerOptions::default(), &shutdown).await;

    info!("Draining in-flight judging passes...");
    scheduler.shutdown().await;
    info!("Judge Worker stopped");

    Ok(())
}
