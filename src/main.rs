use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use photo_tagger::config;
use photo_tagger::db;
use photo_tagger::model::QueueName;
use photo_tagger::pipeline::Pipeline;
use photo_tagger::queue::{self, RetryPolicy};
use photo_tagger::webhook;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let pipeline = Pipeline::from_config(&cfg, pool.clone())?;
    let policy = RetryPolicy::from_config(&cfg);
    let idle_sleep = Duration::from_millis(cfg.app.poll_interval_ms);

    // One worker per queue keeps at most one poller per collection.
    let workers: Vec<_> = QueueName::ALL
        .into_iter()
        .map(|queue_name| {
            tokio::spawn(queue::run_worker(
                pipeline.clone(),
                queue_name,
                policy,
                idle_sleep,
            ))
        })
        .collect();

    info!("starting webhook listener");
    webhook::serve(&cfg.server.bind, pool).await?;

    for worker in &workers {
        worker.abort();
    }
    futures::future::join_all(workers).await;
    info!("stopped");
    Ok(())
}
