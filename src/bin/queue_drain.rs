use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use photo_tagger::config;
use photo_tagger::db;
use photo_tagger::model::QueueName;
use photo_tagger::pipeline::Pipeline;
use photo_tagger::queue::{self, RetryPolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Process every pending notification and photo request, then exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit as soon as only messages in backoff remain
    #[arg(long)]
    skip_failed: bool,

    /// Attempts after which a failing message is dead-lettered (overrides config)
    #[arg(long)]
    max_failed_attempts: Option<u32>,
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
    let mut policy = RetryPolicy::from_config(&cfg);
    if let Some(max) = args.max_failed_attempts {
        policy.max_attempts = max.max(1);
    }

    let remaining = db::count_pending_messages(&pool, None).await?;
    let dead = db::count_dead_messages(&pool).await?;
    info!(remaining, dead, "starting queue drain");
    if remaining == 0 {
        info!("no pending messages, exiting");
        return Ok(());
    }

    let mut processed = 0usize;
    loop {
        // Notifications first: polling them produces photo requests.
        let mut took_any = false;
        for queue_name in QueueName::ALL {
            match queue::process_next_message(&pipeline, queue_name, &policy).await {
                Ok(true) => {
                    took_any = true;
                    processed += 1;
                    if processed % 10 == 0 {
                        let remaining = db::count_pending_messages(&pool, None).await?;
                        info!(processed, remaining, "drain progress");
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    error!(?err, queue = queue_name.as_str(), "error processing queue message");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        if took_any {
            continue;
        }

        let remaining = db::count_pending_messages(&pool, None).await?;
        if remaining == 0 {
            info!(processed, "all queue messages handled");
            break;
        }

        let next_due = db::next_pending_due_at(&pool).await?;
        warn!(
            remaining,
            next_due = next_due.as_deref().unwrap_or("-"),
            "{} messages remain, all in backoff",
            remaining
        );
        if args.skip_failed {
            warn!("--skip-failed specified, exiting with messages remaining");
            break;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    let dead = db::count_dead_messages(&pool).await?;
    if dead > 0 {
        warn!(dead, "dead-lettered messages are kept in queue_messages for inspection");
    }
    info!("queue drain completed");
    Ok(())
}
