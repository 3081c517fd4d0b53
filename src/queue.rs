use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::applier;
use crate::db::{self, Pool};
use crate::model::{AnalysisWorkItem, Notification, QueueName};
use crate::pipeline::Pipeline;
use crate::sync;

/// Redelivery policy for failed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_backoff_secs: i64,
    /// Deliveries after which a failing message is dead-lettered.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            max_backoff_secs: cfg.app.max_backoff_seconds as i64,
            max_attempts: cfg.app.max_attempts,
        }
    }
}

enum Failure {
    /// Payload can never be handled; redelivery would not help.
    Poison(serde_json::Error),
    Retry(anyhow::Error),
}

pub async fn enqueue<T: Serialize>(pool: &Pool, queue: QueueName, payload: &T) -> Result<i64> {
    let body = serde_json::to_string(payload)?;
    db::enqueue_message(pool, queue, &body, Utc::now()).await
}

/// Deliver the next due message on `queue`, if any. Returns whether a message
/// was taken. Handler failures are recorded on the message and never escape.
#[instrument(skip_all, fields(queue = queue.as_str()))]
pub async fn process_next_message(
    p: &Pipeline,
    queue: QueueName,
    policy: &RetryPolicy,
) -> Result<bool> {
    let Some(msg) = db::next_due_message(&p.pool, queue).await? else {
        return Ok(false);
    };

    match handle(p, queue, &msg.payload).await {
        Ok(()) => {
            db::delete_message(&p.pool, msg.id).await?;
            info!(id = msg.id, message_id = %msg.message_id, "message handled");
        }
        Err(Failure::Poison(err)) => {
            error!(%err, id = msg.id, payload = %msg.payload, "undecodable message; dead-lettering");
            db::dead_letter_message(&p.pool, msg.id, msg.attempt + 1, &err.to_string()).await?;
        }
        Err(Failure::Retry(err)) => {
            let attempt = msg.attempt + 1;
            if attempt as u32 >= policy.max_attempts {
                error!(?err, id = msg.id, attempt, "message failed too often; dead-lettering");
                db::dead_letter_message(&p.pool, msg.id, attempt, &format!("{:#}", err)).await?;
            } else {
                warn!(?err, id = msg.id, attempt = msg.attempt, "message failed; backoff");
                db::backoff_message_with_cap(
                    &p.pool,
                    msg.id,
                    msg.attempt,
                    policy.max_backoff_secs,
                    &format!("{:#}", err),
                )
                .await?;
            }
        }
    }
    Ok(true)
}

async fn handle(p: &Pipeline, queue: QueueName, payload: &str) -> Result<(), Failure> {
    match queue {
        QueueName::Notifications => {
            let notification: Notification =
                serde_json::from_str(payload).map_err(Failure::Poison)?;
            sync::process_notification(p, &notification, Utc::now())
                .await
                .map_err(Failure::Retry)?;
        }
        QueueName::PhotoRequests => {
            let work: AnalysisWorkItem = serde_json::from_str(payload).map_err(Failure::Poison)?;
            applier::apply(p, &work, Utc::now())
                .await
                .map_err(Failure::Retry)?;
        }
    }
    Ok(())
}

/// Long-running consumer for one queue.
pub async fn run_worker(p: Pipeline, queue: QueueName, policy: RetryPolicy, idle_sleep: Duration) {
    info!(queue = queue.as_str(), "queue worker started");
    loop {
        match process_next_message(&p, queue, &policy).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(idle_sleep).await,
            Err(err) => {
                error!(?err, queue = queue.as_str(), "queue worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
