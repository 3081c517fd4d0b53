use super::model::{CursorRow, QueueMessage};
use crate::model::QueueName;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_cursor(pool: &Pool, collection_id: &str) -> Result<Option<CursorRow>> {
    let row = sqlx::query_as::<_, CursorRow>(
        "SELECT collection_id, token, subscription_id, updated_at FROM change_cursors WHERE collection_id = ?",
    )
    .bind(collection_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert or overwrite the cursor for a collection. Last writer wins.
#[instrument(skip_all)]
pub async fn upsert_cursor(
    pool: &Pool,
    collection_id: &str,
    token: &str,
    subscription_id: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO change_cursors (collection_id, token, subscription_id, updated_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(collection_id) DO UPDATE SET token = excluded.token, \
         subscription_id = excluded.subscription_id, updated_at = excluded.updated_at",
    )
    .bind(collection_id)
    .bind(token)
    .bind(subscription_id)
    .bind(updated_at)
    .execute(pool)
    .await
    .context("failed to persist change cursor")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn enqueue_message(
    pool: &Pool,
    queue: QueueName,
    payload: &str,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO queue_messages (message_id, queue, payload, attempt, due_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(queue.as_str())
    .bind(payload)
    .bind(due_at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_message(pool: &Pool, queue: QueueName) -> Result<Option<QueueMessage>> {
    let row = sqlx::query_as::<_, QueueMessage>(
        "SELECT id, message_id, queue, payload, attempt FROM queue_messages \
         WHERE queue = ? AND dead_at IS NULL AND datetime(due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .bind(queue.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Earliest `due_at` among messages that are not dead, normalized to
/// `YYYY-MM-DD HH:MM:SS` UTC.
#[instrument(skip_all)]
pub async fn next_pending_due_at(pool: &Pool) -> Result<Option<String>> {
    let due: Option<String> = sqlx::query_scalar(
        "SELECT MIN(datetime(due_at)) FROM queue_messages WHERE dead_at IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(due)
}

#[instrument(skip_all)]
pub async fn delete_message(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM queue_messages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Schedule the next delivery: 5s * 2^attempt, capped at `max_cap_secs`
/// (a non-positive cap means 3600s).
#[instrument(skip_all)]
pub async fn backoff_message_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
    error: &str,
) -> Result<()> {
    let secs = (5_i64) * (1_i64 << attempt.clamp(0, 10));
    let cap = if max_cap_secs <= 0 { 3600 } else { max_cap_secs };
    let secs = secs.min(cap);
    sqlx::query(
        "UPDATE queue_messages SET attempt = ?, last_error = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(error)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Park a message permanently; it stays in the table for inspection.
#[instrument(skip_all)]
pub async fn dead_letter_message(pool: &Pool, id: i64, attempt: i32, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE queue_messages SET attempt = ?, last_error = ?, dead_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(attempt)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending_messages(pool: &Pool, queue: Option<QueueName>) -> Result<i64> {
    let count: i64 = match queue {
        Some(q) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM queue_messages WHERE dead_at IS NULL AND queue = ?",
            )
            .bind(q.as_str())
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE dead_at IS NULL")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_dead_messages(pool: &Pool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE dead_at IS NOT NULL")
            .fetch_one(pool)
            .await?;
    Ok(count)
}
