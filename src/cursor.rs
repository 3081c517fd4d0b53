//! Per-collection change cursor persistence.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db::{self, Pool};
use crate::model::{ChangeCursor, ChangeToken};

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, collection_id: &str) -> Result<Option<ChangeCursor>>;

    /// Unconditional overwrite; the last writer wins.
    async fn put(&self, cursor: &ChangeCursor) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteCursorStore {
    pool: Pool,
}

impl SqliteCursorStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, collection_id: &str) -> Result<Option<ChangeCursor>> {
        let Some(row) = db::get_cursor(&self.pool, collection_id).await? else {
            return Ok(None);
        };
        match row.token.parse::<ChangeToken>() {
            Ok(token) => Ok(Some(ChangeCursor {
                collection_id: row.collection_id,
                token,
                subscription_id: row.subscription_id,
                updated_at: row.updated_at,
            })),
            Err(err) => {
                warn!(%err, collection_id, token = %row.token, "stored change token is unreadable; ignoring it");
                Ok(None)
            }
        }
    }

    async fn put(&self, cursor: &ChangeCursor) -> Result<()> {
        db::upsert_cursor(
            &self.pool,
            &cursor.collection_id,
            &cursor.token.to_string(),
            cursor.subscription_id.as_deref(),
            cursor.updated_at,
        )
        .await
    }
}

/// Token to start the next poll from: the stored one, or a bootstrap token
/// fifteen minutes before `now` when the collection has never been polled.
pub async fn start_token(
    store: &dyn CursorStore,
    collection_id: &str,
    now: DateTime<Utc>,
) -> Result<ChangeToken> {
    match store.get(collection_id).await? {
        Some(cursor) => Ok(cursor.token),
        None => {
            let token = ChangeToken::bootstrap(collection_id, now);
            info!(collection_id, %token, "no stored cursor; bootstrapping");
            Ok(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteCursorStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        SqliteCursorStore::new(pool)
    }

    #[tokio::test]
    async fn absent_cursor_bootstraps() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = start_token(&store, "list", now).await.unwrap();
        assert_eq!(token.timestamp(), now - Duration::minutes(15));
        assert_eq!(token.collection_id(), "list");
    }

    #[tokio::test]
    async fn stored_cursor_round_trips() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let cursor = ChangeCursor {
            collection_id: "list".into(),
            token: ChangeToken::at("list", now),
            subscription_id: Some("sub-1".into()),
            updated_at: now,
        };
        store.put(&cursor).await.unwrap();

        assert_eq!(store.get("list").await.unwrap(), Some(cursor.clone()));
        assert_eq!(start_token(&store, "list", now).await.unwrap(), cursor.token);
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_token_is_treated_as_absent() {
        let store = store().await;
        db::upsert_cursor(&store.pool, "list", "garbage", None, Utc::now())
            .await
            .unwrap();
        assert!(store.get("list").await.unwrap().is_none());
    }
}
