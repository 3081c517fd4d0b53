//! Row models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Parsing into
//! domain types happens in higher layers.

use chrono::{DateTime, Utc};

/// Raw `change_cursors` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CursorRow {
    pub collection_id: String,
    pub token: String,
    pub subscription_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A queue message that is due for delivery.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueMessage {
    pub id: i64,
    pub message_id: String,
    pub queue: String,
    pub payload: String,
    pub attempt: i32,
}
