use anyhow::Result;
use tracing::info;

use crate::db::Pool;
use crate::model::{AnalysisWorkItem, QueueName};
use crate::queue;

/// Put one item on the photo request queue. Delivery is at-least-once; the
/// consumer re-checks the marker before doing any work.
pub async fn enqueue_analysis(pool: &Pool, collection_id: &str, item_id: i64) -> Result<i64> {
    let work = AnalysisWorkItem {
        item_id,
        collection_id: collection_id.to_string(),
    };
    let id = queue::enqueue(pool, QueueName::PhotoRequests, &work).await?;
    info!(id, collection_id, item_id, "queued photo request");
    Ok(id)
}
