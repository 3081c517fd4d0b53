use tracing::info;

use crate::library::{LibrarySource, SourceError};
use crate::model::{ChangeRecord, ChangeToken};

/// Changes after `since` in source order. A collection that no longer exists
/// yields nothing rather than an error.
pub async fn fetch_changes(
    source: &dyn LibrarySource,
    collection_id: &str,
    since: &ChangeToken,
) -> Result<Vec<ChangeRecord>, SourceError> {
    match source.get_changes(collection_id, since).await {
        Ok(records) => Ok(records),
        Err(err) if err.is_not_found() => {
            info!(collection_id, %err, "collection is gone; nothing to fetch");
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}
