//! "Already analyzed" lookups against the item marker.
//!
//! The marker written by the applier is the only thing that tells our own
//! metadata write apart from a user edit, so every lookup goes to the library.
use serde_json::Value;
use tracing::{debug, warn};

use crate::library::LibrarySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Analyzed,
    NotAnalyzed,
    /// Item missing, marker unset or unreadable, or the lookup failed.
    Unknown,
}

pub async fn read_marker(
    source: &dyn LibrarySource,
    marker_field: &str,
    collection_id: &str,
    item_id: i64,
) -> MarkerState {
    match source
        .get_item_fields(collection_id, item_id, &[marker_field])
        .await
    {
        Ok(fields) => parse_marker(fields.get(marker_field)),
        Err(err) if err.is_not_found() => {
            debug!(collection_id, item_id, "item not found while reading marker");
            MarkerState::Unknown
        }
        Err(err) => {
            warn!(%err, collection_id, item_id, "marker lookup failed");
            MarkerState::Unknown
        }
    }
}

/// Anything other than an explicit `false` marker counts as processed, so a
/// failed lookup skips the item.
pub async fn is_already_processed(
    source: &dyn LibrarySource,
    marker_field: &str,
    collection_id: &str,
    item_id: i64,
) -> bool {
    read_marker(source, marker_field, collection_id, item_id).await != MarkerState::NotAnalyzed
}

fn parse_marker(value: Option<&Value>) -> MarkerState {
    let parsed = match value {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    };
    match parsed {
        Some(true) => MarkerState::Analyzed,
        Some(false) => MarkerState::NotAnalyzed,
        None => MarkerState::Unknown,
    }
}
