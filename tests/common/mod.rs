#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use photo_tagger::config::LibraryFields;
use photo_tagger::cursor::SqliteCursorStore;
use photo_tagger::library::{LibrarySource, SourceError};
use photo_tagger::model::{ChangeRecord, ChangeToken, ChangeType};
use photo_tagger::pipeline::Pipeline;
use photo_tagger::vision::{ImageClassifier, VisionError, VisionResponse};

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn pipeline(pool: &sqlx::SqlitePool, library: &FakeLibrary, vision: &FakeVision) -> Pipeline {
    Pipeline {
        pool: pool.clone(),
        cursors: Arc::new(SqliteCursorStore::new(pool.clone())),
        source: Arc::new(library.clone()),
        classifier: Arc::new(vision.clone()),
        fields: LibraryFields::default(),
    }
}

#[derive(Debug, Clone)]
struct FakeItem {
    fields: Map<String, Value>,
    file: Option<Vec<u8>>,
}

#[derive(Default)]
struct LibraryState {
    changes: HashMap<String, Vec<ChangeRecord>>,
    items: HashMap<(String, i64), FakeItem>,
    fail_changes: bool,
    fail_lookups: bool,
    change_queries: Vec<(String, ChangeToken)>,
    lookups: Vec<(String, i64)>,
    updates: Vec<(String, i64, Map<String, Value>)>,
}

/// In-memory document library that records every call.
#[derive(Clone, Default)]
pub struct FakeLibrary {
    state: Arc<Mutex<LibraryState>>,
}

impl FakeLibrary {
    pub async fn add_collection(&self, collection_id: &str) {
        self.state
            .lock()
            .await
            .changes
            .entry(collection_id.to_string())
            .or_default();
    }

    pub async fn remove_collection(&self, collection_id: &str) {
        self.state.lock().await.changes.remove(collection_id);
    }

    pub async fn record_change(
        &self,
        collection_id: &str,
        item_id: i64,
        change_type: ChangeType,
        at: DateTime<Utc>,
    ) {
        self.state
            .lock()
            .await
            .changes
            .entry(collection_id.to_string())
            .or_default()
            .push(ChangeRecord {
                collection_id: collection_id.to_string(),
                item_id,
                change_type,
                changed_at: Some(at),
            });
    }

    /// Add a photo item. `analyzed` of `None` leaves the marker column unset.
    pub async fn add_photo(&self, collection_id: &str, item_id: i64, analyzed: Option<bool>) {
        let mut fields = Map::new();
        if let Some(flag) = analyzed {
            fields.insert("Analyzed".into(), Value::Bool(flag));
        }
        self.state.lock().await.items.insert(
            (collection_id.to_string(), item_id),
            FakeItem {
                fields,
                file: Some(vec![0xFF, 0xD8, item_id as u8]),
            },
        );
    }

    pub async fn set_field(&self, collection_id: &str, item_id: i64, name: &str, value: Value) {
        if let Some(item) = self
            .state
            .lock()
            .await
            .items
            .get_mut(&(collection_id.to_string(), item_id))
        {
            item.fields.insert(name.to_string(), value);
        }
    }

    pub async fn drop_file(&self, collection_id: &str, item_id: i64) {
        if let Some(item) = self
            .state
            .lock()
            .await
            .items
            .get_mut(&(collection_id.to_string(), item_id))
        {
            item.file = None;
        }
    }

    pub async fn fail_changes(&self, fail: bool) {
        self.state.lock().await.fail_changes = fail;
    }

    pub async fn fail_lookups(&self, fail: bool) {
        self.state.lock().await.fail_lookups = fail;
    }

    pub async fn field(&self, collection_id: &str, item_id: i64, name: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .items
            .get(&(collection_id.to_string(), item_id))
            .and_then(|item| item.fields.get(name).cloned())
    }

    pub async fn change_queries(&self) -> Vec<(String, ChangeToken)> {
        self.state.lock().await.change_queries.clone()
    }

    pub async fn lookups(&self) -> Vec<(String, i64)> {
        self.state.lock().await.lookups.clone()
    }

    pub async fn updates(&self) -> Vec<(String, i64, Map<String, Value>)> {
        self.state.lock().await.updates.clone()
    }
}

#[async_trait]
impl LibrarySource for FakeLibrary {
    async fn get_changes(
        &self,
        collection_id: &str,
        since: &ChangeToken,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        let mut state = self.state.lock().await;
        state
            .change_queries
            .push((collection_id.to_string(), since.clone()));
        if state.fail_changes {
            return Err(SourceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        let Some(changes) = state.changes.get(collection_id) else {
            return Err(SourceError::NotFound(format!("list {}", collection_id)));
        };
        Ok(changes
            .iter()
            .filter(|c| c.changed_at.map_or(true, |at| at > since.timestamp()))
            .cloned()
            .collect())
    }

    async fn get_item_fields(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &[&str],
    ) -> Result<Map<String, Value>, SourceError> {
        let mut state = self.state.lock().await;
        state.lookups.push((collection_id.to_string(), item_id));
        if state.fail_lookups {
            return Err(SourceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        let item = state
            .items
            .get(&(collection_id.to_string(), item_id))
            .ok_or_else(|| SourceError::NotFound(format!("item {}", item_id)))?;
        Ok(fields
            .iter()
            .filter_map(|name| item.fields.get(*name).map(|v| (name.to_string(), v.clone())))
            .collect())
    }

    async fn download_file(
        &self,
        collection_id: &str,
        item_id: i64,
    ) -> Result<Vec<u8>, SourceError> {
        let state = self.state.lock().await;
        state
            .items
            .get(&(collection_id.to_string(), item_id))
            .and_then(|item| item.file.clone())
            .ok_or_else(|| SourceError::NotFound(format!("file of item {}", item_id)))
    }

    async fn update_item_fields(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &Map<String, Value>,
    ) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&(collection_id.to_string(), item_id))
            .ok_or_else(|| SourceError::NotFound(format!("item {}", item_id)))?;
        for (name, value) in fields {
            item.fields.insert(name.clone(), value.clone());
        }
        state
            .updates
            .push((collection_id.to_string(), item_id, fields.clone()));
        Ok(())
    }
}

/// Classifier that replays queued responses, then tags everything `photo`.
#[derive(Clone, Default)]
pub struct FakeVision {
    responses: Arc<Mutex<VecDeque<Result<VisionResponse, VisionError>>>>,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl FakeVision {
    pub fn with_responses(responses: Vec<Result<VisionResponse, VisionError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    /// Sizes of the images submitted so far.
    pub async fn calls(&self) -> Vec<usize> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ImageClassifier for FakeVision {
    async fn analyze(&self, image: Vec<u8>) -> Result<VisionResponse, VisionError> {
        self.calls.lock().await.push(image.len());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(vision_response(&[("photo", 0.99)], false, false)))
    }
}

pub fn vision_response(tags: &[(&str, f64)], adult: bool, racy: bool) -> VisionResponse {
    let tags: Vec<Value> = tags
        .iter()
        .map(|(name, confidence)| json!({ "name": name, "confidence": confidence }))
        .collect();
    serde_json::from_value(json!({
        "categories": [],
        "adult": {
            "isAdultContent": adult,
            "isRacyContent": racy,
            "adultScore": 0.1,
            "racyScore": 0.1
        },
        "tags": tags,
        "color": {
            "dominantColorForeground": "White",
            "dominantColorBackground": "Black",
            "accentColor": "1F5A8C",
            "isBWImg": false
        }
    }))
    .unwrap()
}
