use std::sync::Arc;

use crate::config::{Config, LibraryFields};
use crate::cursor::{CursorStore, SqliteCursorStore};
use crate::db::Pool;
use crate::library::{LibrarySource, SharePointClient};
use crate::vision::{ImageClassifier, VisionClient};

/// Collaborators shared by every queue worker invocation. Holds no per-item
/// state; everything durable lives in the pool or on the library items.
#[derive(Clone)]
pub struct Pipeline {
    pub pool: Pool,
    pub cursors: Arc<dyn CursorStore>,
    pub source: Arc<dyn LibrarySource>,
    pub classifier: Arc<dyn ImageClassifier>,
    pub fields: LibraryFields,
}

impl Pipeline {
    /// Wire the SQLite cursor store and the HTTP clients described by `cfg`.
    pub fn from_config(cfg: &Config, pool: Pool) -> anyhow::Result<Self> {
        Ok(Self {
            cursors: Arc::new(SqliteCursorStore::new(pool.clone())),
            source: Arc::new(SharePointClient::from_config(cfg)?),
            classifier: Arc::new(VisionClient::from_config(cfg)?),
            fields: cfg.library.fields.clone(),
            pool,
        })
    }
}
