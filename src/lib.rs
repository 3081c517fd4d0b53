//! Tags photos in a document library as they are added or changed.
//!
//! A webhook queues change notifications; a worker polls the library's change
//! log from a stored per-collection cursor, skips items that already carry the
//! "analyzed" marker and queues the rest; a second worker runs each queued
//! photo through an image classifier and writes tags plus the marker back.

pub mod applier;
pub mod config;
pub mod cursor;
pub mod db;
pub mod dedup;
pub mod dispatch;
pub mod fetcher;
pub mod library;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod sync;
pub mod vision;
pub mod webhook;
