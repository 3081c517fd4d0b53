//! Database module: row models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions for the cursor table and the message queue.
//!
//! External modules import from `photo_tagger::db`; the repository API and
//! row models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{CursorRow, QueueMessage};
