//! tally-core - Core library for Tally
//!
//! This crate contains the offline-first capture and synchronization engine:
//! the durable local queue of survey records, the connectivity observer, the
//! submission client contract, and the engine that drains the queue to the
//! remote intake service.

pub mod db;
pub mod error;
pub mod models;
pub mod net;
pub mod services;
pub mod submit;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{RecordId, SurveyRecord, SyncState};
