//! Single-instance-mode record linkage engine
//!
//! Intercepts writes of managed clinical record types, classifies each record
//! against the configured matcher, auto-merges confident duplicates and keeps
//! candidate/ignore edges for the rest. Bulk re-detection runs on a bounded
//! worker pool.

pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod jobs;
pub mod logging;
pub mod matching;
pub mod models;
pub mod policy;
pub mod services;
pub mod state;

pub use error::{Error, Result};
