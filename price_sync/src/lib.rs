//! Incremental market price sync: reconciles a local cache of price series
//! against the market-data service and renders the wide per-location and long
//! spot-price CSV outputs.

#![warn(missing_docs)]

pub mod cache;
pub mod engine;
pub mod format;
pub mod reconcile;
pub mod spot_map;

pub use engine::{
    EngineError, EngineOptions, OutputPaths, RunOutput, RunRequest, RunSummary, SyncEngine,
    sync_to_files,
};
