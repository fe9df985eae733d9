// reco_ingestor/src/lib.rs
// Public API of the reco_ingestor crate.

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod firestore;
pub mod memory;
pub mod mongo;
pub mod operations;
pub mod orchestrator;
pub mod retry;
pub mod store;

/// Documents fetched per deletion round.
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 5;
pub const DEFAULT_MONGO_DATABASE_NAME: &str = "recommendations";
pub const DEFAULT_FIRESTORE_DATABASE_ID: &str = "(default)";
