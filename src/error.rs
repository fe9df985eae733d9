// reco_ingestor/src/error.rs
// Defines custom error types for the reco_ingestor crate.

use thiserror::Error;

#[derive(Debug, Error,)]
pub enum IngestorError {
    #[error("Failed to connect to database: {0}")]
    ConnectionError(String,),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String,),
    #[error("Failed to iterate documents: {0}")]
    IterationError(String,),
    #[error("Failed to write documents: {0}")]
    WriteError(String,),
    #[error("Database specific error: {0}")]
    DatabaseError(String,),
    #[error("Unknown entity '{0}' (expected 'shows' or 'episodes')")]
    UnknownEntity(String,),
    #[error("Unknown use case '{0}' (expected READ_ONLY, READ_WRITE or RESET)")]
    UnknownUseCase(String,),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error,),
    #[error("Other error: {0}")]
    Other(String,),
}

impl IngestorError {
    pub fn is_transient(&self,) -> bool {
        match self {
            IngestorError::ConnectionError(_,) => true,
            IngestorError::DatabaseError(msg,) => {
                let m = msg.to_lowercase();
                m.contains("timeout",)
                    || m.contains("connection",)
                    || m.contains("busy",)
                    || m.contains("server selection",)
                    || m.contains("connection reset",)
                    || m.contains("service unavailable",)
                    || m.contains("unavailable",)
            },
            _ => false,
        }
    }
}

pub type Result<T,> = std::result::Result<T, IngestorError,>;
