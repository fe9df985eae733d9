// reco_ingestor/src/config.rs
// Run configuration loaded from a JSON file.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::domain::{Meta, Recommendations};
use crate::error::{IngestorError, Result};

/// Users to process and the recommendation set written for each of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub user_ids:        Vec<String,>,
    pub recommendations: Vec<String,>,
    pub meta:            Meta,
}

impl Config {
    pub fn from_file(path: &Path,) -> Result<Self,> {
        let raw = std::fs::read_to_string(path,).map_err(|e| {
            IngestorError::ConfigurationError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ),)
        },)?;
        let config = Self::from_json(&raw,).map_err(|e| match e {
            IngestorError::ConfigurationError(msg,) => IngestorError::ConfigurationError(format!(
                "{} ({})",
                msg,
                path.display()
            ),),
            other => other,
        },)?;
        debug!(
            "Loaded config from {}: {} users, {} recommendations",
            path.display(),
            config.user_ids.len(),
            config.recommendations.len()
        );
        Ok(config,)
    }

    pub fn from_json(raw: &str,) -> Result<Self,> {
        serde_json::from_str(raw,).map_err(|e| {
            IngestorError::ConfigurationError(format!("Malformed config: {}", e),)
        },)
    }

    pub fn recommendations(&self,) -> Recommendations {
        Recommendations {
            items: self.recommendations.clone(),
            meta:  self.meta.clone(),
        }
    }
}
