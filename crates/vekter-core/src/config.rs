//! Config snapshot persistence.
//!
//! A snapshot captures everything needed to reopen an instance except the
//! database location: table and column names, the path of the persisted ANN
//! index file, and the last applied runtime parameter string. It never
//! contains connection URLs or credentials.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{VekterError, VekterResult};

/// JSON config snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Record table name.
    pub table_name: String,

    /// Integer primary-key column name.
    pub idx_name: String,

    /// Vector blob column name.
    pub vector_name: String,

    /// Path to the persisted ANN index file, when one exists.
    pub faiss_index: Option<PathBuf>,

    /// Runtime parameter string re-applied on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faiss_runtime_parameters: Option<String>,
}

/// Write a snapshot to `path` as pretty JSON.
pub fn save_config(path: &Path, snapshot: &ConfigSnapshot) -> VekterResult<()> {
    let content = serde_json::to_string_pretty(snapshot).map_err(|e| VekterError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(path, content).map_err(|e| VekterError::ConfigIo {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!("Saved config snapshot to {}", path.display());
    Ok(())
}

/// Load a snapshot from `path`.
pub fn load_config(path: &Path) -> VekterResult<ConfigSnapshot> {
    let content = fs::read_to_string(path).map_err(|e| VekterError::ConfigIo {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let snapshot: ConfigSnapshot =
        serde_json::from_str(&content).map_err(|e| VekterError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    debug!("Loaded config snapshot from {}", path.display());
    Ok(snapshot)
}
