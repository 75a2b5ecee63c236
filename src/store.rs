//! Roster store - durable list of tracked nodes
//!
//! Only the fields needed to rebuild a roster on restart are written. The
//! busy flag and MANET neighbor tables are transient and never persisted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::node::{ConnectionState, LinkStatus, NodeAttributes};

const ROSTER_FILE: &str = "roster.json";

/// Persisted projection of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNode {
    pub address: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub manet_address: Option<String>,
    #[serde(default)]
    pub connection_state: ConnectionState,
    #[serde(default)]
    pub attributes: Option<NodeAttributes>,
    #[serde(default)]
    pub manet_link_status: LinkStatus,
}

/// JSON file holding the roster, in display order
#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
}

impl RosterStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(ROSTER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved roster. A missing file is an empty roster; so is an
    /// unreadable one, with a warning.
    pub fn load(&self) -> Vec<PersistedNode> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(
                    "Ignoring malformed roster at {}: {}",
                    self.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Replace the saved roster (write to a temp file, then rename)
    pub fn save(&self, nodes: &[PersistedNode]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(nodes)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .with_context(|| format!("writing {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
