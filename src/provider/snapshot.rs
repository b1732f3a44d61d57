//! Snapshot directory provider.
//!
//! Reads exported workflow definitions from `<root>/<workflow_id>.json`.
//! Useful for offline comparisons and for CI jobs that export workflows
//! ahead of time.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::graph::WorkflowGraph;

use super::adapter::ProviderAdapter;
use super::n8n::decode_workflow;

/// Provider backed by a directory of exported workflows.
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    /// Directory holding the exports.
    root: PathBuf,
}

impl SnapshotProvider {
    /// Creates a provider reading from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the snapshot directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Gets the file path for a workflow id.
    fn workflow_path(&self, workflow_id: &str) -> Result<PathBuf, FetchError> {
        let valid = !workflow_id.is_empty()
            && !workflow_id.contains(['/', '\\'])
            && workflow_id != "."
            && workflow_id != "..";

        if !valid {
            return Err(FetchError::Io {
                path: self.root.clone(),
                message: format!("invalid workflow id '{workflow_id}'"),
            });
        }

        Ok(self.root.join(format!("{workflow_id}.json")))
    }
}

#[async_trait]
impl ProviderAdapter for SnapshotProvider {
    async fn fetch_workflow(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> Result<Option<WorkflowGraph>, FetchError> {
        let path = self.workflow_path(workflow_id)?;
        trace!("Reading snapshot {} for {env_id}", path.display());

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot for {workflow_id} in {env_id}");
                return Ok(None);
            }
            Err(e) => {
                return Err(FetchError::Io {
                    path,
                    message: e.to_string(),
                });
            }
        };

        let document: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| FetchError::InvalidResponse {
                message: format!("Failed to parse {}: {e}", path.display()),
            })?;

        decode_workflow(document, workflow_id).map(Some)
    }

    async fn list_workflows(&self, env_id: &str) -> Result<Vec<String>, FetchError> {
        let io_error = |e: std::io::Error| FetchError::Io {
            path: self.root.clone(),
            message: e.to_string(),
        };

        let mut entries = fs::read_dir(&self.root).await.map_err(io_error)?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        debug!("Found {} snapshots for {env_id}", ids.len());
        Ok(ids)
    }

    fn provider_type(&self) -> &'static str {
        "snapshot"
    }
}
