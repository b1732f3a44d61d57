//! Workflow provider module.
//!
//! This module fetches raw workflow definitions from environments,
//! either through the n8n REST API or from exported snapshot directories.

mod adapter;
mod n8n;
mod snapshot;
mod router;

pub use adapter::ProviderAdapter;
#[cfg(test)]
pub use adapter::MockProviderAdapter;
pub use n8n::N8nClient;
pub use snapshot::SnapshotProvider;
pub use router::ProviderRouter;
