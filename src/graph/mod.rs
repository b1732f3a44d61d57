//! Workflow graph module.
//!
//! This module handles the graph side of a compare:
//! - Raw workflow graphs as fetched from an environment
//! - Normalization into a canonical, secret-free form
//! - Content hashing of normalized workflows

mod hash;
mod normalize;
mod types;

pub use hash::{CacheKey, ContentHash, ContentHasher};
pub use normalize::{ErrorHandling, NormalizedNode, NormalizedWorkflow, Normalizer};
pub use types::{
    is_expression, Connection, CredentialRef, Node, NodeKind, ParamValue, WorkflowGraph,
};
