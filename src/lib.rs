// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Promotion Compare
//!
//! A deterministic compare engine for promoting automation workflows between
//! environments (dev → staging → prod).
//!
//! ## Overview
//!
//! For every workflow of a pipeline stage, the engine fetches the source and
//! target versions, reduces both to a canonical form and reports what a
//! promotion would change:
//!
//! - Position-only and other UI edits never show up as changes
//! - Nodes are paired across versions even when renamed or re-created
//! - Every change is classified into a fixed category vocabulary and a risk level
//! - Target-side hotfixes are flagged so they are not silently overwritten
//! - Workflows that cannot be fetched are reported as `unknown`, never dropped
//!
//! ## Architecture
//!
//! ```text
//! provider ─▶ Normalizer ─▶ NodeMatcher ─▶ SemanticDiffer ─▶ Classifier
//!                 │                                              │
//!                 └──────────── ContentHasher / PlanCache ◀──────┘
//! ```
//!
//! The [`orchestrator`] drives the pipeline for a whole stage with bounded
//! concurrency; everything between the provider and the cache is pure.
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`graph`]: Workflow graph model, normalization and hashing
//! - [`planner`]: Node matching, semantic diff, classification and plan types
//! - [`cache`]: Bounded plan cache
//! - [`provider`]: Workflow sources (n8n REST API, snapshot directories)
//! - [`orchestrator`]: Stage-wide compare calls
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! environments:
//!   - id: staging
//!     provider:
//!       type: n8n
//!       base_url: https://n8n.staging.example.com
//!       api_key_env: N8N_STAGING_API_KEY
//!   - id: prod
//!     provider:
//!       type: snapshot
//!       path: ./exports/prod
//!
//! pipelines:
//!   - id: main
//!     stages:
//!       - id: release
//!         source_env: staging
//!         target_env: prod
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod provider;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::{CacheStats, PlanCache};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, EngineConfig};
pub use error::{CompareError, Result};
pub use graph::{ContentHash, ContentHasher, NormalizedWorkflow, Normalizer, WorkflowGraph};
pub use orchestrator::{CompareOrchestrator, CompareRequest, WorkflowPhase};
pub use planner::{
    ChangeCategory, Classifier, DiffStatus, NodeMatcher, PromotionPlanCompareResult, RiskLevel,
    SemanticDiffer, WorkflowComparer, WorkflowDiffResult,
};
pub use provider::{N8nClient, ProviderAdapter, ProviderRouter, SnapshotProvider};
