//! Configuration types for the compare engine.
//!
//! This module defines all the structs that map to the `promotion.compare.yaml` file:
//! engine tuning, matcher and normalizer knobs, environments and pipelines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    /// Runtime tuning for the orchestrator.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Node matcher tuning.
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// Normalizer rules.
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    /// Extra node type names per structural kind.
    #[serde(default)]
    pub node_kinds: NodeKindConfig,
    /// Known environments.
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    /// Known pipelines.
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

/// Orchestrator runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    /// Number of workflows fetched concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per fetch for transient failures.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    /// Base delay between fetch attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// HTTP request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum number of cached plans.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Node matcher tuning.
///
/// Structural matching only runs for nodes left over after id and
/// (name, type) matching. A candidate pair is accepted only when its
/// weighted score is strictly above `similarity_threshold`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatcherConfig {
    /// Minimum score (exclusive) for a structural match.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Weight of the edge signature Jaccard similarity.
    #[serde(default = "default_weight")]
    pub edge_weight: f64,
    /// Weight of the parameter key Jaccard similarity.
    #[serde(default = "default_weight")]
    pub parameter_weight: f64,
}

/// Normalizer rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Drop node notes as UI-only metadata.
    #[serde(default = "default_true")]
    pub strip_notes: bool,
    /// Parameter paths declared numeric, per node type.
    #[serde(default)]
    pub numeric_parameters: BTreeMap<String, Vec<String>>,
    /// Leaf keys treated as numeric for every node type.
    #[serde(default = "default_numeric_keys")]
    pub numeric_keys: Vec<String>,
    /// Keys whose list values carry no semantic order.
    #[serde(default = "default_unordered_list_keys")]
    pub unordered_list_keys: Vec<String>,
    /// Keys whose values are secrets and must be redacted.
    #[serde(default = "default_secret_keys")]
    pub secret_keys: Vec<String>,
}

/// Additional node type names per structural kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeKindConfig {
    /// Node types that perform HTTP calls.
    #[serde(default)]
    pub http: Vec<String>,
    /// Node types that start a workflow.
    #[serde(default)]
    pub trigger: Vec<String>,
    /// Node types that route between branches.
    #[serde(default)]
    pub routing: Vec<String>,
}

/// An environment hosting workflow definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Unique environment id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// How workflows are fetched from this environment.
    pub provider: ProviderConfig,
}

/// Provider backend for an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Remote n8n instance reached over its public REST API.
    N8n {
        /// Base URL of the instance (e.g., `https://n8n.staging.example.com`).
        base_url: String,
        /// Name of the environment variable holding the API key.
        api_key_env: String,
    },
    /// Directory of exported workflow JSON files.
    Snapshot {
        /// Directory containing `<workflow_id>.json` files.
        path: String,
    },
}

/// A promotion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Unique pipeline id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Ordered stages.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// One source to target environment pairing within a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Stage id, unique within the pipeline.
    pub id: String,
    /// Environment promoted from.
    pub source_env: String,
    /// Environment promoted to.
    pub target_env: String,
    /// Default workflow selection.
    #[serde(default)]
    pub workflows: Vec<String>,
    /// Also list the target environment when resolving the workflow set.
    #[serde(default)]
    pub include_target_only: bool,
}

fn default_concurrency() -> usize {
    8
}

fn default_fetch_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    64
}

fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_weight() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_numeric_keys() -> Vec<String> {
    [
        "amount",
        "batchSize",
        "limit",
        "maxTries",
        "timeout",
        "waitBetweenTries",
        "minutesInterval",
        "hoursInterval",
        "triggerAtHour",
        "triggerAtMinute",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_unordered_list_keys() -> Vec<String> {
    ["headerParameters", "queryParameters", "tags"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_secret_keys() -> Vec<String> {
    [
        "password",
        "apiKey",
        "api_key",
        "token",
        "accessToken",
        "secret",
        "clientSecret",
        "privateKey",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_attempts: default_fetch_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            edge_weight: default_weight(),
            parameter_weight: default_weight(),
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            strip_notes: true,
            numeric_parameters: BTreeMap::new(),
            numeric_keys: default_numeric_keys(),
            unordered_list_keys: default_unordered_list_keys(),
            secret_keys: default_secret_keys(),
        }
    }
}

impl EngineConfig {
    /// Looks up an environment by id.
    #[must_use]
    pub fn environment(&self, id: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.id == id)
    }

    /// Looks up a pipeline by id.
    #[must_use]
    pub fn pipeline(&self, id: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.id == id)
    }
}

impl PipelineConfig {
    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }
}

impl ProviderConfig {
    /// Returns the provider type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::N8n { .. } => "n8n",
            Self::Snapshot { .. } => "snapshot",
        }
    }
}
