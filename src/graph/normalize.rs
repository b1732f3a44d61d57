//! Workflow normalization.
//!
//! Turns a raw [`WorkflowGraph`] into a [`NormalizedWorkflow`]: UI-only
//! metadata stripped, parameters deep-sorted and canonicalized, secrets
//! redacted, and a single canonical serialization used for hashing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::config::{NodeKindConfig, NormalizerConfig};
use crate::error::NormalizationError;

use super::types::{is_expression, Connection, CredentialRef, Node, NodeKind, ParamValue, WorkflowGraph};

/// Node type suffix of canvas annotations with no runtime effect.
const STICKY_NOTE_SUFFIX: &str = ".stickyNote";

/// Length of the hex fingerprint that replaces redacted values.
const REDACTION_FINGERPRINT_LEN: usize = 12;

/// Normalizer for raw workflow graphs.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    /// Normalization rules.
    config: NormalizerConfig,
    /// Extra node kind names.
    kinds: NodeKindConfig,
}

/// A workflow in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWorkflow {
    /// Workflow identifier.
    pub id: String,
    /// Workflow display name.
    pub name: String,
    /// Last update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Nodes sorted by (name, type).
    pub nodes: Vec<NormalizedNode>,
    /// Connections in canonical order.
    pub connections: Vec<Connection>,
    /// Workflow-level settings.
    pub settings: BTreeMap<String, ParamValue>,
    /// Canonical serialization of the functional content.
    canonical: String,
}

/// A node in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedNode {
    /// Identifier used for matching; excluded from the canonical form.
    #[serde(skip)]
    pub stable_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Declared node type.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node type version.
    pub type_version: Option<ParamValue>,
    /// Structural kind derived from the type.
    #[serde(skip)]
    pub kind: NodeKind,
    /// Canonical parameter tree.
    pub parameters: BTreeMap<String, ParamValue>,
    /// Credential references (type + logical name).
    pub credentials: BTreeSet<CredentialRef>,
    /// Error handling policy.
    pub error_handling: ErrorHandling,
    /// Node is disabled.
    pub disabled: bool,
    /// Notes, when not stripped as UI-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Error handling policy of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorHandling {
    /// Retry on failure.
    pub retry_on_fail: bool,
    /// Maximum attempts when retrying.
    pub max_tries: Option<u64>,
    /// Delay between attempts in milliseconds.
    pub wait_between_tries: Option<u64>,
    /// Legacy continue-on-fail flag.
    pub continue_on_fail: bool,
    /// Error policy.
    pub on_error: Option<String>,
}

/// Borrowed view serialized as the canonical form.
#[derive(Serialize)]
struct CanonicalView<'a> {
    nodes: &'a [NormalizedNode],
    connections: &'a [Connection],
    settings: &'a BTreeMap<String, ParamValue>,
}

/// Per-node context for parameter normalization.
struct ParamContext<'a> {
    numeric_paths: HashSet<&'a str>,
    numeric_keys: HashSet<&'a str>,
    unordered_keys: HashSet<&'a str>,
    secret_keys: HashSet<&'a str>,
    preserve_order: bool,
}

impl Normalizer {
    /// Creates a normalizer with the given rules.
    #[must_use]
    pub const fn new(config: NormalizerConfig, kinds: NodeKindConfig) -> Self {
        Self { config, kinds }
    }

    /// Normalizes a raw graph.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending path if a required field is
    /// missing or the graph is inconsistent.
    pub fn normalize(&self, graph: &WorkflowGraph) -> Result<NormalizedWorkflow, NormalizationError> {
        let id = graph
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| NormalizationError::missing("id"))?
            .to_string();
        let name = graph.name.clone().unwrap_or_else(|| id.clone());

        let updated_at = graph
            .updated_at
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| NormalizationError::invalid("updatedAt", e.to_string()))
            })
            .transpose()?;

        let mut nodes = Vec::with_capacity(graph.nodes.len());
        let mut stripped = HashSet::new();
        let mut seen_names = HashSet::new();

        for (i, node) in graph.nodes.iter().enumerate() {
            let node_type = required(node.node_type.as_deref(), &format!("nodes[{i}].type"))?;
            let node_name = required(node.name.as_deref(), &format!("nodes[{i}].name"))?;

            if self.config.strip_notes && node_type.ends_with(STICKY_NOTE_SUFFIX) {
                stripped.insert(node_name.to_string());
                continue;
            }

            if !seen_names.insert(node_name.to_string()) {
                return Err(NormalizationError::invalid(
                    format!("nodes[{i}].name"),
                    format!("duplicate node name '{node_name}'"),
                ));
            }

            nodes.push(self.normalize_node(node, node_name, node_type, i)?);
        }

        nodes.sort_by(|a, b| (&a.name, &a.node_type).cmp(&(&b.name, &b.node_type)));

        let mut connections = Vec::with_capacity(graph.connections.len());
        for (i, connection) in graph.connections.iter().enumerate() {
            if stripped.contains(&connection.from) || stripped.contains(&connection.to) {
                continue;
            }
            for (field, endpoint) in [("from", &connection.from), ("to", &connection.to)] {
                if !seen_names.contains(endpoint) {
                    return Err(NormalizationError::invalid(
                        format!("connections[{i}].{field}"),
                        format!("unknown node '{endpoint}'"),
                    ));
                }
            }
            connections.push(connection.clone());
        }
        connections.sort();
        connections.dedup();

        let settings_ctx = self.context_for("", NodeKind::Other);
        let settings = graph
            .settings
            .iter()
            .map(|(key, value)| (key.clone(), normalize_value(value, &settings_ctx, &mut vec![key.as_str()])))
            .collect();

        let mut workflow = NormalizedWorkflow {
            id,
            name,
            updated_at,
            nodes,
            connections,
            settings,
            canonical: String::new(),
        };
        workflow.canonical = workflow.render_canonical()?;

        debug!(
            "Normalized workflow {} ({} nodes, {} connections)",
            workflow.id,
            workflow.nodes.len(),
            workflow.connections.len()
        );
        Ok(workflow)
    }

    /// Normalizes a single node.
    fn normalize_node(
        &self,
        node: &Node,
        name: &str,
        node_type: &str,
        index: usize,
    ) -> Result<NormalizedNode, NormalizationError> {
        let kind = NodeKind::of(node_type, &self.kinds);
        let ctx = self.context_for(node_type, kind);

        let parameters = match &node.parameters {
            serde_json::Value::Null => BTreeMap::new(),
            serde_json::Value::Object(entries) => entries
                .iter()
                .map(|(key, value)| (key.clone(), normalize_value(value, &ctx, &mut vec![key.as_str()])))
                .collect(),
            _ => {
                return Err(NormalizationError::invalid(
                    format!("nodes[{index}].parameters"),
                    "parameters must be an object",
                ));
            }
        };

        let mut credentials = BTreeSet::new();
        for (credential_type, reference) in &node.credentials {
            credentials.insert(credential_ref(credential_type, reference, index)?);
        }

        let error_handling = ErrorHandling {
            retry_on_fail: node.retry_on_fail.unwrap_or(false),
            max_tries: optional_count(node.max_tries.as_ref(), &format!("nodes[{index}].maxTries"))?,
            wait_between_tries: optional_count(
                node.wait_between_tries.as_ref(),
                &format!("nodes[{index}].waitBetweenTries"),
            )?,
            continue_on_fail: node.continue_on_fail.unwrap_or(false),
            on_error: node.on_error.clone(),
        };

        let notes = if self.config.strip_notes {
            None
        } else {
            node.notes.clone().filter(|n| !n.is_empty())
        };

        Ok(NormalizedNode {
            stable_id: node.id.clone().filter(|id| !id.trim().is_empty()),
            name: name.to_string(),
            node_type: node_type.to_string(),
            type_version: node.type_version.as_ref().map(ParamValue::from),
            kind,
            parameters,
            credentials,
            error_handling,
            disabled: node.disabled.unwrap_or(false),
            notes,
        })
    }

    /// Builds the parameter context for a node type.
    fn context_for<'a>(&'a self, node_type: &str, kind: NodeKind) -> ParamContext<'a> {
        ParamContext {
            numeric_paths: self
                .config
                .numeric_parameters
                .get(node_type)
                .map(|paths| paths.iter().map(String::as_str).collect())
                .unwrap_or_default(),
            numeric_keys: self.config.numeric_keys.iter().map(String::as_str).collect(),
            unordered_keys: self
                .config
                .unordered_list_keys
                .iter()
                .map(String::as_str)
                .collect(),
            secret_keys: self.config.secret_keys.iter().map(String::as_str).collect(),
            preserve_order: kind == NodeKind::Routing,
        }
    }
}

impl NormalizedWorkflow {
    /// Canonical serialization of the functional content.
    ///
    /// Excludes workflow metadata and node identifiers so that graphs
    /// differing only in UI metadata serialize identically.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Finds a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NormalizedNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Returns true if both workflows have the same canonical content.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }

    fn render_canonical(&self) -> Result<String, NormalizationError> {
        let view = CanonicalView {
            nodes: &self.nodes,
            connections: &self.connections,
            settings: &self.settings,
        };
        serde_json::to_string(&view).map_err(|e| NormalizationError::Malformed {
            message: format!("canonical serialization failed: {e}"),
        })
    }
}

fn required<'a>(value: Option<&'a str>, path: &str) -> Result<&'a str, NormalizationError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| NormalizationError::missing(path))
}

/// Reads an optional non-negative integer that may arrive as a string.
fn optional_count(
    value: Option<&serde_json::Value>,
    path: &str,
) -> Result<Option<u64>, NormalizationError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| NormalizationError::invalid(path, format!("expected a count, got {n}"))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| NormalizationError::invalid(path, format!("expected a count, got '{s}'"))),
        Some(other) => Err(NormalizationError::invalid(
            path,
            format!("expected a count, got {other}"),
        )),
    }
}

/// Extracts a credential reference, discarding any secret material.
fn credential_ref(
    credential_type: &str,
    reference: &serde_json::Value,
    index: usize,
) -> Result<CredentialRef, NormalizationError> {
    let field = |key: &str| {
        reference
            .get(key)
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
    };

    let name = match reference {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => field("name").or_else(|| field("id")),
    };

    name.map(|name| CredentialRef {
        credential_type: credential_type.to_string(),
        name,
    })
    .ok_or_else(|| NormalizationError::missing(format!("nodes[{index}].credentials.{credential_type}.name")))
}

/// Normalizes a parameter subtree.
///
/// `path` holds the map keys from the node's parameter root down to `value`.
fn normalize_value<'a>(value: &'a serde_json::Value, ctx: &ParamContext<'_>, path: &mut Vec<&'a str>) -> ParamValue {
    let key = path.last().copied().unwrap_or_default();

    match value {
        serde_json::Value::String(s) if ctx.secret_keys.contains(key) && !s.is_empty() && !is_expression(s) => {
            ParamValue::String(redact(s))
        }
        serde_json::Value::String(s) if is_numeric_path(ctx, path) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map_or_else(|| ParamValue::String(s.clone()), ParamValue::number),
        serde_json::Value::Array(items) => {
            let mut normalized: Vec<ParamValue> = items
                .iter()
                .map(|item| normalize_value(item, ctx, path))
                .collect();
            if !ctx.preserve_order && path.iter().any(|k| ctx.unordered_keys.contains(k)) {
                normalized.sort_by_cached_key(ParamValue::canonical_string);
            }
            ParamValue::List(normalized)
        }
        serde_json::Value::Object(entries) => ParamValue::Map(
            entries
                .iter()
                .map(|(k, v)| {
                    path.push(k.as_str());
                    let child = normalize_value(v, ctx, path);
                    path.pop();
                    (k.clone(), child)
                })
                .collect(),
        ),
        other => ParamValue::from(other),
    }
}

fn is_numeric_path(ctx: &ParamContext<'_>, path: &[&str]) -> bool {
    let key = path.last().copied().unwrap_or_default();
    ctx.numeric_keys.contains(key) || ctx.numeric_paths.contains(path.join(".").as_str())
}

/// Replaces a secret with a short fingerprint so changes stay detectable.
fn redact(secret: &str) -> String {
    let digest = hex::encode(Sha256::digest(secret.as_bytes()));
    format!("[redacted:{}]", &digest[..REDACTION_FINGERPRINT_LEN])
}
