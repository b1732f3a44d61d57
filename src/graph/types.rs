//! Workflow graph types.
//!
//! Raw graphs are deserialized permissively from the automation engine's
//! export format; the normalizer enforces required fields afterwards.

use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::config::NodeKindConfig;

/// A workflow graph as fetched from an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Workflow identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Workflow display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Last update timestamp as reported by the engine (RFC 3339).
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Connections between nodes.
    #[serde(default, deserialize_with = "deserialize_connections")]
    pub connections: Vec<Connection>,
    /// Workflow-level settings.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// A node as fetched, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node identifier, possibly unstable across environments.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name, unique within a workflow.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared node type (e.g., `n8n-nodes-base.httpRequest`).
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,
    /// Node type version.
    #[serde(default)]
    pub type_version: Option<serde_json::Value>,
    /// Canvas coordinates (UI-only).
    #[serde(default)]
    pub position: Option<serde_json::Value>,
    /// Arbitrary nested parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Credential references keyed by credential type.
    #[serde(default)]
    pub credentials: BTreeMap<String, serde_json::Value>,
    /// Retry the node when it fails.
    #[serde(default)]
    pub retry_on_fail: Option<bool>,
    /// Maximum retry attempts.
    #[serde(default)]
    pub max_tries: Option<serde_json::Value>,
    /// Delay between retries in milliseconds.
    #[serde(default)]
    pub wait_between_tries: Option<serde_json::Value>,
    /// Legacy continue-on-fail flag.
    #[serde(default)]
    pub continue_on_fail: Option<bool>,
    /// Error policy (`stopWorkflow`, `continueRegularOutput`, `continueErrorOutput`).
    #[serde(default)]
    pub on_error: Option<String>,
    /// Node is disabled.
    #[serde(default)]
    pub disabled: Option<bool>,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Show notes on the canvas (UI-only).
    #[serde(default)]
    pub notes_in_flow: Option<bool>,
    /// Engine-assigned webhook id.
    #[serde(default)]
    pub webhook_id: Option<String>,
}

/// A directed edge between two node outputs/inputs.
///
/// Field order defines the canonical sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Source node name.
    pub from: String,
    /// Connection kind (`main`, `ai_tool`, ...).
    #[serde(default = "default_connection_kind")]
    pub kind: String,
    /// Output index on the source node.
    #[serde(default)]
    pub from_output: usize,
    /// Destination node name.
    pub to: String,
    /// Input index on the destination node.
    #[serde(default)]
    pub to_input: usize,
}

/// A credential reference with its secret material removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    /// Credential type (e.g., `httpBasicAuth`).
    #[serde(rename = "type")]
    pub credential_type: String,
    /// Logical name, or id when the engine gave no name.
    pub name: String,
}

/// Structural kind of a node, used for specialised diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Performs an HTTP call.
    Http,
    /// Starts the workflow (schedule, webhook, event).
    Trigger,
    /// Routes items between branches.
    Routing,
    /// Anything else.
    Other,
}

/// Untyped parameter tree.
///
/// Maps are key-sorted; numbers are stored in canonical form so that
/// `5` and `5.0` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParamValue {
    /// JSON null.
    #[default]
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Numeric leaf in canonical form.
    Number(serde_json::Number),
    /// String leaf.
    String(String),
    /// Ordered list.
    List(Vec<ParamValue>),
    /// Key-sorted map.
    Map(BTreeMap<String, ParamValue>),
}

fn default_connection_kind() -> String {
    String::from("main")
}

/// One target entry in the engine's keyed connection format.
#[derive(Debug, Deserialize)]
struct KeyedTarget {
    node: String,
    #[serde(rename = "type", default = "default_connection_kind")]
    _kind: String,
    #[serde(default)]
    index: usize,
}

/// Accepts either a flat list of connections or the engine's keyed map
/// `{from: {kind: [[{node, type, index}], ...]}}`.
fn deserialize_connections<'de, D>(deserializer: D) -> Result<Vec<Connection>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;

    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(_) => serde_json::from_value(value).map_err(D::Error::custom),
        serde_json::Value::Object(by_source) => {
            let mut connections = Vec::new();
            for (from, by_kind) in by_source {
                let by_kind: BTreeMap<String, Vec<Option<Vec<KeyedTarget>>>> =
                    serde_json::from_value(by_kind).map_err(D::Error::custom)?;
                for (kind, outputs) in by_kind {
                    for (from_output, targets) in outputs.into_iter().enumerate() {
                        for target in targets.unwrap_or_default() {
                            connections.push(Connection {
                                from: from.clone(),
                                kind: kind.clone(),
                                from_output,
                                to: target.node,
                                to_input: target.index,
                            });
                        }
                    }
                }
            }
            Ok(connections)
        }
        other => Err(D::Error::custom(format!(
            "connections must be a list or a map, got {other}"
        ))),
    }
}

impl WorkflowGraph {
    /// Parses a graph from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a workflow graph.
    pub fn from_json_str(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Decodes an exported document, accepting numeric ids and filling a
    /// missing id with `fallback_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a workflow graph.
    pub fn from_document(mut document: serde_json::Value, fallback_id: &str) -> serde_json::Result<Self> {
        if let Some(object) = document.as_object_mut() {
            let id = match object.get("id") {
                Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => fallback_id.to_string(),
            };
            object.insert(String::from("id"), serde_json::Value::String(id));
        }
        serde_json::from_value(document)
    }

    /// Finds a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name.as_deref() == Some(name))
    }
}

impl NodeKind {
    /// Classifies a node type using built-in patterns plus configured names.
    #[must_use]
    pub fn of(node_type: &str, extra: &NodeKindConfig) -> Self {
        if extra.http.iter().any(|t| t == node_type) {
            return Self::Http;
        }
        if extra.trigger.iter().any(|t| t == node_type) {
            return Self::Trigger;
        }
        if extra.routing.iter().any(|t| t == node_type) {
            return Self::Routing;
        }

        let short = node_type
            .rsplit('.')
            .next()
            .unwrap_or(node_type)
            .to_ascii_lowercase();

        if short == "httprequest" || short == "http" {
            Self::Http
        } else if short.ends_with("trigger") || short == "webhook" || short == "cron" {
            Self::Trigger
        } else if matches!(short.as_str(), "if" | "switch" | "filter" | "router") {
            Self::Routing
        } else {
            Self::Other
        }
    }
}

impl ParamValue {
    /// Builds a number value in canonical form.
    ///
    /// Integral floats collapse to integers; non-finite values become null.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn number(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            return Self::Number(serde_json::Number::from(value as i64));
        }
        serde_json::Number::from_f64(value).map_or(Self::Null, Self::Number)
    }

    /// Canonicalizes an existing JSON number.
    #[must_use]
    pub fn from_number(number: &serde_json::Number) -> Self {
        if number.is_i64() || number.is_u64() {
            Self::Number(number.clone())
        } else {
            number.as_f64().map_or(Self::Null, Self::number)
        }
    }

    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if the value is, or contains, an expression.
    ///
    /// Expressions are strings starting with `=` or containing `{{`.
    #[must_use]
    pub fn contains_expression(&self) -> bool {
        match self {
            Self::String(s) => is_expression(s),
            Self::List(items) => items.iter().any(Self::contains_expression),
            Self::Map(entries) => entries.values().any(Self::contains_expression),
            _ => false,
        }
    }

    /// Returns the dotted paths of every map key in the tree.
    #[must_use]
    pub fn key_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_key_paths(self, "", &mut paths);
        paths
    }

    /// Converts back into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Canonical JSON text of this value.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Returns true if a string parameter is an engine expression.
#[must_use]
pub fn is_expression(value: &str) -> bool {
    value.starts_with('=') || value.contains("{{")
}

fn collect_key_paths(value: &ParamValue, prefix: &str, out: &mut Vec<String>) {
    match value {
        ParamValue::Map(entries) => {
            for (key, child) in entries {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_key_paths(child, &path, out);
                out.push(path);
            }
        }
        ParamValue::List(items) => {
            for item in items {
                collect_key_paths(item, prefix, out);
            }
        }
        _ => {}
    }
}

impl From<&serde_json::Value> for ParamValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::from_number(n),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}:{}] -> {}[{}]",
            self.from, self.kind, self.from_output, self.to, self.to_input
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Trigger => "trigger",
            Self::Routing => "routing",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}
