//! Semantic differ for matched node pairs.
//!
//! Deltas read in promotion direction: `before` is what the target holds
//! today, `after` is what promoting the source would write. Likewise an
//! `added` node or edge exists only in the source.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::graph::{Connection, CredentialRef, NodeKind, NormalizedNode, NormalizedWorkflow, ParamValue};

use super::classify::{Classifier, RiskLevel};
use super::matcher::{MatchMethod, NodePair};
use super::ChangeCategory;

/// Parameter roots that configure an HTTP call.
const HTTP_KEYS: &[&str] = &[
    "method",
    "requestMethod",
    "url",
    "headers",
    "headerParameters",
    "sendHeaders",
    "specifyHeaders",
    "body",
    "bodyParameters",
    "jsonBody",
    "sendBody",
    "specifyBody",
    "contentType",
    "queryParameters",
    "sendQuery",
    "authentication",
    "genericAuthType",
    "nodeCredentialType",
];

/// Parameter roots that configure branch routing.
const ROUTING_KEYS: &[&str] = &["conditions", "rules", "mode", "fallbackOutput", "combinator"];

/// Parameter keys holding executable code.
const CODE_KEYS: &[&str] = &["jsCode", "pythonCode", "functionCode", "functionItemCode", "query"];

/// Kind of a field-level delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Node exists in source only.
    NodeAdded,
    /// Node exists in target only.
    NodeRemoved,
    /// Display name changed.
    Renamed,
    /// Type or type version changed.
    TypeChanged,
    /// Plain parameter changed.
    Parameter,
    /// HTTP call configuration changed.
    HttpConfig,
    /// Trigger configuration changed.
    TriggerConfig,
    /// Routing condition parameters changed.
    RoutingConfig,
    /// Edge set of one routing branch changed.
    RoutingBranch,
    /// Credential reference added, removed or retyped.
    Credential,
    /// Error-handling policy changed.
    ErrorHandling,
    /// Node enabled or disabled.
    Disabled,
    /// Node notes changed.
    Notes,
}

/// A single field-level change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    /// Dotted path of the changed field.
    pub path: String,
    /// Kind of change.
    pub kind: DeltaKind,
    /// Value currently in the target.
    pub before: Option<serde_json::Value>,
    /// Value the source would promote.
    pub after: Option<serde_json::Value>,
    /// Either side is expression- or code-bearing.
    pub expression: bool,
}

/// Changes for one node pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeChangeRecord {
    /// Name to display (source name when present).
    pub node_name: String,
    /// Name in the source workflow.
    pub source_name: Option<String>,
    /// Name in the target workflow.
    pub target_name: Option<String>,
    /// Node type (source type when present).
    pub node_type: String,
    /// How the pair was established.
    pub match_method: MatchMethod,
    /// Field-level deltas.
    pub deltas: Vec<FieldDelta>,
    /// Categories derived from the deltas.
    pub change_categories: BTreeSet<ChangeCategory>,
    /// Risk derived from the categories.
    pub risk_level: RiskLevel,
}

/// Direction of an edge change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowChangeKind {
    /// Edge exists in source only.
    Added,
    /// Edge exists in target only.
    Removed,
}

/// An added or removed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowChange {
    /// Direction of the change.
    pub change: FlowChangeKind,
    /// The connection, named as on the side where it exists.
    pub connection: Connection,
    /// Both endpoints are matched nodes.
    pub endpoints_matched: bool,
}

/// A changed workflow setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsChange {
    /// Setting key.
    pub key: String,
    /// Value currently in the target.
    pub before: Option<serde_json::Value>,
    /// Value the source would promote.
    pub after: Option<serde_json::Value>,
}

/// All changes between two versions of a workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowChanges {
    /// Changed nodes, in pair order.
    pub node_changes: Vec<NodeChangeRecord>,
    /// Edge changes.
    pub flow_changes: Vec<FlowChange>,
    /// Settings changes, by key.
    pub settings_changes: Vec<SettingsChange>,
}

/// Which side of a compare a workflow comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Source environment.
    Source,
    /// Target environment.
    Target,
}

/// Semantic differ producing field-level deltas.
#[derive(Debug, Default, Clone, Copy)]
pub struct SemanticDiffer {
    classifier: Classifier,
}

/// Edge key independent of node names: (pair, kind, output, pair, input).
type EdgeKey<'c> = (usize, &'c str, usize, usize, usize);

struct ParamWalk<'o> {
    kind: NodeKind,
    root: String,
    out: &'o mut Vec<FieldDelta>,
}

impl SemanticDiffer {
    /// Creates a differ.
    #[must_use]
    pub const fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }

    /// Diffs one node pair.
    ///
    /// A one-sided pair yields a single `node_added`/`node_removed` delta.
    #[must_use]
    pub fn diff_pair(&self, pair: &NodePair<'_>) -> Vec<FieldDelta> {
        match (pair.source, pair.target) {
            (Some(_), None) => vec![whole_node(DeltaKind::NodeAdded)],
            (None, Some(_)) => vec![whole_node(DeltaKind::NodeRemoved)],
            (Some(source), Some(target)) => Self::diff_nodes(source, target),
            (None, None) => Vec::new(),
        }
    }

    /// Diffs two workflows given their node pairs.
    #[must_use]
    pub fn diff_workflows(
        &self,
        source: &NormalizedWorkflow,
        target: &NormalizedWorkflow,
        pairs: &[NodePair<'_>],
    ) -> WorkflowChanges {
        let source_index = pair_index(pairs, Side::Source);
        let target_index = pair_index(pairs, Side::Target);

        let mut node_changes = Vec::new();
        for pair in pairs {
            let mut deltas = self.diff_pair(pair);
            if let (Some(s), Some(t)) = (pair.source, pair.target)
                && (s.kind == NodeKind::Routing || t.kind == NodeKind::Routing)
            {
                deltas.extend(branch_deltas(
                    (source, s, &source_index),
                    (target, t, &target_index),
                ));
            }
            if !deltas.is_empty() {
                node_changes.push(self.record(pair, deltas));
            }
        }

        let flow_changes = flow_changes(source, target, pairs, &source_index, &target_index);
        let settings_changes = settings_changes(&source.settings, &target.settings);

        debug!(
            "Diffed workflow {}: {} node changes, {} flow changes, {} settings changes",
            source.id,
            node_changes.len(),
            flow_changes.len(),
            settings_changes.len()
        );

        WorkflowChanges {
            node_changes,
            flow_changes,
            settings_changes,
        }
    }

    /// Changes for a workflow present on one side only.
    ///
    /// Every node and edge is added (source only) or removed (target only);
    /// settings are not diffed.
    #[must_use]
    pub fn one_sided(&self, workflow: &NormalizedWorkflow, side: Side) -> WorkflowChanges {
        let node_changes = workflow
            .nodes
            .iter()
            .map(|node| {
                let pair = match side {
                    Side::Source => NodePair {
                        source: Some(node),
                        target: None,
                        method: MatchMethod::Unmatched,
                    },
                    Side::Target => NodePair {
                        source: None,
                        target: Some(node),
                        method: MatchMethod::Unmatched,
                    },
                };
                self.record(&pair, self.diff_pair(&pair))
            })
            .collect();

        let change = match side {
            Side::Source => FlowChangeKind::Added,
            Side::Target => FlowChangeKind::Removed,
        };
        let flow_changes = workflow
            .connections
            .iter()
            .map(|connection| FlowChange {
                change,
                connection: connection.clone(),
                endpoints_matched: false,
            })
            .collect();

        WorkflowChanges {
            node_changes,
            flow_changes,
            settings_changes: Vec::new(),
        }
    }

    fn record(&self, pair: &NodePair<'_>, deltas: Vec<FieldDelta>) -> NodeChangeRecord {
        let change_categories = self.classifier.node_categories(&deltas);
        let primary = pair.source.or(pair.target);

        NodeChangeRecord {
            node_name: primary.map(|n| n.name.clone()).unwrap_or_default(),
            source_name: pair.source.map(|n| n.name.clone()),
            target_name: pair.target.map(|n| n.name.clone()),
            node_type: primary.map(|n| n.node_type.clone()).unwrap_or_default(),
            match_method: pair.method,
            risk_level: RiskLevel::for_categories(&change_categories),
            change_categories,
            deltas,
        }
    }

    fn diff_nodes(source: &NormalizedNode, target: &NormalizedNode) -> Vec<FieldDelta> {
        let mut deltas = Vec::new();

        if source.name != target.name {
            deltas.push(scalar(DeltaKind::Renamed, "name", &target.name, &source.name));
        }
        if source.node_type != target.node_type {
            deltas.push(scalar(DeltaKind::TypeChanged, "type", &target.node_type, &source.node_type));
        }
        if source.type_version != target.type_version {
            deltas.push(FieldDelta {
                path: String::from("typeVersion"),
                kind: DeltaKind::TypeChanged,
                before: target.type_version.as_ref().map(ParamValue::to_json),
                after: source.type_version.as_ref().map(ParamValue::to_json),
                expression: false,
            });
        }

        let keys: BTreeSet<&String> = source.parameters.keys().chain(target.parameters.keys()).collect();
        for key in keys {
            let mut walk = ParamWalk {
                kind: source.kind,
                root: key.clone(),
                out: &mut deltas,
            };
            walk.walk(
                &format!("parameters.{key}"),
                key,
                target.parameters.get(key),
                source.parameters.get(key),
            );
        }

        deltas.extend(credential_deltas(&source.credentials, &target.credentials));
        deltas.extend(error_handling_deltas(source, target));

        if source.disabled != target.disabled {
            deltas.push(FieldDelta {
                path: String::from("disabled"),
                kind: DeltaKind::Disabled,
                before: Some(serde_json::Value::Bool(target.disabled)),
                after: Some(serde_json::Value::Bool(source.disabled)),
                expression: false,
            });
        }
        if source.notes != target.notes {
            deltas.push(FieldDelta {
                path: String::from("notes"),
                kind: DeltaKind::Notes,
                before: target.notes.clone().map(serde_json::Value::String),
                after: source.notes.clone().map(serde_json::Value::String),
                expression: false,
            });
        }

        deltas
    }
}

impl ParamWalk<'_> {
    /// Recursively records changed leaves between `before` (target) and
    /// `after` (source).
    fn walk(&mut self, path: &str, leaf: &str, before: Option<&ParamValue>, after: Option<&ParamValue>) {
        match (before, after) {
            (Some(ParamValue::Map(b)), Some(ParamValue::Map(a))) => {
                let keys: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
                for key in keys {
                    self.walk(&format!("{path}.{key}"), key, b.get(key), a.get(key));
                }
            }
            (Some(ParamValue::List(b)), Some(ParamValue::List(a))) if a.len() == b.len() => {
                for (i, (bi, ai)) in b.iter().zip(a).enumerate() {
                    self.walk(&format!("{path}[{i}]"), leaf, Some(bi), Some(ai));
                }
            }
            (b, a) if b == a => {}
            (b, a) => {
                let expression = CODE_KEYS.contains(&leaf)
                    || b.is_some_and(ParamValue::contains_expression)
                    || a.is_some_and(ParamValue::contains_expression);
                self.out.push(FieldDelta {
                    path: path.to_string(),
                    kind: param_delta_kind(self.kind, &self.root),
                    before: b.map(ParamValue::to_json),
                    after: a.map(ParamValue::to_json),
                    expression,
                });
            }
        }
    }
}

fn param_delta_kind(kind: NodeKind, root: &str) -> DeltaKind {
    match kind {
        NodeKind::Trigger => DeltaKind::TriggerConfig,
        NodeKind::Http if HTTP_KEYS.contains(&root) => DeltaKind::HttpConfig,
        NodeKind::Routing if ROUTING_KEYS.contains(&root) => DeltaKind::RoutingConfig,
        _ => DeltaKind::Parameter,
    }
}

const fn whole_node(kind: DeltaKind) -> FieldDelta {
    FieldDelta {
        path: String::new(),
        kind,
        before: None,
        after: None,
        expression: false,
    }
}

fn scalar(kind: DeltaKind, path: &str, before: &str, after: &str) -> FieldDelta {
    FieldDelta {
        path: path.to_string(),
        kind,
        before: Some(serde_json::Value::String(before.to_string())),
        after: Some(serde_json::Value::String(after.to_string())),
        expression: false,
    }
}

fn credential_json(credential: &CredentialRef) -> serde_json::Value {
    serde_json::json!({"type": credential.credential_type, "name": credential.name})
}

/// Pairs removed and added references: same name is a retype, same type is
/// a swap, anything left is a plain add or remove.
fn credential_deltas(source: &BTreeSet<CredentialRef>, target: &BTreeSet<CredentialRef>) -> Vec<FieldDelta> {
    let only_target: Vec<&CredentialRef> = target.difference(source).collect();
    let only_source: Vec<&CredentialRef> = source.difference(target).collect();
    let mut source_used = vec![false; only_source.len()];
    let mut deltas = Vec::new();

    for current in &only_target {
        let counterpart = only_source
            .iter()
            .enumerate()
            .find(|(k, s)| !source_used[*k] && s.name == current.name)
            .or_else(|| {
                only_source
                    .iter()
                    .enumerate()
                    .find(|(k, s)| !source_used[*k] && s.credential_type == current.credential_type)
            })
            .map(|(k, s)| (k, *s));

        if let Some((k, _)) = counterpart {
            source_used[k] = true;
        }
        deltas.push(FieldDelta {
            path: format!("credentials.{}", current.credential_type),
            kind: DeltaKind::Credential,
            before: Some(credential_json(current)),
            after: counterpart.map(|(_, s)| credential_json(s)),
            expression: false,
        });
    }

    for (k, promoted) in only_source.iter().enumerate() {
        if !source_used[k] {
            deltas.push(FieldDelta {
                path: format!("credentials.{}", promoted.credential_type),
                kind: DeltaKind::Credential,
                before: None,
                after: Some(credential_json(promoted)),
                expression: false,
            });
        }
    }

    deltas
}

fn error_handling_deltas(source: &NormalizedNode, target: &NormalizedNode) -> Vec<FieldDelta> {
    let (s, t) = (&source.error_handling, &target.error_handling);
    let fields = [
        ("retryOnFail", serde_json::json!(t.retry_on_fail), serde_json::json!(s.retry_on_fail)),
        ("maxTries", serde_json::json!(t.max_tries), serde_json::json!(s.max_tries)),
        (
            "waitBetweenTries",
            serde_json::json!(t.wait_between_tries),
            serde_json::json!(s.wait_between_tries),
        ),
        ("continueOnFail", serde_json::json!(t.continue_on_fail), serde_json::json!(s.continue_on_fail)),
        ("onError", serde_json::json!(t.on_error), serde_json::json!(s.on_error)),
    ];

    fields
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(field, before, after)| FieldDelta {
            path: format!("errorHandling.{field}"),
            kind: DeltaKind::ErrorHandling,
            before: Some(before),
            after: Some(after),
            expression: false,
        })
        .collect()
}

/// Maps node names on one side to their pair index.
fn pair_index<'p>(pairs: &[NodePair<'p>], side: Side) -> HashMap<&'p str, usize> {
    pairs
        .iter()
        .enumerate()
        .filter_map(|(i, pair)| {
            let node = match side {
                Side::Source => pair.source,
                Side::Target => pair.target,
            };
            node.map(|n| (n.name.as_str(), i))
        })
        .collect()
}

fn edge_key<'c>(connection: &'c Connection, index: &HashMap<&str, usize>) -> Option<EdgeKey<'c>> {
    Some((
        *index.get(connection.from.as_str())?,
        connection.kind.as_str(),
        connection.from_output,
        *index.get(connection.to.as_str())?,
        connection.to_input,
    ))
}

fn keyed_edges<'w>(
    workflow: &'w NormalizedWorkflow,
    index: &HashMap<&str, usize>,
) -> Vec<(EdgeKey<'w>, &'w Connection)> {
    workflow
        .connections
        .iter()
        .filter_map(|c| edge_key(c, index).map(|key| (key, c)))
        .collect()
}

/// Compares edges by matched pair identity so renames do not show as
/// rewiring.
fn flow_changes(
    source: &NormalizedWorkflow,
    target: &NormalizedWorkflow,
    pairs: &[NodePair<'_>],
    source_index: &HashMap<&str, usize>,
    target_index: &HashMap<&str, usize>,
) -> Vec<FlowChange> {
    let source_edges = keyed_edges(source, source_index);
    let target_edges = keyed_edges(target, target_index);
    let source_keys: BTreeSet<EdgeKey<'_>> = source_edges.iter().map(|(k, _)| *k).collect();
    let target_keys: BTreeSet<EdgeKey<'_>> = target_edges.iter().map(|(k, _)| *k).collect();

    let matched = |key: &EdgeKey<'_>| pairs[key.0].is_matched() && pairs[key.3].is_matched();

    let added = source_edges
        .iter()
        .filter(|(key, _)| !target_keys.contains(key))
        .map(|(key, connection)| FlowChange {
            change: FlowChangeKind::Added,
            connection: (*connection).clone(),
            endpoints_matched: matched(key),
        });
    let removed = target_edges
        .iter()
        .filter(|(key, _)| !source_keys.contains(key))
        .map(|(key, connection)| FlowChange {
            change: FlowChangeKind::Removed,
            connection: (*connection).clone(),
            endpoints_matched: matched(key),
        });

    added.chain(removed).collect()
}

/// Per-branch edge comparison for routing nodes.
fn branch_deltas(
    (source, source_node, source_index): (&NormalizedWorkflow, &NormalizedNode, &HashMap<&str, usize>),
    (target, target_node, target_index): (&NormalizedWorkflow, &NormalizedNode, &HashMap<&str, usize>),
) -> Vec<FieldDelta> {
    type Branches = BTreeMap<(String, usize), BTreeMap<(usize, usize), String>>;

    let branches = |workflow: &NormalizedWorkflow, node: &NormalizedNode, index: &HashMap<&str, usize>| {
        let mut out: Branches = BTreeMap::new();
        for connection in workflow.connections.iter().filter(|c| c.from == node.name) {
            if let Some(&to) = index.get(connection.to.as_str()) {
                out.entry((connection.kind.clone(), connection.from_output))
                    .or_default()
                    .insert((to, connection.to_input), connection.to.clone());
            }
        }
        out
    };
    let source_branches = branches(source, source_node, source_index);
    let target_branches = branches(target, target_node, target_index);

    let empty = BTreeMap::new();
    let keys: BTreeSet<&(String, usize)> = source_branches.keys().chain(target_branches.keys()).collect();
    let names = |edges: &BTreeMap<(usize, usize), String>| {
        serde_json::Value::Array(edges.values().cloned().map(serde_json::Value::String).collect())
    };

    keys.into_iter()
        .filter_map(|key| {
            let after = source_branches.get(key).unwrap_or(&empty);
            let before = target_branches.get(key).unwrap_or(&empty);
            let same = after.keys().eq(before.keys());
            (!same).then(|| FieldDelta {
                path: format!("branches.{}[{}]", key.0, key.1),
                kind: DeltaKind::RoutingBranch,
                before: Some(names(before)),
                after: Some(names(after)),
                expression: false,
            })
        })
        .collect()
}

fn settings_changes(
    source: &BTreeMap<String, ParamValue>,
    target: &BTreeMap<String, ParamValue>,
) -> Vec<SettingsChange> {
    let keys: BTreeSet<&String> = source.keys().chain(target.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let (after, before) = (source.get(key), target.get(key));
            (after != before).then(|| SettingsChange {
                key: key.clone(),
                before: before.map(ParamValue::to_json),
                after: after.map(ParamValue::to_json),
            })
        })
        .collect()
}
