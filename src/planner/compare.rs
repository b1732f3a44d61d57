//! Single-workflow compare pipeline.
//!
//! Normalize, hash, match, diff and classify one workflow pair. Every step
//! here is pure and synchronous.

use crate::config::EngineConfig;
use crate::error::NormalizationError;
use crate::graph::{ContentHash, ContentHasher, NormalizedWorkflow, Normalizer, WorkflowGraph};

use super::classify::{ClassifyInput, Classifier};
use super::diff::{SemanticDiffer, Side, WorkflowChanges};
use super::matcher::NodeMatcher;
use super::plan::WorkflowDiffResult;

/// A normalized workflow together with its content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWorkflow {
    /// Canonical form.
    pub normalized: NormalizedWorkflow,
    /// Content hash of the canonical form.
    pub hash: ContentHash,
}

/// Runs the pure compare steps for one workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowComparer {
    normalizer: Normalizer,
    matcher: NodeMatcher,
    differ: SemanticDiffer,
    classifier: Classifier,
    hasher: ContentHasher,
}

impl WorkflowComparer {
    /// Creates a comparer from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let classifier = Classifier::new();
        Self {
            normalizer: Normalizer::new(config.normalizer.clone(), config.node_kinds.clone()),
            matcher: NodeMatcher::new(config.matcher.clone()),
            differ: SemanticDiffer::new(classifier),
            classifier,
            hasher: ContentHasher::new(),
        }
    }

    /// Returns the content hasher.
    #[must_use]
    pub const fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    /// Normalizes and hashes a raw graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is malformed.
    pub fn prepare(&self, graph: &WorkflowGraph) -> Result<PreparedWorkflow, NormalizationError> {
        let normalized = self.normalizer.normalize(graph)?;
        let hash = self.hasher.hash_workflow(&normalized);
        Ok(PreparedWorkflow { normalized, hash })
    }

    /// Compares the prepared source and target versions of a workflow.
    ///
    /// `None` means the workflow does not exist on that side.
    #[must_use]
    pub fn compare(
        &self,
        workflow_id: &str,
        source: Option<&PreparedWorkflow>,
        target: Option<&PreparedWorkflow>,
    ) -> WorkflowDiffResult {
        let (name, diff_hash) = match (source, target) {
            (_, Some(t)) => (
                source.map_or(&t.normalized.name, |s| &s.normalized.name),
                &t.hash,
            ),
            (Some(s), None) => (&s.normalized.name, &s.hash),
            (None, None) => {
                return WorkflowDiffResult::unknown(
                    workflow_id,
                    workflow_id,
                    "workflow not found in either environment",
                );
            }
        };

        let content_equal = matches!(
            (source, target),
            (Some(s), Some(t)) if ContentHasher::hashes_match(&s.hash, &t.hash)
        );

        let changes = match (source, target) {
            (Some(_), Some(_)) if content_equal => WorkflowChanges::default(),
            (Some(s), Some(t)) => {
                let pairs = self.matcher.match_nodes(&s.normalized, &t.normalized);
                self.differ.diff_workflows(&s.normalized, &t.normalized, &pairs)
            }
            (Some(s), None) => self.differ.one_sided(&s.normalized, Side::Source),
            (None, Some(t)) => self.differ.one_sided(&t.normalized, Side::Target),
            (None, None) => WorkflowChanges::default(),
        };

        let classification = self.classifier.classify(&ClassifyInput {
            node_changes: &changes.node_changes,
            flow_changes: &changes.flow_changes,
            settings_changes: &changes.settings_changes,
            source_updated_at: source.and_then(|s| s.normalized.updated_at),
            target_updated_at: target.and_then(|t| t.normalized.updated_at),
            source_exists: source.is_some(),
            target_exists: target.is_some(),
            content_equal,
        });

        WorkflowDiffResult::classified(
            workflow_id,
            name.as_str(),
            classification,
            diff_hash.as_str(),
            changes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ChangeCategory, DiffStatus, RiskLevel};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn prepared(comparer: &WorkflowComparer, value: serde_json::Value) -> PreparedWorkflow {
        let graph: WorkflowGraph = serde_json::from_value(value).unwrap();
        comparer.prepare(&graph).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "id": "wf-1",
            "name": "Orders",
            "updatedAt": "2026-01-01T00:00:00Z",
            "nodes": [
                {"id": "t", "name": "Hook", "type": "n8n-nodes-base.webhook", "position": [0, 0],
                 "parameters": {"path": "orders"}},
                {"id": "h", "name": "Call", "type": "n8n-nodes-base.httpRequest", "position": [200, 0],
                 "parameters": {"url": "https://api.foo/v1"},
                 "credentials": {"httpHeaderAuth": {"id": "1", "name": "Foo"}}}
            ],
            "connections": [{"from": "Hook", "to": "Call"}]
        })
    }

    #[test]
    fn test_position_only_change_is_unchanged() {
        let comparer = WorkflowComparer::default();
        let mut moved = base();
        moved["nodes"][1]["position"] = json!([900, 300]);
        moved["updatedAt"] = json!("2026-06-01T00:00:00Z");

        let source = prepared(&comparer, base());
        let target = prepared(&comparer, moved);
        let result = comparer.compare("wf-1", Some(&source), Some(&target));

        assert_eq!(result.diff_status, DiffStatus::Unchanged);
        assert!(result.change_categories.is_empty());
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_http_url_scenario() {
        let comparer = WorkflowComparer::default();
        let mut target = base();
        target["nodes"][1]["parameters"]["url"] = json!("https://api.bar/v2");

        let source = prepared(&comparer, base());
        let target = prepared(&comparer, target);
        let result = comparer.compare("wf-1", Some(&source), Some(&target));

        assert_eq!(result.diff_status, DiffStatus::Modified);
        assert_eq!(result.change_categories, BTreeSet::from([ChangeCategory::HttpChanged]));
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.diff_hash, target.hash.as_str());
    }

    #[test]
    fn test_credential_only_change_is_high_risk() {
        let comparer = WorkflowComparer::default();
        let mut target = base();
        target["nodes"][1]["credentials"]["httpHeaderAuth"]["name"] = json!("Foo (prod)");

        let source = prepared(&comparer, base());
        let target = prepared(&comparer, target);
        let result = comparer.compare("wf-1", Some(&source), Some(&target));

        assert!(result.change_categories.contains(&ChangeCategory::CredentialsChanged));
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_rename_isolation() {
        let comparer = WorkflowComparer::default();
        let mut renamed = base();
        renamed["nodes"][1]["name"] = json!("Call API");
        renamed["connections"] = json!([{"from": "Hook", "to": "Call API"}]);

        let source = prepared(&comparer, base());
        let target = prepared(&comparer, renamed);
        let result = comparer.compare("wf-1", Some(&source), Some(&target));

        assert_eq!(result.change_categories, BTreeSet::from([ChangeCategory::RenameOnly]));
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_rename_isolation_without_node_ids() {
        let comparer = WorkflowComparer::default();
        let without_ids = |log: &str, format: &str| {
            json!({
                "id": "wf-2",
                "nodes": [
                    {"name": "Start", "type": "n8n-nodes-base.manualTrigger"},
                    {"name": log, "type": "n8n-nodes-base.noOp"},
                    {"name": format, "type": "n8n-nodes-base.set", "parameters": {"values": {"a": 1}}}
                ],
                "connections": [{"from": "Start", "to": log}]
            })
        };

        let source = prepared(&comparer, without_ids("Log", "Format"));
        let target = prepared(&comparer, without_ids("Log it", "Format data"));
        let result = comparer.compare("wf-2", Some(&source), Some(&target));

        assert_eq!(result.diff_status, DiffStatus::Modified);
        assert_eq!(result.change_categories, BTreeSet::from([ChangeCategory::RenameOnly]));
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    fn single_node_workflow(
        name: &str,
        node_type: &str,
        keys: &[u8],
        with_id: bool,
        connected: bool,
    ) -> serde_json::Value {
        let parameters: serde_json::Map<String, serde_json::Value> =
            keys.iter().map(|k| (format!("k{k}"), json!(k))).collect();
        let mut node = json!({"name": name, "type": node_type, "parameters": parameters});
        if with_id {
            node["id"] = json!("n1");
        }

        let mut nodes = vec![json!({"name": "Start", "type": "n8n-nodes-base.manualTrigger"})];
        nodes.push(node);
        let connections = if connected {
            json!([{"from": "Start", "to": name}])
        } else {
            json!([])
        };
        json!({"id": "wf-p", "nodes": nodes, "connections": connections})
    }

    proptest! {
        #[test]
        fn prop_renaming_one_node_is_rename_only(
            name in "[A-Z][a-z]{1,6}",
            node_type in prop::sample::select(vec![
                "n8n-nodes-base.set",
                "n8n-nodes-base.noOp",
                "n8n-nodes-base.code",
                "n8n-nodes-base.wait",
            ]),
            keys in proptest::collection::btree_set(0u8..6, 0..4),
            with_id in any::<bool>(),
            connected in any::<bool>(),
        ) {
            let comparer = WorkflowComparer::default();
            let keys: Vec<u8> = keys.into_iter().collect();
            let old_name = format!("Node {name}");
            let new_name = format!("{old_name} v2");

            let source = prepared(&comparer, single_node_workflow(&old_name, node_type, &keys, with_id, connected));
            let target = prepared(&comparer, single_node_workflow(&new_name, node_type, &keys, with_id, connected));
            let result = comparer.compare("wf-p", Some(&source), Some(&target));

            prop_assert_eq!(result.change_categories, BTreeSet::from([ChangeCategory::RenameOnly]));
            prop_assert_eq!(result.risk_level, RiskLevel::Low);
        }
    }

    #[test]
    fn test_hotfix_precedence() {
        let comparer = WorkflowComparer::default();
        let mut target = base();
        target["nodes"][1]["parameters"]["url"] = json!("https://api.bar/v2");
        target["updatedAt"] = json!("2026-02-01T00:00:00Z");

        let source = prepared(&comparer, base());
        let target = prepared(&comparer, target);
        let result = comparer.compare("wf-1", Some(&source), Some(&target));

        assert_eq!(result.diff_status, DiffStatus::TargetHotfix);
    }

    #[test]
    fn test_source_only_is_added() {
        let comparer = WorkflowComparer::default();
        let source = prepared(&comparer, base());
        let result = comparer.compare("wf-1", Some(&source), None);

        assert_eq!(result.diff_status, DiffStatus::Added);
        assert_eq!(result.diff_hash, source.hash.as_str());
        assert!(result.change_categories.contains(&ChangeCategory::NodeAdded));
        assert_eq!(result.flow_changes.len(), 1);
    }

    #[test]
    fn test_target_only_is_deleted() {
        let comparer = WorkflowComparer::default();
        let target = prepared(&comparer, base());
        let result = comparer.compare("wf-1", None, Some(&target));

        assert_eq!(result.diff_status, DiffStatus::Deleted);
        assert_eq!(result.name, "Orders");
        assert_eq!(result.change_categories, BTreeSet::from([ChangeCategory::NodeRemoved]));
    }

    #[test]
    fn test_missing_everywhere_is_unknown() {
        let result = WorkflowComparer::default().compare("wf-9", None, None);
        assert_eq!(result.diff_status, DiffStatus::Unknown);
        assert!(!result.details_available);
    }
}
