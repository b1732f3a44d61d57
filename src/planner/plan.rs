//! Promotion plan result types.
//!
//! This module defines the wire shape of a compare result and the
//! per-workflow detail view.

use serde::Serialize;
use std::collections::BTreeSet;

use super::classify::{ChangeCategory, Classification, DiffStatus, RiskLevel};
use super::diff::{FlowChange, NodeChangeRecord, SettingsChange, WorkflowChanges};

/// Result for a single workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDiffResult {
    /// Workflow identifier.
    pub workflow_id: String,
    /// Workflow display name.
    pub name: String,
    /// Diff status.
    pub diff_status: DiffStatus,
    /// Aggregated risk.
    pub risk_level: RiskLevel,
    /// Aggregated categories.
    pub change_categories: BTreeSet<ChangeCategory>,
    /// Content hash of the normalized target if present, else source.
    pub diff_hash: String,
    /// Node, flow and settings details can be served.
    pub details_available: bool,
    /// Why the workflow could not be evaluated.
    pub error: Option<String>,
    /// Changed nodes.
    #[serde(skip)]
    pub node_changes: Vec<NodeChangeRecord>,
    /// Edge changes.
    #[serde(skip)]
    pub flow_changes: Vec<FlowChange>,
    /// Settings changes.
    #[serde(skip)]
    pub settings_changes: Vec<SettingsChange>,
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Total workflows.
    pub total: usize,
    /// Present in source only.
    pub added: usize,
    /// Changed on both sides.
    pub modified: usize,
    /// Present in target only.
    pub deleted: usize,
    /// Identical content.
    pub unchanged: usize,
    /// Target changed independently.
    pub target_hotfix: usize,
    /// Could not be evaluated.
    pub unknown: usize,
}

/// Result of one compare call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionPlanCompareResult {
    /// Pipeline identifier.
    pub pipeline_id: String,
    /// Stage identifier.
    pub stage_id: String,
    /// Source environment identifier.
    pub source_env_id: String,
    /// Target environment identifier.
    pub target_env_id: String,
    /// Counts per status.
    pub summary: PlanSummary,
    /// Per-workflow results in deterministic order.
    pub workflows: Vec<WorkflowDiffResult>,
}

/// Detail view for one workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDiffDetail<'a> {
    /// Workflow identifier.
    pub workflow_id: &'a str,
    /// Workflow display name.
    pub name: &'a str,
    /// Diff status.
    pub diff_status: DiffStatus,
    /// Changed nodes.
    pub node_changes: &'a [NodeChangeRecord],
    /// Edge changes.
    pub flow_changes: &'a [FlowChange],
    /// Settings changes.
    pub settings_changes: &'a [SettingsChange],
}

impl WorkflowDiffResult {
    /// Creates a classified result.
    #[must_use]
    pub fn classified(
        workflow_id: impl Into<String>,
        name: impl Into<String>,
        classification: Classification,
        diff_hash: impl Into<String>,
        changes: WorkflowChanges,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name: name.into(),
            diff_status: classification.status,
            risk_level: classification.risk,
            change_categories: classification.categories,
            diff_hash: diff_hash.into(),
            details_available: true,
            error: None,
            node_changes: changes.node_changes,
            flow_changes: changes.flow_changes,
            settings_changes: changes.settings_changes,
        }
    }

    /// Creates an `unknown` result for a workflow that failed to fetch or
    /// normalize.
    ///
    /// Unknown entries are reported as high risk: nothing about them is
    /// understood.
    #[must_use]
    pub fn unknown(workflow_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name: name.into(),
            diff_status: DiffStatus::Unknown,
            risk_level: RiskLevel::High,
            change_categories: BTreeSet::new(),
            diff_hash: String::new(),
            details_available: false,
            error: Some(error.into()),
            node_changes: Vec::new(),
            flow_changes: Vec::new(),
            settings_changes: Vec::new(),
        }
    }

    /// Returns the detail view.
    #[must_use]
    pub fn details(&self) -> WorkflowDiffDetail<'_> {
        WorkflowDiffDetail {
            workflow_id: &self.workflow_id,
            name: &self.name,
            diff_status: self.diff_status,
            node_changes: &self.node_changes,
            flow_changes: &self.flow_changes,
            settings_changes: &self.settings_changes,
        }
    }

    /// Returns true if the workflow has any change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !matches!(self.diff_status, DiffStatus::Unchanged)
    }
}

impl PlanSummary {
    /// Counts statuses in a single pass.
    #[must_use]
    pub fn from_workflows(workflows: &[WorkflowDiffResult]) -> Self {
        let mut summary = Self {
            total: workflows.len(),
            ..Self::default()
        };
        for workflow in workflows {
            let counter = match workflow.diff_status {
                DiffStatus::Added => &mut summary.added,
                DiffStatus::Modified => &mut summary.modified,
                DiffStatus::Deleted => &mut summary.deleted,
                DiffStatus::Unchanged => &mut summary.unchanged,
                DiffStatus::TargetHotfix => &mut summary.target_hotfix,
                DiffStatus::Unknown => &mut summary.unknown,
            };
            *counter += 1;
        }
        summary
    }
}

impl PromotionPlanCompareResult {
    /// Builds a result, sorting workflows by status priority, then name,
    /// then id, and computing the summary.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        stage_id: impl Into<String>,
        source_env_id: impl Into<String>,
        target_env_id: impl Into<String>,
        mut workflows: Vec<WorkflowDiffResult>,
    ) -> Self {
        workflows.sort_by(|a, b| {
            a.diff_status
                .priority()
                .cmp(&b.diff_status.priority())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });

        Self {
            pipeline_id: pipeline_id.into(),
            stage_id: stage_id.into(),
            source_env_id: source_env_id.into(),
            target_env_id: target_env_id.into(),
            summary: PlanSummary::from_workflows(&workflows),
            workflows,
        }
    }

    /// Finds a workflow result by id.
    #[must_use]
    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDiffResult> {
        self.workflows.iter().find(|w| w.workflow_id == workflow_id)
    }

    /// Returns true if some workflows could not be evaluated.
    #[must_use]
    pub const fn has_unknown(&self) -> bool {
        self.summary.unknown > 0
    }

    /// Returns the number of workflows that would change on promotion.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.workflows.iter().filter(|w| w.has_changes()).count()
    }
}

impl std::fmt::Display for WorkflowDiffResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {} [{}]", self.name, self.workflow_id, self.diff_status, self.risk_level)?;
        if !self.change_categories.is_empty() {
            let categories: Vec<&str> = self.change_categories.iter().map(ChangeCategory::as_str).collect();
            write!(f, " {}", categories.join(", "))?;
        }
        if let Some(error) = &self.error {
            write!(f, " error: {error}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for PromotionPlanCompareResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Compare {}/{} ({} -> {}), {} workflows:",
            self.pipeline_id, self.stage_id, self.source_env_id, self.target_env_id, self.summary.total
        )?;
        for workflow in &self.workflows {
            writeln!(f, "  {workflow}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, name: &str, status: DiffStatus) -> WorkflowDiffResult {
        let classification = Classification {
            status,
            risk: RiskLevel::Low,
            categories: BTreeSet::new(),
        };
        WorkflowDiffResult::classified(id, name, classification, "abc", WorkflowChanges::default())
    }

    #[test]
    fn test_workflows_sorted_deterministically() {
        let plan = PromotionPlanCompareResult::new(
            "p",
            "s",
            "dev",
            "prod",
            vec![
                result("3", "Billing", DiffStatus::Unchanged),
                result("2", "Alerts", DiffStatus::Modified),
                WorkflowDiffResult::unknown("9", "Zeta", "timeout"),
                result("1", "Alerts", DiffStatus::Modified),
                result("4", "Audit", DiffStatus::TargetHotfix),
            ],
        );

        let order: Vec<&str> = plan.workflows.iter().map(|w| w.workflow_id.as_str()).collect();
        assert_eq!(order, vec!["9", "4", "1", "2", "3"]);
    }

    #[test]
    fn test_summary_counts() {
        let plan = PromotionPlanCompareResult::new(
            "p",
            "s",
            "dev",
            "prod",
            vec![
                result("1", "a", DiffStatus::Added),
                result("2", "b", DiffStatus::Added),
                result("3", "c", DiffStatus::Deleted),
                WorkflowDiffResult::unknown("4", "d", "boom"),
            ],
        );

        assert_eq!(
            plan.summary,
            PlanSummary {
                total: 4,
                added: 2,
                deleted: 1,
                unknown: 1,
                ..PlanSummary::default()
            }
        );
        assert!(plan.has_unknown());
    }

    #[test]
    fn test_wire_shape() {
        let plan = PromotionPlanCompareResult::new(
            "p",
            "s",
            "dev",
            "prod",
            vec![WorkflowDiffResult::unknown("4", "d", "boom")],
        );
        let value = serde_json::to_value(&plan).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "pipeline_id": "p",
                "stage_id": "s",
                "source_env_id": "dev",
                "target_env_id": "prod",
                "summary": {"total": 1, "added": 0, "modified": 0, "deleted": 0,
                            "unchanged": 0, "target_hotfix": 0, "unknown": 1},
                "workflows": [{
                    "workflow_id": "4",
                    "name": "d",
                    "diff_status": "unknown",
                    "risk_level": "high",
                    "change_categories": [],
                    "diff_hash": "",
                    "details_available": false,
                    "error": "boom"
                }]
            })
        );
    }
}
