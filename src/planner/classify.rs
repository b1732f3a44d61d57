//! Change classification.
//!
//! Maps field deltas to a fixed category vocabulary, derives risk levels,
//! and resolves workflow-level status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::diff::{DeltaKind, FieldDelta, FlowChange, NodeChangeRecord, SettingsChange};

/// Change category vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    /// Node present in source only.
    NodeAdded,
    /// Node present in target only.
    NodeRemoved,
    /// Node type or type version changed.
    NodeTypeChanged,
    /// Credential reference changed.
    CredentialsChanged,
    /// Expression-bearing parameter changed.
    ExpressionsChanged,
    /// HTTP call configuration changed.
    HttpChanged,
    /// Trigger configuration changed.
    TriggerChanged,
    /// Routing or branch edges changed.
    RoutingChanged,
    /// Error-handling policy changed.
    ErrorHandlingChanged,
    /// Workflow setting changed.
    SettingsChanged,
    /// Plain parameter change on a non-specialised node.
    ParametersChanged,
    /// Only a node name changed.
    RenameOnly,
}

/// Risk level of a set of changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Cosmetic or plain parameter changes.
    #[default]
    Low,
    /// Error handling or settings changes.
    Medium,
    /// Credentials, expressions, triggers, HTTP or routing changes.
    High,
}

/// Workflow-level diff status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    /// Present in source only; promotion creates it.
    Added,
    /// Present on both sides with different content.
    Modified,
    /// Present in target only.
    Deleted,
    /// Same normalized content on both sides.
    Unchanged,
    /// Target edited independently after the source.
    TargetHotfix,
    /// Could not be evaluated.
    Unknown,
}

/// Inputs of a workflow-level classification.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    /// Per-node change records.
    pub node_changes: &'a [NodeChangeRecord],
    /// Edge changes.
    pub flow_changes: &'a [FlowChange],
    /// Settings changes.
    pub settings_changes: &'a [SettingsChange],
    /// Source update timestamp.
    pub source_updated_at: Option<DateTime<Utc>>,
    /// Target update timestamp.
    pub target_updated_at: Option<DateTime<Utc>>,
    /// Workflow exists in source.
    pub source_exists: bool,
    /// Workflow exists in target.
    pub target_exists: bool,
    /// Normalized content hashes are equal.
    pub content_equal: bool,
}

/// Outcome of a workflow-level classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Workflow status.
    pub status: DiffStatus,
    /// Aggregated risk.
    pub risk: RiskLevel,
    /// Aggregated categories.
    pub categories: BTreeSet<ChangeCategory>,
}

/// Classifier for change records.
#[derive(Debug, Default, Clone, Copy)]
pub struct Classifier;

impl ChangeCategory {
    /// Categories contributed by a single delta.
    #[must_use]
    pub fn for_delta(delta: &FieldDelta) -> Vec<Self> {
        let kind_category = match delta.kind {
            DeltaKind::NodeAdded => Some(Self::NodeAdded),
            DeltaKind::NodeRemoved => Some(Self::NodeRemoved),
            DeltaKind::TypeChanged => Some(Self::NodeTypeChanged),
            DeltaKind::Credential => Some(Self::CredentialsChanged),
            DeltaKind::HttpConfig => Some(Self::HttpChanged),
            DeltaKind::TriggerConfig => Some(Self::TriggerChanged),
            DeltaKind::RoutingConfig | DeltaKind::RoutingBranch => Some(Self::RoutingChanged),
            DeltaKind::ErrorHandling => Some(Self::ErrorHandlingChanged),
            DeltaKind::Parameter | DeltaKind::Disabled | DeltaKind::Notes => {
                (!delta.expression).then_some(Self::ParametersChanged)
            }
            DeltaKind::Renamed => None,
        };

        let mut categories: Vec<Self> = kind_category.into_iter().collect();
        if delta.expression {
            categories.push(Self::ExpressionsChanged);
        }
        categories
    }

    /// Returns the wire name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeAdded => "node_added",
            Self::NodeRemoved => "node_removed",
            Self::NodeTypeChanged => "node_type_changed",
            Self::CredentialsChanged => "credentials_changed",
            Self::ExpressionsChanged => "expressions_changed",
            Self::HttpChanged => "http_changed",
            Self::TriggerChanged => "trigger_changed",
            Self::RoutingChanged => "routing_changed",
            Self::ErrorHandlingChanged => "error_handling_changed",
            Self::SettingsChanged => "settings_changed",
            Self::ParametersChanged => "parameters_changed",
            Self::RenameOnly => "rename_only",
        }
    }
}

impl RiskLevel {
    /// Derives the risk of a category set.
    #[must_use]
    pub fn for_categories(categories: &BTreeSet<ChangeCategory>) -> Self {
        let any = |set: &[ChangeCategory]| set.iter().any(|c| categories.contains(c));

        if any(&[
            ChangeCategory::CredentialsChanged,
            ChangeCategory::ExpressionsChanged,
            ChangeCategory::TriggerChanged,
            ChangeCategory::HttpChanged,
            ChangeCategory::RoutingChanged,
        ]) {
            Self::High
        } else if any(&[ChangeCategory::ErrorHandlingChanged, ChangeCategory::SettingsChanged]) {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl DiffStatus {
    /// Sort priority; lower sorts first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::TargetHotfix => 1,
            Self::Modified => 2,
            Self::Added => 3,
            Self::Deleted => 4,
            Self::Unchanged => 5,
        }
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::TargetHotfix => "target_hotfix",
            Self::Unknown => "unknown",
        }
    }
}

impl Classifier {
    /// Creates a new classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Categories of one node's deltas.
    ///
    /// A record whose only delta is a rename yields `rename_only`.
    #[must_use]
    pub fn node_categories(&self, deltas: &[FieldDelta]) -> BTreeSet<ChangeCategory> {
        if !deltas.is_empty() && deltas.iter().all(|d| d.kind == DeltaKind::Renamed) {
            return BTreeSet::from([ChangeCategory::RenameOnly]);
        }
        deltas.iter().flat_map(ChangeCategory::for_delta).collect()
    }

    /// Classifies a workflow.
    ///
    /// Status rules, first match wins: target only is `deleted`, source only
    /// is `added`, equal content is `unchanged`, a later target timestamp is
    /// `target_hotfix`, anything else is `modified`.
    #[must_use]
    pub fn classify(&self, input: &ClassifyInput<'_>) -> Classification {
        let mut categories: BTreeSet<ChangeCategory> = input
            .node_changes
            .iter()
            .flat_map(|record| record.change_categories.iter().copied())
            .collect();

        // Edges touching an added or removed node are covered by that node
        if input.flow_changes.iter().any(|f| f.endpoints_matched) {
            categories.insert(ChangeCategory::RoutingChanged);
        }
        if !input.settings_changes.is_empty() {
            categories.insert(ChangeCategory::SettingsChanged);
        }
        if categories.len() > 1 {
            categories.remove(&ChangeCategory::RenameOnly);
        }

        let status = match (input.source_exists, input.target_exists) {
            (false, true) => DiffStatus::Deleted,
            (true, false) => DiffStatus::Added,
            _ if input.content_equal => DiffStatus::Unchanged,
            _ => match (input.source_updated_at, input.target_updated_at) {
                (Some(source), Some(target)) if target > source => DiffStatus::TargetHotfix,
                _ => DiffStatus::Modified,
            },
        };

        if status == DiffStatus::Unchanged {
            categories.clear();
        }

        Classification {
            status,
            risk: RiskLevel::for_categories(&categories),
            categories,
        }
    }
}

impl std::fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
