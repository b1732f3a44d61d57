//! Planning module for workflow promotion.
//!
//! This module handles the pure side of a compare: pairing nodes across
//! versions, computing field-level deltas, classifying them, and assembling
//! the promotion plan result.

mod classify;
mod compare;
mod diff;
mod matcher;
mod plan;

pub use classify::{ChangeCategory, Classification, ClassifyInput, Classifier, DiffStatus, RiskLevel};
pub use compare::{PreparedWorkflow, WorkflowComparer};
pub use diff::{
    DeltaKind, FieldDelta, FlowChange, FlowChangeKind, NodeChangeRecord, SemanticDiffer,
    SettingsChange, Side, WorkflowChanges,
};
pub use matcher::{MatchMethod, NodeMatcher, NodePair};
pub use plan::{PlanSummary, PromotionPlanCompareResult, WorkflowDiffDetail, WorkflowDiffResult};
