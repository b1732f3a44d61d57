//! Per-workflow progress through one compare call.

use serde::Serialize;
use tracing::{debug, warn};

/// Phase of a single workflow inside a compare call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Queued for the worker pool.
    Pending,
    /// Fetching from both environments.
    Fetching,
    /// Both fetches answered.
    Fetched,
    /// A fetch failed after retries.
    FetchFailed,
    /// Both sides normalized and hashed.
    Normalized,
    /// A side could not be normalized.
    NormalizeFailed,
    /// Field-level changes computed.
    Diffed,
    /// Status and risk assigned.
    Classified,
    /// The workflow could not be evaluated.
    Unknown,
}

impl WorkflowPhase {
    /// Returns true if the transition to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Fetching)
                | (Self::Fetching, Self::Fetched | Self::FetchFailed)
                | (Self::Fetched, Self::Normalized | Self::NormalizeFailed)
                | (Self::Normalized, Self::Diffed | Self::Unknown)
                | (Self::Diffed, Self::Classified)
                | (Self::FetchFailed | Self::NormalizeFailed, Self::Unknown)
        )
    }

    /// Returns true for `classified` and `unknown`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Classified | Self::Unknown)
    }

    /// Returns the phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::FetchFailed => "fetch_failed",
            Self::Normalized => "normalized",
            Self::NormalizeFailed => "normalize_failed",
            Self::Diffed => "diffed",
            Self::Classified => "classified",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the phase of one workflow.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    workflow_id: String,
    phase: WorkflowPhase,
}

impl PhaseTracker {
    /// Starts tracking a workflow in `pending`.
    #[must_use]
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            phase: WorkflowPhase::Pending,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    /// Moves to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: WorkflowPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(
                workflow_id = %self.workflow_id,
                "Ignoring invalid phase transition {} -> {next}",
                self.phase
            );
            return false;
        }

        debug!(workflow_id = %self.workflow_id, "{} -> {next}", self.phase);
        self.phase = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path() {
        let mut tracker = PhaseTracker::new("wf-1");
        for next in [
            WorkflowPhase::Fetching,
            WorkflowPhase::Fetched,
            WorkflowPhase::Normalized,
            WorkflowPhase::Diffed,
            WorkflowPhase::Classified,
        ] {
            assert!(tracker.advance(next));
        }
        assert!(tracker.phase().is_terminal());
    }

    #[test]
    fn test_failure_paths_end_unknown() {
        let mut fetch = PhaseTracker::new("wf-1");
        assert!(fetch.advance(WorkflowPhase::Fetching));
        assert!(fetch.advance(WorkflowPhase::FetchFailed));
        assert!(fetch.advance(WorkflowPhase::Unknown));

        let mut normalize = PhaseTracker::new("wf-2");
        normalize.advance(WorkflowPhase::Fetching);
        normalize.advance(WorkflowPhase::Fetched);
        assert!(normalize.advance(WorkflowPhase::NormalizeFailed));
        assert!(normalize.advance(WorkflowPhase::Unknown));
    }

    #[test]
    fn test_invalid_transition_ignored() {
        let mut tracker = PhaseTracker::new("wf-1");
        assert!(!tracker.advance(WorkflowPhase::Classified));
        assert_eq!(tracker.phase(), WorkflowPhase::Pending);

        tracker.advance(WorkflowPhase::Fetching);
        tracker.advance(WorkflowPhase::FetchFailed);
        tracker.advance(WorkflowPhase::Unknown);
        assert!(!tracker.advance(WorkflowPhase::Fetching));
    }
}
