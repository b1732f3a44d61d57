//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{EngineConfig, ValidationResult};
use crate::graph::{ContentHash, NormalizedWorkflow};
use crate::planner::{
    DiffStatus, FieldDelta, FlowChangeKind, MatchMethod, PromotionPlanCompareResult, RiskLevel,
    WorkflowDiffResult,
};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Workflow row for table display.
#[derive(Tabled)]
struct WorkflowRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Workflow")]
    name: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Categories")]
    categories: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Field delta row for table display.
#[derive(Tabled)]
struct DeltaRow {
    #[tabled(rename = "Field")]
    path: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Target (before)")]
    before: String,
    #[tabled(rename = "Source (after)")]
    after: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a compare result for display.
    #[must_use]
    pub fn format_plan(&self, plan: &PromotionPlanCompareResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &PromotionPlanCompareResult) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nPromotion plan: {}/{} ({} -> {})\n\n",
            plan.pipeline_id, plan.stage_id, plan.source_env_id, plan.target_env_id
        );

        if plan.workflows.is_empty() {
            output.push_str("   No workflows selected.\n");
            return output;
        }

        let rows: Vec<WorkflowRow> = plan
            .workflows
            .iter()
            .map(|w| WorkflowRow {
                status: Self::format_status(w.diff_status),
                name: Self::truncate(&w.name, 40),
                risk: Self::format_risk(w.risk_level, w.diff_status),
                categories: w
                    .change_categories
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                id: Self::truncate(&w.workflow_id, 24),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = &plan.summary;
        let _ = write!(
            output,
            "\nSummary: {} total, {} added, {} modified, {} deleted, {} hotfix, {} unchanged, {} unknown\n",
            summary.total,
            summary.added.to_string().green(),
            summary.modified.to_string().yellow(),
            summary.deleted.to_string().red(),
            summary.target_hotfix.to_string().magenta(),
            summary.unchanged,
            summary.unknown.to_string().red().bold()
        );

        if plan.has_unknown() {
            let _ = write!(
                output,
                "\n{} {} workflow(s) could not be evaluated; this plan is incomplete:\n",
                "⚠".yellow(),
                summary.unknown
            );
            for workflow in plan.workflows.iter().filter(|w| w.diff_status == DiffStatus::Unknown) {
                let _ = writeln!(
                    output,
                    "   - {}: {}",
                    workflow.workflow_id,
                    workflow.error.as_deref().unwrap_or("unknown error")
                );
            }
        } else if plan.change_count() == 0 {
            let _ = writeln!(output, "\n{} Target is up to date.", "✓".green());
        }

        output
    }

    /// Formats one workflow's node, flow and settings changes.
    #[must_use]
    pub fn format_details(&self, workflow: &WorkflowDiffResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&workflow.details()).unwrap_or_default(),
            OutputFormat::Text => Self::format_details_text(workflow),
        }
    }

    /// Formats details as text.
    fn format_details_text(workflow: &WorkflowDiffResult) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nWorkflow: {} ({})\n   Status: {}  Risk: {}\n",
            workflow.name,
            workflow.workflow_id,
            Self::format_status(workflow.diff_status),
            Self::format_risk(workflow.risk_level, workflow.diff_status)
        );

        if !workflow.diff_hash.is_empty() {
            let _ = writeln!(output, "   Diff hash: {}", workflow.diff_hash);
        }

        if workflow.node_changes.is_empty()
            && workflow.flow_changes.is_empty()
            && workflow.settings_changes.is_empty()
        {
            output.push_str("\n   No changes.\n");
            return output;
        }

        for node in &workflow.node_changes {
            let _ = write!(
                output,
                "\n{} {} [{}] {}\n",
                "●".cyan(),
                node.node_name.bold(),
                node.node_type,
                Self::format_match(node.match_method)
            );

            if let (Some(source), Some(target)) = (&node.source_name, &node.target_name)
                && source != target
            {
                let _ = writeln!(output, "   renamed: {target} -> {source}");
            }

            let rows: Vec<DeltaRow> = node.deltas.iter().map(Self::delta_row).collect();
            if !rows.is_empty() {
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
            }
        }

        if !workflow.flow_changes.is_empty() {
            output.push_str("\nConnections:\n");
            for flow in &workflow.flow_changes {
                let marker = match flow.change {
                    FlowChangeKind::Added => "+".green(),
                    FlowChangeKind::Removed => "-".red(),
                };
                let _ = writeln!(output, "   {marker} {}", flow.connection);
            }
        }

        if !workflow.settings_changes.is_empty() {
            output.push_str("\nSettings:\n");
            for setting in &workflow.settings_changes {
                let _ = writeln!(
                    output,
                    "   ~ {}: {} -> {}",
                    setting.key,
                    Self::format_value(setting.before.as_ref()),
                    Self::format_value(setting.after.as_ref())
                );
            }
        }

        output
    }

    /// Formats a configuration validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &EngineConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
                        .collect::<Vec<_>>(),
                    "warnings": if show_warnings { result.warnings.clone() } else { Vec::new() },
                    "environments": config.environments.len(),
                    "pipelines": config.pipelines.len(),
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid!\n", "✓".green())
                } else {
                    let mut output = format!("{} Configuration is invalid:\n", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                    output
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "   Environments: {}", config.environments.len());
                for pipeline in &config.pipelines {
                    let stages = pipeline
                        .stages
                        .iter()
                        .map(|s| format!("{} ({} -> {})", s.id, s.source_env, s.target_env))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = writeln!(output, "   Pipeline {}: {stages}", pipeline.id);
                }
                let _ = writeln!(output, "   Concurrency: {}", config.engine.concurrency);

                output
            }
        }
    }

    /// Formats a normalized workflow and its content hash.
    #[must_use]
    pub fn format_normalized(&self, workflow: &NormalizedWorkflow, hash: &ContentHash) -> String {
        let canonical: serde_json::Value =
            serde_json::from_str(workflow.canonical()).unwrap_or(serde_json::Value::Null);

        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "workflow_id": workflow.id,
                    "name": workflow.name,
                    "content_hash": hash,
                    "canonical": canonical,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nWorkflow: {} ({})", workflow.name, workflow.id);
                let _ = writeln!(output, "   Content hash: {hash}");
                let _ = writeln!(output, "   Nodes: {}", workflow.nodes.len());
                let _ = writeln!(output, "   Connections: {}\n", workflow.connections.len());
                output.push_str(&serde_json::to_string_pretty(&canonical).unwrap_or_default());
                output.push('\n');
                output
            }
        }
    }

    /// Formats an error for display.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    fn delta_row(delta: &FieldDelta) -> DeltaRow {
        let kind = serde_json::to_value(delta.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        DeltaRow {
            path: Self::truncate(&delta.path, 40),
            kind: if delta.expression {
                format!("{kind} (expr)")
            } else {
                kind
            },
            before: Self::format_value(delta.before.as_ref()),
            after: Self::format_value(delta.after.as_ref()),
        }
    }

    /// Formats a diff status with color.
    fn format_status(status: DiffStatus) -> String {
        match status {
            DiffStatus::Added => "+added".green().to_string(),
            DiffStatus::Modified => "~modified".yellow().to_string(),
            DiffStatus::Deleted => "-deleted".red().to_string(),
            DiffStatus::Unchanged => "unchanged".dimmed().to_string(),
            DiffStatus::TargetHotfix => "!target_hotfix".magenta().to_string(),
            DiffStatus::Unknown => "?unknown".red().bold().to_string(),
        }
    }

    /// Formats a risk level with color.
    fn format_risk(risk: RiskLevel, status: DiffStatus) -> String {
        if status == DiffStatus::Unchanged {
            return "-".dimmed().to_string();
        }
        match risk {
            RiskLevel::Low => "low".green().to_string(),
            RiskLevel::Medium => "medium".yellow().to_string(),
            RiskLevel::High => "high".red().to_string(),
        }
    }

    fn format_match(method: MatchMethod) -> String {
        match method {
            MatchMethod::Id => String::from("matched by id"),
            MatchMethod::NameType => String::from("matched by name"),
            MatchMethod::Similarity { score } => format!("matched by similarity {score:.2}"),
            MatchMethod::Unmatched => String::from("unmatched"),
        }
    }

    fn format_value(value: Option<&serde_json::Value>) -> String {
        value.map_or_else(|| String::from("(none)"), |v| Self::truncate(&v.to_string(), 40))
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
