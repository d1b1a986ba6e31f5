//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{InfraConfig, SpecHasher, ValidationResult};
use crate::engine::{ApplyResult, ResourceStatus};
use crate::graph::ResourceGraph;
use crate::planner::ChangeType;
use crate::reconciler::{DriftReport, Preview, ReconciliationResult};
use crate::state::{InfraState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Level")]
    level: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Change")]
    change: String,
}

/// Per-resource outcome row.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Time")]
    elapsed: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Recorded resource row.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Applied")]
    applied_at: String,
}

/// Graph edge row.
#[derive(Tabled)]
struct EdgeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Depends on")]
    dependency: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan preview for display.
    #[must_use]
    pub fn format_plan(&self, preview: &Preview) -> String {
        match self.format {
            OutputFormat::Json => {
                let changes: serde_json::Map<String, serde_json::Value> = preview
                    .changes
                    .changes
                    .iter()
                    .map(|c| (c.name.clone(), serde_json::json!(c.change.to_string())))
                    .collect();
                let json = serde_json::json!({
                    "plan": preview.plan,
                    "changes": changes,
                    "creates": preview.changes.creates,
                    "updates": preview.changes.updates,
                    "deletes": preview.changes.deletes,
                    "unchanged": preview.changes.unchanged,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(preview),
        }
    }

    fn format_plan_text(preview: &Preview) -> String {
        let plan = &preview.plan;
        if plan.is_empty() {
            return format!("{} Nothing declared, nothing to plan.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = write!(
            output,
            "\n📋 {} plan ({} levels)\n   Graph hash: {}\n\n",
            plan.mode,
            plan.level_count(),
            SpecHasher::new().short_hash(&plan.graph_hash)
        );

        let rows: Vec<PlanRow> = plan
            .levels
            .iter()
            .flat_map(|level| {
                level.resources.iter().map(move |name| (level.index, name))
            })
            .map(|(level, name)| PlanRow {
                level,
                resource: name.clone(),
                kind: preview
                    .graph
                    .get(name)
                    .map(|s| s.kind().to_string())
                    .unwrap_or_default(),
                change: preview
                    .changes
                    .changes
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| Self::format_change(c.change))
                    .unwrap_or_default(),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let orphans = preview.changes.orphans();
        if !orphans.is_empty() {
            let _ = write!(
                output,
                "\n{} No longer declared, pruned on apply: {}\n",
                "-".red(),
                orphans.join(", ")
            );
        }

        for change in preview.changes.actionable() {
            for detail in &change.details {
                let _ = writeln!(
                    output,
                    "   {} {}.{}: {} -> {}",
                    "~".yellow(),
                    change.name,
                    detail.field,
                    detail.old_value.as_deref().unwrap_or("-"),
                    detail.new_value.as_deref().unwrap_or("-")
                );
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy, {} unchanged\n",
            preview.changes.creates.to_string().green(),
            preview.changes.updates.to_string().yellow(),
            preview.changes.deletes.to_string().red(),
            preview.changes.unchanged
        );

        output
    }

    /// Formats graph edges.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph) -> String {
        let edges = graph.edges();
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "resources": graph.names().collect::<Vec<_>>(),
                    "edges": edges
                        .iter()
                        .map(|(from, to)| serde_json::json!({ "from": from, "to": to }))
                        .collect::<Vec<_>>(),
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("\n🔗 {} resources, {} edges\n\n", graph.len(), edges.len());
                let rows: Vec<EdgeRow> = edges
                    .iter()
                    .map(|(from, to)| EdgeRow {
                        resource: (*to).to_string(),
                        dependency: (*from).to_string(),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats a validation result with a summary of the config.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        config: &InfraConfig,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "stack": config.qualified_name(),
                    "resources": config.resources.len(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                } else if !result.warnings.is_empty() {
                    let _ = writeln!(
                        output,
                        "   {} warning(s), rerun with --warnings to see them",
                        result.warnings.len()
                    );
                }

                let _ = write!(output, "\nConfiguration summary:\n");
                let _ = writeln!(output, "   Stack: {}", config.qualified_name());
                let _ = writeln!(
                    output,
                    "   Provider: {} / {}",
                    if config.provider.account.is_empty() { "-" } else { config.provider.account.as_str() },
                    config.provider.region
                );
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                let _ = writeln!(output, "   Exports: {}", config.exports.len());
                output
            }
        }
    }

    /// Formats the outcome of an apply or destroy.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "pruned": result.pruned.as_ref().map(Self::pass_json),
                    "pass": Self::pass_json(&result.pass),
                    "exports": result.final_state.exports,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                if let Some(pruned) = &result.pruned {
                    let _ = writeln!(output, "\nPruned orphans:");
                    output.push_str(&Self::pass_text(pruned));
                }
                output.push_str(&Self::pass_text(&result.pass));

                if !result.final_state.exports.is_empty() {
                    output.push_str("\nExports:\n");
                    for (name, value) in &result.final_state.exports {
                        let _ = writeln!(output, "   {name} = {}", render_value(value));
                    }
                }
                output
            }
        }
    }

    fn pass_json(pass: &ApplyResult) -> serde_json::Value {
        let resources: serde_json::Map<String, serde_json::Value> = pass
            .states
            .values()
            .map(|s| {
                (
                    s.name().to_string(),
                    serde_json::json!({
                        "status": s.status().to_string(),
                        "action": s.action().map(|a| a.to_string()),
                        "error": s.last_error().map(ToString::to_string),
                        "elapsed_ms": s.elapsed().map(|d| d.as_millis()),
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "mode": pass.mode,
            "succeeded": pass.succeeded(),
            "cancelled": pass.cancelled,
            "halted_at_level": pass.halted_at_level,
            "resources": resources,
        })
    }

    fn pass_text(pass: &ApplyResult) -> String {
        let rows: Vec<OutcomeRow> = pass
            .states
            .values()
            .map(|s| OutcomeRow {
                resource: s.name().to_string(),
                status: Self::format_status(s.status()),
                action: s.action().map(|a| a.to_string()).unwrap_or_default(),
                elapsed: s
                    .elapsed()
                    .map(|d| format!("{:.1}s", d.as_secs_f64()))
                    .unwrap_or_default(),
                error: s
                    .last_error()
                    .map(|e| truncate(&e.to_string(), 60))
                    .unwrap_or_default(),
            })
            .collect();

        let mut output = String::from("\n");
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let marker = if pass.succeeded() {
            "✓".green()
        } else {
            "✗".red()
        };
        let _ = writeln!(output, "\n{marker} {pass}");
        if let Some(level) = pass.halted_at_level {
            let _ = writeln!(output, "   Stopped after failures in level {level}");
        }
        if pass.cancelled {
            let _ = writeln!(output, "   Cancelled before all resources were dispatched");
        }
        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - state is converged.\n", "✓".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for (resource, change) in &report.drifted_resources {
                        let _ = writeln!(output, "   {} {resource}", Self::format_change(*change));
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} declared resources differ from state ({} recorded).\n",
                        report.drifted_resources.len(),
                        report.total_resources,
                        report.recorded_count
                    );
                    output
                }
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, state: &InfraState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let hasher = SpecHasher::new();
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\n💾 State: {}/{}\n\n",
                    state.stack, state.environment
                );
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Graph hash: {}", hasher.short_hash(&state.graph_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", state.resources.len());

                let rows: Vec<RecordRow> = state
                    .resources
                    .iter()
                    .map(|(name, record)| RecordRow {
                        resource: name.clone(),
                        kind: record.spec.kind().to_string(),
                        hash: hasher.short_hash(&record.spec_hash),
                        applied_at: record.applied_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.exports.is_empty() {
                    output.push_str("\n   Exports:\n");
                    for (name, value) in &state.exports {
                        let _ = writeln!(output, "     {name} = {}", render_value(value));
                    }
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "🔒 Locked by {} for {} (id {}, expires in {}s)\n",
                lock.holder,
                if lock.operation.is_empty() { "manual" } else { lock.operation.as_str() },
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a change type with color.
    fn format_change(change: ChangeType) -> String {
        match change {
            ChangeType::Create => "+create".green().to_string(),
            ChangeType::Update => "~update".yellow().to_string(),
            ChangeType::Delete => "-delete".red().to_string(),
            ChangeType::NoChange => "unchanged".dimmed().to_string(),
        }
    }

    /// Formats a resource status with color.
    fn format_status(status: ResourceStatus) -> String {
        match status {
            ResourceStatus::Applied | ResourceStatus::Destroyed => status.to_string().green().to_string(),
            ResourceStatus::Failed => status.to_string().red().to_string(),
            ResourceStatus::Applying | ResourceStatus::Destroying => {
                status.to_string().yellow().to_string()
            }
            ResourceStatus::Pending => status.to_string().dimmed().to_string(),
        }
    }
}

fn render_value(value: &serde_json::Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_state_as_json() {
        let mut state = InfraState::new("demo", "dev");
        state
            .exports
            .insert(String::from("vpc_id"), serde_json::json!("vpc-1"));

        let output = OutputFormatter::new(OutputFormat::Json).format_state(&state);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(parsed["stack"], "demo");
        assert_eq!(parsed["exports"]["vpc_id"], "vpc-1");
    }

    #[test]
    fn test_converged_drift_text() {
        colored::control::set_override(false);
        let report = DriftReport {
            has_drift: false,
            drifted_resources: Vec::new(),
            total_resources: 2,
            recorded_count: 2,
        };
        let output = OutputFormatter::new(OutputFormat::Text).format_drift(&report);
        assert!(output.contains("No drift detected"));
    }
}
