//! Run summaries on stdout, human or JSON.

use colored::Colorize;
use serde::Serialize;

use cityfeed_sync::{ActivationReport, DryRunPlan, GcReport, Outcome, PlannedAction};

pub fn print_outcome(outcome: &Outcome, json: bool) {
    if json {
        match serde_json::to_string(outcome) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("cannot encode summary: {err}"),
        }
        return;
    }
    for line in summary_lines(outcome) {
        println!("{line}");
    }
}

#[derive(Serialize)]
struct ErrorSummary<'a> {
    outcome: &'static str,
    error: &'a str,
}

/// Failures go to stderr as one line; with `--json` a summary object is
/// also written to stdout so callers always get a document.
pub fn print_error(err: &anyhow::Error, json: bool) {
    let message = err.to_string();
    eprintln!("{} {message}", "✗".red());
    if json {
        let summary = ErrorSummary {
            outcome: "error",
            error: &message,
        };
        if let Ok(line) = serde_json::to_string(&summary) {
            println!("{line}");
        }
    }
}

fn summary_lines(outcome: &Outcome) -> Vec<String> {
    match outcome {
        Outcome::AlreadyRunning => {
            vec![format!("{} another run holds the lock; nothing to do", "·".dimmed())]
        }
        Outcome::Unchanged { version } => {
            vec![format!("{} {version} already active", "✓".green())]
        }
        Outcome::Stale { published, active } => vec![format!(
            "{} published {published} is older than active {active}; not moving back",
            "!".yellow()
        )],
        Outcome::Activated(report) => activated_lines(report),
        Outcome::DryRun(plan) => dry_run_lines(plan),
    }
}

fn activated_lines(report: &ActivationReport) -> Vec<String> {
    let detail = if report.reused_snapshot {
        "existing snapshot".to_owned()
    } else {
        format!(
            "{} fetched, {} cached",
            report.fetch.objects_fetched, report.fetch.objects_cached
        )
    };
    let mut lines = vec![format!(
        "{} activated {} ({detail})",
        "✓".green(),
        report.version
    )];
    if let Some(previous) = &report.previous {
        lines.push(format!("  was {previous}"));
    }
    if report.link_fallbacks > 0 {
        lines.push(format!(
            "  {} {} file(s) copied because hard links failed",
            "!".yellow(),
            report.link_fallbacks
        ));
    }
    if let Some(gc) = gc_line(&report.gc) {
        lines.push(gc);
    }
    for err in &report.gc.errors {
        lines.push(format!("  {} gc: {err}", "!".yellow()));
    }
    lines
}

fn gc_line(gc: &GcReport) -> Option<String> {
    if gc.snapshots_removed.is_empty() && gc.objects_removed == 0 {
        return None;
    }
    Some(format!(
        "  pruned {} snapshot(s), {} object(s), {} bytes",
        gc.snapshots_removed.len(),
        gc.objects_removed,
        gc.bytes_freed
    ))
}

fn dry_run_lines(plan: &DryRunPlan) -> Vec<String> {
    let prefix = "[dry-run]".cyan();
    let mut lines = vec![match plan.action {
        PlannedAction::Unchanged => format!("{prefix} {} already active", plan.version),
        PlannedAction::Stale => format!(
            "{prefix} published {} is older than active {}; would do nothing",
            plan.version,
            plan.active
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        ),
        PlannedAction::ActivateExisting => {
            format!("{prefix} would activate existing snapshot {}", plan.version)
        }
        PlannedAction::BuildAndActivate => format!(
            "{prefix} would build and activate {} ({} of {} objects to fetch)",
            plan.version,
            plan.objects_missing.len(),
            plan.objects_total
        ),
    }];
    for version in &plan.would_prune {
        lines.push(format!("  would prune {version}"));
    }
    lines
}
