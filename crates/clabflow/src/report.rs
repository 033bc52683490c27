//! Final report and exit codes

use clabflow_bootstrap::{BootstrapReport, BootstrapState};
use clabflow_cloud::{
    ActionType, NodeSync, Plan, ReadinessReport, ResourceStatus, SyncOutcome, SyncReport,
};
use colored::Colorize;

/// Process exit codes, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Exit {
    Success = 0,
    /// Topology could not be loaded; nothing was changed
    Invalid = 1,
    /// Some resources or nodes failed, or the run was cancelled
    Partial = 2,
    /// Fatal control-plane error
    Aborted = 3,
}

impl Exit {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn for_sync(report: &SyncReport) -> Self {
        match report.outcome {
            SyncOutcome::Aborted(_) => Exit::Aborted,
            SyncOutcome::Cancelled => Exit::Partial,
            SyncOutcome::Completed if report.is_success() => Exit::Success,
            SyncOutcome::Completed => Exit::Partial,
        }
    }

    /// Nodes not (yet) synchronised are a partial result
    pub fn for_readiness(report: &ReadinessReport) -> Self {
        if report.all_ready() {
            Exit::Success
        } else {
            Exit::Partial
        }
    }

    pub fn for_bootstrap(report: &BootstrapReport) -> Self {
        if report.is_success() {
            Exit::Success
        } else {
            Exit::Partial
        }
    }
}

pub fn print_error(error: &anyhow::Error) {
    eprintln!();
    eprintln!("{} {:#}", "✗".red().bold(), error);
}

fn status_label(status: &ResourceStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        ResourceStatus::Created | ResourceStatus::Updated | ResourceStatus::Deleted => text.green(),
        ResourceStatus::Unchanged => text.dimmed(),
        ResourceStatus::Failed(_) => text.red(),
        ResourceStatus::Skipped | ResourceStatus::Pending => text.yellow(),
    }
}

fn action_label(action: ActionType) -> colored::ColoredString {
    match action {
        ActionType::Create => "+ create".green(),
        ActionType::Update => "~ update".yellow(),
        ActionType::Delete => "- delete".red(),
        ActionType::NoOp => "  no-op".dimmed(),
    }
}

pub fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "Plan:".bold());
    for action in &plan.actions {
        println!("  {} {}", action_label(action.action_type), action.resource);
    }
    println!();
    println!("  {}", plan.summary());
}

pub fn print_sync_report(report: &SyncReport) {
    println!();
    println!(
        "{}",
        format!("Resources ({} in {}):", report.resources.len(), report.namespace).bold()
    );
    if let Some(fabric) = &report.fabric {
        println!("  {:<10} {:<48} {}", "namespace", report.namespace.cyan(), status_label(fabric));
    }
    for resource in &report.resources {
        println!(
            "  {:<10} {:<48} {}",
            resource.id.kind.to_string(),
            resource.id.name.cyan(),
            status_label(&resource.status)
        );
    }
    println!();
    println!("  {}", report.summary);
    match &report.outcome {
        SyncOutcome::Completed if report.is_success() => {
            println!("{}", format!("✓ Synchronised in {} ms", report.duration_ms).green().bold())
        }
        SyncOutcome::Completed => {
            let failed = report.failed().count();
            println!("{}", format!("⚠ {} resources failed", failed).yellow().bold())
        }
        SyncOutcome::Aborted(reason) => {
            eprintln!("{}", "✗ Aborted".red().bold());
            eprintln!("  {}", reason);
        }
        SyncOutcome::Cancelled => println!("{}", "⚠ Cancelled".yellow().bold()),
    }
}

pub fn print_bootstrap_report(report: &BootstrapReport) {
    println!();
    println!("{}", format!("Nodes ({}):", report.nodes.len()).bold());
    for node in &report.nodes {
        let state = match node.state {
            BootstrapState::Complete => node.state.to_string().green(),
            BootstrapState::Failed => node.state.to_string().red(),
            _ => node.state.to_string().yellow(),
        };
        match &node.error {
            Some(error) => println!(
                "  {:<24} {}  {}",
                node.name.cyan(),
                state,
                error.lines().next().unwrap_or_default().dimmed()
            ),
            None => println!("  {:<24} {}", node.name.cyan(), state),
        }
    }
    println!();
    if report.is_success() {
        println!("{}", "✓ All nodes bootstrapped".green().bold());
    } else {
        println!(
            "{}",
            format!(
                "⚠ {} complete, {} failed, {} cancelled",
                report.count(BootstrapState::Complete),
                report.count(BootstrapState::Failed),
                report.count(BootstrapState::Cancelled)
            )
            .yellow()
            .bold()
        );
    }
}

pub fn print_readiness_report(report: &ReadinessReport) {
    println!();
    println!(
        "{}",
        format!("Node sync ({} in {}):", report.nodes.len(), report.namespace).bold()
    );
    for node in &report.nodes {
        let sync = match node.sync {
            NodeSync::Ready => node.sync.to_string().green(),
            NodeSync::Error => node.sync.to_string().red(),
            NodeSync::Unknown => node.sync.to_string().dimmed(),
            NodeSync::Pending | NodeSync::Syncing => node.sync.to_string().yellow(),
        };
        let detail = node
            .detail
            .clone()
            .or_else(|| node.node_state.clone())
            .or_else(|| node.npp_state.clone())
            .unwrap_or_default();
        println!("  {:<32} {:<8} {}", node.name.cyan(), sync, detail.dimmed());
    }
    println!();
    let ready = report.count(NodeSync::Ready);
    if report.all_ready() {
        println!("{}", format!("✓ All {} nodes synchronised", ready).green().bold());
    } else {
        let mut summary = format!(
            "⚠ {}/{} ready, {} syncing, {} pending, {} errors",
            ready,
            report.nodes.len(),
            report.count(NodeSync::Syncing),
            report.count(NodeSync::Pending),
            report.count(NodeSync::Error)
        );
        if report.timed_out {
            summary.push_str(&format!(" after {}s", report.waited_ms / 1000));
        }
        println!("{}", summary.yellow().bold());
    }
}
