//! CLI command handlers.

use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use console::style;

use crate::domain::models::DecompositionStrategy;
use crate::services::orchestrator::{Orchestrator, RunStatus, TaskExecutionReport};

/// `meshseeks solve`
pub async fn handle_solve(
    orchestrator: &Orchestrator,
    prompt: &str,
    work_folder: &str,
    approach: Option<&str>,
    summary: bool,
    json: bool,
) -> Result<()> {
    let approach = match approach {
        Some(raw) => Some(
            DecompositionStrategy::parse_str(raw)
                .with_context(|| format!("unknown strategy: {raw}"))?,
        ),
        None => None,
    };
    let outcome = orchestrator
        .solve_problem(prompt, work_folder, approach, summary)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let badge = match outcome.status {
        RunStatus::Completed => style("completed").green(),
        RunStatus::Partial => style("partial").yellow(),
        _ => style(outcome.status.as_str()).red(),
    };
    println!(
        "session {} finished: {}\n",
        style(&outcome.session_id).cyan(),
        badge
    );
    if !outcome.artifact.is_empty() {
        println!("{}", outcome.artifact);
    }
    print_reports(&outcome.task_reports);
    if matches!(outcome.status, RunStatus::Failed) {
        bail!("session {} failed", outcome.session_id);
    }
    Ok(())
}

/// `meshseeks analyze`
pub async fn handle_analyze(
    orchestrator: &Orchestrator,
    prompt: &str,
    work_folder: &str,
    json: bool,
) -> Result<()> {
    let specs = orchestrator.analyze_problem(prompt, work_folder).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["id", "role", "priority", "depends on", "prompt"]);
    for spec in &specs {
        table.add_row(vec![
            spec.id.clone(),
            spec.role.clone(),
            spec.priority.as_str().to_string(),
            spec.dependencies.join(", "),
            truncate(&spec.prompt, 60),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// `meshseeks status`
pub async fn handle_status(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let report = orchestrator.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (&report.session_id, &report.session_status) {
        (Some(id), Some(status)) => {
            println!("session: {} ({})", style(id).cyan(), status);
        }
        _ => println!("no active session"),
    }
    println!(
        "pool: {} workers ({} idle, {} running), queue {}, health {}",
        report.pool.total_agents,
        report.pool.idle_agents,
        report.pool.running_agents,
        report.pool.queue_depth,
        style(report.pool.health.as_str()).bold()
    );

    if !report.tasks_by_status.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["status", "tasks"]);
        let mut counts: Vec<(&String, &usize)> = report.tasks_by_status.iter().collect();
        counts.sort_by(|a, b| a.0.cmp(b.0));
        for (status, count) in counts {
            table.add_row(vec![status.clone(), count.to_string()]);
        }
        println!("{table}");
    }
    if !report.recent_results.is_empty() {
        println!("recent completions:");
        print_reports(&report.recent_results);
    }
    Ok(())
}

/// `meshseeks resume`
pub async fn handle_resume(
    orchestrator: &Orchestrator,
    session_id: &str,
    checkpoint: Option<String>,
    reset_failed: bool,
    json: bool,
) -> Result<()> {
    let status = orchestrator
        .resume_session(session_id, checkpoint, reset_failed)
        .await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("session {session_id} finished: {}", status.as_str());
    }
    if matches!(status, RunStatus::Failed) {
        bail!("session {session_id} failed");
    }
    Ok(())
}

/// `meshseeks sessions`
pub async fn handle_sessions(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let store = orchestrator.sessions().store();
    let ids = store.list_session_ids().await?;
    let mut rows = Vec::new();
    for id in ids {
        if let Some(session) = store.load_session(&id).await? {
            rows.push(session);
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["id", "name", "status", "tasks", "created"]);
    for session in rows {
        table.add_row(vec![
            session.id.clone(),
            truncate(&session.name, 40),
            session.status.as_str().to_string(),
            session.metrics.total_tasks.to_string(),
            session.created_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn print_reports(reports: &[TaskExecutionReport]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["task", "role", "status", "time (ms)", "error"]);
    for report in reports {
        table.add_row(vec![
            report.task_id.clone(),
            report.role.clone(),
            report.status.clone(),
            report
                .metrics
                .execution_time_ms
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            report.error.clone().map(|e| truncate(&e, 48)).unwrap_or_default(),
        ]);
    }
    println!("{table}");
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}
