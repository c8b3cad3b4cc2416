//! Status command implementation.

use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use super::Context;
use crate::csv_escape;
use crate::error::Result;
use crate::host::Host;
use crate::model::RemoteId;
use crate::storage::{SyncOutcome, SyncRun};
use crate::sync::SyncSession;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput<'a> {
    project: &'a str,
    name: String,
    map_id: Option<RemoteId>,
    map_name: Option<&'a str>,
    layers_with_data_changes: usize,
    runs: &'a [SyncRun],
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Short human summary of a run's detail.
fn summarize(run: &SyncRun) -> String {
    let Some(detail) = &run.detail else {
        return String::new();
    };
    match run.outcome {
        SyncOutcome::Success => {
            let count = |key: &str| detail.get(key).and_then(serde_json::Value::as_u64).unwrap_or(0);
            format!(
                "{} created, {} updated, {} deleted",
                count("layers_created"),
                count("layers_updated"),
                count("layers_deleted")
            )
        }
        SyncOutcome::Failed | SyncOutcome::Cancelled => detail
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Execute status command.
///
/// # Errors
///
/// Returns an error if the project or the history cannot be read.
pub fn execute(ctx: &Context, project: &Path, limit: u32) -> Result<()> {
    let host = ctx.open_project(project)?;
    let session = SyncSession::load(&host)?;
    let runs = host.with_store(|db| db.list_sync_runs(host.project_key(), limit))?;

    if ctx.json {
        let output = StatusOutput {
            project: host.project_key(),
            name: host.project_name(),
            map_id: session.map_id,
            map_name: session.map_name.as_deref(),
            layers_with_data_changes: session.timestamps.len(),
            runs: &runs,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if ctx.csv {
        println!("id,created_at,outcome,map_id,actor,summary");
        for run in &runs {
            println!(
                "{},{},{},{},{},{}",
                run.id,
                run.created_at,
                run.outcome.as_str(),
                run.map_id.map(|m| m.to_string()).unwrap_or_default(),
                csv_escape(&run.actor),
                csv_escape(&summarize(run))
            );
        }
        return Ok(());
    }

    println!("{}", host.project_name().bold());
    println!("Project: {}", host.project_key());
    match (session.map_id, &session.map_name) {
        (Some(id), Some(name)) => println!("Map:     {name} ({id})"),
        (Some(id), None) => println!("Map:     {id}"),
        (None, _) => println!("Map:     {}", "not published".dimmed()),
    }
    println!();

    if runs.is_empty() {
        println!("No publish history.");
        println!();
        println!("Publish with: mapsync publish {}", project.display());
        return Ok(());
    }

    println!("Recent publishes:");
    for run in &runs {
        let outcome = match run.outcome {
            SyncOutcome::Success => "success".green(),
            SyncOutcome::Failed => "failed".red(),
            SyncOutcome::Cancelled => "cancelled".yellow(),
        };
        println!(
            "  {}  {outcome:<9}  {:<12}  {}",
            format_time(run.created_at).dimmed(),
            run.actor,
            summarize(run)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(outcome: SyncOutcome, detail: serde_json::Value) -> SyncRun {
        SyncRun {
            id: "r1".into(),
            project: "p".into(),
            map_id: Some(7),
            outcome,
            detail: Some(detail),
            actor: "ann".into(),
            created_at: 0,
        }
    }

    #[test]
    fn test_summarize_success_counts() {
        let r = run(
            SyncOutcome::Success,
            json!({"layers_created": 2, "layers_updated": 1}),
        );
        assert_eq!(summarize(&r), "2 created, 1 updated, 0 deleted");
    }

    #[test]
    fn test_summarize_failure_message() {
        let r = run(SyncOutcome::Failed, json!({"message": "Layer \"B\" could not be published"}));
        assert_eq!(summarize(&r), "Layer \"B\" could not be published");
    }
}
