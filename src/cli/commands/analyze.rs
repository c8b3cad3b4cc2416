//! Analyze command implementation.

use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use super::Context;
use crate::error::Result;
use crate::model::RemoteId;
use crate::sync::{Action, AnalyzeOptions, ReconciliationResult, SyncSession, UpdateMode};

#[derive(Serialize)]
struct LayerLine<'a> {
    id: &'a str,
    name: &'a str,
    action: Action,
    mode: UpdateMode,
    order: i64,
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    map_id: Option<RemoteId>,
    needs_update: bool,
    summary: String,
    result: ReconciliationResult,
    layers: Vec<LayerLine<'a>>,
    deletes: &'a [RemoteId],
    folder_deletes: &'a [RemoteId],
}

/// Execute the analyze command.
///
/// # Errors
///
/// Returns an error if the project cannot be read or no API key is
/// configured.
pub fn execute(ctx: &Context, project: &Path, all: bool, force: bool) -> Result<()> {
    let host = ctx.open_project(project)?;
    let api = ctx.api_client()?;
    let mut session = SyncSession::load(&host)?;

    let opts = AnalyzeOptions {
        force,
        for_publish: false,
        use_all_layers: all,
    };
    let analysis = session.analyze(&host, &api, opts)?;
    let plan = &analysis.plan;
    let result = plan.result;

    if ctx.json {
        let output = AnalyzeOutput {
            map_id: analysis.map_id,
            needs_update: result.needs_update(),
            summary: result.to_string(),
            result,
            layers: plan
                .layers
                .iter()
                .map(|l| LayerLine {
                    id: &l.layer.id,
                    name: &l.layer.name,
                    action: l.action,
                    mode: l.mode,
                    order: l.order,
                })
                .collect(),
            deletes: &plan.deletes,
            folder_deletes: &plan.folder_deletes,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }
    if ctx.quiet {
        return Ok(());
    }

    match analysis.map_id {
        Some(id) => println!("Map: {id}"),
        None => println!("Map: {}", "not published".dimmed()),
    }
    println!();

    // Topmost first, as the host shows them.
    for line in plan.layers.iter().rev() {
        let action = match (line.action, line.mode) {
            (Action::Create, _) => "create".green(),
            (Action::Update, UpdateMode::PositionOnly) => "move".yellow(),
            (Action::Update, UpdateMode::Full) => "update".yellow(),
            (Action::Unchanged, _) => "ok".dimmed(),
        };
        println!("  {action:>8}  {}", line.layer.name);
    }
    if !plan.deletes.is_empty() {
        println!("  {:>8}  {} remote layer(s)", "delete".red(), plan.deletes.len());
    }
    println!();

    if result.needs_update() {
        println!("{}", "Update available".cyan().bold());
        println!("{result}");
        println!("{}", result.describe());
    } else {
        println!("{}", "Map is up to date".green());
    }
    Ok(())
}
