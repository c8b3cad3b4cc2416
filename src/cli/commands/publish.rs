//! Publish command implementation.
//!
//! The pass runs on the sync worker thread; this command only waits for it,
//! prints progress, and records the outcome in the sync history. Ctrl-C
//! stops the pass before its next layer; a second Ctrl-C exits at once.

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use colored::Colorize;
use tracing::{info, warn};

use super::Context;
use crate::cli::PublishArgs;
use crate::error::Result;
use crate::host::{Host, ProjectFileHost};
use crate::model::RemoteId;
use crate::storage::SyncOutcome;
use crate::sync::{
    CancelToken, ProgressEvent, ProgressSink, PublishOptions, SyncController, SyncError,
    SyncReport, SyncResult, SyncSession, no_progress,
};

/// Execute the publish command.
///
/// # Errors
///
/// Returns an error if the project cannot be opened, no API key is
/// configured, or the publish pass fails.
pub fn execute(ctx: &Context, args: &PublishArgs) -> Result<()> {
    let project = Arc::new(ctx.open_project(&args.project)?);
    let api = Arc::new(ctx.api_client()?);
    let session = SyncSession::load(project.as_ref())?;

    let host: Arc<dyn Host> = project.clone();
    let controller = SyncController::new(session, host, api);

    let opts = PublishOptions {
        new_map: args.new_map,
        public: args.public,
        use_all_layers: args.all,
        name: args.name.clone(),
    };
    let progress = if ctx.json || ctx.quiet {
        no_progress()
    } else {
        print_progress()
    };

    let handle = controller.start_publish(opts, progress)?;
    if let Err(e) = ctrlc::set_handler(interrupt_handler(handle.cancel_token(), ctx.quiet)) {
        warn!(error = %e, "Could not install interrupt handler");
    }
    let outcome = handle.wait();
    let map_id = controller.session().map_id;
    record_run(ctx, &project, map_id, &outcome);

    let report = outcome?;
    if ctx.json {
        println!("{}", serde_json::to_string(&report)?);
    } else if !ctx.quiet {
        print_report(&report);
    }
    Ok(())
}

fn interrupt_handler(cancel: CancelToken, quiet: bool) -> impl FnMut() + Send + 'static {
    move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        if !quiet {
            eprintln!("{}", "Stopping after the current layer...".yellow());
        }
        info!("Cancelling publish");
        cancel.cancel();
    }
}

fn print_progress() -> ProgressSink {
    let live = std::io::stderr().is_terminal();
    Arc::new(move |event: &ProgressEvent| match event {
        ProgressEvent::Step(step) => eprintln!("{}", step.dimmed()),
        ProgressEvent::Layer { index, total, name } => {
            eprintln!("[{index}/{total}] {}", name.bold());
        }
        ProgressEvent::Upload { percent } if live => {
            let mut err = std::io::stderr();
            let _ = write!(err, "\r  upload {percent:>3}%");
            if *percent >= 99 {
                let _ = writeln!(err);
            }
            let _ = err.flush();
        }
        ProgressEvent::Upload { .. } => {}
    })
}

fn print_report(report: &SyncReport) {
    let verb = if report.map_created { "Created" } else { "Updated" };
    println!(
        "{} map \"{}\" ({})",
        verb.green().bold(),
        report.map_name,
        report.map_id
    );
    if report.shared_public {
        println!("  Shared publicly");
    }
    println!(
        "  Layers:  {} created, {} updated, {} moved, {} deleted",
        report.layers_created,
        report.layers_updated,
        report.layers_repositioned,
        report.layers_deleted
    );
    println!(
        "  Folders: {} created, {} updated, {} deleted",
        report.folders_created, report.folders_updated, report.folders_deleted
    );
    if report.archives_uploaded > 0 {
        println!("  Uploads: {}", report.archives_uploaded);
    }
}

/// Append the pass to the sync history. Failures are only logged.
fn record_run(
    ctx: &Context,
    project: &ProjectFileHost,
    map_id: Option<RemoteId>,
    outcome: &SyncResult<SyncReport>,
) {
    // A busy pass never touched the map.
    if matches!(outcome, Err(SyncError::Busy)) {
        return;
    }
    let (status, detail) = match outcome {
        Ok(report) => (
            SyncOutcome::Success,
            serde_json::to_value(report).unwrap_or_default(),
        ),
        Err(e) => {
            let status = if matches!(e, SyncError::Cancelled) {
                SyncOutcome::Cancelled
            } else {
                SyncOutcome::Failed
            };
            let detail = serde_json::json!({
                "code": e.error_code().as_str(),
                "layer": e.layer(),
                "message": e.user_message(),
            });
            (status, detail)
        }
    };

    let recorded = project.with_store(|db| {
        db.record_sync_run(project.project_key(), map_id, status, Some(&detail), &ctx.actor)
    });
    if let Err(e) = recorded {
        warn!(error = %e, "Could not record sync run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn project(dir: &std::path::Path) -> ProjectFileHost {
        let path = dir.join("parcels.json");
        std::fs::write(&path, r#"{"name": "Parcels", "tree": []}"#).unwrap();
        ProjectFileHost::open(&path, SqliteStorage::open_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_interrupt_cancels_pass() {
        let cancel = CancelToken::new();
        let mut on_interrupt = interrupt_handler(cancel.clone(), true);
        assert!(!cancel.is_cancelled());
        on_interrupt();
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_cancelled_pass_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let host = project(dir.path());
        let ctx = Context {
            actor: "ann".into(),
            ..Context::default()
        };

        record_run(&ctx, &host, Some(7), &Err(SyncError::Cancelled));
        record_run(&ctx, &host, Some(7), &Err(SyncError::Busy));

        let runs = host
            .with_store(|db| db.list_sync_runs(host.project_key(), 10))
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, SyncOutcome::Cancelled);
        assert_eq!(runs[0].map_id, Some(7));
        assert_eq!(runs[0].actor, "ann");
    }
}
