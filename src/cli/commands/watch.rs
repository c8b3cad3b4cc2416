//! Watch command implementation.
//!
//! Polls the project file and feeds changes of its layer tree into the
//! debounced analysis, printing whenever the map's update status changes.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use tracing::{debug, warn};

use super::Context;
use crate::config::{ANALYSIS_DEBOUNCE, WATCH_INTERVAL};
use crate::error::Result;
use crate::host::{Host, HostResult};
use crate::sync::{AnalysisScheduler, ReconciliationResult, SyncController, SyncSession, content_hash};

/// Fingerprint of everything the host reports for the tree.
fn tree_fingerprint(host: &dyn Host) -> HostResult<String> {
    Ok(content_hash(&host.layer_tree()?))
}

/// Prints analysis results, suppressing repeats of the same counts.
struct Reporter {
    json: bool,
    quiet: bool,
    last: Mutex<Option<ReconciliationResult>>,
}

impl Reporter {
    fn report(&self, result: ReconciliationResult) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(result) {
            return;
        }
        *last = Some(result);
        if self.quiet {
            return;
        }

        if self.json {
            let line = serde_json::json!({
                "needs_update": result.needs_update(),
                "summary": result.to_string(),
                "result": result,
            });
            println!("{line}");
        } else if result.needs_update() {
            println!("{} {result}", "Update available:".cyan().bold());
        } else {
            println!("{}", "Map is up to date".green());
        }
    }
}

/// Execute the watch command.
///
/// # Errors
///
/// Returns an error if the project cannot be opened, no API key is
/// configured, or the analysis thread cannot be started.
pub fn execute(
    ctx: &Context,
    project: &Path,
    interval: Option<u64>,
    polls: Option<u64>,
) -> Result<()> {
    let project = Arc::new(ctx.open_project(project)?);
    let api = Arc::new(ctx.api_client()?);
    let session = SyncSession::load(project.as_ref())?;
    let host: Arc<dyn Host> = project.clone();
    let controller = Arc::new(SyncController::new(session, host, api));

    let interval = interval.map_or(WATCH_INTERVAL, |s| Duration::from_secs(s.max(1)));
    let reporter = Reporter {
        json: ctx.json,
        quiet: ctx.quiet,
        last: Mutex::new(None),
    };
    let scheduler = AnalysisScheduler::spawn(
        Arc::clone(&controller),
        ANALYSIS_DEBOUNCE,
        move |result| reporter.report(result),
    )?;

    if !ctx.json && !ctx.quiet {
        eprintln!("Watching {} (Ctrl-C to stop)", project.path().display());
    }
    let mut last = tree_fingerprint(project.as_ref()).ok();
    scheduler.notify();

    let mut checks = 0;
    while polls.is_none_or(|max| checks < max) {
        thread::sleep(interval);
        checks += 1;
        match tree_fingerprint(project.as_ref()) {
            Ok(hash) if last.as_ref() != Some(&hash) => {
                debug!("Project tree changed");
                last = Some(hash);
                scheduler.notify();
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not read project"),
        }
    }

    scheduler.shutdown();
    Ok(())
}
