//! Publish pass.
//!
//! Applies a fresh publish analysis to the remote map, strictly in this
//! order: map, layer deletes, folders (parent before child), folder
//! deletes, then each layer in ascending order (datasource, files, layer,
//! remembered state). The first failure stops the pass; earlier writes
//! stay applied.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::archive::{Staging, package_layer};
use super::datasource::DatasourceCache;
use super::hash::fingerprint;
use super::reconcile::{
    Action, FolderRef, LayerPlan, Reconciliation, ReconciliationResult, UpdateMode,
};
use super::session::{AnalyzeOptions, Analysis, SyncSession};
use super::snapshot::list_storage_files;
use super::types::{SyncError, SyncResult};
use super::worker::CancelToken;
use crate::api::{ApiClient, ApiError};
use crate::host::Host;
use crate::model::{
    FolderPayload, GroupIdx, LayerPayload, MapPayload, OptionPayload, RemoteId, RememberedState,
};
use crate::transport::ProgressFn;

/// Options of one publish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Forget the persisted map and publish into a new one.
    pub new_map: bool,
    /// Share a newly created map publicly.
    pub public: bool,
    /// Include hidden layers.
    pub use_all_layers: bool,
    /// Map name; defaults to the remembered name, then the project name.
    pub name: Option<String>,
}

/// Progress of a running publish pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A pass-level step started.
    Step(&'static str),
    /// Work on a layer started (`index` counts from 1).
    Layer {
        index: usize,
        total: usize,
        name: String,
    },
    /// Upload of the current layer's archive, 5 to 99 percent.
    Upload { percent: u8 },
}

/// Receives progress events; called from the publishing thread.
pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// A sink that drops every event.
#[must_use]
pub fn no_progress() -> ProgressSink {
    Arc::new(|_: &ProgressEvent| {})
}

/// What a publish pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub map_id: RemoteId,
    pub map_name: String,
    pub map_created: bool,
    pub shared_public: bool,
    pub layers_created: usize,
    pub layers_updated: usize,
    pub layers_repositioned: usize,
    pub layers_deleted: usize,
    pub folders_created: usize,
    pub folders_updated: usize,
    pub folders_deleted: usize,
    pub archives_uploaded: usize,
    /// Counts of the analysis the pass applied.
    pub planned: ReconciliationResult,
}

/// Upload progress mapped onto the 5..=99 range.
#[must_use]
pub fn upload_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 99;
    }
    let done = sent.min(total) * 94 / total;
    u8::try_from(5 + done).unwrap_or(99)
}

/// Run one publish pass for the session's project.
///
/// The session's cached listing and analysis are dropped afterwards,
/// whatever the outcome, and staged files are always removed.
///
/// # Errors
///
/// Returns `NoMapToUpdate` when the persisted map vanished,
/// `NothingToPublish` or `PremiumRequired` before a new map is created, and
/// `LayerFailed` naming the first layer that could not be published.
pub fn publish(
    session: &mut SyncSession,
    host: &dyn Host,
    api: &ApiClient,
    opts: &PublishOptions,
    cancel: &CancelToken,
    progress: &ProgressSink,
) -> SyncResult<SyncReport> {
    let result = run(session, host, api, opts, cancel, progress);
    session.invalidate();
    match &result {
        Ok(report) => info!(
            map_id = report.map_id,
            created = report.layers_created,
            updated = report.layers_updated,
            deleted = report.layers_deleted,
            "Publish finished"
        ),
        Err(e) => warn!(error = %e, layer = ?e.layer(), "Publish failed"),
    }
    result
}

fn run(
    session: &mut SyncSession,
    host: &dyn Host,
    api: &ApiClient,
    opts: &PublishOptions,
    cancel: &CancelToken,
    progress: &ProgressSink,
) -> SyncResult<SyncReport> {
    if opts.new_map {
        session.detach_map();
    }
    let had_map = session.map_id.is_some();

    progress(&ProgressEvent::Step("Analyzing project"));
    let analysis: Analysis = session
        .analyze(
            host,
            api,
            AnalyzeOptions {
                force: true,
                for_publish: true,
                use_all_layers: opts.use_all_layers,
            },
        )?
        .clone();
    if had_map && analysis.map_id.is_none() {
        return Err(SyncError::NoMapToUpdate);
    }

    let plan = &analysis.plan;
    let mut report = SyncReport {
        planned: plan.result,
        ..SyncReport::default()
    };

    progress(&ProgressEvent::Step("Updating map"));
    let mid = ensure_map(session, host, api, opts, plan.result, &mut report)?;

    for &id in &plan.deletes {
        api.delete_layer(id)?;
        report.layers_deleted += 1;
    }

    progress(&ProgressEvent::Step("Updating folders"));
    let mut folder_ids: HashMap<GroupIdx, RemoteId> = HashMap::new();
    for group_plan in &plan.groups {
        let group = &analysis.tree.groups[group_plan.group];
        let parent = resolve_folder(group_plan.parent, &folder_ids);
        let payload = FolderPayload::new(mid, &group.name, group.order, parent);
        let id = match (group_plan.action, group_plan.remote_id) {
            (Action::Create, _) | (_, None) => {
                report.folders_created += 1;
                api.create_folder(&payload)?
            }
            (Action::Update, Some(id)) => {
                report.folders_updated += 1;
                api.update_folder(id, &payload)?;
                id
            }
            (Action::Unchanged, Some(id)) => id,
        };
        folder_ids.insert(group_plan.group, id);
    }
    for &id in &plan.folder_deletes {
        api.delete_layer(id)?;
        report.folders_deleted += 1;
    }

    let present: HashSet<String> = list_storage_files(api, mid).into_iter().collect();
    let mut datasources = DatasourceCache::new();
    let staging = Staging::new()?;

    let ctx = LayerContext {
        api,
        host,
        mid,
        folder_ids: &folder_ids,
        staging: &staging,
        present: &present,
        progress,
    };
    let outcome = ctx.publish_layers(plan, cancel, &mut datasources, &mut report);
    staging.cleanup();
    outcome?;

    Ok(report)
}

/// Make sure the remote map exists and carries the current metadata.
fn ensure_map(
    session: &mut SyncSession,
    host: &dyn Host,
    api: &ApiClient,
    opts: &PublishOptions,
    planned: ReconciliationResult,
    report: &mut SyncReport,
) -> SyncResult<RemoteId> {
    let crs = host.project_crs()?;
    let name = opts
        .name
        .clone()
        .or_else(|| session.map_name.clone())
        .unwrap_or_else(|| host.project_name());

    if let Some(mid) = session.map_id {
        api.update_map(mid, &MapPayload::new(&name, &crs))?;
        if session.map_name.as_deref() != Some(name.as_str()) {
            session.map_name = Some(name.clone());
            session.persist(host)?;
        }
        report.map_id = mid;
        report.map_name = name;
        return Ok(mid);
    }

    if planned.layers_new == 0 {
        return Err(SyncError::NothingToPublish);
    }
    if !opts.public && !api.is_premium() {
        return Err(SyncError::PremiumRequired);
    }

    let name = api.unique_map_name(&name).unwrap_or(name);
    let mid = api.create_map(&MapPayload::new(&name, &crs))?;
    info!(map_id = mid, name = %name, "Map created");
    session.map_id = Some(mid);
    session.map_name = Some(name.clone());
    session.persist(host)?;

    if opts.public {
        match api.share_public(mid) {
            Ok(()) => report.shared_public = true,
            Err(e) => warn!(map_id = mid, error = %e, "Could not share map publicly"),
        }
    }
    report.map_id = mid;
    report.map_name = name;
    report.map_created = true;
    Ok(mid)
}

fn resolve_folder(
    folder: Option<FolderRef>,
    created: &HashMap<GroupIdx, RemoteId>,
) -> Option<RemoteId> {
    match folder? {
        FolderRef::Remote(id) => Some(id),
        FolderRef::New(group) => created.get(&group).copied(),
    }
}

struct LayerContext<'a> {
    api: &'a ApiClient,
    host: &'a dyn Host,
    mid: RemoteId,
    folder_ids: &'a HashMap<GroupIdx, RemoteId>,
    staging: &'a Staging,
    present: &'a HashSet<String>,
    progress: &'a ProgressSink,
}

impl LayerContext<'_> {
    /// Write every layer that needs it, in ascending order, stopping at
    /// the first failure or once `cancel` is set.
    fn publish_layers(
        &self,
        plan: &Reconciliation,
        cancel: &CancelToken,
        datasources: &mut DatasourceCache,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let writes: Vec<&LayerPlan> = plan.writes().collect();
        let total = writes.len();
        for (i, layer_plan) in writes.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(done = i, total, "Publish cancelled");
                return Err(SyncError::Cancelled);
            }
            (self.progress)(&ProgressEvent::Layer {
                index: i + 1,
                total,
                name: layer_plan.layer.name.clone(),
            });
            self.publish_layer(layer_plan, datasources, report)
                .map_err(|e| e.in_layer(&layer_plan.layer.name))?;
        }
        Ok(())
    }

    fn publish_layer(
        &self,
        plan: &LayerPlan,
        datasources: &mut DatasourceCache,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let layer = &plan.layer;
        let full = plan.mode == UpdateMode::Full;
        let parent = resolve_folder(plan.parent, self.folder_ids);

        // Hashed exactly as the next analysis will see it.
        let payload = LayerPayload::build(layer, Some(self.mid), plan.order, parent);
        let hash = fingerprint(&payload, layer.data_timestamp);

        let datasource_id = datasources.resolve(self.api, plan)?;

        if full {
            if let Some(archive) = package_layer(plan, self.host, self.staging, self.present)? {
                let sink = Arc::clone(self.progress);
                let on_progress: ProgressFn = Arc::new(move |sent, total| {
                    sink(&ProgressEvent::Upload {
                        percent: upload_percent(sent, total),
                    });
                });
                self.api.upload_archive(self.mid, &archive, Some(on_progress))?;
                report.archives_uploaded += 1;
            }
        }

        let payload = payload.with_datasource(datasource_id);
        let layer_id = match &plan.remote {
            Some(remote) => {
                self.api.update_layer(remote.id, &payload)?;
                remote.id
            }
            None => self.api.create_layer(&payload)?,
        };

        if !full {
            debug!(layer = %layer.name, layer_id, "Layer repositioned");
            report.layers_repositioned += 1;
            return Ok(());
        }

        let state = RememberedState {
            local_id: layer.id.clone(),
            datasource_timestamp: layer.data_timestamp,
            hash,
        };
        let option = OptionPayload::remembered(state.to_option_value());
        let existing = plan
            .remote
            .as_ref()
            .and_then(|r| r.resource_id.zip(r.option_id));
        match existing {
            Some((resource_id, option_id)) => {
                self.api.update_option(resource_id, option_id, &option)?;
            }
            None => {
                let resource_id = match plan.remote.as_ref().and_then(|r| r.resource_id) {
                    Some(id) => id,
                    None => self
                        .api
                        .layer_resource_id(layer_id)?
                        .ok_or(ApiError::MissingField("resource_id"))?,
                };
                self.api.create_option(resource_id, &option)?;
            }
        }

        if plan.remote.is_some() {
            report.layers_updated += 1;
        } else {
            report.layers_created += 1;
        }
        info!(layer = %layer.name, layer_id, order = plan.order, "Layer published");
        Ok(())
    }
}
