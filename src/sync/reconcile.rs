//! Reconciler.
//!
//! Diffs one flattened local tree against the remote snapshot and plans
//! the folder and layer operations that make the remote map match. No I/O
//! happens here; [`reconcile`] is a pure function of its input.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::hash::{fingerprint, has_changed};
use super::order::{order_changed, sorted_ids};
use crate::model::{
    GroupIdx, LayerPayload, LocalLayer, LocalTree, RemoteId, RemoteLayerRecord, RemoteSnapshot,
};

/// Where a folder or layer is placed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderRef {
    /// An existing remote folder.
    Remote(RemoteId),
    /// The folder that will be created for a local group.
    New(GroupIdx),
}

impl FolderRef {
    /// Remote id, if the folder already exists.
    #[must_use]
    pub const fn remote_id(self) -> Option<RemoteId> {
        match self {
            Self::Remote(id) => Some(id),
            Self::New(_) => None,
        }
    }
}

fn same_parent(local: Option<FolderRef>, remote: Option<RemoteId>) -> bool {
    match local {
        None => remote.is_none(),
        Some(FolderRef::Remote(id)) => remote == Some(id),
        Some(FolderRef::New(_)) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Unchanged,
}

/// How much of a layer a publish pass may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Payload, datasource, files and remembered state.
    Full,
    /// Order and parent only; the layer is hidden in visible-only mode.
    PositionOnly,
}

/// Planned operation for one synced local group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub group: GroupIdx,
    /// Remote folder matched to the group.
    pub remote_id: Option<RemoteId>,
    pub parent: Option<FolderRef>,
    pub action: Action,
}

/// Planned operation for one eligible local layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlan {
    pub layer: LocalLayer,
    pub order: i64,
    pub parent: Option<FolderRef>,
    pub mode: UpdateMode,
    pub action: Action,
    /// Remote record carrying this layer's remembered state.
    pub remote: Option<RemoteLayerRecord>,
    /// Fingerprint computed against the known parent and map.
    pub hash: String,
    /// The external data changed since it was last uploaded.
    pub data_changed: bool,
}

impl LayerPlan {
    /// Whether a publish pass has to touch this layer.
    #[must_use]
    pub fn needs_write(&self) -> bool {
        match self.mode {
            UpdateMode::Full => self.action != Action::Unchanged,
            UpdateMode::PositionOnly => self.remote.as_ref().is_none_or(|r| {
                r.order != self.order || !same_parent(self.parent, r.parent)
            }),
        }
    }
}

/// Change counts of one analysis pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub folders_changes: usize,
    pub layers_changes: usize,
    pub layers_new: usize,
    pub layers_to_delete: usize,
    pub folders_order_changed: bool,
    pub layers_order_changed: bool,
}

impl ReconciliationResult {
    /// Whether publishing would change anything remotely.
    #[must_use]
    pub const fn needs_update(&self) -> bool {
        self.layers_changes > 0 || self.folders_changes > 0 || self.layers_to_delete > 0
    }

    #[must_use]
    pub const fn order_changed(&self) -> bool {
        self.folders_order_changed || self.layers_order_changed
    }

    /// Human explanation of what an update would do.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut text = if self.order_changed() {
            "All previously published layers will be updated because the layer ordering changed."
                .to_string()
        } else {
            "All visible layers will be updated, reflecting the local changes.".to_string()
        };
        if self.layers_new > 0 {
            text.push_str(" Visible layers not published before will also be uploaded.");
        }
        if self.layers_to_delete > 0 {
            text.push_str(" Published layers removed locally will also be removed from the map.");
        }
        text
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} layer change(s) ({} new), {} deletion(s), {} folder change(s)",
            self.layers_changes, self.layers_new, self.layers_to_delete, self.folders_changes
        )?;
        if self.order_changed() {
            f.write_str(", order changed")?;
        }
        Ok(())
    }
}

/// Everything the reconciler reads.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub tree: &'a LocalTree,
    pub snapshot: &'a RemoteSnapshot,
    pub map_id: Option<RemoteId>,
    /// Include hidden layers ("publish all").
    pub use_all_layers: bool,
    /// Planning a publish pass rather than an update check.
    pub for_publish: bool,
}

/// Output of one analysis pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Synced groups, parent before child.
    pub groups: Vec<GroupPlan>,
    /// Owned remote folders no local group maps to.
    pub folder_deletes: Vec<RemoteId>,
    /// Eligible layers, ascending order.
    pub layers: Vec<LayerPlan>,
    /// Remote layers whose local layer is gone or unsupported.
    pub deletes: Vec<RemoteId>,
    /// Local ids whose data timestamps should be forgotten.
    pub purge: Vec<String>,
    pub result: ReconciliationResult,
}

impl Reconciliation {
    /// Layers a publish pass has to write.
    pub fn writes(&self) -> impl Iterator<Item = &LayerPlan> {
        self.layers.iter().filter(|l| l.needs_write())
    }
}

/// Plan the operations that bring the remote map in line with the tree.
#[must_use]
pub fn reconcile(input: &ReconcileInput<'_>) -> Reconciliation {
    let ReconcileInput {
        tree, snapshot, ..
    } = *input;
    let mut out = Reconciliation::default();

    // Remembered records by local id; one record per id survives.
    let present: HashSet<&str> = tree
        .layers
        .iter()
        .filter(|l| l.layer.is_some())
        .map(|l| l.id.as_str())
        .collect();
    let mut remembered: HashMap<&str, &RemoteLayerRecord> = HashMap::new();
    for record in snapshot.tracked_layers() {
        let Some(state) = &record.remembered else {
            continue;
        };
        let local_id = state.local_id.as_str();
        if !present.contains(local_id) {
            debug!(remote_id = record.id, local_id, "Remote layer has no local counterpart");
            out.deletes.push(record.id);
            if !out.purge.iter().any(|p| p == local_id) {
                out.purge.push(local_id.to_string());
            }
        } else if remembered.contains_key(local_id) {
            out.deletes.push(record.id);
        } else {
            remembered.insert(local_id, record);
        }
    }

    let groups_map = match_groups(tree, snapshot, &remembered);

    // Eligible layers and the groups holding them.
    let mut eligible = Vec::new();
    let mut synced_groups = vec![false; tree.groups.len()];
    for entry in &tree.layers {
        let Some(layer) = &entry.layer else {
            continue;
        };
        let full_update = input.use_all_layers || !input.for_publish || layer.visible;
        if !full_update && !remembered.contains_key(entry.id.as_str()) {
            continue;
        }
        if let Some(g) = entry.parent {
            for a in tree.ancestors(g) {
                synced_groups[a] = true;
            }
        }
        let mode = if full_update {
            UpdateMode::Full
        } else {
            UpdateMode::PositionOnly
        };
        eligible.push((entry, layer, mode));
    }

    // Folders, parent before child.
    let mut folder_of: HashMap<GroupIdx, FolderRef> = HashMap::new();
    for (idx, group) in tree.groups.iter().enumerate() {
        if !synced_groups[idx] {
            continue;
        }
        let parent = group.parent.and_then(|p| folder_of.get(&p).copied());
        let plan = match groups_map.get(&idx).and_then(|&id| snapshot.owned_folder(id)) {
            Some(folder) => {
                let parent_same = same_parent(parent, folder.parent);
                let changed = group.name != folder.name || !parent_same || group.order != folder.order;
                if changed {
                    out.result.folders_changes += 1;
                    if !parent_same {
                        out.result.folders_order_changed = true;
                    }
                }
                folder_of.insert(idx, FolderRef::Remote(folder.id));
                GroupPlan {
                    group: idx,
                    remote_id: Some(folder.id),
                    parent,
                    action: if changed { Action::Update } else { Action::Unchanged },
                }
            }
            None => {
                out.result.folders_changes += 1;
                folder_of.insert(idx, FolderRef::New(idx));
                GroupPlan {
                    group: idx,
                    remote_id: None,
                    parent,
                    action: Action::Create,
                }
            }
        };
        out.groups.push(plan);
    }

    let kept: HashSet<RemoteId> = out.groups.iter().filter_map(|g| g.remote_id).collect();
    out.folder_deletes = snapshot
        .owned_folders()
        .map(|f| f.id)
        .filter(|id| !kept.contains(id))
        .collect();

    // Layers.
    for (entry, layer, mode) in eligible {
        let parent = entry.parent.and_then(|g| folder_of.get(&g).copied());
        let payload = LayerPayload::build(layer, input.map_id, entry.order, parent.and_then(FolderRef::remote_id));
        let hash = fingerprint(&payload, layer.data_timestamp);
        let remote = remembered.get(entry.id.as_str()).copied();

        let action = match remote.and_then(|r| r.remembered.as_ref()) {
            None => {
                out.result.layers_new += 1;
                Action::Create
            }
            Some(state) => {
                let under_new_folder = matches!(parent, Some(FolderRef::New(_)));
                if under_new_folder
                    || has_changed(&hash, Some(&state.hash))
                    || state.datasource_timestamp != layer.data_timestamp
                {
                    Action::Update
                } else {
                    Action::Unchanged
                }
            }
        };
        if action != Action::Unchanged {
            out.result.layers_changes += 1;
        }

        out.layers.push(LayerPlan {
            data_changed: remote
                .and_then(|r| r.remembered.as_ref())
                .is_some_and(|s| s.datasource_timestamp != layer.data_timestamp),
            layer: layer.clone(),
            order: entry.order,
            parent,
            mode,
            action,
            remote: remote.cloned(),
            hash,
        });
    }
    out.layers.sort_by_key(|l| l.order);

    // Order change: remembered sequence against the eligible sequence.
    // Equal remote orders keep listing order.
    let old = sorted_ids(snapshot.tracked_layers().filter_map(|r| {
        let local_id = r.remembered.as_ref()?.local_id.as_str();
        let kept = remembered.get(local_id)?;
        (kept.id == r.id).then_some((local_id, r.order))
    }));
    let new = sorted_ids(out.layers.iter().map(|l| (l.layer.id.as_str(), l.order)));
    out.result.layers_order_changed = order_changed(&old, &new);

    // A reorder cannot be expressed layer by layer: rewrite every layer.
    if out.result.order_changed() {
        for plan in &mut out.layers {
            if plan.mode == UpdateMode::Full && plan.action == Action::Unchanged {
                plan.action = Action::Update;
            }
        }
    }

    out.result.layers_to_delete = out.deletes.len();
    info!(result = %out.result, "Analysis finished");
    out
}

/// Match local groups to owned remote folders through the remembered
/// parents of the layers inside them, climbing towards the root.
fn match_groups(
    tree: &LocalTree,
    snapshot: &RemoteSnapshot,
    remembered: &HashMap<&str, &RemoteLayerRecord>,
) -> HashMap<GroupIdx, RemoteId> {
    let mut map: HashMap<GroupIdx, RemoteId> = HashMap::new();
    let mut used: HashSet<RemoteId> = HashSet::new();

    for entry in &tree.layers {
        let (Some(group), Some(record)) = (entry.parent, remembered.get(entry.id.as_str())) else {
            continue;
        };
        let Some(folder) = record.parent.and_then(|p| snapshot.owned_folder(p)) else {
            continue;
        };
        if used.contains(&folder.id) {
            continue;
        }
        map.insert(group, folder.id);
        used.insert(folder.id);

        // Climb: the folder's parent belongs to the group's parent.
        let mut current = Some(group);
        let mut folder_id = folder.id;
        while let Some(g) = current {
            let Some(&mapped) = map.get(&g) else {
                break;
            };
            let Some(parent_id) = snapshot.owned_folder(mapped).and_then(|f| f.parent) else {
                break;
            };
            if parent_id == folder_id {
                break;
            }
            folder_id = parent_id;
            current = tree.groups[g].parent;
            if let Some(pg) = current {
                if snapshot.owned_folder(parent_id).is_some()
                    && !used.contains(&parent_id)
                    && !map.contains_key(&pg)
                {
                    map.insert(pg, parent_id);
                    used.insert(parent_id);
                }
            }
        }
    }
    map
}
