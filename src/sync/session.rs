//! Sync session state.
//!
//! A [`SyncSession`] owns everything one project's sync needs between
//! passes: the remote map identity, per-layer data timestamps, and the
//! snapshot cache. It is loaded from and persisted to the host; the
//! analysis and publish passes borrow it mutably, so only one of them can
//! run against it at a time.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::reconcile::{ReconcileInput, Reconciliation, reconcile};
use super::snapshot::SnapshotCache;
use super::types::SyncResult;
use crate::api::{ApiClient, ApiError};
use crate::host::Host;
use crate::model::{LocalLayer, LocalTree, RemoteId, RemoteSnapshot};

/// Host key holding the remote map id.
pub const MAP_ID_KEY: &str = "map_id";
/// Host key holding the remote map name.
pub const MAP_NAME_KEY: &str = "map_name";
/// Host key holding the per-layer data timestamps as a JSON object.
pub const DATA_STATE_KEY: &str = "layer_data_state";

/// Options of one analysis pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyzeOptions {
    /// Refetch the remote listing even within the refresh window.
    pub force: bool,
    /// Plan a publish pass: hidden layers are only repositioned.
    pub for_publish: bool,
    /// Include hidden layers.
    pub use_all_layers: bool,
}

/// Result of the latest analysis, kept with the tree it was computed on.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub plan: Reconciliation,
    pub tree: LocalTree,
    pub map_id: Option<RemoteId>,
    pub at: Instant,
}

/// Explicit per-project sync state.
#[derive(Debug, Default)]
pub struct SyncSession {
    pub map_id: Option<RemoteId>,
    pub map_name: Option<String>,
    /// Unix-millis time of the last external data change, by local layer id.
    pub timestamps: BTreeMap<String, i64>,
    cache: SnapshotCache,
    last: Option<Analysis>,
}

impl SyncSession {
    /// Restore the session persisted with the host project.
    ///
    /// Unreadable values are logged and treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    pub fn load(host: &dyn Host) -> SyncResult<Self> {
        let map_id = host.read_persisted(MAP_ID_KEY)?.and_then(|v| {
            v.trim()
                .parse::<RemoteId>()
                .inspect_err(|e| warn!(value = %v, error = %e, "Ignoring invalid map id"))
                .ok()
        });
        let map_name = host.read_persisted(MAP_NAME_KEY)?.filter(|n| !n.is_empty());
        let timestamps = host
            .read_persisted(DATA_STATE_KEY)?
            .and_then(|json| {
                serde_json::from_str(&json)
                    .inspect_err(|e| warn!(error = %e, "Ignoring invalid layer data state"))
                    .ok()
            })
            .unwrap_or_default();

        debug!(?map_id, ?map_name, "Session loaded");
        Ok(Self {
            map_id,
            map_name,
            timestamps,
            ..Self::default()
        })
    }

    /// Write map identity and timestamps back to the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be written.
    pub fn persist(&self, host: &dyn Host) -> SyncResult<()> {
        match self.map_id {
            Some(id) => host.persist(MAP_ID_KEY, &id.to_string())?,
            None => host.remove_persisted(MAP_ID_KEY)?,
        }
        match &self.map_name {
            Some(name) => host.persist(MAP_NAME_KEY, name)?,
            None => host.remove_persisted(MAP_NAME_KEY)?,
        }
        self.persist_timestamps(host)
    }

    fn persist_timestamps(&self, host: &dyn Host) -> SyncResult<()> {
        let json = serde_json::to_string(&self.timestamps).map_err(crate::host::HostError::from)?;
        host.persist(DATA_STATE_KEY, &json)?;
        Ok(())
    }

    /// Data timestamp of a layer, `0` when it never changed.
    #[must_use]
    pub fn timestamp(&self, layer_id: &str) -> i64 {
        self.timestamps.get(layer_id).copied().unwrap_or(0)
    }

    /// Record that a layer's external data changed now.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamps cannot be persisted.
    pub fn record_data_change(&mut self, host: &dyn Host, layer_id: &str) -> SyncResult<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        self.timestamps.insert(layer_id.to_string(), now);
        self.persist_timestamps(host)?;
        info!(layer_id, timestamp = now, "Layer data change recorded");
        Ok(now)
    }

    /// Forget the remote map so the next publish creates a new one.
    pub fn detach_map(&mut self) {
        info!(map_id = ?self.map_id, "Detaching from remote map");
        self.map_id = None;
        self.map_name = None;
        self.cache.invalidate();
        self.last = None;
    }

    /// Drop the cached listing and the latest analysis, so the next
    /// analysis refetches.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
        self.last = None;
    }

    /// Compare the host's current tree with the remote map.
    ///
    /// Remote failures degrade to an empty snapshot. Any non-success
    /// status on the listing, 401 and 403 included, drops the map id: the
    /// map is gone or no longer accessible with this key. A publish
    /// analysis propagates transport failures instead, so a flaky
    /// connection cannot make every layer look new.
    ///
    /// # Errors
    ///
    /// Returns an error if the host tree cannot be read, or on a transport
    /// or credential failure while planning a publish.
    pub fn analyze(
        &mut self,
        host: &dyn Host,
        api: &ApiClient,
        opts: AnalyzeOptions,
    ) -> SyncResult<&Analysis> {
        let host_tree = host.layer_tree()?;
        let tree = LocalTree::walk(&host_tree, |layer| {
            LocalLayer::resolve(layer, host.layer_style(layer), self.timestamp(&layer.id))
        });

        let snapshot = match self.map_id {
            Some(mid) => {
                let use_cache = !opts.force && self.cache.is_fresh(mid);
                match self.cache.fetch(api, mid, use_cache) {
                    Ok(snapshot) => snapshot.clone(),
                    Err(e @ (ApiError::Remote { .. } | ApiError::Unauthorized { .. })) => {
                        warn!(map_id = mid, error = %e, "Remote map is not accessible");
                        self.map_id = None;
                        if let Err(e) = host.remove_persisted(MAP_ID_KEY) {
                            warn!(error = %e, "Could not forget map id");
                        }
                        RemoteSnapshot::default()
                    }
                    Err(e) if opts.for_publish => return Err(e.into()),
                    Err(e) => {
                        warn!(map_id = mid, error = %e, "Could not fetch remote layers");
                        RemoteSnapshot::default()
                    }
                }
            }
            None => RemoteSnapshot::default(),
        };

        let plan = reconcile(&ReconcileInput {
            tree: &tree,
            snapshot: &snapshot,
            map_id: self.map_id,
            use_all_layers: opts.use_all_layers,
            for_publish: opts.for_publish,
        });

        let mut purged = false;
        for id in &plan.purge {
            purged |= self.timestamps.remove(id).is_some();
        }
        if purged {
            if let Err(e) = self.persist_timestamps(host) {
                warn!(error = %e, "Could not persist purged timestamps");
            }
        }

        Ok(self.last.insert(Analysis {
            plan,
            tree,
            map_id: self.map_id,
            at: Instant::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::MemoryHost;
    use crate::model::{GeometryClass, HostLayer, LayerTree, TreeNode};
    use crate::sync::reconcile::Action;
    use crate::transport::Method;
    use crate::transport::testing::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn host_layer(id: &str) -> TreeNode {
        TreeNode::Layer(HostLayer {
            id: id.into(),
            name: id.into(),
            provider: "ogr".into(),
            source: format!("/data/{id}.shp"),
            geometry: Some(GeometryClass::Point),
            crs: Some("EPSG:4326".into()),
            extent: None,
            visible: true,
            style: None,
        })
    }

    fn host(ids: &[&str]) -> MemoryHost {
        MemoryHost::new(LayerTree {
            children: ids.iter().map(|id| host_layer(id)).collect(),
        })
    }

    fn client() -> (Arc<ScriptedTransport>, ApiClient) {
        let t = Arc::new(ScriptedTransport::new());
        (t.clone(), ApiClient::new(t))
    }

    #[test]
    fn test_load_and_persist() {
        let h = host(&[]);
        h.persist(MAP_ID_KEY, "42").unwrap();
        h.persist(DATA_STATE_KEY, r#"{"a": 5}"#).unwrap();

        let mut session = SyncSession::load(&h).unwrap();
        assert_eq!(session.map_id, Some(42));
        assert_eq!(session.timestamp("a"), 5);
        assert_eq!(session.timestamp("b"), 0);

        session.map_name = Some("Parcels".into());
        session.persist(&h).unwrap();
        assert_eq!(h.entry(MAP_NAME_KEY).as_deref(), Some("Parcels"));

        session.detach_map();
        session.persist(&h).unwrap();
        assert_eq!(h.entry(MAP_ID_KEY), None);
    }

    #[test]
    fn test_invalid_persisted_values_are_ignored() {
        let h = host(&[]);
        h.persist(MAP_ID_KEY, "not a number").unwrap();
        h.persist(DATA_STATE_KEY, "[").unwrap();
        let session = SyncSession::load(&h).unwrap();
        assert_eq!(session.map_id, None);
        assert!(session.timestamps.is_empty());
    }

    #[test]
    fn test_record_data_change_persists() {
        let h = host(&["a"]);
        let mut session = SyncSession::default();
        let ts = session.record_data_change(&h, "a").unwrap();
        assert!(ts > 0);
        let state: BTreeMap<String, i64> =
            serde_json::from_str(&h.entry(DATA_STATE_KEY).unwrap()).unwrap();
        assert_eq!(state["a"], ts);
    }

    #[test]
    fn test_analyze_without_map_plans_creates() {
        let h = host(&["a", "b"]);
        let (t, api) = client();
        let mut session = SyncSession::default();

        let analysis = session.analyze(&h, &api, AnalyzeOptions::default()).unwrap();
        assert_eq!(analysis.plan.result.layers_new, 2);
        assert!(t.calls().is_empty());
    }

    #[test]
    fn test_vanished_map_is_forgotten() {
        let h = host(&["a"]);
        h.persist(MAP_ID_KEY, "9").unwrap();
        let (t, api) = client();
        t.on_json(Method::Get, "maps/9/layers.json?expand=options", 404, json!({"msg": "gone"}));

        let mut session = SyncSession::load(&h).unwrap();
        let analysis = session.analyze(&h, &api, AnalyzeOptions::default()).unwrap();
        assert_eq!(analysis.map_id, None);
        assert_eq!(session.map_id, None);
        assert_eq!(h.entry(MAP_ID_KEY), None);
    }

    #[test]
    fn test_forbidden_map_is_forgotten() {
        let h = host(&["a"]);
        h.persist(MAP_ID_KEY, "9").unwrap();
        let (t, api) = client();
        t.on_json(Method::Get, "maps/9/layers.json?expand=options", 403, json!({}));

        let mut session = SyncSession::load(&h).unwrap();
        let opts = AnalyzeOptions {
            for_publish: true,
            ..AnalyzeOptions::default()
        };
        let analysis = session.analyze(&h, &api, opts).unwrap();
        assert_eq!(analysis.map_id, None);
        assert_eq!(analysis.plan.result.layers_new, 1);
        assert_eq!(h.entry(MAP_ID_KEY), None);
    }

    #[test]
    fn test_connection_failure() {
        let h = host(&["a"]);
        let (t, api) = client();
        t.fail(Method::Get, "maps/9/layers.json?expand=options");
        let mut session = SyncSession {
            map_id: Some(9),
            ..SyncSession::default()
        };

        // Update check: swallowed, map kept.
        assert!(session.analyze(&h, &api, AnalyzeOptions::default()).is_ok());
        assert_eq!(session.map_id, Some(9));

        // Publish: surfaced.
        let opts = AnalyzeOptions {
            for_publish: true,
            ..AnalyzeOptions::default()
        };
        assert!(session.analyze(&h, &api, opts).is_err());
    }

    #[test]
    fn test_deleted_layer_purges_timestamp() {
        let h = host(&["a"]);
        let (t, api) = client();
        t.on_json(
            Method::Get,
            "maps/3/layers.json?expand=options",
            200,
            json!({"data": [
                {"id": 11, "type": "point", "name": "old", "order": 1, "resource_id": 1,
                 "options": [{"id": 2, "option_name": "QGIS_LAYER",
                              "option_value": "{\"id\":\"old\",\"datasource_timestamp\":4,\"hash\":\"x\"}"}]}
            ]}),
        );
        let mut session = SyncSession {
            map_id: Some(3),
            ..SyncSession::default()
        };
        session.timestamps.insert("old".into(), 4);

        let analysis = session.analyze(&h, &api, AnalyzeOptions::default()).unwrap();
        assert_eq!(analysis.plan.deletes, vec![11]);
        assert_eq!(analysis.plan.layers[0].action, Action::Create);
        assert!(session.timestamps.is_empty());
        assert_eq!(h.entry(DATA_STATE_KEY).as_deref(), Some("{}"));
    }

    #[test]
    fn test_cached_snapshot_within_window() {
        let h = host(&["a"]);
        let (t, api) = client();
        t.on_json(Method::Get, "maps/3/layers.json?expand=options", 200, json!({"data": []}));
        let mut session = SyncSession {
            map_id: Some(3),
            ..SyncSession::default()
        };

        session.analyze(&h, &api, AnalyzeOptions::default()).unwrap();
        session.analyze(&h, &api, AnalyzeOptions::default()).unwrap();
        assert_eq!(t.count(Method::Get, "maps/3/layers.json?expand=options"), 1);

        let forced = AnalyzeOptions {
            force: true,
            ..AnalyzeOptions::default()
        };
        session.analyze(&h, &api, forced).unwrap();
        assert_eq!(t.count(Method::Get, "maps/3/layers.json?expand=options"), 2);
    }
}
