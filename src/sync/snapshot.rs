//! Remote snapshot cache.
//!
//! Holds the last decoded layer listing of one map so repeated analysis
//! passes within the refresh window do not hit the network.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiResult};
use crate::config::SNAPSHOT_WINDOW;
use crate::model::{RemoteId, RemoteSnapshot};

#[derive(Debug, Clone)]
struct CachedSnapshot {
    map_id: RemoteId,
    snapshot: RemoteSnapshot,
    fetched_at: Instant,
}

/// Memoized listing of a remote map's layers and folders.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    entry: Option<CachedSnapshot>,
    window: Duration,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(SNAPSHOT_WINDOW)
    }
}

impl SnapshotCache {
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            entry: None,
            window,
        }
    }

    /// Whether a snapshot of `map_id` younger than the window is held.
    #[must_use]
    pub fn is_fresh(&self, map_id: RemoteId) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|e| e.map_id == map_id && e.fetched_at.elapsed() < self.window)
    }

    /// Listing of `map_id`.
    ///
    /// With `use_cache` a held snapshot of the same map is returned as is,
    /// whatever its age. Otherwise the listing is fetched and replaces the
    /// cached one.
    ///
    /// # Errors
    ///
    /// Returns the API error when the listing cannot be fetched; the cache
    /// is emptied in that case.
    pub fn fetch(
        &mut self,
        api: &ApiClient,
        map_id: RemoteId,
        use_cache: bool,
    ) -> ApiResult<&RemoteSnapshot> {
        let entry = match self.entry.take() {
            Some(held) if use_cache && held.map_id == map_id => {
                debug!(map_id, "Using cached remote layers");
                held
            }
            // A failed fetch leaves the cache empty.
            _ => {
                let snapshot = RemoteSnapshot::from_wire(&api.list_layers(map_id)?);
                info!(
                    map_id,
                    records = snapshot.records.len(),
                    owned_folders = snapshot.owned_folders().count(),
                    tracked = snapshot.tracked_layers().count(),
                    "Fetched remote layers"
                );
                CachedSnapshot {
                    map_id,
                    snapshot,
                    fetched_at: Instant::now(),
                }
            }
        };
        Ok(&self.entry.insert(entry).snapshot)
    }

    /// Drop the held snapshot.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

/// Names of the files already in a map's storage directory.
///
/// Any failure yields an empty list, which makes every file look missing
/// and upload again.
#[must_use]
pub fn list_storage_files(api: &ApiClient, map_id: RemoteId) -> Vec<String> {
    match api.list_storage(map_id) {
        Ok(files) => {
            debug!(map_id, count = files.len(), "Remote storage listed");
            files
        }
        Err(e) => {
            warn!(map_id, error = %e, "Could not list remote storage");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Method;
    use crate::transport::testing::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;

    const LISTING: &str = "maps/7/layers.json?expand=options";

    fn client() -> (Arc<ScriptedTransport>, ApiClient) {
        let t = Arc::new(ScriptedTransport::new());
        let api = ApiClient::new(t.clone());
        (t, api)
    }

    fn listing() -> serde_json::Value {
        json!({"data": [
            {"id": 1, "type": "folder", "name": "Base", "order": 4, "source": "{\"qgis\":1}"},
            {"id": 2, "type": "point", "name": "a", "order": 5, "parent": null, "resource_id": 20,
             "options": [{"id": 9, "option_name": "QGIS_LAYER",
                          "option_value": "{\"id\":\"a\",\"datasource_timestamp\":0,\"hash\":\"h\"}"}]}
        ]})
    }

    #[test]
    fn test_cache_hit_skips_network() {
        let (t, api) = client();
        t.on_json(Method::Get, LISTING, 200, listing());
        let mut cache = SnapshotCache::default();

        assert_eq!(cache.fetch(&api, 7, true).unwrap().records.len(), 2);
        assert_eq!(cache.fetch(&api, 7, true).unwrap().records.len(), 2);
        assert_eq!(t.count(Method::Get, LISTING), 1);
        assert!(cache.is_fresh(7));
        assert!(!cache.is_fresh(8));

        cache.fetch(&api, 7, false).unwrap();
        assert_eq!(t.count(Method::Get, LISTING), 2);
    }

    #[test]
    fn test_other_map_refetches() {
        let (t, api) = client();
        t.on_json(Method::Get, LISTING, 200, listing());
        t.on_json(Method::Get, "maps/8/layers.json?expand=options", 200, json!({"data": []}));
        let mut cache = SnapshotCache::default();

        cache.fetch(&api, 7, true).unwrap();
        assert!(cache.fetch(&api, 8, true).unwrap().is_empty());
    }

    #[test]
    fn test_failure_empties_cache() {
        let (t, api) = client();
        t.on_json(Method::Get, LISTING, 200, listing());
        t.on_json(Method::Get, LISTING, 404, json!({"msg": "not found"}));
        let mut cache = SnapshotCache::default();
        cache.fetch(&api, 7, false).unwrap();

        let err = cache.fetch(&api, 7, false).unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(!cache.is_fresh(7));
    }

    #[test]
    fn test_window_expiry() {
        let (t, api) = client();
        t.on_json(Method::Get, LISTING, 200, listing());
        let mut cache = SnapshotCache::new(Duration::ZERO);
        cache.fetch(&api, 7, false).unwrap();
        assert!(!cache.is_fresh(7));
    }

    #[test]
    fn test_storage_listing_swallows_errors() {
        let (t, api) = client();
        assert!(list_storage_files(&api, 3).is_empty());

        t.on_json(
            Method::Get,
            "storage/fs/qgis/map3/info.json",
            200,
            json!({"data": [{"name": "a.shp"}, {"name": "a.dbf"}]}),
        );
        assert_eq!(list_storage_files(&api, 3), vec!["a.shp", "a.dbf"]);
    }
}
