//! Datasource deduplication.
//!
//! Layers backed by a remote service share datasources. Before creating
//! one, the existing datasources of the same type are fetched once per
//! pass and deep-compared with the candidate.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info};

use super::reconcile::{LayerPlan, UpdateMode};
use crate::api::{ApiClient, ApiResult};
use crate::model::RemoteId;
use crate::model::payload::{WFS_DATASOURCE_TYPE, datasource_object};

/// Fields holding JSON-encoded objects that compare by content.
const ENCODED_FIELDS: &[&str] = &["params"];

/// Whether every field of `candidate` is present in `remote` with an
/// equal value.
///
/// Scalars compare by their text, since the service echoes numbers as
/// strings. Fields named in `decode` hold JSON text and compare by their
/// decoded content.
#[must_use]
pub fn deep_matches(candidate: &Value, remote: &Value, decode: &[&str]) -> bool {
    let (Some(candidate), Some(remote)) = (candidate.as_object(), remote.as_object()) else {
        return false;
    };
    candidate.iter().all(|(key, value)| {
        let Some(other) = remote.get(key) else {
            return false;
        };
        if decode.contains(&key.as_str()) {
            match (decoded(value), decoded(other)) {
                (Some(a), Some(b)) => deep_matches(&a, &b, &[]),
                _ => false,
            }
        } else {
            scalar_text(value) == scalar_text(other)
        }
    })
}

fn decoded(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Object(_) => Some(value.clone()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Datasources of each type, fetched at most once per publish pass.
#[derive(Debug, Default)]
pub struct DatasourceCache {
    by_type: HashMap<u32, Vec<Value>>,
}

impl DatasourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn of_type(&mut self, api: &ApiClient, ds_type: u32) -> ApiResult<&mut Vec<Value>> {
        if !self.by_type.contains_key(&ds_type) {
            let listed = api.list_datasources(ds_type)?;
            debug!(ds_type, count = listed.len(), "Datasources listed");
            self.by_type.insert(ds_type, listed);
        }
        Ok(self.by_type.entry(ds_type).or_default())
    }

    /// Datasource id a layer should reference, creating or updating the
    /// datasource as needed. Layers without a datasource get `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if listing, creating or updating fails.
    pub fn resolve(&mut self, api: &ApiClient, plan: &LayerPlan) -> ApiResult<Option<RemoteId>> {
        let Some(object) = datasource_object(&plan.layer) else {
            return Ok(None);
        };
        let ds_type = object
            .get("type")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(WFS_DATASOURCE_TYPE);
        let known = self.of_type(api, ds_type)?;

        if let Some(id) = known
            .iter()
            .find(|ds| deep_matches(&object, ds, ENCODED_FIELDS))
            .and_then(|ds| ds.get("id"))
            .and_then(value_id)
        {
            debug!(layer = %plan.layer.name, datasource_id = id, "Reusing datasource");
            return Ok(Some(id));
        }

        let existing = plan.remote.as_ref().and_then(|r| r.datasource_id);
        let id = match existing {
            Some(_) if plan.mode == UpdateMode::PositionOnly => return Ok(existing),
            Some(id) => {
                api.update_datasource(id, &object)?;
                info!(layer = %plan.layer.name, datasource_id = id, "Datasource updated");
                known.retain(|ds| ds.get("id").and_then(value_id) != Some(id));
                id
            }
            None => {
                let id = api.create_datasource(&object)?;
                info!(layer = %plan.layer.name, datasource_id = id, "Datasource created");
                id
            }
        };

        let mut stored = object;
        if let Some(map) = stored.as_object_mut() {
            map.insert("id".to_string(), Value::from(id));
        }
        known.push(stored);
        Ok(Some(id))
    }
}

fn value_id(value: &Value) -> Option<RemoteId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::layer::{GeometryClass, LayerKind, LayerStyle, LocalLayer, WfsSource};
    use crate::sync::reconcile::Action;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{Method, Response};
    use serde_json::json;
    use std::sync::Arc;

    fn wfs_plan(layer_id: &str) -> LayerPlan {
        LayerPlan {
            layer: LocalLayer {
                id: format!("wfs_{layer_id}"),
                name: layer_id.into(),
                geometry: GeometryClass::Polygon,
                epsg: Some("4326".into()),
                bbox: None,
                visible: true,
                style: LayerStyle::default(),
                kind: LayerKind::Wfs(WfsSource {
                    url: Some("https://wfs.example".into()),
                    layer_id: Some(layer_id.into()),
                    srs: Some("4326".into()),
                }),
                data_timestamp: 0,
            },
            order: 1,
            parent: None,
            mode: UpdateMode::Full,
            action: Action::Create,
            remote: None,
            hash: String::new(),
            data_changed: false,
        }
    }

    #[test]
    fn test_deep_matches() {
        let candidate = json!({"name": "a", "type": 70, "params": "{\"url\":\"u\",\"geometry_type\":3}"});
        let remote = json!({
            "id": "12", "name": "a", "type": "70", "owner": "x",
            "params": "{\"geometry_type\": 3, \"url\": \"u\", \"extra\": 1}"
        });
        assert!(deep_matches(&candidate, &remote, ENCODED_FIELDS));

        let other = json!({"name": "a", "type": 70, "params": "{\"url\":\"v\",\"geometry_type\":3}"});
        assert!(!deep_matches(&other, &remote, ENCODED_FIELDS));
        assert!(!deep_matches(&json!({"missing": 1}), &remote, ENCODED_FIELDS));
    }

    #[test]
    fn test_creates_once_then_reuses() {
        let t = Arc::new(ScriptedTransport::new());
        t.on_json(Method::Get, "datasources.json?type=70", 200, json!({"data": []}));
        t.on(
            Method::Post,
            "datasources.json",
            Response::new(201, "").with_location("https://api/1/datasources/31"),
        );
        let api = ApiClient::new(t.clone());
        let mut cache = DatasourceCache::new();

        let plan = wfs_plan("parcels");
        assert_eq!(cache.resolve(&api, &plan).unwrap(), Some(31));
        assert_eq!(cache.resolve(&api, &plan).unwrap(), Some(31));
        assert_eq!(t.count(Method::Get, "datasources.json?type=70"), 1);
        assert_eq!(t.count(Method::Post, "datasources.json"), 1);
    }

    #[test]
    fn test_existing_datasource_is_updated() {
        let t = Arc::new(ScriptedTransport::new());
        t.on_json(Method::Get, "datasources.json?type=70", 200, json!({"data": []}));
        t.on(Method::Put, "datasources/8.json", Response::new(204, ""));
        let api = ApiClient::new(t.clone());
        let mut cache = DatasourceCache::new();

        let mut plan = wfs_plan("roads");
        plan.remote = Some(crate::model::RemoteLayerRecord {
            id: 1,
            kind: crate::model::RemoteKind::Layer,
            name: "roads".into(),
            order: 1,
            parent: None,
            resource_id: Some(2),
            datasource_id: Some(8),
            remembered: None,
            option_id: None,
        });
        assert_eq!(cache.resolve(&api, &plan).unwrap(), Some(8));
        assert_eq!(t.count(Method::Put, "datasources/8.json"), 1);

        plan.mode = UpdateMode::PositionOnly;
        plan.layer.kind = LayerKind::Wfs(WfsSource {
            url: Some("https://elsewhere".into()),
            layer_id: Some("roads".into()),
            srs: None,
        });
        assert_eq!(cache.resolve(&api, &plan).unwrap(), Some(8));
        assert_eq!(t.count(Method::Put, "datasources/8.json"), 1);
    }

    #[test]
    fn test_file_layers_have_no_datasource() {
        let t = Arc::new(ScriptedTransport::new());
        let api = ApiClient::new(t.clone());
        let mut plan = wfs_plan("x");
        plan.layer.kind = LayerKind::Raster(crate::model::FileSource {
            path: "/data/x.tif".into(),
            convert: false,
        });
        assert_eq!(DatasourceCache::new().resolve(&api, &plan).unwrap(), None);
        assert!(t.calls().is_empty());
    }
}
