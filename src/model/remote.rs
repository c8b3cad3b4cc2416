//! Remote layer records and the decoded snapshot of a map.

use serde::{Deserialize, Deserializer, Serialize};

/// Numeric id assigned by the map service.
pub type RemoteId = i64;

/// Option name under which remembered state is attached to a layer.
pub const REMEMBERED_OPTION: &str = "QGIS_LAYER";

/// Folder `source` marker for folders this tool created.
pub const OWNED_FOLDER_SOURCE: &str = r#"{"qgis":1}"#;

// ── Wire shapes ───────────────────────────────────────────────

/// One entry of `maps/{id}/layers.json?expand=options`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireLayer {
    #[serde(deserialize_with = "de_id")]
    pub id: RemoteId,
    #[serde(rename = "type", default)]
    pub layer_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub order: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub parent: Option<RemoteId>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub resource_id: Option<RemoteId>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub datasource_id: Option<RemoteId>,
    #[serde(default)]
    pub source: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Option<Vec<WireOption>>,
}

/// A resource option attached to a layer.
#[derive(Debug, Clone, Deserialize)]
pub struct WireOption {
    #[serde(deserialize_with = "de_id")]
    pub id: RemoteId,
    #[serde(default)]
    pub option_name: String,
    #[serde(default)]
    pub option_value: Option<serde_json::Value>,
}

fn value_to_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            // Whole-number floats only; the service sometimes sends `3.0`.
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<RemoteId, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    value_to_i64(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {value}")))
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RemoteId>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value_to_i64(&value))
}

// ── Decoded records ───────────────────────────────────────────

/// What this tool last wrote for a layer: identity, data timestamp, hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedState {
    #[serde(rename = "id")]
    pub local_id: String,
    pub datasource_timestamp: i64,
    pub hash: String,
}

impl RememberedState {
    /// Decode an option value. The value is a JSON-encoded object, either
    /// as a string or inline.
    ///
    /// Missing timestamp or hash decode as `0` / `"0"`, matching values
    /// written by older clients. Anything without a string `id` is not
    /// remembered state.
    #[must_use]
    pub fn from_option_value(value: &serde_json::Value) -> Option<Self> {
        let decoded;
        let obj = match value {
            serde_json::Value::String(s) => {
                decoded = serde_json::from_str::<serde_json::Value>(s).ok()?;
                decoded.as_object()?
            }
            serde_json::Value::Object(o) => o,
            _ => return None,
        };

        let local_id = obj.get("id")?.as_str()?.to_string();
        let datasource_timestamp = obj
            .get("datasource_timestamp")
            .and_then(value_to_i64)
            .unwrap_or(0);
        let hash = match obj.get("hash") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => "0".to_string(),
        };

        Some(Self {
            local_id,
            datasource_timestamp,
            hash,
        })
    }

    /// Encode as the option value string.
    #[must_use]
    pub fn to_option_value(&self) -> String {
        serde_json::json!({
            "id": self.local_id,
            "datasource_timestamp": self.datasource_timestamp,
            "hash": self.hash,
        })
        .to_string()
    }
}

/// Record classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    /// A folder; `owned` when it carries this tool's source marker.
    Folder { owned: bool },
    Layer,
}

/// One remote layer or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayerRecord {
    pub id: RemoteId,
    pub kind: RemoteKind,
    pub name: String,
    pub order: i64,
    pub parent: Option<RemoteId>,
    pub resource_id: Option<RemoteId>,
    pub datasource_id: Option<RemoteId>,
    pub remembered: Option<RememberedState>,
    /// Id of the option carrying `remembered`.
    pub option_id: Option<RemoteId>,
}

impl RemoteLayerRecord {
    #[must_use]
    pub fn from_wire(wire: &WireLayer) -> Self {
        let kind = if wire.layer_type == "folder" {
            RemoteKind::Folder {
                owned: wire.source.as_ref().is_some_and(is_owned_marker),
            }
        } else {
            RemoteKind::Layer
        };

        let remembered_option = wire
            .options
            .iter()
            .flatten()
            .filter(|o| o.option_name == REMEMBERED_OPTION)
            .find_map(|o| {
                o.option_value
                    .as_ref()
                    .and_then(RememberedState::from_option_value)
                    .map(|state| (o.id, state))
            });

        Self {
            id: wire.id,
            kind,
            name: wire.name.clone(),
            order: wire.order.unwrap_or(0),
            parent: wire.parent,
            resource_id: wire.resource_id,
            datasource_id: wire.datasource_id,
            option_id: remembered_option.as_ref().map(|(id, _)| *id),
            remembered: remembered_option.map(|(_, state)| state),
        }
    }

    #[must_use]
    pub const fn is_owned_folder(&self) -> bool {
        matches!(self.kind, RemoteKind::Folder { owned: true })
    }
}

fn is_owned_marker(source: &serde_json::Value) -> bool {
    let parsed;
    let obj = match source {
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(_) => return false,
        },
        other => other,
    };
    obj.get("qgis").and_then(value_to_i64) == Some(1)
}

/// Decoded listing of one remote map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub records: Vec<RemoteLayerRecord>,
}

impl RemoteSnapshot {
    #[must_use]
    pub fn from_wire(data: &[WireLayer]) -> Self {
        Self {
            records: data.iter().map(RemoteLayerRecord::from_wire).collect(),
        }
    }

    /// Folders carrying the ownership marker.
    pub fn owned_folders(&self) -> impl Iterator<Item = &RemoteLayerRecord> {
        self.records.iter().filter(|r| r.is_owned_folder())
    }

    /// Records carrying remembered state.
    pub fn tracked_layers(&self) -> impl Iterator<Item = &RemoteLayerRecord> {
        self.records.iter().filter(|r| r.remembered.is_some())
    }

    /// Owned folder by id.
    #[must_use]
    pub fn owned_folder(&self, id: RemoteId) -> Option<&RemoteLayerRecord> {
        self.owned_folders().find(|r| r.id == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
