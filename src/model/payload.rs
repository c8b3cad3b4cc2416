//! Wire payloads sent to the map service.
//!
//! These are the only places where layer kinds are flattened into the
//! service's JSON shapes.

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::layer::{LayerKind, LocalLayer, StyleRule};
use super::remote::{OWNED_FOLDER_SOURCE, RemoteId};

/// Longest local id kept verbatim in remote file names.
const MAX_FILE_STEM: usize = 200;
const DIGEST_HEX_LEN: usize = 32;

/// Datasource type code for WFS services.
pub const WFS_DATASOURCE_TYPE: u32 = 70;

/// Remote storage directory of a map, relative to `storage/fs/`.
#[must_use]
pub fn storage_dir(mid: RemoteId) -> String {
    format!("qgis/map{mid}")
}

/// File-name-safe stem for a local layer id.
///
/// Characters outside `[A-Za-z0-9-_. ]` become `_`. Stems longer than
/// the limit are cut and suffixed with a digest of the full stem.
#[must_use]
pub fn remote_file_stem(local_id: &str) -> String {
    let sanitized: String = local_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.len() <= MAX_FILE_STEM {
        return sanitized;
    }

    let digest = Sha256::digest(sanitized.as_bytes());
    let hex: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(DIGEST_HEX_LEN)
        .collect();
    let keep = MAX_FILE_STEM - DIGEST_HEX_LEN - 1;
    format!("{}_{hex}", &sanitized[..keep])
}

/// Remote file name of a file-backed layer's main source.
#[must_use]
pub fn remote_source_name(layer: &LocalLayer) -> Option<String> {
    layer
        .kind
        .file_source()
        .map(|f| format!("{}.{}", remote_file_stem(&layer.id), f.remote_extension()))
}

/// Layer create/update body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerPayload {
    pub mid: Option<RemoteId>,
    pub order: i64,
    pub parent: Option<RemoteId>,
    pub name: String,
    pub alpha: Option<f64>,
    #[serde(rename = "type")]
    pub layer_type: String,
    /// `"t"` or `"f"`.
    pub visible: String,
    /// JSON-encoded source object.
    pub source: String,
    /// JSON-encoded style list.
    pub styles: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<RemoteId>,
}

impl LayerPayload {
    /// Build the payload for `layer` placed at `order` under `parent`.
    #[must_use]
    pub fn build(
        layer: &LocalLayer,
        mid: Option<RemoteId>,
        order: i64,
        parent: Option<RemoteId>,
    ) -> Self {
        let map_dir = mid.map_or_else(String::new, |m| format!("/{}", storage_dir(m)));

        let (source, styles, alpha) = match &layer.kind {
            LayerKind::Vector(_) => (
                file_source_json(layer, &map_dir),
                vector_styles(&layer.style.rules, &map_dir),
                Some(layer.style.opacity),
            ),
            LayerKind::Raster(_) => (file_source_json(layer, &map_dir), raster_styles(), None),
            LayerKind::Wms(wms) => {
                let mut source = serde_json::Map::new();
                source.insert("type".into(), json!("wms"));
                source.insert("version".into(), json!("1.1.1"));
                insert_opt(&mut source, "url", wms.url.as_deref());
                insert_opt(&mut source, "srs", wms.srs.as_deref());
                insert_opt(&mut source, "style", wms.style.as_deref());
                insert_opt(&mut source, "layer", wms.layer.as_deref());
                (
                    serde_json::Value::Object(source),
                    json!([{"showlabel": "false", "visible": "true", "expression": " "}]),
                    None,
                )
            }
            LayerKind::Wfs(wfs) => {
                let mut source = serde_json::Map::new();
                source.insert("type".into(), json!("wfs"));
                insert_opt(&mut source, "url", wfs.url.as_deref());
                insert_opt(&mut source, "layer_id", wfs.layer_id.as_deref());
                insert_opt(&mut source, "srs", wfs.srs.as_deref());
                (
                    serde_json::Value::Object(source),
                    vector_styles(&layer.style.rules, &map_dir),
                    Some(layer.style.opacity),
                )
            }
        };

        let bbox = layer.bbox;
        Self {
            mid,
            order,
            parent,
            name: layer.name.clone(),
            alpha,
            layer_type: layer.geometry.wire_name().to_string(),
            visible: if layer.visible { "t" } else { "f" }.to_string(),
            source: source.to_string(),
            styles: styles.to_string(),
            epsg: layer.epsg.clone(),
            x_min: bbox.map(|b| b.x_min),
            y_min: bbox.map(|b| b.y_min),
            x_max: bbox.map(|b| b.x_max),
            y_max: bbox.map(|b| b.y_max),
            datasource_id: None,
        }
    }

    #[must_use]
    pub const fn with_datasource(mut self, datasource_id: Option<RemoteId>) -> Self {
        self.datasource_id = datasource_id;
        self
    }
}

fn insert_opt(map: &mut serde_json::Map<String, serde_json::Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        map.insert(key.to_string(), json!(v));
    }
}

fn file_source_json(layer: &LocalLayer, map_dir: &str) -> serde_json::Value {
    let name = remote_source_name(layer).unwrap_or_default();
    json!({"type": "file", "src": format!("{map_dir}/{name}")})
}

fn vector_styles(rules: &[StyleRule], map_dir: &str) -> serde_json::Value {
    let rewritten: Vec<StyleRule> = rules
        .iter()
        .map(|rule| {
            let mut rule = rule.clone();
            for asset in [&mut rule.url, &mut rule.hatch_url].into_iter().flatten() {
                *asset = format!("{map_dir}/{asset}");
            }
            rule
        })
        .collect();
    serde_json::to_value(rewritten).unwrap_or_else(|_| json!([]))
}

fn raster_styles() -> serde_json::Value {
    json!([{
        "bordercolor": "255,153,253",
        "color": "230,179,229",
        "fontcolor": "0,0,0",
        "outline": "255,255,255",
        "width": 1,
        "borderwidth": 0,
        "fontsize": 12,
        "cap": false,
        "scale": true,
        "visible": true,
        "showlabel": false,
        "expression": ""
    }])
}

/// Folder create/update body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderPayload {
    pub mid: RemoteId,
    pub name: String,
    pub order: i64,
    #[serde(rename = "type")]
    pub layer_type: &'static str,
    pub source: &'static str,
    pub parent: Option<RemoteId>,
}

impl FolderPayload {
    #[must_use]
    pub fn new(mid: RemoteId, name: &str, order: i64, parent: Option<RemoteId>) -> Self {
        Self {
            mid,
            name: name.to_string(),
            order,
            layer_type: "folder",
            source: OWNED_FOLDER_SOURCE,
            parent,
        }
    }
}

/// Project CRS as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ProjectCrs {
    #[serde(default)]
    pub proj4: String,
    #[serde(default)]
    pub epsg: Option<String>,
    /// `meter`, `degree` or `foot`.
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_units() -> String {
    "meter".to_string()
}

/// Map create/update body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapPayload {
    pub name: String,
    pub proj4: String,
    pub units: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsg: Option<String>,
}

impl MapPayload {
    #[must_use]
    pub fn new(name: &str, crs: &ProjectCrs) -> Self {
        Self {
            name: name.to_string(),
            proj4: crs.proj4.clone(),
            units: crs.units.clone(),
            epsg: crs.epsg.clone(),
        }
    }
}

/// Remembered-state option body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionPayload {
    pub option_name: &'static str,
    pub option_value: String,
    pub option_type: u32,
}

impl OptionPayload {
    #[must_use]
    pub fn remembered(value: String) -> Self {
        Self {
            option_name: super::remote::REMEMBERED_OPTION,
            option_value: value,
            option_type: 5,
        }
    }
}

/// Datasource object a WFS layer needs, or `None` for other kinds.
///
/// `params` is a JSON string, as the service stores it.
#[must_use]
pub fn datasource_object(layer: &LocalLayer) -> Option<serde_json::Value> {
    let LayerKind::Wfs(wfs) = &layer.kind else {
        return None;
    };
    let params = json!({
        "url": wfs.url,
        "version": "1.1.1",
        "type": "wfs",
        "layerid": wfs.layer_id,
        "geometry_type": layer.geometry.code(),
    });
    let bbox = layer.bbox;
    Some(json!({
        "name": wfs.layer_id,
        "type": WFS_DATASOURCE_TYPE,
        "x_min": bbox.map(|b| b.x_min),
        "x_max": bbox.map(|b| b.x_max),
        "y_min": bbox.map(|b| b.y_min),
        "y_max": bbox.map(|b| b.y_max),
        "epsg": layer.epsg,
        "params": params.to_string(),
    }))
}
