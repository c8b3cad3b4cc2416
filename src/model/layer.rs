//! Local layer model.
//!
//! A [`LocalLayer`] is built fresh on every analysis pass from the host's
//! layer tree. Its [`LayerKind`] carries only the fields relevant to that
//! kind of source; conversion to wire JSON happens in `model::payload`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::tree::HostLayer;

/// Vector file extensions the map service reads directly.
pub const SUPPORTED_VECTOR_EXTENSIONS: &[&str] = &[
    "shp", "mif", "mid", "gpx", "sqlite", "tab", "kml", "json", "geojson",
];

/// Raster file extensions the map service reads directly.
pub const SUPPORTED_RASTER_EXTENSIONS: &[&str] = &[
    "jpeg", "tif", "tiff", "jpg", "gif", "sid", "hgt", "dem", "ecw", "img", "jp2", "pdf", "png",
];

/// Geometry class as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryClass {
    Point,
    MultiPoint,
    Line,
    MultiLine,
    Polygon,
    MultiPolygon,
    Raster,
    Wms,
}

impl GeometryClass {
    /// Layer `type` value sent to the map service.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Point | Self::MultiPoint => "point",
            Self::Line | Self::MultiLine => "line",
            Self::Polygon | Self::MultiPolygon => "polygon",
            Self::Raster => "raster",
            Self::Wms => "wms",
        }
    }

    /// Numeric geometry code used in datasource parameters.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Point => 1,
            Self::Line => 2,
            Self::Polygon => 3,
            Self::MultiPoint => 4,
            Self::MultiLine => 5,
            Self::MultiPolygon => 6,
            Self::Wms => 998,
            Self::Raster => 999,
        }
    }

    #[must_use]
    pub const fn is_vector(self) -> bool {
        !matches!(self, Self::Raster | Self::Wms)
    }
}

/// Layer extent in the layer's own CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    /// Build from `[x_min, y_min, x_max, y_max]`.
    #[must_use]
    pub const fn from_array(e: [f64; 4]) -> Self {
        Self {
            x_min: e[0],
            y_min: e[1],
            x_max: e[2],
            y_max: e[3],
        }
    }
}

/// One rendering rule extracted from the host's renderer.
///
/// Well-known keys are typed; anything else the host reports is kept in
/// `extra` and forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bordercolor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borderwidth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fontcolor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fontsize: Option<f64>,
    /// Asset file name of an exported point symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Asset file name of an exported fill pattern.
    #[serde(default, rename = "hatchUrl", skip_serializing_if = "Option::is_none")]
    pub hatch_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A rendered file (icon, hatch) that must be uploaded with the layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFile {
    /// Local path of the rendered file.
    pub path: PathBuf,
    /// Remote file name referenced by style rules.
    pub name: String,
}

/// Style description for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    #[serde(default)]
    pub rules: Vec<StyleRule>,
    /// Opacity percentage, 0..=100.
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub assets: Vec<AssetFile>,
}

const fn default_opacity() -> f64 {
    100.0
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            opacity: default_opacity(),
            assets: Vec::new(),
        }
    }
}

/// A file-backed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    pub path: PathBuf,
    /// The host must export this layer to SQLite before upload.
    pub convert: bool,
}

impl FileSource {
    /// File name without its last extension.
    #[must_use]
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File extension as uploaded: `sqlite` for converted layers.
    #[must_use]
    pub fn remote_extension(&self) -> String {
        if self.convert {
            "sqlite".to_string()
        } else {
            extension_of(&self.path)
        }
    }
}

/// Web Map Service source fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WmsSource {
    pub url: Option<String>,
    pub srs: Option<String>,
    pub style: Option<String>,
    pub layer: Option<String>,
}

impl WmsSource {
    /// Parse a WMS source string (`key=value&key=value`).
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut out = Self::default();
        for (key, value) in url::form_urlencoded::parse(source.as_bytes()) {
            match key.as_ref() {
                "url" => out.url = Some(value.into_owned()),
                "crs" => out.srs = Some(value.into_owned()),
                "styles" => out.style = Some(value.into_owned()),
                "layers" => out.layer = Some(value.into_owned()),
                _ => {}
            }
        }
        out
    }
}

/// Web Feature Service source fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WfsSource {
    pub url: Option<String>,
    pub layer_id: Option<String>,
    pub srs: Option<String>,
}

impl WfsSource {
    /// Parse a WFS source string (`key='value' key="value" key=value`).
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let params = parse_key_values(source);
        Self {
            url: params.get("url").cloned(),
            layer_id: params.get("typename").cloned(),
            srs: params
                .get("srsname")
                .map(|s| s.rsplit(':').next().unwrap_or(s).to_string()),
        }
    }
}

/// Source of a layer, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerKind {
    Vector(FileSource),
    Raster(FileSource),
    Wms(WmsSource),
    Wfs(WfsSource),
}

impl LayerKind {
    /// File-backed kinds carry a [`FileSource`].
    #[must_use]
    pub const fn file_source(&self) -> Option<&FileSource> {
        match self {
            Self::Vector(f) | Self::Raster(f) => Some(f),
            Self::Wms(_) | Self::Wfs(_) => None,
        }
    }
}

/// A local layer with all attributes resolved for one analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalLayer {
    pub id: String,
    pub name: String,
    pub geometry: GeometryClass,
    pub epsg: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub visible: bool,
    pub style: LayerStyle,
    pub kind: LayerKind,
    /// Unix millis of the last recorded data change, 0 if never.
    pub data_timestamp: i64,
}

impl LocalLayer {
    /// Resolve a host layer into a syncable layer.
    ///
    /// Returns `None` when the layer is not supported by the map service:
    /// no known geometry, an unsupported raster format, or an unknown
    /// provider.
    #[must_use]
    pub fn resolve(host: &HostLayer, style: LayerStyle, data_timestamp: i64) -> Option<Self> {
        let provider = host.provider.to_ascii_lowercase();
        let mut geometry = host.geometry?;
        let mut epsg = host.crs.as_deref().and_then(epsg_from_authid);

        let kind = match provider.as_str() {
            "wms" => {
                let wms = WmsSource::parse(&host.source);
                if let Some(srs) = &wms.srs {
                    epsg = srs.rsplit(':').next().map(str::to_string);
                }
                geometry = GeometryClass::Wms;
                LayerKind::Wms(wms)
            }
            "wfs" => {
                if !geometry.is_vector() {
                    return None;
                }
                let wfs = WfsSource::parse(&host.source);
                if wfs.srs.is_some() {
                    epsg.clone_from(&wfs.srs);
                }
                LayerKind::Wfs(wfs)
            }
            _ if geometry == GeometryClass::Raster => {
                let path = normalize_path(&host.source);
                if !SUPPORTED_RASTER_EXTENSIONS.contains(&extension_of(&path).as_str()) {
                    return None;
                }
                LayerKind::Raster(FileSource {
                    path,
                    convert: false,
                })
            }
            _ if geometry.is_vector() => {
                let path = normalize_path(&host.source);
                let convert = !path.is_file()
                    || !SUPPORTED_VECTOR_EXTENSIONS.contains(&extension_of(&path).as_str());
                LayerKind::Vector(FileSource { path, convert })
            }
            _ => return None,
        };

        Some(Self {
            id: host.id.clone(),
            name: host.name.clone(),
            geometry,
            epsg,
            bbox: host.extent.map(BoundingBox::from_array),
            visible: host.visible,
            style,
            kind,
            data_timestamp,
        })
    }
}

/// `EPSG:4326` -> `4326`. Other authorities yield `None`.
#[must_use]
pub fn epsg_from_authid(authid: &str) -> Option<String> {
    authid
        .strip_prefix("EPSG:")
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

fn normalize_path(source: &str) -> PathBuf {
    // Host sources may carry provider options after a pipe.
    let file = source.split('|').next().unwrap_or(source);
    PathBuf::from(file.replace('\\', "/"))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn parse_key_values(source: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut rest = source.trim_start();

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_string();
        let after = rest[eq + 1..].trim_start();

        let (value, remaining) = match after.chars().next() {
            Some(q @ ('\'' | '"')) => {
                let body = &after[1..];
                match body.find(q) {
                    Some(end) => (&body[..end], &body[end + 1..]),
                    None => (body, ""),
                }
            }
            _ => {
                let end = after.find(char::is_whitespace).unwrap_or(after.len());
                (&after[..end], &after[end..])
            }
        };

        if !key.is_empty() {
            out.insert(key, value.to_string());
        }
        rest = remaining.trim_start();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_layer(provider: &str, source: &str, geometry: Option<GeometryClass>) -> HostLayer {
        HostLayer {
            id: "l1".into(),
            name: "Layer".into(),
            provider: provider.into(),
            source: source.into(),
            geometry,
            crs: Some("EPSG:3765".into()),
            extent: Some([0.0, 1.0, 2.0, 3.0]),
            visible: true,
            style: None,
        }
    }

    #[test]
    fn test_geometry_wire_names_and_codes() {
        assert_eq!(GeometryClass::MultiPolygon.wire_name(), "polygon");
        assert_eq!(GeometryClass::MultiPolygon.code(), 6);
        assert_eq!(GeometryClass::Raster.code(), 999);
        assert_eq!(GeometryClass::Wms.code(), 998);
    }

    #[test]
    fn test_wms_parse() {
        let wms = WmsSource::parse(
            "crs=EPSG:3857&format=image/png&layers=osm&styles&url=https://tiles.example.com/wms",
        );
        assert_eq!(wms.url.as_deref(), Some("https://tiles.example.com/wms"));
        assert_eq!(wms.srs.as_deref(), Some("EPSG:3857"));
        assert_eq!(wms.layer.as_deref(), Some("osm"));
        assert_eq!(wms.style.as_deref(), Some(""));
    }

    #[test]
    fn test_wfs_parse() {
        let wfs = WfsSource::parse(
            "srsname='EPSG:4326' typename='roads' url=\"https://example.com/wfs\" version='auto'",
        );
        assert_eq!(wfs.url.as_deref(), Some("https://example.com/wfs"));
        assert_eq!(wfs.layer_id.as_deref(), Some("roads"));
        assert_eq!(wfs.srs.as_deref(), Some("4326"));
    }

    #[test]
    fn test_resolve_vector_needs_conversion_when_missing() {
        let layer = LocalLayer::resolve(
            &host_layer("ogr", "/nonexistent/roads.shp", Some(GeometryClass::Line)),
            LayerStyle::default(),
            0,
        )
        .unwrap();
        assert_eq!(layer.epsg.as_deref(), Some("3765"));
        let file = layer.kind.file_source().unwrap();
        assert!(file.convert);
        assert_eq!(file.remote_extension(), "sqlite");
    }

    #[test]
    fn test_resolve_vector_existing_supported_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Parcels.GeoJSON");
        std::fs::write(&path, "{}").unwrap();

        let layer = LocalLayer::resolve(
            &host_layer("ogr", path.to_str().unwrap(), Some(GeometryClass::Polygon)),
            LayerStyle::default(),
            0,
        )
        .unwrap();
        let file = layer.kind.file_source().unwrap();
        assert!(!file.convert);
        assert_eq!(file.stem(), "Parcels");
        assert_eq!(file.remote_extension(), "geojson");
    }

    #[test]
    fn test_resolve_rejects_unsupported() {
        assert!(
            LocalLayer::resolve(
                &host_layer("gdal", "/data/scan.bmp", Some(GeometryClass::Raster)),
                LayerStyle::default(),
                0
            )
            .is_none()
        );
        assert!(
            LocalLayer::resolve(&host_layer("ogr", "/data/table.csv", None), LayerStyle::default(), 0)
                .is_none()
        );
    }

    #[test]
    fn test_resolve_wms_takes_epsg_from_source() {
        let layer = LocalLayer::resolve(
            &host_layer("wms", "crs=EPSG:3857&layers=osm&url=https://x", Some(GeometryClass::Raster)),
            LayerStyle::default(),
            0,
        )
        .unwrap();
        assert_eq!(layer.geometry, GeometryClass::Wms);
        assert_eq!(layer.epsg.as_deref(), Some("3857"));
    }

    #[test]
    fn test_style_rule_keeps_unknown_keys() {
        let rule: StyleRule =
            serde_json::from_str(r#"{"color":"1,2,3","hatchUrl":"h.png","tolevel":5}"#).unwrap();
        assert_eq!(rule.hatch_url.as_deref(), Some("h.png"));
        assert_eq!(rule.extra["tolevel"], 5);
        let back = serde_json::to_value(&rule).unwrap();
        assert_eq!(back["hatchUrl"], "h.png");
        assert_eq!(back["tolevel"], 5);
    }
}
