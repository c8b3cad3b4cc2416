//! Data models for mapsync.
//!
//! This module contains all domain models:
//! - LocalLayer and its tagged source kinds
//! - LayerTree (host input) and LocalTree (flattened walk)
//! - RemoteLayerRecord, RememberedState, RemoteSnapshot
//! - Wire payloads (layer, folder, map, option, datasource)

pub mod layer;
pub mod payload;
pub mod remote;
pub mod tree;

pub use layer::{
    AssetFile, BoundingBox, FileSource, GeometryClass, LayerKind, LayerStyle, LocalLayer,
    StyleRule, WfsSource, WmsSource,
};
pub use payload::{FolderPayload, LayerPayload, MapPayload, OptionPayload, ProjectCrs};
pub use remote::{RemoteId, RemoteKind, RemoteLayerRecord, RemoteSnapshot, RememberedState};
pub use tree::{GroupIdx, HostGroup, HostLayer, LayerEntry, LayerTree, LocalGroup, LocalTree, TreeNode};
