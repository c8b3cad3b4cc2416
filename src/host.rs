//! Host application seam.
//!
//! The sync engine sees the desktop host only through [`Host`]: the layer
//! tree, per-layer style, vector export, project CRS, and a small
//! key/value store scoped to the open project. [`ProjectFileHost`] is the
//! implementation used by the CLI; it reads a JSON project file and keeps
//! persisted values in SQLite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{HostLayer, LayerStyle, LayerTree, ProjectCrs, TreeNode};
use crate::storage::SqliteStorage;

/// Name used for projects that have never been saved.
pub const UNTITLED_PROJECT: &str = "Untitled";

/// Errors raised by a [`Host`].
#[derive(Error, Debug)]
pub enum HostError {
    #[error("project file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid project: {0}")]
    Invalid(String),

    #[error("vector export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Everything the sync engine needs from the host application.
pub trait Host: Send + Sync {
    /// Display name of the open project.
    fn project_name(&self) -> String;

    /// Project coordinate reference system.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be read.
    fn project_crs(&self) -> HostResult<ProjectCrs>;

    /// Current layer tree, topmost entries first.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be read.
    fn layer_tree(&self) -> HostResult<LayerTree>;

    /// Style rules and opacity of a layer.
    fn layer_style(&self, layer: &HostLayer) -> LayerStyle;

    /// Export a vector layer as SQLite to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be exported.
    fn export_vector(&self, layer_id: &str, dest: &Path) -> HostResult<()>;

    /// Store a value with the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn persist(&self, key: &str, value: &str) -> HostResult<()>;

    /// Read a value stored with the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_persisted(&self, key: &str) -> HostResult<Option<String>>;

    /// Remove a value stored with the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remove_persisted(&self, key: &str) -> HostResult<()>;

    /// Show a message to the user.
    fn notify(&self, message: &str) {
        info!("{message}");
    }
}

/// On-disk project description read by [`ProjectFileHost`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub crs: ProjectCrs,
    #[serde(default)]
    pub tree: Vec<TreeNode>,
    /// Pre-exported SQLite files for vector layers that need conversion.
    #[serde(default)]
    pub exports: BTreeMap<String, PathBuf>,
}

/// [`Host`] backed by a JSON project file and the SQLite store.
pub struct ProjectFileHost {
    path: PathBuf,
    project_key: String,
    store: Mutex<SqliteStorage>,
}

impl ProjectFileHost {
    /// Open the project at `path`, persisting into `store`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::NotFound` if the file does not exist, or a parse
    /// error if it is not a valid project.
    pub fn open(path: &Path, store: SqliteStorage) -> HostResult<Self> {
        if !path.is_file() {
            return Err(HostError::NotFound(path.to_path_buf()));
        }
        let canonical = path.canonicalize()?;
        let host = Self {
            project_key: canonical.to_string_lossy().into_owned(),
            path: canonical,
            store: Mutex::new(store),
        };
        // Fail early on an unreadable project.
        host.read()?;
        debug!(project = %host.project_key, "Project opened");
        Ok(host)
    }

    /// Canonical project path, used as the persistence scope.
    #[must_use]
    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with the store locked.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> R) -> R {
        let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn read(&self) -> HostResult<ProjectFile> {
        let text = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&text).map_err(|e| HostError::Invalid(e.to_string()))
    }
}

impl Host for ProjectFileHost {
    fn project_name(&self) -> String {
        self.read()
            .ok()
            .and_then(|p| p.name)
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                self.path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| UNTITLED_PROJECT.to_string())
    }

    fn project_crs(&self) -> HostResult<ProjectCrs> {
        Ok(self.read()?.crs)
    }

    fn layer_tree(&self) -> HostResult<LayerTree> {
        Ok(LayerTree {
            children: self.read()?.tree,
        })
    }

    fn layer_style(&self, layer: &HostLayer) -> LayerStyle {
        layer.style.clone().unwrap_or_default()
    }

    fn export_vector(&self, layer_id: &str, dest: &Path) -> HostResult<()> {
        let project = self.read()?;
        let source = project.exports.get(layer_id).ok_or_else(|| {
            HostError::Export(format!("no SQLite export configured for layer {layer_id}"))
        })?;
        let source = if source.is_relative() {
            self.path
                .parent()
                .map_or_else(|| source.clone(), |dir| dir.join(source))
        } else {
            source.clone()
        };
        std::fs::copy(&source, dest)
            .map_err(|e| HostError::Export(format!("{}: {e}", source.display())))?;
        Ok(())
    }

    fn persist(&self, key: &str, value: &str) -> HostResult<()> {
        self.with_store(|db| db.set_entry(&self.project_key, key, value))?;
        Ok(())
    }

    fn read_persisted(&self, key: &str) -> HostResult<Option<String>> {
        Ok(self.with_store(|db| db.get_entry(&self.project_key, key))?)
    }

    fn remove_persisted(&self, key: &str) -> HostResult<()> {
        self.with_store(|db| db.remove_entry(&self.project_key, key))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"{
        "name": "Parcels",
        "crs": {"proj4": "+proj=merc", "epsg": "3857", "units": "meter"},
        "tree": [
            {"group": {"id": "g1", "name": "Base", "children": [
                {"layer": {"id": "roads", "name": "Roads", "provider": "ogr",
                           "source": "/data/roads.shp", "geometry": "line",
                           "style": {"opacity": 80, "rules": [{"color": "1,2,3"}]}}}
            ]}}
        ],
        "exports": {"roads": "roads_export.sqlite"}
    }"#;

    fn open_project(dir: &Path) -> ProjectFileHost {
        let path = dir.join("parcels.json");
        std::fs::write(&path, PROJECT).unwrap();
        ProjectFileHost::open(&path, SqliteStorage::open_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_missing_project() {
        let err = ProjectFileHost::open(
            Path::new("/nonexistent/project.json"),
            SqliteStorage::open_memory().unwrap(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[test]
    fn test_reads_project() {
        let dir = tempfile::tempdir().unwrap();
        let host = open_project(dir.path());

        assert_eq!(host.project_name(), "Parcels");
        assert_eq!(host.project_crs().unwrap().epsg.as_deref(), Some("3857"));
        let tree = host.layer_tree().unwrap();
        let TreeNode::Group(group) = &tree.children[0] else {
            panic!("expected group");
        };
        let TreeNode::Layer(layer) = &group.children[0] else {
            panic!("expected layer");
        };
        assert!((host.layer_style(layer).opacity - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let host = open_project(dir.path());

        assert_eq!(host.read_persisted("map_id").unwrap(), None);
        host.persist("map_id", "42").unwrap();
        assert_eq!(host.read_persisted("map_id").unwrap().as_deref(), Some("42"));
        host.remove_persisted("map_id").unwrap();
        assert_eq!(host.read_persisted("map_id").unwrap(), None);
    }

    #[test]
    fn test_export_vector_copies_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = open_project(dir.path());
        std::fs::write(dir.path().join("roads_export.sqlite"), b"sqlite").unwrap();

        let dest = dir.path().join("out.sqlite");
        host.export_vector("roads", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"sqlite");

        assert!(matches!(
            host.export_vector("missing", &dest),
            Err(HostError::Export(_))
        ));
    }
}
