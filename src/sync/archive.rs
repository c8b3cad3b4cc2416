//! Upload staging and packaging.
//!
//! Each layer's files go to the map's storage area as one gzipped tar.
//! Files are renamed to the layer's remote stem on the way in; a file
//! already present remotely is skipped unless the layer's data changed.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, HeaderMode};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::reconcile::LayerPlan;
use super::types::{SyncError, SyncResult};
use crate::host::Host;
use crate::model::LayerKind;
use crate::model::payload::{remote_file_stem, remote_source_name};

/// One file to upload and the name it gets remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub local: PathBuf,
    pub remote_name: String,
}

/// Temporary directory for exports and archives of one publish pass.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new() -> SyncResult<Self> {
        let dir = tempfile::Builder::new().prefix("mapsync-").tempdir()?;
        debug!(dir = %dir.path().display(), "Staging directory created");
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory and everything staged in it.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(dir = %path.display(), error = %e, "Could not remove staging directory");
        }
    }
}

/// Files a layer needs remotely that are not there yet.
///
/// Rendered style assets come first, then either the host's SQLite export
/// (for layers that need conversion) or the source file with every sibling
/// sharing its stem (`roads.shp`, `roads.dbf`, `roads.shp.xml`, ...).
///
/// # Errors
///
/// Returns an error if the source directory cannot be read or the host
/// export fails.
pub fn collect_layer_files(
    plan: &LayerPlan,
    host: &dyn Host,
    staging: &Staging,
    present: &HashSet<String>,
) -> SyncResult<Vec<UploadFile>> {
    let layer = &plan.layer;
    let wanted = |name: &str| plan.data_changed || !present.contains(name);
    let mut files = Vec::new();

    for asset in &layer.style.assets {
        if wanted(&asset.name) {
            files.push(UploadFile {
                local: asset.path.clone(),
                remote_name: asset.name.clone(),
            });
        }
    }

    let source = match &layer.kind {
        LayerKind::Vector(f) | LayerKind::Raster(f) => f,
        LayerKind::Wms(_) | LayerKind::Wfs(_) => return Ok(files),
    };
    let remote_stem = remote_file_stem(&layer.id);

    if source.convert {
        let Some(name) = remote_source_name(layer) else {
            return Ok(files);
        };
        if wanted(&name) {
            let dest = staging.path().join(&name);
            host.export_vector(&layer.id, &dest)?;
            files.push(UploadFile {
                local: dest,
                remote_name: name,
            });
        }
        return Ok(files);
    }

    let Some(dir) = source.path.parent() else {
        return Ok(files);
    };
    let stem = source.stem().to_lowercase();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let lower = file_name.to_lowercase();
        let Some(rest) = lower.strip_prefix(&stem) else {
            continue;
        };
        if !(rest.is_empty() || rest.starts_with('.')) || rest.ends_with(".zip") {
            continue;
        }
        let remote_name = format!("{remote_stem}{rest}");
        if wanted(&remote_name) {
            files.push(UploadFile {
                local: entry.path(),
                remote_name,
            });
        }
    }
    files.sort_by(|a, b| a.remote_name.cmp(&b.remote_name));
    Ok(files)
}

/// Pack `files` into a gzipped tar at `dest`. A partial archive is removed
/// on failure.
///
/// # Errors
///
/// Returns `SyncError::Archive` if any file cannot be packed.
pub fn build_archive(files: &[UploadFile], dest: &Path) -> SyncResult<()> {
    let result = write_archive(files, dest);
    if result.is_err() && dest.exists() {
        if let Err(e) = std::fs::remove_file(dest) {
            warn!(path = %dest.display(), error = %e, "Could not remove partial archive");
        }
    }
    result.map_err(|e| SyncError::Archive(e.to_string()))
}

fn write_archive(files: &[UploadFile], dest: &Path) -> std::io::Result<()> {
    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Deterministic);
    for file in files {
        builder
            .append_path_with_name(&file.local, &file.remote_name)
            .map_err(|e| {
                std::io::Error::new(e.kind(), format!("{}: {e}", file.local.display()))
            })?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Stage the archive of one layer, or `None` when nothing needs uploading.
///
/// # Errors
///
/// Returns an error if collecting or packing fails.
pub fn package_layer(
    plan: &LayerPlan,
    host: &dyn Host,
    staging: &Staging,
    present: &HashSet<String>,
) -> SyncResult<Option<PathBuf>> {
    let files = collect_layer_files(plan, host, staging, present)?;
    if files.is_empty() {
        return Ok(None);
    }
    debug!(layer = %plan.layer.name, files = files.len(), "Packaging layer files");
    let dest = staging
        .path()
        .join(format!("{}.tar.gz", remote_file_stem(&plan.layer.id)));
    build_archive(&files, &dest)?;
    Ok(Some(dest))
}
