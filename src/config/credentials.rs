//! Stored API key.
//!
//! `mapsync login` writes the key to `~/.mapsync/api_key` with owner-only
//! permissions; `mapsync logout` removes it. Writes go to a temp file that
//! is renamed into place, so a concurrent reader never sees a partial key.

use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::global_mapsync_dir;
use crate::error::{Error, Result};

const FILE_NAME: &str = "api_key";

/// Location of the credential file.
#[must_use]
pub fn credentials_path() -> Option<PathBuf> {
    global_mapsync_dir().map(|dir| dir.join(FILE_NAME))
}

fn require_path() -> Result<PathBuf> {
    credentials_path().ok_or_else(|| Error::Config("cannot determine home directory".into()))
}

/// Read the stored key, `None` when not logged in.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_api_key() -> Result<Option<String>> {
    match credentials_path() {
        Some(path) => read_key_at(&path),
        None => Ok(None),
    }
}

/// Store `key`, replacing any previous one.
///
/// # Errors
///
/// Returns an error if the key is blank or the file cannot be written.
pub fn write_api_key(key: &str) -> Result<PathBuf> {
    let path = require_path()?;
    write_key_at(&path, key)?;
    Ok(path)
}

/// Remove the stored key. Returns whether one was present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn clear_api_key() -> Result<bool> {
    let path = require_path()?;
    clear_key_at(&path)
}

fn read_key_at(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text.trim().to_string()).filter(|k| !k.is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_key_at(path: &Path, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidArgument("API key cannot be empty".into()));
    }
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("invalid credential path {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let temp_path = path.with_extension("tmp");
    {
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut file = opts.open(&temp_path)?;
        file.write_all(key.as_bytes())?;
        file.flush()?;
    }
    fs::rename(&temp_path, path)?;
    debug!(path = %path.display(), "API key stored");
    Ok(())
}

fn clear_key_at(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
