//! Configuration management.
//!
//! This module resolves where mapsync keeps its data and which map service
//! it talks to.
//!
//! # Architecture
//!
//! mapsync uses a **global directory** at `~/.mapsync/`:
//! - **Database**: `~/.mapsync/data/mapsync.db` holds persisted project
//!   entries and the sync history for every project
//! - **Credentials**: `~/.mapsync/api_key`, written by `mapsync login`
//!
//! Every setting can be overridden by a command-line flag or an
//! environment variable, in that order.

mod credentials;

pub use credentials::{clear_api_key, credentials_path, read_api_key, write_api_key};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default API host.
pub const DEFAULT_HOST: &str = "https://api.giscloud.com/";

/// How long a fetched remote listing is reused before refetching.
pub const SNAPSHOT_WINDOW: Duration = Duration::from_secs(30);

/// Quiet period after a project change before analysis runs.
pub const ANALYSIS_DEBOUNCE: Duration = Duration::from_millis(50);

/// How often `watch` checks the project file for changes.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Get the global mapsync directory location.
#[must_use]
pub fn global_mapsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".mapsync"))
}

/// Read a non-blank environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `MAPSYNC_DB` environment variable
/// 3. Global location: `~/.mapsync/data/mapsync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    if let Some(db_path) = env_value("MAPSYNC_DB") {
        return Some(PathBuf::from(db_path));
    }
    global_mapsync_dir().map(|dir| dir.join("data").join("mapsync.db"))
}

/// Resolve the API host, normalised to end with `/`.
///
/// Priority: `explicit` → `MAPSYNC_HOST` → [`DEFAULT_HOST`].
///
/// # Errors
///
/// Returns `Error::Config` if the host is not an http(s) URL.
pub fn resolve_host(explicit: Option<&str>) -> Result<String> {
    let raw = explicit
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(ToString::to_string)
        .or_else(|| env_value("MAPSYNC_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    normalize_host(&raw)
}

fn normalize_host(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::Config(format!("invalid host {raw}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!("host must be http or https: {raw}")));
    }
    let mut host = parsed.to_string();
    if !host.ends_with('/') {
        host.push('/');
    }
    Ok(host)
}

/// Resolve the API key.
///
/// Priority: `explicit` → `MAPSYNC_API_KEY` → credential file.
///
/// # Errors
///
/// Returns `Error::NotLoggedIn` if no key is configured anywhere.
pub fn resolve_api_key(explicit: Option<&str>) -> Result<String> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(key) = env_value("MAPSYNC_API_KEY") {
        return Ok(key);
    }
    read_api_key()?.ok_or(Error::NotLoggedIn)
}

/// Get the default actor name recorded with each publish.
///
/// Priority:
/// 1. `MAPSYNC_ACTOR` environment variable
/// 2. System username
/// 3. "unknown"
#[must_use]
pub fn default_actor() -> String {
    env_value("MAPSYNC_ACTOR")
        .or_else(|| env_value("USER"))
        .or_else(|| env_value("USERNAME"))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_actor() {
        let actor = default_actor();
        assert!(!actor.is_empty());
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_explicit_host_is_normalised() {
        assert_eq!(
            resolve_host(Some("https://maps.example.com")).unwrap(),
            "https://maps.example.com/"
        );
        assert_eq!(
            resolve_host(Some("http://localhost:8080/api/")).unwrap(),
            "http://localhost:8080/api/"
        );
    }

    #[test]
    fn test_invalid_host_is_config_error() {
        assert!(matches!(resolve_host(Some("not a url")), Err(Error::Config(_))));
        assert!(matches!(resolve_host(Some("ftp://example.com")), Err(Error::Config(_))));
    }

    #[test]
    fn test_explicit_api_key_wins() {
        assert_eq!(resolve_api_key(Some("  abc  ")).unwrap(), "abc");
    }

    #[test]
    fn test_default_host_is_valid() {
        assert_eq!(normalize_host(DEFAULT_HOST).unwrap(), DEFAULT_HOST);
    }
}
