//! Command implementations.

pub mod analyze;
pub mod auth;
pub mod completions;
pub mod publish;
pub mod status;
pub mod touch;
pub mod version;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{ApiClient, ApiError};
use crate::config::{resolve_api_key, resolve_db_path, resolve_host};
use crate::error::{Error, Result};
use crate::host::ProjectFileHost;
use crate::storage::SqliteStorage;
use crate::transport::HttpTransport;

/// Settings shared by every command, resolved from global flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub db: Option<PathBuf>,
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub actor: String,
    pub json: bool,
    pub csv: bool,
    pub quiet: bool,
}

impl Context {
    /// Open the global store, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if no database location can be determined or the
    /// database cannot be opened.
    pub fn open_storage(&self) -> Result<SqliteStorage> {
        let path = resolve_db_path(self.db.as_deref())
            .ok_or_else(|| Error::Config("cannot determine database location".into()))?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Ok(SqliteStorage::open(&path)?)
    }

    /// Open a project file backed by the global store.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is missing or invalid, or the store
    /// cannot be opened.
    pub fn open_project(&self, path: &Path) -> Result<ProjectFileHost> {
        if !path.is_file() {
            return Err(Error::ProjectNotFound {
                path: path.to_path_buf(),
            });
        }
        let store = self.open_storage()?;
        Ok(ProjectFileHost::open(path, store)?)
    }

    /// Client for the configured host and API key.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn` if no key is configured.
    pub fn api_client(&self) -> Result<ApiClient> {
        let key = resolve_api_key(self.api_key.as_deref())?;
        self.client_with_key(&key)
    }

    /// Client for the configured host and an explicit key.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is invalid or the HTTP client cannot be
    /// built.
    pub fn client_with_key(&self, key: &str) -> Result<ApiClient> {
        let host = resolve_host(self.host.as_deref())?;
        let transport = HttpTransport::new(&host, key).map_err(ApiError::from)?;
        Ok(ApiClient::new(Arc::new(transport)))
    }
}
