//! Version command: the build and the service it talks to.

use std::fmt;

use serde::Serialize;

use super::Context;
use crate::config::{resolve_db_path, resolve_host};
use crate::error::Result;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;

#[derive(Debug, Serialize)]
struct VersionInfo {
    version: &'static str,
    profile: &'static str,
    api_host: String,
    schema: i32,
    db: Option<String>,
}

impl VersionInfo {
    fn resolve(ctx: &Context) -> Result<Self> {
        Ok(Self {
            version: env!("CARGO_PKG_VERSION"),
            profile: if cfg!(debug_assertions) { "debug" } else { "release" },
            api_host: resolve_host(ctx.host.as_deref())?,
            schema: CURRENT_SCHEMA_VERSION,
            db: resolve_db_path(ctx.db.as_deref()).map(|p| p.display().to_string()),
        })
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mapsync {} ({} build)", self.version, self.profile)?;
        writeln!(f, "  API host: {}", self.api_host)?;
        write!(f, "  Store:    schema v{}", self.schema)?;
        if let Some(db) = &self.db {
            write!(f, " at {db}")?;
        }
        Ok(())
    }
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if the configured host is invalid or JSON
/// serialization fails.
pub fn execute(ctx: &Context) -> Result<()> {
    let info = VersionInfo::resolve(ctx)?;
    if ctx.json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!("{info}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_reports_host_and_store() {
        let ctx = Context {
            host: Some("https://maps.example.com/api".into()),
            db: Some("/tmp/mapsync.db".into()),
            ..Context::default()
        };
        let info = VersionInfo::resolve(&ctx).unwrap();
        assert_eq!(info.api_host, "https://maps.example.com/api/");
        assert_eq!(info.schema, CURRENT_SCHEMA_VERSION);

        let text = info.to_string();
        assert!(text.starts_with(&format!("mapsync {}", env!("CARGO_PKG_VERSION"))));
        assert!(text.ends_with(&format!("schema v{CURRENT_SCHEMA_VERSION} at /tmp/mapsync.db")));
    }

    #[test]
    fn test_version_rejects_bad_host() {
        let ctx = Context {
            host: Some("ftp://maps.example.com".into()),
            ..Context::default()
        };
        assert!(VersionInfo::resolve(&ctx).is_err());
    }
}
