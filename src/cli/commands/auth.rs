//! Login, logout and credential check.

use serde::Serialize;
use tracing::info;

use super::Context;
use crate::api::{ApiClient, CredentialStatus};
use crate::config::{clear_api_key, write_api_key};
use crate::error::{Error, Result};

#[derive(Serialize)]
struct CheckOutput {
    valid: bool,
    premium: bool,
}

/// Turn a credential check into an error unless the key is valid.
fn require_valid(api: &ApiClient) -> Result<()> {
    match api.check_credentials() {
        CredentialStatus::Valid => Ok(()),
        CredentialStatus::Rejected { status } => {
            info!(status, "API key rejected");
            Err(Error::CredentialsRejected)
        }
        CredentialStatus::Unreachable => Err(Error::Connection(
            "no response from the map service".to_string(),
        )),
    }
}

/// Store an API key, verifying it first unless `no_verify`.
///
/// # Errors
///
/// Returns an error if no key was given, the server rejects it, or the
/// credential file cannot be written.
pub fn login(ctx: &Context, key: Option<&str>, no_verify: bool) -> Result<()> {
    let key = key
        .or(ctx.api_key.as_deref())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::InvalidArgument("an API key is required".into()))?;

    if !no_verify {
        require_valid(&ctx.client_with_key(key)?)?;
    }
    let path = write_api_key(key)?;

    if ctx.json {
        let output = serde_json::json!({ "logged_in": true, "path": path.display().to_string() });
        println!("{output}");
    } else if !ctx.quiet {
        println!("Logged in. Key stored at {}", path.display());
    }
    Ok(())
}

/// Remove the stored API key.
///
/// # Errors
///
/// Returns an error if the credential file cannot be removed.
pub fn logout(ctx: &Context) -> Result<()> {
    let removed = clear_api_key()?;

    if ctx.json {
        println!("{}", serde_json::json!({ "logged_out": removed }));
    } else if !ctx.quiet {
        if removed {
            println!("Logged out.");
        } else {
            println!("Not logged in.");
        }
    }
    Ok(())
}

/// Check the configured key and report the subscription level.
///
/// # Errors
///
/// Returns `NotLoggedIn`, `CredentialsRejected` or `Connection`.
pub fn check(ctx: &Context) -> Result<()> {
    let api = ctx.api_client()?;
    require_valid(&api)?;
    let premium = api.is_premium();

    if ctx.json {
        let output = CheckOutput {
            valid: true,
            premium,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if !ctx.quiet {
        println!("API key is valid.");
        if premium {
            println!("Premium subscription: private maps available.");
        } else {
            println!("Free account: new maps must be published with --public.");
        }
    }
    Ok(())
}
