//! Typed client for the map service REST API.
//!
//! Each submodule adds an `impl ApiClient` block for one resource family:
//! - [`map`] - maps, public sharing, unique names
//! - [`layer`] - layers, folders, remembered-state options
//! - [`datasource`] - shared datasources
//! - [`storage`] - map file storage listing and upload
//! - [`user`] - credential check and subscriptions

pub mod datasource;
pub mod layer;
pub mod map;
pub mod storage;
pub mod user;

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::model::RemoteId;
use crate::transport::{Method, Response, Transport, TransportError};

pub use user::{CredentialStatus, Subscription};

/// Errors returned by [`ApiClient`] calls.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("API key rejected (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("response is missing {0}")]
    MissingField(&'static str),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status of a response-level failure.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status } | Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Client over a shared [`Transport`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub(crate) fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ApiResult<Response> {
        let resp = self.transport.request(method, path, body)?;
        debug!(method = method.as_str(), path, status = resp.status, "API response");
        Ok(resp)
    }

    /// Send and require one of `expected` statuses.
    pub(crate) fn send_expect(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        expected: &[u16],
    ) -> ApiResult<Response> {
        let resp = self.send(method, path, body)?;
        check_status(resp, expected)
    }

    /// `GET` a listing and return its `data` array.
    pub(crate) fn get_data(&self, path: &str) -> ApiResult<Vec<serde_json::Value>> {
        let resp = self.send_expect(Method::Get, path, None, &[200])?;
        let body = resp
            .json()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        match body.get("data") {
            Some(serde_json::Value::Array(items)) => Ok(items.clone()),
            Some(serde_json::Value::Null) => Ok(Vec::new()),
            _ => Err(ApiError::MissingField("data")),
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

/// Turn an unexpected status into an [`ApiError`].
pub(crate) fn check_status(resp: Response, expected: &[u16]) -> ApiResult<Response> {
    if expected.contains(&resp.status) {
        return Ok(resp);
    }
    if matches!(resp.status, 401 | 403) {
        return Err(ApiError::Unauthorized {
            status: resp.status,
        });
    }
    Err(ApiError::Remote {
        status: resp.status,
        message: error_message(&resp),
    })
}

/// Server-provided error text, or a generic status line.
#[must_use]
pub fn error_message(resp: &Response) -> String {
    let from_body = resp.json().ok().and_then(|body| {
        ["msg", "message", "error_description", "error"]
            .iter()
            .find_map(|key| match body.get(*key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Object(o)) => o
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
    });
    from_body.unwrap_or_else(|| format!("HTTP {}", resp.status))
}

/// Id of a newly created resource from the `Location` header.
pub(crate) fn created_id(resp: &Response) -> ApiResult<RemoteId> {
    resp.location_id().ok_or(ApiError::MissingField("Location header"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_body() {
        let r = Response::new(400, r#"{"msg": "Invalid layer type"}"#);
        assert_eq!(error_message(&r), "Invalid layer type");

        let r = Response::new(400, r#"{"error": {"message": "bad"}}"#);
        assert_eq!(error_message(&r), "bad");

        let r = Response::new(502, "<html>");
        assert_eq!(error_message(&r), "HTTP 502");
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(Response::new(204, ""), &[204]).is_ok());
        assert!(matches!(
            check_status(Response::new(401, ""), &[200]),
            Err(ApiError::Unauthorized { status: 401 })
        ));
        let err = check_status(Response::new(500, r#"{"message":"boom"}"#), &[200]).unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "boom");
    }
}
