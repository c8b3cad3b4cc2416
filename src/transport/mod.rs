//! HTTP transport seam.
//!
//! The sync engine never talks to `reqwest` directly. Every request goes
//! through the [`Transport`] trait so tests can script responses and the
//! worker can be exercised without a network.

pub mod http;

#[cfg(test)]
pub mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub use http::HttpTransport;

/// Upload progress callback: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// HTTP verbs used by the map service API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A received response. Non-2xx statuses are not errors at this level.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    /// Value of the `Location` header, when the server sent one.
    pub location: Option<String>,
    pub body: String,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            location: None,
            body: body.into(),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Trailing numeric id of the `Location` header, e.g. `.../layers/42`.
    #[must_use]
    pub fn location_id(&self) -> Option<i64> {
        self.location
            .as_deref()?
            .trim_end_matches('/')
            .rsplit('/')
            .next()?
            .trim_end_matches(".json")
            .parse()
            .ok()
    }
}

/// Failures below the HTTP status line: nothing usable came back.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("could not read upload file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Other(String),
}

/// Blocking request/response channel to the map service.
///
/// `path` is relative to the API root; the implementation owns the base
/// URL and authentication headers.
pub trait Transport: Send + Sync {
    /// Send a request with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when no response was received.
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, TransportError>;

    /// Upload a file as multipart field `upfile`, reporting progress.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the file cannot be read or no
    /// response was received.
    fn upload(
        &self,
        path: &str,
        file: &std::path::Path,
        progress: Option<ProgressFn>,
    ) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, TransportError> {
        (**self).request(method, path, body)
    }

    fn upload(
        &self,
        path: &str,
        file: &std::path::Path,
        progress: Option<ProgressFn>,
    ) -> Result<Response, TransportError> {
        (**self).upload(path, file, progress)
    }
}
