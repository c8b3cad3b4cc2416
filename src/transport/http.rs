//! `reqwest` blocking implementation of [`Transport`].

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, multipart};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION};
use tracing::{debug, trace};

use super::{Method, ProgressFn, Response, Transport, TransportError};

/// Identifies this client to the map service.
const APP_HEADER: &str = "X-GIS-CLOUD-APP";
const APP_NAME: &str = "mapsync";
const API_KEY_HEADER: &str = "API-Key";

/// Default request timeout. Uploads use [`UPLOAD_TIMEOUT`].
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Blocking HTTP client bound to an API root and key.
pub struct HttpTransport {
    client: Client,
    api_root: String,
}

impl HttpTransport {
    /// Build a transport for `host` (e.g. `https://api.giscloud.com/`).
    ///
    /// Requests go to `{host}1/{path}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid header value or the
    /// TLS backend fails to initialise.
    pub fn new(host: &str, api_key: &str) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| TransportError::Other(format!("invalid API key: {e}")))?;
        headers.insert(API_KEY_HEADER, key);
        headers.insert(APP_HEADER, HeaderValue::from_static(APP_NAME));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let mut api_root = host.trim_end_matches('/').to_string();
        api_root.push_str("/1/");

        Ok(Self { client, api_root })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path.trim_start_matches('/'))
    }

    fn finish(resp: reqwest::blocking::Response) -> Result<Response, TransportError> {
        let status = resp.status().as_u16();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().map_err(map_reqwest)?;
        trace!(status, body_len = body.len(), "Response received");
        Ok(Response {
            status,
            location,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, TransportError> {
        let url = self.url(path);
        debug!(method = method.as_str(), %url, "API request");

        let mut req = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let resp = req.send().map_err(map_reqwest)?;
        Self::finish(resp)
    }

    fn upload(
        &self,
        path: &str,
        file: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<Response, TransportError> {
        let url = self.url(path);
        let handle = File::open(file).map_err(|source| TransportError::File {
            path: file.to_path_buf(),
            source,
        })?;
        let total = handle
            .metadata()
            .map_err(|source| TransportError::File {
                path: file.to_path_buf(),
                source,
            })?
            .len();
        let file_name = file
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());

        debug!(%url, file = %file.display(), bytes = total, "Uploading archive");

        let reader = ProgressReader {
            inner: handle,
            sent: 0,
            total,
            progress,
        };
        let part = multipart::Part::reader_with_length(reader, total).file_name(file_name);
        let form = multipart::Form::new().part("upfile", part);

        let resp = self
            .client
            .post(&url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .map_err(map_reqwest)?;
        Self::finish(resp)
    }
}

/// Wraps the upload file and reports bytes as the body is streamed.
struct ProgressReader {
    inner: File,
    sent: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sent += n as u64;
        if let Some(cb) = &self.progress {
            cb(self.sent, self.total);
        }
        Ok(n)
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
