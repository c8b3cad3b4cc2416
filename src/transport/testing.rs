//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use super::{Method, ProgressFn, Response, Transport, TransportError};

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Bytes of the uploaded file, for uploads.
    pub upload: Option<Vec<u8>>,
}

enum Reply {
    Ok(Response),
    Fail,
}

struct Route {
    method: Method,
    path: String,
    replies: VecDeque<Reply>,
}

/// Answers requests from a script keyed by method and exact path.
///
/// Replies for a route are consumed in order; the last one repeats.
/// Unscripted requests get a 404 with an empty body.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, path: &str, response: Response) -> &Self {
        self.push(method, path, Reply::Ok(response));
        self
    }

    pub fn on_json(&self, method: Method, path: &str, status: u16, body: serde_json::Value) -> &Self {
        self.on(method, path, Response::new(status, body.to_string()))
    }

    /// Script a connection failure.
    pub fn fail(&self, method: Method, path: &str) -> &Self {
        self.push(method, path, Reply::Fail);
        self
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter_mut().find(|r| r.method == method && r.path == path) {
            route.replies.push_back(reply);
        } else {
            routes.push(Route {
                method,
                path: path.to_string(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    fn answer(&self, method: Method, path: &str) -> Result<Response, TransportError> {
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|r| r.method == method && r.path == path) else {
            return Ok(Response::new(404, ""));
        };
        let reply = if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().map(|r| match r {
                Reply::Ok(resp) => Reply::Ok(resp.clone()),
                Reply::Fail => Reply::Fail,
            })
        };
        match reply {
            Some(Reply::Ok(resp)) => Ok(resp),
            Some(Reply::Fail) => Err(TransportError::Connection("scripted failure".into())),
            None => Ok(Response::new(404, "")),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls matching `method`, in order.
    pub fn calls_with(&self, method: Method) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, TransportError> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            body: body.cloned(),
            upload: None,
        });
        self.answer(method, path)
    }

    fn upload(
        &self,
        path: &str,
        file: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<Response, TransportError> {
        let bytes = std::fs::read(file).map_err(|source| TransportError::File {
            path: file.to_path_buf(),
            source,
        })?;
        if let Some(cb) = progress {
            let total = bytes.len() as u64;
            cb(total / 2, total);
            cb(total, total);
        }
        self.calls.lock().unwrap().push(Call {
            method: Method::Post,
            path: path.to_string(),
            body: None,
            upload: Some(bytes),
        });
        self.answer(Method::Post, path)
    }
}
