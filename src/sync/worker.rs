//! Background sync worker.
//!
//! One project's [`SyncSession`] lives behind a [`SyncController`]. A
//! publish pass runs on its own thread after a short-lived credential
//! check; the periodic analysis runs on the [`AnalysisScheduler`] thread
//! and is skipped while a publish holds the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::executor::{ProgressSink, PublishOptions, SyncReport, publish};
use super::reconcile::ReconciliationResult;
use super::session::{AnalyzeOptions, SyncSession};
use super::types::{SyncError, SyncResult};
use crate::api::{ApiClient, ApiError, CredentialStatus};
use crate::host::Host;
use crate::transport::TransportError;

/// Cooperative abort flag, checked between layers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Clears the syncing flag when the publish thread ends, even on panic.
struct SyncingGuard(Arc<AtomicBool>);

impl Drop for SyncingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns one project's session and serializes the passes run against it.
pub struct SyncController {
    session: Arc<Mutex<SyncSession>>,
    host: Arc<dyn Host>,
    api: Arc<ApiClient>,
    syncing: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl SyncController {
    pub fn new(session: SyncSession, host: Arc<dyn Host>, api: Arc<ApiClient>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            host,
            api,
            syncing: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
        }
    }

    /// Whether a publish pass is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Lock the session. Blocks while a publish pass holds it.
    pub fn session(&self) -> MutexGuard<'_, SyncSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate the API key on a short-lived thread.
    #[must_use]
    pub fn check_credentials(&self) -> CredentialStatus {
        check_on_thread(Arc::clone(&self.api))
    }

    /// Run the read-only analysis now, unless a publish pass holds the
    /// session. Failures are logged and yield `None`.
    pub fn analyze(&self, opts: AnalyzeOptions) -> Option<ReconciliationResult> {
        if self.is_syncing() {
            debug!("Analysis postponed: sync in progress");
            return None;
        }
        let mut session = match self.session.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        match session.analyze(self.host.as_ref(), &self.api, opts) {
            Ok(analysis) => Some(analysis.plan.result),
            Err(e) => {
                warn!(error = %e, "Analysis failed");
                None
            }
        }
    }

    /// Start a publish pass on a background thread.
    ///
    /// The thread first checks the credentials and stops early when they
    /// are rejected or the service is unreachable.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Busy` when a pass is already running, or an I/O
    /// error if the thread cannot be spawned.
    pub fn start_publish(
        &self,
        opts: PublishOptions,
        progress: ProgressSink,
    ) -> SyncResult<SyncHandle> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Busy);
        }
        let guard = SyncingGuard(Arc::clone(&self.syncing));
        self.cancel.reset();

        let session = Arc::clone(&self.session);
        let host = Arc::clone(&self.host);
        let api = Arc::clone(&self.api);
        let cancel = self.cancel.clone();

        let thread = thread::Builder::new()
            .name("mapsync-publish".into())
            .spawn(move || -> SyncResult<SyncReport> {
                let _guard = guard;
                match check_on_thread(Arc::clone(&api)) {
                    CredentialStatus::Valid => {}
                    CredentialStatus::Rejected { status } => {
                        return Err(ApiError::Unauthorized { status }.into());
                    }
                    CredentialStatus::Unreachable => {
                        return Err(ApiError::Transport(TransportError::Connection(
                            "map service unreachable".into(),
                        ))
                        .into());
                    }
                }
                let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
                publish(&mut session, host.as_ref(), &api, &opts, &cancel, &progress)
            })?;

        Ok(SyncHandle {
            thread,
            cancel: self.cancel.clone(),
        })
    }
}

fn check_on_thread(api: Arc<ApiClient>) -> CredentialStatus {
    let spawned = thread::Builder::new()
        .name("mapsync-credentials".into())
        .spawn(move || api.check_credentials());
    match spawned.map(JoinHandle::join) {
        Ok(Ok(status)) => status,
        Ok(Err(_)) | Err(_) => CredentialStatus::Unreachable,
    }
}

/// A running publish pass.
pub struct SyncHandle {
    thread: JoinHandle<SyncResult<SyncReport>>,
    cancel: CancelToken,
}

impl SyncHandle {
    /// A token that stops this pass before its next layer, for use from a
    /// signal handler.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the pass ends.
    ///
    /// # Errors
    ///
    /// Returns the error the pass ended with.
    pub fn wait(self) -> SyncResult<SyncReport> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

enum Signal {
    TreeChanged,
    Shutdown,
}

/// Debounced periodic analysis.
///
/// Tree-change notifications are coalesced until none arrived for the
/// debounce interval; then one analysis runs and its counts are handed to
/// the callback. While a publish runs the analysis waits for it to end.
pub struct AnalysisScheduler {
    tx: Sender<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl AnalysisScheduler {
    /// Start the scheduler thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<F>(
        controller: Arc<SyncController>,
        debounce: Duration,
        on_result: F,
    ) -> SyncResult<Self>
    where
        F: Fn(ReconciliationResult) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Signal>();
        let thread = thread::Builder::new()
            .name("mapsync-analysis".into())
            .spawn(move || {
                let wait = |timeout: Duration| match rx.recv_timeout(timeout) {
                    Ok(Signal::TreeChanged) => Some(true),
                    Err(RecvTimeoutError::Timeout) => Some(false),
                    Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => None,
                };
                loop {
                    match rx.recv() {
                        Ok(Signal::TreeChanged) => {}
                        Ok(Signal::Shutdown) | Err(_) => return,
                    }
                    // Coalesce a burst of changes.
                    loop {
                        match wait(debounce) {
                            Some(true) => {}
                            Some(false) => break,
                            None => return,
                        }
                    }
                    while controller.is_syncing() {
                        if wait(debounce).is_none() {
                            return;
                        }
                    }
                    if let Some(result) = controller.analyze(AnalyzeOptions::default()) {
                        debug!(%result, "Periodic analysis");
                        on_result(result);
                    }
                }
            })?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Report that the local tree changed.
    pub fn notify(&self) {
        if self.tx.send(Signal::TreeChanged).is_err() {
            debug!("Analysis scheduler already stopped");
        }
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Signal::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Analysis thread panicked");
            }
        }
    }
}

impl Drop for AnalysisScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::MemoryHost;
    use crate::model::{GeometryClass, HostLayer, LayerTree, TreeNode};
    use crate::sync::executor::no_progress;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{Method, ProgressFn, Response, Transport};
    use std::path::Path;
    use std::sync::mpsc::Receiver;

    /// Holds every request until the gate opens.
    struct GatedTransport {
        inner: ScriptedTransport,
        gate: Mutex<Option<Receiver<()>>>,
    }

    impl GatedTransport {
        fn wait_gate(&self) {
            if let Some(rx) = self.gate.lock().unwrap().take() {
                let _ = rx.recv();
            }
        }
    }

    impl Transport for GatedTransport {
        fn request(
            &self,
            method: Method,
            path: &str,
            body: Option<&serde_json::Value>,
        ) -> Result<Response, TransportError> {
            self.wait_gate();
            self.inner.request(method, path, body)
        }

        fn upload(
            &self,
            path: &str,
            file: &Path,
            progress: Option<ProgressFn>,
        ) -> Result<Response, TransportError> {
            self.inner.upload(path, file, progress)
        }
    }

    fn host_with_layer() -> Arc<MemoryHost> {
        Arc::new(MemoryHost::new(LayerTree {
            children: vec![TreeNode::Layer(HostLayer {
                id: "wms_1".into(),
                name: "Basemap".into(),
                provider: "wms".into(),
                source: "url=https://tiles.example/wms&layers=base&crs=EPSG:3857".into(),
                geometry: Some(GeometryClass::Raster),
                crs: Some("EPSG:3857".into()),
                extent: None,
                visible: true,
                style: None,
            })],
        }))
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let copy = token.clone();
        assert!(!copy.is_cancelled());
        token.cancel();
        assert!(copy.is_cancelled());
        token.reset();
        assert!(!copy.is_cancelled());
    }

    #[test]
    fn test_rejected_credentials_stop_publish() {
        let t = Arc::new(ScriptedTransport::new());
        t.on_json(Method::Get, "users/current.json", 401, serde_json::json!({}));
        let controller = SyncController::new(
            SyncSession::default(),
            host_with_layer(),
            Arc::new(ApiClient::new(t.clone())),
        );
        assert_eq!(
            controller.check_credentials(),
            CredentialStatus::Rejected { status: 401 }
        );

        let err = controller
            .start_publish(PublishOptions::default(), no_progress())
            .unwrap()
            .wait()
            .unwrap_err();
        assert_eq!(err.error_code(), crate::error::ErrorCode::CredentialsRejected);
        assert_eq!(t.count(Method::Post, "maps.json"), 0);
        assert!(!controller.is_syncing());
    }

    #[test]
    fn test_single_publish_at_a_time() {
        let (open, gate) = mpsc::channel();
        let t = Arc::new(GatedTransport {
            inner: ScriptedTransport::new(),
            gate: Mutex::new(Some(gate)),
        });
        t.inner.on_json(Method::Get, "users/current.json", 200, serde_json::json!({}));
        let controller = SyncController::new(
            SyncSession::default(),
            host_with_layer(),
            Arc::new(ApiClient::new(t.clone())),
        );

        let handle = controller
            .start_publish(PublishOptions::default(), no_progress())
            .unwrap();
        assert!(controller.is_syncing());
        assert!(matches!(
            controller.start_publish(PublishOptions::default(), no_progress()),
            Err(SyncError::Busy)
        ));
        assert_eq!(controller.analyze(AnalyzeOptions::default()), None);

        open.send(()).unwrap();
        // No premium subscription for a private map.
        assert!(matches!(handle.wait(), Err(SyncError::PremiumRequired)));
        assert!(!controller.is_syncing());
        assert!(controller.analyze(AnalyzeOptions::default()).is_some());
    }

    #[test]
    fn test_cancel_through_handle() {
        let (open, gate) = mpsc::channel();
        let t = Arc::new(GatedTransport {
            inner: ScriptedTransport::new(),
            gate: Mutex::new(Some(gate)),
        });
        t.inner.on_json(Method::Get, "users/current.json", 200, serde_json::json!({}));
        t.inner.on(
            Method::Post,
            "maps.json",
            Response::new(201, "").with_location("https://api/1/maps/7"),
        );
        let controller = SyncController::new(
            SyncSession::default(),
            host_with_layer(),
            Arc::new(ApiClient::new(t.clone())),
        );
        let opts = PublishOptions {
            public: true,
            ..PublishOptions::default()
        };

        let handle = controller.start_publish(opts, no_progress()).unwrap();
        handle.cancel_token().cancel();
        open.send(()).unwrap();

        assert!(matches!(handle.wait(), Err(SyncError::Cancelled)));
        // The map was created; no layer was written.
        assert_eq!(controller.session().map_id, Some(7));
        assert_eq!(t.inner.count(Method::Post, "layers.json"), 0);
        assert!(!controller.is_syncing());
    }

    #[test]
    fn test_scheduler_coalesces_changes() {
        let t = Arc::new(ScriptedTransport::new());
        let controller = Arc::new(SyncController::new(
            SyncSession::default(),
            host_with_layer(),
            Arc::new(ApiClient::new(t)),
        ));
        let (tx, rx) = mpsc::channel();
        let scheduler = AnalysisScheduler::spawn(
            Arc::clone(&controller),
            Duration::from_millis(50),
            move |result| {
                let _ = tx.send(result);
            },
        )
        .unwrap();

        for _ in 0..5 {
            scheduler.notify();
        }
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.layers_new, 1);
        assert!(result.needs_update());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        scheduler.notify();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        scheduler.shutdown();
    }
}
