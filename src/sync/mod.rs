//! Reconciliation and publishing.
//!
//! This module mirrors a local layer tree onto a remote map:
//!
//! - **Hashing**: payload fingerprints for change detection
//! - **Snapshot**: cached listing of the remote map's layers and folders
//! - **Reconcile**: pure diff of local tree against remote snapshot
//! - **Session**: explicit per-project state and the analysis pass
//! - **Executor**: the publish pass that applies a reconciliation
//! - **Worker**: background publishing, cancellation, debounced analysis
//!
//! # Architecture
//!
//! A pass always runs against one [`SyncSession`]:
//! 1. The host tree is flattened into arena form with visual orders
//! 2. The remote listing is fetched (or reused within the refresh window)
//! 3. [`reconcile`] plans creates, updates, position-only updates and deletes
//! 4. For a publish, [`publish`] applies the plan strictly in order and
//!    attaches remembered state to every written layer
//!
//! # Example
//!
//! ```ignore
//! use mapsync::sync::{AnalyzeOptions, CancelToken, PublishOptions, SyncSession, no_progress, publish};
//!
//! let mut session = SyncSession::load(&host)?;
//! let analysis = session.analyze(&host, &api, AnalyzeOptions::default())?;
//! if analysis.plan.result.needs_update() {
//!     let report = publish(&mut session, &host, &api, &PublishOptions::default(),
//!                          &CancelToken::new(), &no_progress())?;
//! }
//! ```

mod archive;
mod datasource;
mod executor;
mod hash;
mod order;
mod reconcile;
mod session;
mod snapshot;
mod types;
mod worker;

pub use archive::{Staging, UploadFile, build_archive, collect_layer_files, package_layer};
pub use datasource::{DatasourceCache, deep_matches};
pub use executor::{
    ProgressEvent, ProgressSink, PublishOptions, SyncReport, no_progress, publish, upload_percent,
};
pub use hash::{content_hash, fingerprint, has_changed};
pub use order::{Opcode, opcodes, order_changed, sorted_ids};
pub use reconcile::{
    Action, FolderRef, GroupPlan, LayerPlan, ReconcileInput, Reconciliation, ReconciliationResult,
    UpdateMode, reconcile,
};
pub use session::{
    AnalyzeOptions, Analysis, DATA_STATE_KEY, MAP_ID_KEY, MAP_NAME_KEY, SyncSession,
};
pub use snapshot::{SnapshotCache, list_storage_files};
pub use types::{CONTACT_SUPPORT, SyncError, SyncResult};
pub use worker::{AnalysisScheduler, CancelToken, SyncController, SyncHandle};
