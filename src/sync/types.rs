//! Error type for sync passes.

use thiserror::Error;

use crate::api::ApiError;
use crate::error::ErrorCode;
use crate::host::HostError;

/// Shown when a failure cannot be attributed to a layer or server message.
pub const CONTACT_SUPPORT: &str =
    "Something went wrong while publishing. If the problem persists, please contact support.";

/// Errors raised while analysing or publishing a project.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// A local file could not be staged or packaged.
    #[error("could not package upload: {0}")]
    Archive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Publishing one layer failed; later layers were not attempted.
    #[error("layer \"{layer}\": {source}")]
    LayerFailed {
        layer: String,
        #[source]
        source: Box<SyncError>,
    },

    /// The persisted map no longer exists remotely.
    #[error("The map to update no longer exists")]
    NoMapToUpdate,

    /// A new map would be created with no layers.
    #[error("There are no layers to publish")]
    NothingToPublish,

    /// Private maps need a premium subscription.
    #[error("Private maps require a premium subscription")]
    PremiumRequired,

    /// Another publish pass is running for the project.
    #[error("A sync is already running for this project")]
    Busy,

    #[error("Sync was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Wrap an error with the layer it happened on.
    #[must_use]
    pub fn in_layer(self, layer: &str) -> Self {
        match self {
            Self::LayerFailed { .. } | Self::Cancelled => self,
            other => Self::LayerFailed {
                layer: layer.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Name of the failing layer, when known.
    #[must_use]
    pub fn layer(&self) -> Option<&str> {
        match self {
            Self::LayerFailed { layer, .. } => Some(layer),
            _ => None,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Api(ApiError::Transport(_)) => ErrorCode::ConnectionError,
            Self::Api(ApiError::Unauthorized { .. }) => ErrorCode::CredentialsRejected,
            Self::Api(_) => ErrorCode::RemoteError,
            Self::Host(HostError::NotFound(_)) => ErrorCode::ProjectNotFound,
            Self::Host(HostError::Storage(_)) => ErrorCode::DatabaseError,
            Self::Host(_) => ErrorCode::InvalidProject,
            Self::Io(_) => ErrorCode::IoError,
            Self::LayerFailed { source, .. } => source.error_code(),
            Self::Archive(_) => ErrorCode::SyncError,
            Self::NoMapToUpdate => ErrorCode::NoMapToUpdate,
            Self::NothingToPublish => ErrorCode::NothingToPublish,
            Self::PremiumRequired => ErrorCode::PremiumRequired,
            Self::Busy => ErrorCode::Busy,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NoMapToUpdate => Some(
                "The map was deleted or is no longer shared with you. \
                 Run `mapsync publish --new` to publish it as a new map."
                    .to_string(),
            ),
            Self::NothingToPublish => Some(
                "Mark some layers visible, or publish with `--all` to include hidden layers."
                    .to_string(),
            ),
            Self::PremiumRequired => Some(
                "Publish with `--public`, or upgrade to a premium subscription.".to_string(),
            ),
            Self::Busy => Some("Wait for the running sync to finish or cancel it.".to_string()),
            Self::LayerFailed { .. } => Some(
                "Fix the layer and publish again. Layers before it were already published."
                    .to_string(),
            ),
            Self::Api(ApiError::Transport(_)) => Some(
                "It looks like you are not connected to the internet. \
                 Check your connection and try again."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Message for the user: names the failing layer when known and
    /// otherwise falls back to a contact-support sentence.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::LayerFailed { layer, source } => match source.server_message() {
                Some(msg) => format!("Layer \"{layer}\" could not be published: {msg}"),
                None => format!("Layer \"{layer}\" could not be published. {CONTACT_SUPPORT}"),
            },
            Self::NoMapToUpdate
            | Self::NothingToPublish
            | Self::PremiumRequired
            | Self::Busy
            | Self::Cancelled => self.to_string(),
            _ => self.server_message().unwrap_or_else(|| CONTACT_SUPPORT.to_string()),
        }
    }

    /// Specific, user-readable cause, if one is known.
    fn server_message(&self) -> Option<String> {
        match self {
            Self::Api(ApiError::Remote { message, .. }) if !message.starts_with("HTTP ") => {
                Some(message.clone())
            }
            Self::Api(ApiError::Unauthorized { .. }) => {
                Some("your API key was rejected, please log in again".to_string())
            }
            Self::Api(ApiError::Transport(_)) => {
                Some("the map service could not be reached".to_string())
            }
            Self::Host(HostError::Export(msg)) => Some(msg.clone()),
            Self::LayerFailed { source, .. } => source.server_message(),
            _ => None,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
