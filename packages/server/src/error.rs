//! Error types for the thing server.

use http::StatusCode;
use thingworks_invocation::{ActionError, InvocationId};
use thingworks_portal::PortalError;
use thiserror::Error;

/// Errors that can occur in the thing server.
#[derive(Debug, Error)]
pub enum Error {
    /// No thing with this name is registered.
    #[error("thing not found: {0}")]
    ThingNotFound(String),

    /// The thing exists but has no such action.
    #[error("action not found: {thing}/{action}")]
    ActionNotFound { thing: String, action: String },

    /// A thing with this name is already registered.
    #[error("duplicate thing: {0}")]
    DuplicateThing(String),

    /// The operation needs a running server.
    #[error("server is not running")]
    NotRunning,

    /// The operation needs a stopped server.
    #[error("server is already running")]
    AlreadyRunning,

    /// The invocation completed without producing an output.
    #[error("no output available for invocation {0}")]
    NoOutput(InvocationId),

    /// A thing failed to set up during server start.
    #[error("setup of {thing} failed: {source}")]
    Setup {
        thing: String,
        #[source]
        source: ActionError,
    },

    /// A thing failed to tear down during server shutdown.
    #[error("teardown of {thing} failed: {source}")]
    Teardown {
        thing: String,
        #[source]
        source: ActionError,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An invocation or action manager error.
    #[error(transparent)]
    Invocation(#[from] thingworks_invocation::Error),

    /// A blob handle could not be resolved or read.
    #[error(transparent)]
    Blob(#[from] thingworks_blob::Error),

    /// The event loop failed.
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// JSON could not be parsed.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status a route should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        use thingworks_blob::Error as Blob;
        use thingworks_invocation::Error as Inv;

        match self {
            Error::ThingNotFound(_) | Error::ActionNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Invocation(Inv::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Blob(Blob::NotFound(_) | Blob::InvalidHref(_)) => StatusCode::NOT_FOUND,
            Error::Blob(Blob::Expired(_) | Blob::Gone(_)) => StatusCode::GONE,
            Error::Invocation(Inv::InvalidState { .. })
            | Error::DuplicateThing(_)
            | Error::AlreadyRunning => StatusCode::CONFLICT,
            // "No result is available for this invocation."
            Error::Invocation(Inv::NotReady(_) | Inv::Cancelled(_) | Inv::ActionFailed { .. })
            | Error::NoOutput(_)
            | Error::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
            Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Setup { .. }
            | Error::Teardown { .. }
            | Error::Config(_)
            | Error::Invocation(Inv::Spawn(_))
            | Error::Blob(_)
            | Error::Portal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use thingworks_blob::BlobId;

    #[test]
    fn not_found_family() {
        assert_eq!(
            Error::ThingNotFound("stage".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::from(thingworks_invocation::Error::NotFound(InvocationId::new())).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn expired_and_gone_blobs() {
        let id = BlobId::new();
        assert_eq!(
            Error::from(thingworks_blob::Error::Expired(id)).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            Error::from(thingworks_blob::Error::Gone(id)).status_code(),
            StatusCode::GONE
        );
    }

    #[test]
    fn results_not_available() {
        let id = InvocationId::new();
        assert_eq!(
            Error::from(thingworks_invocation::Error::NotReady(id)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::NoOutput(id).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn invalid_state_is_conflict() {
        let error = thingworks_invocation::Error::InvalidState {
            id: InvocationId::new(),
            state: thingworks_invocation::InvocationState::Completed,
            operation: "cancelled",
        };
        assert_eq!(Error::from(error).status_code(), StatusCode::CONFLICT);
    }
}
