//! Connector error types.

use thiserror::Error;

/// Boxed transport failure, so fake transports can report their own errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the ArcGIS connector.
///
/// Every variant is terminal: nothing at this layer retries, the caller owns
/// retry and backoff policy.
#[derive(Debug, Error)]
pub enum ArcGisError {
    /// Malformed identifier or invalid arguments to a fetch operation
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What was wrong with the input
        reason: String,
    },

    /// Upstream answered with a non-success status
    #[error("{url} ({status}) : {body}")]
    DataDownload {
        /// The request URL
        url: String,
        /// HTTP status code returned
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Upstream answered 200 but the payload is missing data or inconsistent
    #[error("invalid response: {reason}")]
    Response {
        /// Description of the structural problem
        reason: String,
    },

    /// The service revision is older than the supported baseline
    #[error("unsupported ArcGIS version {version}, must be >= {minimum}")]
    UnsupportedVersion {
        /// Revision reported by the service
        version: f64,
        /// Minimum supported revision
        minimum: f64,
    },

    /// The request never produced a response (connect, TLS or body read failure)
    #[error("request to {url} failed: {source}")]
    Transport {
        /// The request URL
        url: String,
        /// The underlying error
        #[source]
        source: BoxError,
    },

    /// The HTTP client could not be built
    #[error("failed to create HTTP client: {0}")]
    ClientSetup(#[source] reqwest::Error),
}

impl ArcGisError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_key(key: &str) -> Self {
        Self::response(format!("missing data: '{key}'"))
    }
}

pub type Result<T, E = ArcGisError> = std::result::Result<T, E>;
