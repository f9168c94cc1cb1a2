//! Error types for the streaming engine

use thiserror::Error;

/// Main error type for the engine
///
/// The variant determines how a failed tile load is treated: network and
/// HTTP failures are retryable (`FailedTemporarily`), everything else is
/// terminal (`Failed`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("HTTP status {status} for {url}")]
    Http { status: u16, url: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing external dependency: {0}")]
    MissingDependency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this failure is an authorization failure (HTTP 401)
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Http { status: 401, .. })
    }

    /// HTTP status carried by this error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a tile failing with this error may succeed on retry
    ///
    /// Network and HTTP failures are transient; parse, decode, and
    /// validation failures are deterministic and terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Http { .. })
    }
}

/// Where a tileset-level load failure originated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadErrorOrigin {
    /// The tileset JSON itself (root or external) failed to load
    TilesetJson,
    /// The asset-service endpoint request failed
    AssetEndpoint,
    /// A raster overlay failed to load
    RasterOverlay,
}

/// Details handed to the user's load-error callback, once per failing request
#[derive(Debug)]
pub struct LoadFailureDetails {
    pub origin: LoadErrorOrigin,
    pub url: String,
    pub status_code: u16,
    pub message: String,
}
