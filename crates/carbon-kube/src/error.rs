//! Kubernetes adapter error types.

use thiserror::Error;

use crate::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("invalid API url: {0}")]
    InvalidUrl(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed watch event: {0}")]
    WatchEvent(String),
}
