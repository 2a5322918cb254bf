//! Signal provider error types.

use thiserror::Error;

/// The signal provider could not produce a trustworthy snapshot.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal unavailable: provider unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("signal unavailable: provider at {url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("signal unavailable: malformed payload: {0}")]
    Malformed(String),
}
