//! Intensity snapshot fetcher.
//!
//! Retrieves the current carbon intensity of every region known to an
//! external provider. Failures are never defaulted: every error reaches the
//! caller as a [`SignalError`].
//!
//! # Components
//!
//! - **`provider`**: `IntensityProvider` trait, static provider
//! - **`fetcher`**: HTTP/JSON provider built on the hyper client

pub mod error;
pub mod fetcher;
pub mod provider;

pub use error::SignalError;
pub use fetcher::{HttpIntensityProvider, parse_snapshot};
pub use provider::{BoxFuture, IntensityProvider, StaticIntensityProvider};
