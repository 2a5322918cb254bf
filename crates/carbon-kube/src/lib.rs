//! Kubernetes adapter for the experiment driver.
//!
//! Speaks plain HTTP/1.1 to the Kubernetes API, normally through
//! `kubectl proxy`. Credential bootstrap and TLS stay outside this crate.
//!
//! # Components
//!
//! - **`manifest`**: pod template loading and per-workload rendering
//! - **`client`**: pod creation (`Orchestrator` implementation)
//! - **`watch`**: pod placement watch feeding `PlacementEvent`s

pub mod client;
pub mod error;
pub mod manifest;
pub mod watch;

pub use client::{KubeClient, KubeSettings};
pub use error::KubeError;
pub use manifest::{ManifestError, PodTemplate, parse_label_selector};
pub use watch::PlacementWatcher;
