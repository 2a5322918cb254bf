//! Intensity provider abstraction.

use std::future::Future;
use std::pin::Pin;

use carbon_core::IntensitySnapshot;

use crate::error::SignalError;

/// Boxed future alias for provider results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source of per-region carbon intensity.
pub trait IntensityProvider: Send + Sync {
    /// Fetch the current intensity for `regions`.
    ///
    /// An empty slice asks for every region the provider knows. Regions the
    /// provider does not report are absent from the snapshot rather than
    /// being an error.
    fn fetch<'a>(
        &'a self,
        regions: &'a [String],
    ) -> BoxFuture<'a, Result<IntensitySnapshot, SignalError>>;
}

/// Provider returning a fixed snapshot on every fetch.
#[derive(Debug, Clone)]
pub struct StaticIntensityProvider {
    snapshot: IntensitySnapshot,
}

impl StaticIntensityProvider {
    pub fn new(snapshot: IntensitySnapshot) -> Self {
        Self { snapshot }
    }
}

impl IntensityProvider for StaticIntensityProvider {
    fn fetch<'a>(
        &'a self,
        regions: &'a [String],
    ) -> BoxFuture<'a, Result<IntensitySnapshot, SignalError>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot.clone();
            if !regions.is_empty() {
                snapshot.retain_regions(regions);
            }
            Ok(snapshot)
        })
    }
}
