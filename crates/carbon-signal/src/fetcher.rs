//! HTTP/JSON intensity provider.
//!
//! Issues `GET <url>` over plain HTTP or TLS (web PKI roots) and expects a flat JSON object mapping region ids to
//! intensity values, e.g. `{"DE": 412.5, "NL": 301.0}`. No retry and no
//! timeout: a failed fetch surfaces as a [`SignalError`] and the caller
//! skips the cycle.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use carbon_core::IntensitySnapshot;

use crate::error::SignalError;
use crate::provider::{BoxFuture, IntensityProvider};

/// Fetches snapshots from an `http://` or `https://` endpoint.
pub struct HttpIntensityProvider {
    url: String,
    uri: http::Uri,
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
}

impl HttpIntensityProvider {
    pub fn new(url: &str) -> Result<Self, SignalError> {
        let uri: http::Uri = url.parse().map_err(|e| SignalError::Unreachable {
            url: url.to_string(),
            reason: format!("invalid url: {e}"),
        })?;
        if !matches!(uri.scheme_str(), Some("http" | "https")) {
            return Err(SignalError::Unreachable {
                url: url.to_string(),
                reason: "expected an http:// or https:// endpoint".to_string(),
            });
        }

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Ok(Self {
            url: url.to_string(),
            uri,
            client: Client::builder(TokioExecutor::new()).build(connector),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_all(&self) -> Result<IntensitySnapshot, SignalError> {
        let unreachable = |reason: String| SignalError::Unreachable {
            url: self.url.clone(),
            reason,
        };

        let req = http::Request::builder()
            .method("GET")
            .uri(self.uri.clone())
            .header("accept", "application/json")
            .header("user-agent", "carbond/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| unreachable(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SignalError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| unreachable(e.to_string()))?
            .to_bytes();

        let snapshot = parse_snapshot(&body)?;
        debug!(url = %self.url, regions = snapshot.len(), "intensity snapshot fetched");
        Ok(snapshot)
    }
}

impl IntensityProvider for HttpIntensityProvider {
    fn fetch<'a>(
        &'a self,
        regions: &'a [String],
    ) -> BoxFuture<'a, Result<IntensitySnapshot, SignalError>> {
        Box::pin(async move {
            let mut snapshot = self.fetch_all().await?;
            if !regions.is_empty() {
                snapshot.retain_regions(regions);
            }
            Ok(snapshot)
        })
    }
}

/// Parse a `{"region": intensity, ...}` payload.
///
/// Rejects anything that is not an object of non-negative numbers.
pub fn parse_snapshot(body: &[u8]) -> Result<IntensitySnapshot, SignalError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| SignalError::Malformed(e.to_string()))?;

    let object = value.as_object().ok_or_else(|| {
        SignalError::Malformed("expected a JSON object of region to intensity".to_string())
    })?;

    let mut snapshot = IntensitySnapshot::new();
    for (region, raw) in object {
        let intensity = raw.as_f64().ok_or_else(|| {
            SignalError::Malformed(format!("intensity for {region} is not a number: {raw}"))
        })?;
        if !intensity.is_finite() || intensity < 0.0 {
            return Err(SignalError::Malformed(format!(
                "intensity for {region} must be non-negative, got {intensity}"
            )));
        }
        snapshot.insert(region.clone(), intensity);
    }
    Ok(snapshot)
}
