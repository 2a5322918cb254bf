//! Pod creation against the Kubernetes API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use carbon_core::WorkloadDescriptor;
use carbon_scheduler::{BoxFuture, Orchestrator, SubmitOutcome};

use crate::error::KubeError;
use crate::manifest::{PodTemplate, parse_label_selector};
use crate::watch::PlacementWatcher;

/// Connection settings for the API server.
#[derive(Debug, Clone)]
pub struct KubeSettings {
    /// Base URL, e.g. `http://127.0.0.1:8001` for `kubectl proxy` or
    /// `https://kubernetes.default.svc` from inside the cluster.
    pub api_url: String,
    pub namespace: String,
    /// Equality selector stamped on created pods and used by the watch.
    pub label_selector: String,
    /// Sent as `Authorization: Bearer` when present.
    pub token: Option<String>,
    /// PEM bundle trusted for `https://` instead of the web PKI roots.
    pub ca_file: Option<PathBuf>,
}

/// Shared request plumbing for pod creation and the placement watch.
#[derive(Clone)]
pub(crate) struct ApiClient {
    base: String,
    namespace: String,
    token: Option<String>,
    http: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

/// Root store holding every certificate in a PEM bundle.
fn load_roots(path: &Path) -> Result<rustls::RootCertStore, KubeError> {
    let pem = std::fs::read(path)
        .map_err(|e| KubeError::Tls(format!("reading {}: {e}", path.display())))?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| KubeError::Tls(format!("{}: {e}", path.display())))?;
        roots
            .add(cert)
            .map_err(|e| KubeError::Tls(format!("{}: {e}", path.display())))?;
    }
    if roots.is_empty() {
        return Err(KubeError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(roots)
}

fn connector(ca_file: Option<&Path>) -> Result<HttpsConnector<HttpConnector>, KubeError> {
    let builder = match ca_file {
        Some(path) => HttpsConnectorBuilder::new().with_tls_config(
            rustls::ClientConfig::builder()
                .with_root_certificates(load_roots(path)?)
                .with_no_client_auth(),
        ),
        None => HttpsConnectorBuilder::new().with_webpki_roots(),
    };
    Ok(builder.https_or_http().enable_http1().build())
}

impl ApiClient {
    fn new(settings: &KubeSettings) -> Result<Self, KubeError> {
        let uri: http::Uri = settings
            .api_url
            .parse()
            .map_err(|e| KubeError::InvalidUrl(format!("{}: {e}", settings.api_url)))?;
        let scheme = match uri.scheme_str() {
            Some(scheme @ ("http" | "https")) => scheme,
            _ => {
                return Err(KubeError::InvalidUrl(format!(
                    "{}: expected an http:// or https:// URL",
                    settings.api_url
                )));
            }
        };
        let authority = uri
            .authority()
            .ok_or_else(|| KubeError::InvalidUrl(format!("{}: missing host", settings.api_url)))?;
        let prefix = uri.path().trim_end_matches('/');

        Ok(Self {
            base: format!("{scheme}://{authority}{prefix}"),
            namespace: settings.namespace.clone(),
            token: settings.token.clone(),
            http: Client::builder(TokioExecutor::new())
                .build(connector(settings.ca_file.as_deref())?),
        })
    }

    pub(crate) fn pods_path(&self) -> String {
        format!("/api/v1/namespaces/{}/pods", self.namespace)
    }

    pub(crate) async fn send(
        &self,
        method: http::Method,
        path_and_query: &str,
        body: Bytes,
    ) -> Result<http::Response<hyper::body::Incoming>, KubeError> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(format!("{}{path_and_query}", self.base))
            .header("accept", "application/json")
            .header("user-agent", "carbond/0.1");
        if !body.is_empty() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = builder
            .body(Full::new(body))
            .map_err(|e| KubeError::Transport(e.to_string()))?;

        self.http
            .request(req)
            .await
            .map_err(|e| KubeError::Transport(e.to_string()))
    }
}

/// Turn a non-success response into a `KubeError::Status`, preferring the
/// `message` field of a Kubernetes `Status` body.
pub(crate) async fn status_error(resp: http::Response<hyper::body::Incoming>) -> KubeError {
    let status = resp.status().as_u16();
    let body = match resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return KubeError::Status {
                status,
                message: format!("unreadable body: {e}"),
            };
        }
    };
    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(&body).chars().take(200).collect());
    KubeError::Status { status, message }
}

/// Creates one pod per workload from a template.
pub struct KubeClient {
    api: ApiClient,
    template: PodTemplate,
    labels: Vec<(String, String)>,
    label_selector: String,
}

impl KubeClient {
    pub fn new(settings: &KubeSettings, template: PodTemplate) -> Result<Self, KubeError> {
        Ok(Self {
            api: ApiClient::new(settings)?,
            template,
            labels: parse_label_selector(&settings.label_selector),
            label_selector: settings.label_selector.clone(),
        })
    }

    /// A watcher on the same API server, namespace and selector.
    pub fn watcher(&self, retry: Duration) -> PlacementWatcher {
        PlacementWatcher::new(self.api.clone(), self.label_selector.clone(), retry)
    }

    pub async fn create_pod(&self, workload: &WorkloadDescriptor) -> Result<(), KubeError> {
        let manifest = self.template.render(workload, &self.labels)?;
        let body = serde_json::to_vec(&manifest)
            .map_err(|e| KubeError::Transport(format!("encoding pod manifest: {e}")))?;

        let resp = self
            .api
            .send(http::Method::POST, &self.api.pods_path(), Bytes::from(body))
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        debug!(workload = %workload.name, namespace = %self.api.namespace, "pod created");
        Ok(())
    }
}

impl Orchestrator for KubeClient {
    fn submit<'a>(&'a self, workload: &'a WorkloadDescriptor) -> BoxFuture<'a, SubmitOutcome> {
        Box::pin(async move {
            match self.create_pod(workload).await {
                Ok(()) => SubmitOutcome::Accepted,
                Err(e) => SubmitOutcome::Rejected {
                    reason: e.to_string(),
                },
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use carbon_core::PlacementHint;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const TEMPLATE: &str = r#"{
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {},
        "spec": { "containers": [{ "name": "stress", "image": "busybox" }] }
    }"#;

    /// Read one HTTP request (headers plus `content-length` body).
    pub(crate) async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8(raw).unwrap()
    }

    /// Answer a single request and hand back what was received.
    async fn capture_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(resp.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            let _ = tx.send(request);
        });
        (format!("http://{addr}"), rx)
    }

    fn settings(api_url: &str, token: Option<&str>) -> KubeSettings {
        KubeSettings {
            api_url: api_url.to_string(),
            namespace: "default".into(),
            label_selector: "app=carbon-aware".into(),
            token: token.map(str::to_string),
            ca_file: None,
        }
    }

    fn client(api_url: &str, token: Option<&str>) -> KubeClient {
        let template = PodTemplate::from_json(TEMPLATE, "EXEC_TIME").unwrap();
        KubeClient::new(&settings(api_url, token), template).unwrap()
    }

    fn workload() -> WorkloadDescriptor {
        WorkloadDescriptor {
            name: "carbon-aware-1f2e".into(),
            exec_time_secs: 25,
            hint: Some(PlacementHint {
                node: "vm3".into(),
                weight: 100,
            }),
        }
    }

    #[test]
    fn rejects_unsupported_urls() {
        let template = PodTemplate::from_json(TEMPLATE, "EXEC_TIME").unwrap();
        for url in ["ftp://10.0.0.1", "not a url", "/relative"] {
            assert!(matches!(
                KubeClient::new(&settings(url, None), template.clone()),
                Err(KubeError::InvalidUrl(_))
            ));
        }
    }

    #[test]
    fn accepts_https_api_servers() {
        let template = PodTemplate::from_json(TEMPLATE, "EXEC_TIME").unwrap();
        let client =
            KubeClient::new(&settings("https://10.0.0.1:6443/", None), template).unwrap();
        assert_eq!(client.api.base, "https://10.0.0.1:6443");
    }

    #[test]
    fn cluster_ca_bundle_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let ca = rcgen::generate_simple_self_signed(vec!["kubernetes.default.svc".into()])
            .unwrap()
            .cert
            .pem();
        let ca_path = dir.path().join("ca.crt");
        std::fs::write(&ca_path, ca).unwrap();

        let template = PodTemplate::from_json(TEMPLATE, "EXEC_TIME").unwrap();
        let mut with_ca = settings("https://kubernetes.default.svc", None);
        with_ca.ca_file = Some(ca_path);
        assert!(KubeClient::new(&with_ca, template.clone()).is_ok());

        let junk_path = dir.path().join("junk.crt");
        std::fs::write(&junk_path, "not a certificate").unwrap();
        with_ca.ca_file = Some(junk_path);
        assert!(matches!(
            KubeClient::new(&with_ca, template.clone()),
            Err(KubeError::Tls(_))
        ));

        with_ca.ca_file = Some(dir.path().join("missing.crt"));
        assert!(matches!(KubeClient::new(&with_ca, template), Err(KubeError::Tls(_))));
    }

    #[tokio::test]
    async fn posts_rendered_pod() {
        let (url, request) = capture_once("201 Created", "{}").await;
        let client = client(&url, Some("s3cret"));

        let outcome = client.submit(&workload()).await;
        assert!(outcome.is_accepted());

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /api/v1/namespaces/default/pods HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer s3cret"));

        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let pod: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(pod["metadata"]["name"], "carbon-aware-1f2e");
        assert_eq!(pod["metadata"]["labels"]["app"], "carbon-aware");
        assert_eq!(pod["spec"]["containers"][0]["env"][0]["value"], "25");
        assert_eq!(
            pod["spec"]["affinity"]["nodeAffinity"]["preferredDuringSchedulingIgnoredDuringExecution"]
                [0]["preference"]["matchExpressions"][0]["values"][0],
            "vm3"
        );
    }

    #[tokio::test]
    async fn api_rejection_carries_status_message() {
        let (url, _request) = capture_once(
            "403 Forbidden",
            r#"{"kind":"Status","message":"pods is forbidden: quota exceeded","code":403}"#,
        )
        .await;
        let client = client(&url, None);

        match client.submit(&workload()).await {
            SubmitOutcome::Rejected { reason } => {
                assert!(reason.contains("403"), "{reason}");
                assert!(reason.contains("quota exceeded"), "{reason}");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_api_is_a_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&format!("http://{addr}"), None);
        let err = client.create_pod(&workload()).await.unwrap_err();
        assert!(matches!(err, KubeError::Transport(_)));
        assert!(!client.submit(&workload()).await.is_accepted());
    }
}
