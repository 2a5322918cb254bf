//! Pod placement watch.
//!
//! Streams `GET .../pods?watch=true&labelSelector=...` and turns the
//! newline-delimited watch events into [`PlacementEvent`]s. An event is
//! emitted when a pod first gets a `spec.nodeName`, or when that node
//! changes. The stream is reopened after `retry` whenever it ends or fails.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use carbon_core::PlacementEvent;

use crate::client::{ApiClient, status_error};
use crate::error::KubeError;

/// One decoded watch line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WatchUpdate {
    /// Pod is bound to a node.
    Bound { pod: String, node: String },
    /// Pod exists but is not scheduled yet.
    Unbound { pod: String },
    Deleted { pod: String },
    /// The server ended the watch with an error object (e.g. 410 Gone).
    Failed { code: u16, message: String },
    /// Bookmarks and anything else without placement meaning.
    Other,
}

pub(crate) fn parse_watch_line(line: &[u8]) -> Result<WatchUpdate, KubeError> {
    let event: Value =
        serde_json::from_slice(line).map_err(|e| KubeError::WatchEvent(e.to_string()))?;
    let kind = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| KubeError::WatchEvent("missing event type".into()))?;
    let object = event
        .get("object")
        .ok_or_else(|| KubeError::WatchEvent("missing event object".into()))?;

    if kind == "ERROR" {
        let code = object
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("watch error")
            .to_string();
        return Ok(WatchUpdate::Failed { code, message });
    }

    let pod = || {
        object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| KubeError::WatchEvent(format!("{kind} event without pod name")))
    };

    Ok(match kind {
        "ADDED" | "MODIFIED" => {
            let pod = pod()?;
            match object.pointer("/spec/nodeName").and_then(Value::as_str) {
                Some(node) if !node.is_empty() => WatchUpdate::Bound {
                    pod,
                    node: node.to_string(),
                },
                _ => WatchUpdate::Unbound { pod },
            }
        }
        "DELETED" => WatchUpdate::Deleted { pod: pod()? },
        _ => WatchUpdate::Other,
    })
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}

pub struct PlacementWatcher {
    api: ApiClient,
    label_selector: String,
    retry: Duration,
    /// Last node reported per pod, so re-lists after a reconnect stay quiet.
    placed: HashMap<String, String>,
}

impl PlacementWatcher {
    pub(crate) fn new(api: ApiClient, label_selector: String, retry: Duration) -> Self {
        Self {
            api,
            label_selector,
            retry,
            placed: HashMap::new(),
        }
    }

    /// Watch until shutdown fires or the event receiver goes away.
    pub async fn run(
        mut self,
        events: mpsc::Sender<PlacementEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let retry = self.retry;
        info!(selector = %self.label_selector, "placement watch started");

        loop {
            tokio::select! {
                result = self.stream(&events) => match result {
                    Ok(()) => debug!("placement watch stream ended"),
                    Err(e) => warn!(error = %e, ?retry, "placement watch interrupted"),
                },
                _ = shutdown.changed() => break,
            }

            if events.is_closed() {
                debug!("placement event receiver dropped");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(tracked = self.placed.len(), "placement watch stopped");
    }

    async fn stream(&mut self, events: &mpsc::Sender<PlacementEvent>) -> Result<(), KubeError> {
        let path = format!(
            "{}?watch=true&labelSelector={}",
            self.api.pods_path(),
            encode_query_value(&self.label_selector)
        );
        let resp = self.api.send(http::Method::GET, &path, Bytes::new()).await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let mut body = resp.into_body();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| KubeError::Transport(e.to_string()))?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            pending.extend_from_slice(&data);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let Some(event) = self.handle_line(&line)? else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &[u8]) -> Result<Option<PlacementEvent>, KubeError> {
        if line.trim_ascii().is_empty() {
            return Ok(None);
        }
        match parse_watch_line(line) {
            Ok(update) => self.observe(update),
            Err(e) => {
                warn!(error = %e, "skipping watch event");
                Ok(None)
            }
        }
    }

    fn observe(&mut self, update: WatchUpdate) -> Result<Option<PlacementEvent>, KubeError> {
        match update {
            WatchUpdate::Bound { pod, node } => {
                if self.placed.get(&pod) == Some(&node) {
                    return Ok(None);
                }
                self.placed.insert(pod.clone(), node.clone());
                Ok(Some(PlacementEvent {
                    workload: pod,
                    node,
                }))
            }
            WatchUpdate::Deleted { pod } => {
                self.placed.remove(&pod);
                Ok(None)
            }
            WatchUpdate::Failed { code, message } => Err(KubeError::Status {
                status: code,
                message,
            }),
            WatchUpdate::Unbound { .. } | WatchUpdate::Other => Ok(None),
        }
    }
}
