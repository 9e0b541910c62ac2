//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe each enabled backend's health endpoint
//! - Evaluate expected status and optional body substring
//! - Report outcomes into the health tracker
//!
//! # Design Decisions
//! - Probes for one service run concurrently within a batch
//! - Per-probe timeout is distinct from (and below) the probe interval
//! - Backends with `$1` template URLs cannot be resolved outside a request
//!   and are skipped

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Uri};
use futures_util::future::join_all;
use http_body_util::BodyExt;

use crate::config::schema::ActiveHealthConfig;
use crate::health::passive::HealthTracker;
use crate::proxy::HttpClient;
use crate::service::runtime::{BackendRuntime, ServiceSnapshot};

/// Issues probe batches for one service.
#[derive(Clone)]
pub struct ActiveProber {
    client: HttpClient,
}

impl std::fmt::Debug for ActiveProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveProber").finish_non_exhaustive()
    }
}

impl ActiveProber {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Probe every enabled backend of the snapshot once, concurrently.
    pub async fn run_batch(&self, snapshot: &ServiceSnapshot, tracker: &HealthTracker) {
        let hc = &snapshot.config.active_hc;
        if !hc.enabled {
            return;
        }

        let probes = snapshot
            .all_backends()
            .filter(|b| b.config.enabled && !b.config.url.as_str().contains("$1"))
            .map(|backend| {
                let backend = Arc::clone(backend);
                async move {
                    match self.probe_one(&backend, hc).await {
                        Ok(()) => tracker.record_probe_success(&backend, &snapshot.config),
                        Err(reason) => {
                            tracing::debug!(
                                backend = %backend.config.id,
                                reason = %reason,
                                "active probe failed"
                            );
                            tracker.record_probe_failure(&backend, &snapshot.config, reason);
                        }
                    }
                }
            });
        join_all(probes).await;
    }

    async fn probe_one(
        &self,
        backend: &BackendRuntime,
        hc: &ActiveHealthConfig,
    ) -> Result<(), String> {
        let url = backend
            .config
            .url
            .join(&hc.path)
            .map_err(|_| "bad_probe_url".to_string())?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|_| "bad_probe_url".to_string())?;
        let method =
            Method::from_bytes(hc.method.as_bytes()).map_err(|_| "bad_probe_method".to_string())?;

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .map_err(|_| "bad_probe_request".to_string())?;

        let response = tokio::time::timeout(
            Duration::from_secs(hc.timeout_secs),
            self.client.request(request),
        )
        .await
        .map_err(|_| "probe_timeout".to_string())?
        .map_err(|e| {
            if e.is_connect() {
                "connect_error".to_string()
            } else {
                "transport_error".to_string()
            }
        })?;

        let status = response.status().as_u16();
        if !hc.expected_status.contains(&status) {
            return Err(format!("status_{status}"));
        }

        if let Some(needle) = &hc.body_substring {
            let limited = http_body_util::Limited::new(response.into_body(), 64 * 1024);
            let bytes = limited
                .collect()
                .await
                .map(|c| c.to_bytes())
                .map_err(|_| "body_read_error".to_string())?;
            if !String::from_utf8_lossy(&bytes).contains(needle.as_str()) {
                return Err("body_mismatch".to_string());
            }
        }

        Ok(())
    }
}
