//! Front door: one axum server for data plane, admin and metrics.
//!
//! Path dispatch happens here: `/__lb_admin__` and `/admin` go to the admin
//! API, `/__lb_metrics__` to the metrics surface, everything else resolves
//! a service by Host header and proxies.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::admin::{self, AdminState};
use crate::config::loader::BootConfig;
use crate::routing::Router as ProxyRouter;
use crate::security::rate_limit::RateLimiterState;

/// Shared state for the proxy fallback.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
}

/// The assembled HTTP front door.
pub struct ProxyServer {
    router: Arc<ProxyRouter>,
    admin: AdminState,
}

impl ProxyServer {
    pub fn new(router: Arc<ProxyRouter>, boot: &BootConfig) -> Self {
        let admin = AdminState {
            router: Arc::clone(&router),
            api_secret: Arc::new(boot.admin.api_secret.clone()),
            rate_limiter: Arc::new(RateLimiterState::new(
                boot.admin.rate_limit_per_minute,
                boot.admin.rate_limit_burst,
            )),
        };
        Self { router, admin }
    }

    /// Build the axum application.
    pub fn app(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(AppState {
                router: Arc::clone(&self.router),
            })
            .nest("/__lb_admin__", admin::admin_router(self.admin.clone()))
            .nest("/admin", admin::admin_router(self.admin.clone()))
            .nest("/__lb_metrics__", admin::metrics_router(self.admin.clone()))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until shutdown; in-flight requests drain gracefully.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "http server starting");

        axum::serve(
            listener,
            self.app()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("http server initiating graceful shutdown");
        })
        .await?;

        tracing::info!("http server stopped");
        Ok(())
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    // HTTP/2 carries the host in :authority; HTTP/1.1 in the Host header.
    let host = request
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get("host")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    match state.router.resolve(&host) {
        Some((instance, wildcard_label)) => {
            instance.handle(request, client_addr, wildcard_label).await
        }
        None => {
            tracing::warn!(host = %host, "no service configured for host");
            (
                StatusCode::BAD_GATEWAY,
                "no backend service configured\n",
            )
                .into_response()
        }
    }
}
