//! Admin API subsystem.
//!
//! # Data Flow
//! ```text
//! /__lb_admin__/… or /admin/… request
//!     → security::rate_limit (per-IP token bucket)
//!     → auth.rs (bearer token gate)
//!     → handlers.rs (CRUD over services/backends, metrics, sessions)
//!     → envelope.rs ({success, data, error, timestamp})
//!
//! /__lb_metrics__/{host}[/json|/html]: same gate, raw metrics document.
//! ```

pub mod auth;
pub mod envelope;
pub mod handlers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::routing::Router as ProxyRouter;
use crate::security::rate_limit::{rate_limit_middleware, RateLimiterState};

/// Shared state for the admin and metrics surfaces.
#[derive(Clone)]
pub struct AdminState {
    pub router: Arc<ProxyRouter>,
    pub api_secret: Arc<String>,
    pub rate_limiter: Arc<RateLimiterState>,
}

async fn malformed_path() -> axum::response::Response {
    envelope::error_response(StatusCode::BAD_REQUEST, "bad_request")
}

/// Build the admin surface (mounted at `/__lb_admin__` and `/admin`).
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/list", get(handlers::list_services))
        .route(
            "/services/{host}/config",
            get(handlers::get_config)
                .put(handlers::put_config)
                .patch(handlers::patch_config)
                .delete(handlers::delete_config),
        )
        .route("/services/{host}/backends", post(handlers::add_backend))
        .route(
            "/services/{host}/backends/{id}",
            axum::routing::put(handlers::update_backend).delete(handlers::remove_backend),
        )
        .route(
            "/services/{host}/backends/{id}/enable",
            post(handlers::enable_backend),
        )
        .route(
            "/services/{host}/backends/{id}/disable",
            post(handlers::disable_backend),
        )
        .route(
            "/services/{host}/backends/{id}/health/reset",
            post(handlers::reset_backend_health),
        )
        .route(
            "/services/{host}/health/check",
            post(handlers::force_health_check),
        )
        .route("/services/{host}/metrics", get(handlers::service_metrics))
        .route(
            "/services/{host}/sessions",
            get(handlers::get_sessions).delete(handlers::clear_sessions),
        )
        .fallback(malformed_path)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.rate_limiter),
            rate_limit_middleware,
        ))
        .with_state(state)
}

/// Build the metrics surface (mounted at `/__lb_metrics__`).
pub fn metrics_router(state: AdminState) -> Router {
    Router::new()
        .route("/{host}", get(handlers::metrics_surface))
        .route("/{host}/json", get(handlers::metrics_surface_json))
        .route("/{host}/html", get(handlers::metrics_surface_html))
        .fallback(malformed_path)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.rate_limiter),
            rate_limit_middleware,
        ))
        .with_state(state)
}
