//! Bearer-token gate for the admin and metrics surfaces.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::envelope;
use crate::admin::AdminState;

/// Reject requests without `Authorization: Bearer <admin-secret>`.
///
/// An empty configured secret disables the surface entirely.
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = !state.api_secret.is_empty()
        && request
            .headers()
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .map(|v| v == format!("Bearer {}", state.api_secret))
            .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        envelope::error_response(StatusCode::UNAUTHORIZED, "unauthorized")
    }
}
