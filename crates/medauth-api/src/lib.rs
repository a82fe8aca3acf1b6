//! medauth API - HTTP middleware around the auth services
//!
//! No routes live here. A host router mounts its own handlers and wraps them
//! with the layers from this crate:
//! - [`csrf`]: double-submit cookie guard
//! - [`auth`]: bearer token authentication and admin gate
//! - [`rate_limit`]: per-client `{max_calls, window}` limits
//! - [`headers`]: security headers and request ids
//! - [`error`]: JSON error bodies and status mapping

pub mod auth;
pub mod context;
pub mod csrf;
pub mod error;
pub mod headers;
pub mod rate_limit;

pub use auth::{require_admin, require_auth, AuthenticatedUser};
pub use context::{client_context, resolve_client_ip};
pub use csrf::{csrf_middleware, CsrfConfig};
pub use error::{ApiError, AppError};
pub use rate_limit::{with_rate_limit, RateLimiter};

use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Wrap `router` with the layers every browser-facing route needs.
///
/// Outermost first: request tracing, request id, security headers, CSRF.
pub fn secure_router<S>(router: Router<S>, csrf: CsrfConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(middleware::from_fn_with_state(
            Arc::new(csrf),
            csrf_middleware,
        ))
        .layer(middleware::from_fn(headers::security_headers_middleware))
        .layer(middleware::from_fn(headers::request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
