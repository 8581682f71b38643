//! Admin API.
//!
//! Read-only views of the running gateway behind a bearer token:
//! `/admin/status`, `/admin/sessions` and `/admin/services`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::{get_services, get_sessions, get_status};
use crate::net::ConnectionTracker;
use crate::proxy::GatewayContext;

#[derive(Clone)]
pub struct AdminState {
    pub ctx: Arc<GatewayContext>,
    pub tracker: ConnectionTracker,
    pub started: Instant,
    api_key: Arc<str>,
}

impl AdminState {
    pub fn new(ctx: Arc<GatewayContext>, tracker: ConnectionTracker, api_key: &str) -> Self {
        Self {
            ctx,
            tracker,
            started: Instant::now(),
            api_key: Arc::from(api_key),
        }
    }

    /// An empty key authorizes nothing.
    pub(crate) fn authorizes(&self, token: &str) -> bool {
        !self.api_key.is_empty() && token == &*self.api_key
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/services", get(get_services))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
