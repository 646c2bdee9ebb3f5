//! HTTP API for drift.
//!
//! - `GET /api/log/key` returns this node's public log key as hex.
//! - `POST /api/import` with `{"object": "<identifier>"}` starts importing an
//!   object on behalf of the caller.
//!
//! ## Authentication
//!
//! Import requires `Authorization: Bearer <token>`. Each configured token
//! maps to the user ID that becomes the owner of imported objects. The log
//! key endpoint is open.

mod error;
mod handlers;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use drift_sync::SyncNode;
use subtle::ConstantTimeEq;
use tracing::warn;

pub use error::ApiError;
pub use handlers::{ImportRequest, ImportResponse, LogKeyResponse};

/// Authenticated caller, inserted by the auth middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Requester(pub u64);

/// Shared state for all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub node: Arc<SyncNode>,
    /// Bearer token → user ID.
    pub tokens: Arc<HashMap<String, u64>>,
}

impl AppState {
    /// User ID of `token`, compared in constant time against every entry.
    fn authenticate(&self, token: &str) -> Option<u64> {
        let mut found = None;
        for (known, user) in self.tokens.iter() {
            if bool::from(known.as_bytes().ct_eq(token.as_bytes())) {
                found = Some(*user);
            }
        }
        found
    }
}

async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| state.authenticate(token.trim()));

    let Some(user) = user else {
        warn!(path = %request.uri().path(), "unauthorized request");
        return Err(ApiError::Unauthorized);
    };
    request.extensions_mut().insert(Requester(user));
    Ok(next.run(request).await)
}

/// Configuration for creating an [`ApiServer`].
pub struct ApiServerConfig {
    /// The sync pipeline to serve.
    pub node: Arc<SyncNode>,
    /// Bearer token → user ID.
    pub tokens: HashMap<String, u64>,
}

/// HTTP server backed by a [`SyncNode`].
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Create a server with the given configuration.
    pub fn new(config: ApiServerConfig) -> Self {
        if config.tokens.is_empty() {
            warn!("no API tokens configured, imports will be rejected");
        }
        let state = AppState {
            node: config.node,
            tokens: Arc::new(config.tokens),
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        let protected = Router::new()
            .route("/api/import", post(handlers::import))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ));

        Router::new()
            .route("/api/log/key", get(handlers::log_key))
            .merge(protected)
            .with_state(state)
    }

    /// Return the inner [`Router`] (useful for testing with `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve the API on `addr` until `shutdown` completes, then wait for
    /// in-flight requests.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "API server listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
