//! HTTP gate that admits a request only when the token in its path is a
//! member of a Redis set, optionally capping requests per token per window.
//!
//! Requests look like `/<table>/<token>/...`. The gate answers 403 for a
//! malformed path, 404 for an unknown table, 401 for an unknown token, 429
//! once the token's quota is spent and 500 when the store cannot be reached.
//! Anything else is passed on untouched.

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod load_balancer;
pub mod metrics;
pub mod path;
pub mod rate_limit;
pub mod state;
pub mod store;
pub mod validator;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::gate::check_access_token;
use crate::handlers::{health_handler, metrics_handler, proxy_handler};
use crate::state::AppState;

pub use crate::error::{Decision, GateError, StoreError};
pub use crate::gate::TokenGate;
pub use crate::store::{MemoryStore, RedisStore, TokenStore};

// Health and metrics stay open, everything else goes through the gate
pub fn build_app(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .fallback(proxy_handler)
        .layer(axum::middleware::from_fn_with_state(
            state.gate.clone(),
            check_access_token,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(gated)
}
