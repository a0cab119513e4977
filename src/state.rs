use std::sync::Arc;

use crate::gate::TokenGate;
use crate::load_balancer::LoadBalancer;

// app's shared state
pub struct AppState {
    pub client: reqwest::Client,
    pub gate: Arc<TokenGate>,
    pub load_balancer: Arc<LoadBalancer>,
    pub max_body_bytes: usize, // largest body forwarded upstream
}
