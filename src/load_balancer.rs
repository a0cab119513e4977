use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::{Duration, interval};

use crate::config::ConfigError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// Single upstream server

pub struct Backend {
    pub url: String,
    healthy: AtomicBool,
}

impl Backend {
    pub fn new(url: String) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

// Round-robin over the upstreams that passed their last health check

pub struct LoadBalancer {
    backends: Vec<Arc<Backend>>,
    current: AtomicUsize,
}

impl LoadBalancer {
    // Create from comma-separated urls "localhost:9000, localhost:9001"
    pub fn new(backends_str: &str) -> Result<Self, ConfigError> {
        let backends: Vec<Arc<Backend>> = backends_str
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|url| {
                // add http:// if not present
                let full_url = if url.starts_with("http") {
                    url.trim_end_matches('/').to_string()
                } else {
                    format!("http://{}", url.trim_end_matches('/'))
                };
                Arc::new(Backend::new(full_url))
            })
            .collect();
        if backends.is_empty() {
            return Err(ConfigError::Invalid("at least one upstream required".to_string()));
        }

        for (i, b) in backends.iter().enumerate() {
            tracing::info!(index = i + 1, url = %b.url, "upstream registered");
        }

        Ok(Self {
            backends,
            current: AtomicUsize::new(0),
        })
    }

    // Next healthy upstream after the cursor, None when all are down
    pub fn get_backend(&self) -> Option<Arc<Backend>> {
        let start = self.current.fetch_add(1, Ordering::Relaxed) % self.backends.len();

        self.backends[start..]
            .iter()
            .chain(&self.backends[..start])
            .find(|backend| backend.is_healthy())
            .cloned()
    }

    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }
}

// Probes every upstream on a fixed interval, flipping its health flag
pub async fn health_checker(
    load_balancer: Arc<LoadBalancer>,
    client: reqwest::Client,
    check_interval: Duration,
    health_path: String,
) {
    let mut ticker = interval(check_interval);
    tracing::info!(interval = ?check_interval, path = %health_path, "health checker started");

    loop {
        ticker.tick().await;
        check_upstreams(&load_balancer, &client, &health_path).await;
    }
}

// One health round; an answer below 500 counts as up
pub async fn check_upstreams(
    load_balancer: &LoadBalancer,
    client: &reqwest::Client,
    path: &str,
) {
    for backend in load_balancer.all_backends() {
        let answer = client
            .get(format!("{}{}", backend.url, path))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        let up = answer.is_ok_and(|res| !res.status().is_server_error());

        match (backend.is_healthy(), up) {
            (false, true) => tracing::info!(url = %backend.url, "upstream recovered"),
            (true, false) => tracing::warn!(url = %backend.url, "upstream went down"),
            _ => {}
        }
        backend.set_healthy(up);
    }
}
