//! Request gate: path parsing, token validation and quota in front of any
//! downstream service.
//!
//! ```ignore
//! let gate = Arc::new(TokenGate::new(store, limit, Duration::from_secs(3)));
//! let app = Router::new()
//!     .fallback(upstream)
//!     .layer(axum::middleware::from_fn_with_state(gate, check_access_token));
//! ```

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Decision, GateError, StoreError};
use crate::metrics::{DECISIONS_TOTAL, STORE_ERRORS_TOTAL, VALIDATION_LATENCY};
use crate::path::{TokenPath, parse_path};
use crate::rate_limit::RateLimit;
use crate::store::TokenStore;
use crate::validator::validate;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TokenGate {
    store: Arc<dyn TokenStore>,
    limit: RateLimit,
    store_timeout: Duration, // covers every store call of one request
}

impl TokenGate {
    pub fn new(store: Arc<dyn TokenStore>, limit: RateLimit, store_timeout: Duration) -> Self {
        Self {
            store,
            limit,
            store_timeout,
        }
    }

    /// Runs the whole decision for one request path.
    ///
    /// Rejections are logged here, where the table and token are still known.
    pub async fn check(&self, path: &str) -> Decision {
        let TokenPath { table, token } = match parse_path(path) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(path, error = %err, "rejecting malformed request");
                return Err(err);
            }
        };

        let start = Instant::now();
        let decision = match tokio::time::timeout(
            self.store_timeout,
            validate(self.store.as_ref(), table, token, &self.limit),
        )
        .await
        {
            Ok(decision) => decision,
            Err(_) => Err(StoreError::Timeout(self.store_timeout).into()),
        };
        VALIDATION_LATENCY.observe(start.elapsed().as_secs_f64());

        let fingerprint = token_fingerprint(token);
        match &decision {
            Ok(()) => tracing::debug!(table, token = %fingerprint, "token accepted"),
            Err(GateError::StoreUnavailable(source)) => {
                STORE_ERRORS_TOTAL.with_label_values(&[source.kind()]).inc();
                tracing::error!(
                    table,
                    token = %fingerprint,
                    kind = source.kind(),
                    error = %source,
                    "token store unavailable"
                );
            }
            Err(err) => tracing::warn!(
                table,
                token = %fingerprint,
                status = err.status().as_u16(),
                error = %err,
                "rejecting request"
            ),
        }

        decision
    }
}

/// Middleware entry point. On success the untouched request goes to `next`;
/// on any rejection `next` is never called.
pub async fn check_access_token(
    State(gate): State<Arc<TokenGate>>,
    request: Request,
    next: Next,
) -> Response {
    let decision = gate.check(request.uri().path()).await;

    match decision {
        Ok(()) => {
            DECISIONS_TOTAL.with_label_values(&["allowed"]).inc();
            next.run(request).await
        }
        Err(err) => {
            DECISIONS_TOTAL.with_label_values(&[err.outcome()]).inc();
            err.into_response()
        }
    }
}

// Short stable tag for a token so logs never carry the credential itself
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WindowCount};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::ServiceExt;

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_token("name_list", "cjh");
        store
    }

    fn limit(max: u64) -> RateLimit {
        RateLimit {
            max_request_count: max,
            window_secs: 60,
            key_prefix: String::new(),
        }
    }

    // Router whose downstream just counts how often it ran
    fn app(store: Arc<MemoryStore>, limit: RateLimit) -> (Router, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let gate = Arc::new(TokenGate::new(store, limit, DEFAULT_STORE_TIMEOUT));

        let router = Router::new()
            .fallback(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "downstream"
                }
            })
            .layer(axum::middleware::from_fn_with_state(gate, check_access_token));

        (router, hits)
    }

    async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn name_list_scenario() {
        let (router, hits) = app(seeded_store(), RateLimit::disabled());

        let (status, body) = send(&router, Method::GET, "/name_list/cjh/123").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "downstream");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let (status, _) = send(&router, Method::GET, "/name_list/hd/123").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let (status, body) = send(&router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("invalid path"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_regardless_of_method() {
        let (router, hits) = app(seeded_store(), RateLimit::disabled());

        for method in [Method::GET, Method::POST, Method::DELETE, Method::PUT] {
            for uri in ["/", "/name_list", "/name_list/"] {
                let (status, _) = send(&router, method.clone(), uri).await;
                assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_table_is_not_found() {
        let (router, hits) = app(seeded_store(), RateLimit::disabled());

        let (status, body) = send(&router, Method::GET, "/other_list/cjh/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("other_list"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_limit_allows_every_call() {
        let (router, hits) = app(seeded_store(), limit(0));

        for _ in 0..50 {
            let (status, _) = send(&router, Method::POST, "/name_list/cjh/x").await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_then_reset_after_window() {
        let (router, hits) = app(seeded_store(), limit(3));

        for _ in 0..3 {
            let (status, _) = send(&router, Method::GET, "/name_list/cjh/").await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = send(&router, Method::GET, "/name_list/cjh/").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(60)).await;
        let (status, _) = send(&router, Method::GET, "/name_list/cjh/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_at_ceiling_all_pass() {
        const N: usize = 32;
        let store = seeded_store();
        let (router, hits) = app(store.clone(), limit(N as u64));

        let tasks: Vec<_> = (0..N)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move { send(&router, Method::GET, "/name_list/cjh/1").await.0 })
            })
            .collect();

        let mut allowed = 0;
        for task in tasks {
            match task.await.unwrap() {
                StatusCode::OK => allowed += 1,
                other => panic!("unexpected status {other}"),
            }
        }
        assert_eq!(allowed, N);
        assert_eq!(hits.load(Ordering::SeqCst), N);
        assert_eq!(store.count("cjh"), N as u64);

        // one more tips it over
        let (status, _) = send(&router, Method::GET, "/name_list/cjh/1").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    // Store that never answers
    struct HangingStore;

    #[async_trait]
    impl TokenStore for HangingStore {
        async fn table_exists(&self, _table: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn is_member(&self, _table: &str, _token: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn increment_window(
            &self,
            _key: &str,
            _limit: u64,
            _window_secs: u64,
        ) -> Result<WindowCount, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out_as_unavailable() {
        let gate = TokenGate::new(Arc::new(HangingStore), limit(5), DEFAULT_STORE_TIMEOUT);

        let err = gate.check("/name_list/cjh/1").await.unwrap_err();
        assert!(matches!(
            err,
            GateError::StoreUnavailable(StoreError::Timeout(_))
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn out_of_range_window_fails_without_panicking() {
        let huge = RateLimit {
            window_secs: u64::MAX,
            ..limit(5)
        };
        let (router, hits) = app(seeded_store(), huge);

        let (status, body) = send(&router, Method::GET, "/name_list/cjh/1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("out of range"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fingerprint_hides_token() {
        let print = token_fingerprint("cjh");
        assert_eq!(print.len(), 12);
        assert!(!print.contains("cjh"));
        assert_eq!(print, token_fingerprint("cjh"));
        assert_ne!(print, token_fingerprint("hd"));
    }
}
