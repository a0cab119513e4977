use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{self, HeaderName};
use axum::response::Response;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::metrics::{UPSTREAM_FAILURES, UPSTREAM_REQUESTS};
use crate::state::AppState;

// Connection-scoped headers that must not be relayed
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

// Downstream behind the gate: relays the request verbatim to an upstream
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ProxyError> {
    let backend = state
        .load_balancer
        .get_backend()
        .ok_or(ProxyError::NoHealthyUpstream)?;

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", backend.url, path_and_query);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    UPSTREAM_REQUESTS.inc();
    let upstream = match state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(res) => res,
        Err(e) => {
            // Marking backend as unhealthy on transport error
            UPSTREAM_FAILURES.inc();
            backend.set_healthy(false);
            tracing::warn!(url = %backend.url, error = %e, "upstream failed, marked unhealthy");
            return Err(ProxyError::Upstream { url, source: e });
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let bytes = upstream.bytes().await.map_err(|e| {
        UPSTREAM_FAILURES.inc();
        ProxyError::Upstream {
            url: url.clone(),
            source: e,
        }
    })?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
