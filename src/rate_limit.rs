use crate::error::{Decision, GateError};
use crate::store::TokenStore;

/// Longest accepted window. Stays representable as milliseconds in an `i64`,
/// which both Redis `EXPIRE` and monotonic clocks can take.
pub const MAX_WINDOW_SECS: u64 = (i64::MAX / 1000) as u64;

// Per-token request quota
#[derive(Debug, Clone, Default)]
pub struct RateLimit {
    pub max_request_count: u64, // 0 turns limiting off
    pub window_secs: u64,       // counter lifetime, armed on the first hit
    pub key_prefix: String,     // prepended to the token to form the counter key
}

impl RateLimit {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_request_count > 0
    }

    pub fn counter_key(&self, token: &str) -> String {
        format!("{}{}", self.key_prefix, token)
    }
}

/// Spends one request from the token's quota.
///
/// The increment, first-hit expiry and comparison happen in a single store
/// call. The request that pushes the count past `max_request_count` is itself
/// rejected, and counters only ever reset by expiring.
pub async fn consume(store: &dyn TokenStore, token: &str, limit: &RateLimit) -> Decision {
    if !limit.is_enabled() {
        return Ok(());
    }

    let window = store
        .increment_window(
            &limit.counter_key(token),
            limit.max_request_count,
            limit.window_secs,
        )
        .await?;

    if window.exceeded {
        return Err(GateError::RateLimited {
            count: window.count,
            limit: limit.max_request_count,
        });
    }
    Ok(())
}
