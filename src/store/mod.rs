//! Token store abstraction.
//!
//! The gate only ever needs three things from the store: whether a token
//! table exists, whether a token belongs to it, and an atomic per-key window
//! counter. `RedisStore` is the production backend; `MemoryStore` keeps the
//! same semantics in process for tests and local runs.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;

use crate::error::StoreError;

/// Result of one atomic counter bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Value after the increment.
    pub count: u64,
    /// True once `count` went past the limit passed in.
    pub exceeded: bool,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Does a set named `table` exist at all.
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Is `token` a member of the set `table`.
    async fn is_member(&self, table: &str, token: &str) -> Result<bool, StoreError>;

    /// Increments the counter at `key`, arming a `window_secs` expiry when the
    /// increment created it, and compares the new value with `limit`.
    ///
    /// All three steps must happen as one indivisible unit on the store side.
    async fn increment_window(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<WindowCount, StoreError>;
}
