use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{TokenStore, WindowCount};
use crate::error::StoreError;

// Increments between sweeps of expired counters
const SWEEP_EVERY: u64 = 1024;

// Counter state for one key
struct WindowEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process token store.
///
/// Counter updates run under the DashMap shard lock for the key, which gives
/// the same all-or-nothing increment as the Redis script. An expired counter
/// is restarted on its next increment, and every `SWEEP_EVERY` increments the
/// expired ones are dropped from the map.
#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<String, HashSet<String>>,
    counters: DashMap<String, WindowEntry>,
    increments: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, table: &str, token: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(token.to_string());
    }

    // Current live count for a key, 0 when missing or expired
    pub fn count(&self, key: &str) -> u64 {
        match self.counters.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => entry.count,
            _ => 0,
        }
    }

    /// Drops every counter whose window has elapsed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        // an empty set does not exist in redis either
        Ok(self
            .tables
            .get(table)
            .is_some_and(|tokens| !tokens.is_empty()))
    }

    async fn is_member(&self, table: &str, token: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .get(table)
            .is_some_and(|tokens| tokens.contains(token)))
    }

    async fn increment_window(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<WindowCount, StoreError> {
        // must run before taking an entry lock, retain locks every shard
        if self.increments.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(WindowEntry {
                count: 0,
                expires_at: now,
            });

        // window elapsed? the key would be gone in redis
        if entry.expires_at <= now {
            entry.count = 0;
        }

        if entry.count == 0 {
            // nothing is counted unless the window can be armed
            entry.expires_at = now
                .checked_add(Duration::from_secs(window_secs))
                .ok_or(StoreError::Window(window_secs))?;
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            exceeded: entry.count > limit,
        })
    }
}
