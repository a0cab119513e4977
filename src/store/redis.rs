use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::ConnectionManager;

use super::{TokenStore, WindowCount};
use crate::error::StoreError;
use crate::rate_limit::MAX_WINDOW_SECS;

/// Lua script for the window counter.
///
/// KEYS[1] - counter key
/// ARGV[1] - request limit
/// ARGV[2] - window length in seconds
///
/// Returns `{count, exceeded}` where exceeded is 1 or 0. Redis runs the
/// whole script without interleaving other commands, so the expiry is set
/// exactly once per window by whichever request created the key.
const WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
if current > tonumber(ARGV[1]) then
    return {current, 1}
end
return {current, 0}
"#;

// EXPIRE failing inside the script would leave the INCR applied without a
// ttl, so out-of-range windows never reach redis
fn expire_arg(window_secs: u64) -> Result<i64, StoreError> {
    if window_secs > MAX_WINDOW_SECS {
        return Err(StoreError::Window(window_secs));
    }
    i64::try_from(window_secs).map_err(|_| StoreError::Window(window_secs))
}

// Redis-backed token store, one multiplexed connection shared by all requests
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self {
            manager,
            script: Script::new(WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl TokenStore for RedisStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(table).await?;
        Ok(exists)
    }

    async fn is_member(&self, table: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let member: bool = conn.sismember(table, token).await?;
        Ok(member)
    }

    async fn increment_window(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<WindowCount, StoreError> {
        let mut conn = self.manager.clone();

        let expire_secs = expire_arg(window_secs)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let (count, exceeded): (i64, i64) = self
            .script
            .key(key)
            .arg(limit)
            .arg(expire_secs)
            .invoke_async(&mut conn)
            .await?;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Reply(format!("negative counter value {count}")))?;

        Ok(WindowCount {
            count,
            exceeded: exceeded != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_arg_bounds_window() {
        assert_eq!(expire_arg(86400).unwrap(), 86400);
        assert_eq!(expire_arg(MAX_WINDOW_SECS).unwrap(), MAX_WINDOW_SECS as i64);
        assert!(matches!(
            expire_arg(MAX_WINDOW_SECS + 1),
            Err(StoreError::Window(_))
        ));
        assert!(matches!(expire_arg(u64::MAX), Err(StoreError::Window(u64::MAX))));
    }
}
