//! Redis cache driver.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::{CacheDriver, CacheError};

/// Redis-backed cache driver using `SET EX` for TTLs.
///
/// `ConnectionManager` reconnects transparently and is cheap to clone, so each
/// call works on its own handle.
#[derive(Clone)]
pub struct RedisCacheDriver {
    conn: ConnectionManager,
}

impl RedisCacheDriver {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to redis: {e}")))?;
        Ok(Self { conn })
    }
}

fn unavailable(op: &str, err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(format!("redis {op} failed: {err}"))
}

#[async_trait::async_trait]
impl CacheDriver for RedisCacheDriver {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // SET EX rejects zero.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .await
            .map_err(|e| unavailable("SET", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| unavailable("GET", e))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| unavailable("DEL", e))?;
        Ok(())
    }
}
