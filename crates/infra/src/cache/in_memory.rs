use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::{CacheDriver, CacheError};

/// In-process TTL cache. Entries are evicted lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryCacheDriver {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryCacheDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry.
    pub fn evict_expired(&self) {
        if let Ok(mut entries) = self.entries.write() {
            let now = Instant::now();
            entries.retain(|_, (_, expires_at)| *expires_at > now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CacheError {
    CacheError::Unavailable("cache lock poisoned".to_string())
}

#[async_trait::async_trait]
impl CacheDriver for InMemoryCacheDriver {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop the read guard before removing.
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}
