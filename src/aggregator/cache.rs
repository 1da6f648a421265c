//! Process-wide TTL cache, generalized from the LLM layer's `PromptCache`
//! so the Aggregator's query cache and the paper/embedding caches in the
//! concurrency model (see the crate's top-level docs) share one shape.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    created_at: DateTime<Utc>,
}

/// A generic TTL-bounded, concurrency-safe cache.
pub struct TtlCache<K, V> {
    entries: Arc<RwLock<HashMap<K, Entry<V>>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|entry| {
            if Utc::now() - entry.created_at > self.ttl {
                None
            } else {
                Some(entry.value.clone())
            }
        })
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                value,
                created_at: Utc::now(),
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn cleanup(&self) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, entry| Utc::now() - entry.created_at <= ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_within_ttl_miss_after_expiry() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::zero());
        cache.insert("k".to_string(), 42).await;
        // Zero TTL: immediately considered expired.
        assert_eq!(cache.get(&"k".to_string()).await, None);

        let cache: TtlCache<String, u32> = TtlCache::new(Duration::minutes(5));
        cache.insert("k".to_string(), 42).await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(42));
    }
}
