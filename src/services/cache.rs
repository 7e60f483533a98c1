use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache sizing, from `AppConfig::cache_settings`.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 50,
        }
    }
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Bounded TTL cache.
///
/// Expired entries are dropped lazily on lookup and whenever an insert needs
/// room; past capacity the oldest entry is evicted first.
pub struct TtlCache<K, V> {
    settings: CacheSettings,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.settings.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub async fn put(&self, key: K, value: V) {
        if self.settings.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock().await;
        let ttl = self.settings.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);

        if !entries.contains_key(&key) {
            while entries.len() >= self.settings.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        entries.remove(&k);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
