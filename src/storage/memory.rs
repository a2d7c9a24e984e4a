use super::{glob_match, KeyValueStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// In-process store. Expired entries are invisible and dropped lazily.
#[derive(Default)]
pub struct MemoryStore {
    /// Value and expiry; `None` when the TTL runs past what `Instant` can represent
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

fn live(expires: &Option<Instant>, now: Instant) -> bool {
    expires.map_or(true, |at| at > now)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(_, expires)| live(expires, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires = Instant::now().checked_add(ttl);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(format!("{namespace}:{key}"), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let full = format!("{namespace}:{key}");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&full) {
            Some((value, expires)) if live(expires, Instant::now()) => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(&full);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, expires)| live(expires, now));
        Ok(entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&format!("{namespace}:{key}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("ns", "k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("ns", "k").await.unwrap(), None);
        assert!(store.keys("ns:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbounded_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("ns", "k", "v", Duration::MAX).await.unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.keys("ns:*").await.unwrap(), vec!["ns:k".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn keys_filter_by_namespace() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("a", "1", "x", ttl).await.unwrap();
        store.set("a", "2", "y", ttl).await.unwrap();
        store.set("b", "1", "z", ttl).await.unwrap();

        let mut keys = store.keys("a:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a:1".to_string(), "a:2".to_string()]);

        store.delete("a", "1").await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
