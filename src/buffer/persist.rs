//! Write-behind copies of buffered items in the external key-value store.
//! Every operation here is best-effort: failures are logged, never returned.

use crate::models::{SecurityEvent, SecurityMetric};
use crate::storage::{split_key, KeyValueStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub const EVENTS_NAMESPACE: &str = "agent_events";
pub const METRICS_NAMESPACE: &str = "agent_metrics";

/// An item kind with its own namespace in the store.
pub(crate) trait Persisted: Serialize + DeserializeOwned {
    const NAMESPACE: &'static str;
    const KEY_PREFIX: &'static str;
    const KIND: &'static str;

    fn pattern() -> String {
        format!("{}:*", Self::NAMESPACE)
    }
}

impl Persisted for SecurityEvent {
    const NAMESPACE: &'static str = EVENTS_NAMESPACE;
    const KEY_PREFIX: &'static str = "event";
    const KIND: &'static str = "event";
}

impl Persisted for SecurityMetric {
    const NAMESPACE: &'static str = METRICS_NAMESPACE;
    const KEY_PREFIX: &'static str = "metric";
    const KIND: &'static str = "metric";
}

/// Compact JSON, or an error marker when the value cannot be serialized.
pub(crate) fn safe_serialize<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to serialize value");
            serde_json::json!({
                "error": "serialization_failed",
                "type": std::any::type_name::<T>(),
            })
            .to_string()
        }
    }
}

pub(crate) async fn persist<T: Persisted>(
    store: &dyn KeyValueStore,
    key: &str,
    item: &T,
    ttl: Duration,
) {
    let serialized = safe_serialize(item);
    if let Err(e) = store.set(T::NAMESPACE, key, &serialized, ttl).await {
        warn!(kind = T::KIND, error = %e, "failed to persist to store");
    }
}

/// Delete the `count` oldest persisted entries of kind `T`. Keys sort oldest first.
pub(crate) async fn remove_oldest<T: Persisted>(store: &dyn KeyValueStore, count: usize) {
    let mut keys = match store.keys(&T::pattern()).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(kind = T::KIND, error = %e, "failed to clear flushed items from store");
            return;
        }
    };
    keys.sort();
    for full in keys.iter().take(count) {
        let (_, key) = split_key(full);
        if let Err(e) = store.delete(T::NAMESPACE, key).await {
            warn!(kind = T::KIND, key, error = %e, "failed to clear flushed item from store");
        }
    }
}

pub(crate) async fn remove_all<T: Persisted>(store: &dyn KeyValueStore) {
    remove_oldest::<T>(store, usize::MAX).await;
}

/// Load every persisted item of kind `T`, oldest first. Entries that are missing, fail to
/// parse or fail validation are skipped.
pub(crate) async fn recover<T: Persisted>(store: &dyn KeyValueStore) -> Vec<T> {
    let mut keys = match store.keys(&T::pattern()).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(kind = T::KIND, error = %e, "failed to load from store");
            return Vec::new();
        }
    };
    keys.sort();

    let mut items = Vec::with_capacity(keys.len());
    for full in &keys {
        let (_, key) = split_key(full);
        match store.get(T::NAMESPACE, key).await {
            Ok(Some(data)) => match serde_json::from_str::<T>(&data) {
                Ok(item) => items.push(item),
                Err(e) => warn!(kind = T::KIND, key = %full, error = %e, "skipping invalid stored item"),
            },
            Ok(None) => warn!(kind = T::KIND, key = %full, "no data found for stored key"),
            Err(e) => warn!(kind = T::KIND, key = %full, error = %e, "failed to load stored item"),
        }
    }
    if !items.is_empty() {
        info!(kind = T::KIND, count = items.len(), "recovered items from store");
    }
    items
}
