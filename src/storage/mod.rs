//! Key-value store contract used for best-effort buffer durability, plus two
//! implementations: in-process ([`MemoryStore`]) and SQLite-backed ([`SqliteStore`]).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Narrow contract over an external store (e.g. a Redis handler owned by the host).
///
/// Entries are addressed by `namespace` + `key`; [`keys`](Self::keys) returns full names
/// in the form `namespace:key`. Patterns support `*` wildcards.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, namespace: &str, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

/// `*` matches any run of characters, everything else matches literally.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || text.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Split `namespace:key` on the last separator.
pub fn split_key(full: &str) -> (&str, &str) {
    match full.rsplit_once(':') {
        Some((ns, key)) => (ns, key),
        None => ("", full),
    }
}
