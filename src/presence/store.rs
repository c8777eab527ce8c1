//! Shared presence store abstraction.
//!
//! Multi-process deployments point every server at the same key/value + set
//! store so presence survives any single process. The in-memory backend
//! keeps the same TTL semantics for tests and single-process runs.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Key/value + set store contract used by the presence manager.
///
/// Keys are plain strings; TTL handling is the store's responsibility.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_add(&self, set: &str, member: &str) -> Result<()>;

    async fn set_remove(&self, set: &str, member: &str) -> Result<()>;

    async fn set_members(&self, set: &str) -> Result<Vec<String>>;

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool>;

    /// Write `key`, overwriting any prior value and re-arming the TTL.
    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Whether `key` exists and has not expired.
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct ExpiringValue {
    #[allow(dead_code)]
    value: String,
    expires_at: Instant,
}

/// In-memory store backend with lazy TTL expiry.
#[derive(Default)]
pub struct InMemoryPresenceStore {
    sets: DashMap<String, HashSet<String>>,
    values: DashMap<String, ExpiringValue>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        if let Some(mut entry) = self.sets.get_mut(set) {
            entry.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(set)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .get(set)
            .is_some_and(|entry| entry.contains(member)))
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.values.insert(
            key.to_string(),
            ExpiringValue {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let expired = match self.values.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return Ok(false),
        };
        if expired {
            self.values.remove(key);
            return Ok(false);
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}
