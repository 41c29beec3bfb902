//! Owner-scoped TTL cache for merged directories.
//!
//! A merged directory is expensive to build (one paginated fetch per linked
//! account) and safe to share read-only, so it is cached per owner behind an
//! `Arc`. Any ledger write for an owner must invalidate that owner's entry;
//! redundant invalidation is harmless.

use std::collections::BTreeMap;
use std::sync::Arc;

use keeper_core::{current_unix_timestamp_ms, is_expired_unix};
use tokio::sync::Mutex;

use crate::directory_aggregator::MergedDirectory;

pub const DEFAULT_DIRECTORY_TTL_MS: u64 = 5 * 60 * 1_000;

#[derive(Debug)]
pub struct DirectoryCache {
    ttl_ms: u64,
    entries: Mutex<BTreeMap<String, Arc<MergedDirectory>>>,
}

impl DirectoryCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the cached directory for `owner_key` unless it has aged out.
    pub async fn get(&self, owner_key: &str) -> Option<Arc<MergedDirectory>> {
        let mut entries = self.entries.lock().await;
        let Some(directory) = entries.get(owner_key) else {
            return None;
        };
        let expires = directory.built_unix_ms.saturating_add(self.ttl_ms);
        if is_expired_unix(Some(expires), current_unix_timestamp_ms()) {
            entries.remove(owner_key);
            return None;
        }
        Some(Arc::clone(directory))
    }

    pub async fn store(&self, owner_key: &str, directory: Arc<MergedDirectory>) {
        let mut entries = self.entries.lock().await;
        entries.insert(owner_key.to_string(), directory);
    }

    /// Drops the owner's cached directory. Safe to call when nothing is cached.
    pub async fn invalidate(&self, owner_key: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(owner_key);
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY_TTL_MS)
    }
}
