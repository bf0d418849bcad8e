//! Process-local memo tables for account resolution.
//!
//! Entries are hints, never proof of existence: every hit is still followed by
//! an idempotent remote call, so a stale entry costs at most one wasted
//! attempt. Writers overwrite blindly.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a resolution-key entry.
pub const DEFAULT_ACCOUNT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct Entry {
    account: String,
    stored_at: Instant,
}

/// Memoises which account satisfies a set of requested properties and which
/// account backs a given volume name.
#[derive(Debug)]
pub struct AccountCache {
    ttl: Duration,
    by_key: Mutex<HashMap<String, Entry>>,
    by_volume: Mutex<HashMap<String, String>>,
}

impl AccountCache {
    /// Creates an empty cache whose resolution-key entries expire after
    /// `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            by_key: Mutex::new(HashMap::new()),
            by_volume: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up the account resolved for `key`, ignoring expired entries.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<String> {
        let mut entries = self.by_key.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?.clone();
        if entry.stored_at.elapsed() > self.ttl {
            debug!(key, "account cache entry expired");
            entries.remove(key);
            return None;
        }
        Some(entry.account)
    }

    /// Records the account resolved for `key`.
    pub fn store(&self, key: &str, account: &str) {
        self.by_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_owned(),
                Entry {
                    account: account.to_owned(),
                    stored_at: Instant::now(),
                },
            );
    }

    /// Looks up the account previously resolved for a volume name.
    #[must_use]
    pub fn resolve_by_volume_name(&self, name: &str) -> Option<String> {
        self.by_volume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Records the account resolved for a volume name.
    pub fn store_by_volume_name(&self, name: &str, account: &str) {
        self.by_volume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), account.to_owned());
    }
}

impl Default for AccountCache {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT_CACHE_TTL)
    }
}

/// Remembers volume identifiers and account names provisioned through the
/// data-plane API, so later deletes without secrets know to fetch a key and
/// go through the data plane too.
#[derive(Debug, Default)]
pub struct DataPlaneRegistry {
    entries: Mutex<HashSet<String>>,
}

impl DataPlaneRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a volume identifier or account name.
    pub fn insert(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned());
    }

    /// Reports whether either the volume identifier or its account was
    /// provisioned through the data plane.
    #[must_use]
    pub fn uses_data_plane(&self, volume_id: &str, account: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.contains(volume_id) || entries.contains(account)
    }
}
