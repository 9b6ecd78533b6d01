use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

struct FallbackEntry {
    value: Vec<u8>,
    expires_at: Instant,
    timer: AbortHandle,
}

type Entries = BTreeMap<String, FallbackEntry>;

/// Process-local store used when the remote tier cannot be trusted.
///
/// Bounded by `max_entries`; each entry owns a removal timer that fires at
/// its expiry. Keys are kept ordered so prefix invalidation is a range scan.
#[derive(Clone)]
pub struct FallbackStore {
    entries: Arc<Mutex<Entries>>,
    max_entries: usize,
}

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    // a panicked writer cannot leave an entry half-written; keep serving
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FallbackStore {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Store `value` for `ttl`. A zero TTL stores nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let expires_at = Instant::now() + ttl;

        let mut guard = lock(&self.entries);
        if !guard.contains_key(key) && guard.len() >= self.max_entries {
            evict_soonest(&mut guard);
        }

        let timer = tokio::spawn(expire_later(
            Arc::downgrade(&self.entries),
            key.to_owned(),
            expires_at,
        ))
        .abort_handle();

        let entry = FallbackEntry {
            value,
            expires_at,
            timer,
        };
        if let Some(previous) = guard.insert(key.to_owned(), entry) {
            previous.timer.abort();
        }
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let guard = lock(&self.entries);
        guard
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut guard = lock(&self.entries);
        match guard.remove(key) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut guard = lock(&self.entries);
        let keys: Vec<String> = guard
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(entry) = guard.remove(key) {
                entry.timer.abort();
            }
        }
        keys.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_soonest(entries: &mut Entries) {
    let victim = entries
        .iter()
        .min_by_key(|(_, entry)| entry.expires_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = victim {
        if let Some(entry) = entries.remove(&key) {
            entry.timer.abort();
        }
        debug!(%key, "fallback store full, evicted entry closest to expiry");
    }
}

async fn expire_later(entries: Weak<Mutex<Entries>>, key: String, expires_at: Instant) {
    tokio::time::sleep_until(expires_at).await;
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let mut guard = lock(&entries);
    if guard
        .get(&key)
        .is_some_and(|entry| entry.expires_at <= Instant::now())
    {
        guard.remove(&key);
        debug!(%key, "fallback entry expired");
    }
}
