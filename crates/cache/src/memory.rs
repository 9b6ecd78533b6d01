use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::RemoteError;
use crate::remote::{RemoteCache, RemoteEvent};

type Entries = HashMap<String, (Vec<u8>, Instant)>;

/// In-process stand-in for the shared tier, for tests and local development.
///
/// Reachability can be toggled to simulate outages; toggling emits the same
/// lifecycle events a network client would.
pub struct InMemoryRemote {
    entries: Mutex<Entries>,
    available: AtomicBool,
    calls: AtomicUsize,
    events: broadcast::Sender<RemoteEvent>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            events,
        }
    }

    /// Flip reachability and emit `Connected` / `Disconnected`.
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was != available {
            let event = if available {
                RemoteEvent::Connected
            } else {
                RemoteEvent::Disconnected
            };
            let _ = self.events.send(event);
        }
    }

    /// Emit an arbitrary lifecycle event without changing reachability.
    pub fn emit(&self, event: RemoteEvent) {
        let _ = self.events.send(event);
    }

    /// Number of data operations (everything except `ping`) received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the tier holds a live value for `key`, bypassing reachability.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable)
        }
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemote {
    async fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.check()?;
        let mut guard = self.lock();
        match guard.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, RemoteError> {
        self.check()?;
        self.lock()
            .insert(key.to_owned(), (value.to_vec(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        self.check()?;
        Ok(self.lock().remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, RemoteError> {
        self.check()?;
        let mut guard = self.lock();
        Ok(keys.iter().filter(|key| guard.remove(*key).is_some()).count())
    }

    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        self.check()?;
        let mut keys: Vec<String> = self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}
