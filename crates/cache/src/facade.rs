use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::fallback::FallbackStore;
use crate::remote::{RemoteCache, RemoteEvent};
use crate::state::{ConnectionMonitor, ConnectionState};

/// Tuning for `CacheFacade`.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Upper bound for any single remote-tier call.
    pub remote_timeout: Duration,
    /// Capacity of the local fallback store.
    pub fallback_max_entries: usize,
    /// Ping cadence while recovering from a failure the facade observed
    /// itself (a timed-out or failed call) rather than one the remote
    /// client reported.
    pub recovery_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(2),
            fallback_max_entries: 10_000,
            recovery_interval: Duration::from_secs(5),
        }
    }
}

/// Where a `set` ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Acknowledged by the remote tier and mirrored locally.
    Remote,
    /// Stored in the fallback store only.
    FallbackOnly,
    /// Nothing stored (zero TTL or unserializable value).
    Skipped,
}

/// Counts removed by `invalidate_pattern`, per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub remote: usize,
    pub fallback: usize,
}

struct Inner {
    remote: Option<Arc<dyn RemoteCache>>,
    fallback: FallbackStore,
    state: ConnectionMonitor,
    options: CacheOptions,
    recovering: AtomicBool,
}

/// Façade over the remote tier with an automatic local fallback.
///
/// Cheap to clone. No method returns an error: remote failures are logged,
/// flip the state to `Disconnected`, and the fallback store answers instead.
#[derive(Clone)]
pub struct CacheFacade {
    inner: Arc<Inner>,
}

impl CacheFacade {
    /// Wire the facade to a remote tier: subscribe to its lifecycle events,
    /// then ping once to settle the initial state.
    pub async fn connect(remote: Arc<dyn RemoteCache>, options: CacheOptions) -> Self {
        let state = ConnectionMonitor::new(ConnectionState::Connecting);
        spawn_event_listener(remote.subscribe(), state.clone());

        let reachable = matches!(
            timeout(options.remote_timeout, remote.ping()).await,
            Ok(true)
        );
        if reachable {
            state.set(ConnectionState::Connected);
        }

        let cache = Self {
            inner: Arc::new(Inner {
                fallback: FallbackStore::new(options.fallback_max_entries),
                remote: Some(remote),
                state,
                options,
                recovering: AtomicBool::new(false),
            }),
        };
        if !reachable {
            warn!("remote cache unreachable at startup, serving from fallback store");
            cache.mark_unreachable();
        }
        cache
    }

    /// Facade with no remote tier; permanently `Disconnected`.
    #[must_use]
    pub fn local_only(options: CacheOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                fallback: FallbackStore::new(options.fallback_max_entries),
                remote: None,
                state: ConnectionMonitor::new(ConnectionState::Disconnected),
                options,
                recovering: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn fallback(&self) -> &FallbackStore {
        &self.inner.fallback
    }

    fn usable_remote(&self) -> Option<&Arc<dyn RemoteCache>> {
        match self.inner.state.current() {
            ConnectionState::Connected => self.inner.remote.as_ref(),
            ConnectionState::Connecting | ConnectionState::Disconnected => None,
        }
    }

    async fn call<T, Fut>(&self, op: &'static str, key: &str, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let err = match timeout(self.inner.options.remote_timeout, fut).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => err,
            Err(_) => RemoteError::Timeout(self.inner.options.remote_timeout),
        };
        warn!(op, key, error = %err, "remote cache call failed, using fallback store");
        self.mark_unreachable();
        None
    }

    /// Flip to `Disconnected` and make sure a recovery loop is pinging.
    ///
    /// A timed-out call never reaches the remote client's own failure
    /// handling, so the client may never announce a reconnect; the facade
    /// has to find its own way back.
    fn mark_unreachable(&self) {
        self.inner.state.set(ConnectionState::Disconnected);
        if self.inner.remote.is_some() && !self.inner.recovering.swap(true, Ordering::SeqCst) {
            tokio::spawn(recover(Arc::downgrade(&self.inner)));
        }
    }

    /// Read raw bytes: remote tier when connected, fallback store otherwise.
    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(remote) = self.usable_remote() {
            if let Some(found) = self.call("get", key, remote.get(key)).await {
                return found;
            }
        }
        self.inner.fallback.get(key)
    }

    /// Write raw bytes to the remote tier (when connected) and always mirror
    /// them into the fallback store.
    pub async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SetOutcome {
        if ttl.is_zero() {
            return SetOutcome::Skipped;
        }

        let mut acked = false;
        if let Some(remote) = self.usable_remote() {
            acked = self
                .call("set", key, remote.set_with_ttl(key, &value, ttl))
                .await
                .unwrap_or(false);
        }

        self.inner.fallback.insert(key, value, ttl);
        if acked {
            SetOutcome::Remote
        } else {
            SetOutcome::FallbackOnly
        }
    }

    /// Read and decode a JSON value. Undecodable bytes count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_bytes(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> SetOutcome {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set_bytes(key, bytes, ttl).await,
            Err(err) => {
                warn!(key, error = %err, "value not cacheable");
                SetOutcome::Skipped
            }
        }
    }

    /// Remove `key` from both tiers. Returns true if either tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(remote) = self.usable_remote() {
            removed = self
                .call("delete", key, remote.delete(key))
                .await
                .unwrap_or(false);
        }
        self.inner.fallback.remove(key) || removed
    }

    /// Remove every key starting with `prefix`.
    ///
    /// The remote tier is enumerated and batch-deleted when connected; the
    /// fallback store is always range-scanned.
    pub async fn invalidate_pattern(&self, prefix: &str) -> Invalidation {
        let mut report = Invalidation::default();
        if let Some(remote) = self.usable_remote() {
            if let Some(keys) = self
                .call("keys", prefix, remote.keys_matching(prefix))
                .await
            {
                if !keys.is_empty() {
                    report.remote = self
                        .call("delete_many", prefix, remote.delete_many(&keys))
                        .await
                        .unwrap_or(0);
                }
            }
        }
        report.fallback = self.inner.fallback.remove_prefix(prefix);
        debug!(
            prefix,
            remote = report.remote,
            fallback = report.fallback,
            "invalidated cache prefix"
        );
        report
    }
}

/// Ping until the remote answers or lifecycle events take over.
///
/// Stops once the facade is dropped.
async fn recover(inner: Weak<Inner>) {
    loop {
        let Some(interval) = inner.upgrade().map(|this| this.options.recovery_interval) else {
            return;
        };
        tokio::time::sleep(interval).await;

        let Some(this) = inner.upgrade() else {
            return;
        };
        let Some(remote) = this.remote.clone() else {
            this.recovering.store(false, Ordering::SeqCst);
            return;
        };
        if this.state.current() != ConnectionState::Disconnected {
            this.recovering.store(false, Ordering::SeqCst);
            return;
        }
        if matches!(
            timeout(this.options.remote_timeout, remote.ping()).await,
            Ok(true)
        ) {
            // cleared first so a failure right after reconnecting starts a new loop
            this.recovering.store(false, Ordering::SeqCst);
            if this.state.current() == ConnectionState::Disconnected {
                info!("remote cache answering again, resuming remote tier");
                this.state.set(ConnectionState::Connected);
            }
            return;
        }
        debug!("remote cache still unreachable");
    }
}

fn spawn_event_listener(mut events: broadcast::Receiver<RemoteEvent>, state: ConnectionMonitor) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RemoteEvent::Connected) => {
                    state.set(ConnectionState::Connected);
                }
                Ok(RemoteEvent::Reconnecting) => {
                    state.set(ConnectionState::Connecting);
                }
                Ok(RemoteEvent::Disconnected) => {
                    state.set(ConnectionState::Disconnected);
                }
                Ok(RemoteEvent::Error(message)) => {
                    warn!(error = %message, "remote cache reported an error");
                    state.set(ConnectionState::Disconnected);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "remote cache events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_ttl_is_skipped_everywhere() {
        let cache = CacheFacade::local_only(CacheOptions::default());
        assert_eq!(
            cache.set_bytes("k", b"v".to_vec(), Duration::ZERO).await,
            SetOutcome::Skipped
        );
        assert!(cache.fallback().is_empty());
    }

    #[tokio::test]
    async fn local_only_stays_disconnected() {
        let cache = CacheFacade::local_only(CacheOptions::default());
        assert_eq!(cache.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            cache.set("k", &42_u32, Duration::from_secs(30)).await,
            SetOutcome::FallbackOnly
        );
        assert_eq!(cache.get::<u32>("k").await, Some(42));
        assert!(cache.delete("k").await);
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_miss() {
        let cache = CacheFacade::local_only(CacheOptions::default());
        cache
            .set_bytes("k", b"not json".to_vec(), Duration::from_secs(30))
            .await;
        assert_eq!(cache.get::<u32>("k").await, None);
        assert!(cache.get_bytes("k").await.is_some());
    }
}
