use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::remote::{RemoteCache, RemoteEvent};

/// Redis-backed remote tier.
///
/// Keys are stored as `{namespace}:{key}`. A failed command drops the cached
/// connection and emits `Error` + `Disconnected`; the health probe emits
/// `Connected` once a ping succeeds again.
pub struct RedisRemote {
    client: redis::Client,
    namespace: String,
    connection: Mutex<Option<MultiplexedConnection>>,
    healthy: AtomicBool,
    events: broadcast::Sender<RemoteEvent>,
}

impl RedisRemote {
    /// Parse the URL and build the client. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Command` if the URL is not a valid Redis URL.
    pub fn open(url: &str, namespace: &str) -> Result<Arc<Self>, RemoteError> {
        let client = redis::Client::open(url).map_err(|e| RemoteError::Command(e.to_string()))?;
        let (events, _) = broadcast::channel(32);
        Ok(Arc::new(Self {
            client,
            namespace: namespace.trim_end_matches(':').to_owned(),
            connection: Mutex::new(None),
            healthy: AtomicBool::new(false),
            events,
        }))
    }

    /// Ping every `interval` and emit lifecycle events on transitions.
    ///
    /// The probe stops once the last `Arc` to the client is dropped.
    pub fn spawn_health_probe(
        self: &Arc<Self>,
        interval: Duration,
        ping_timeout: Duration,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                if !this.healthy.load(Ordering::SeqCst) {
                    let _ = this.events.send(RemoteEvent::Reconnecting);
                }
                let ok = matches!(timeout(ping_timeout, this.ping()).await, Ok(true));
                if !ok {
                    debug!("redis health probe failed");
                }
            }
        })
    }

    fn qualify(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn unqualify<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    async fn conn(&self) -> Result<MultiplexedConnection, RemoteError> {
        let cached = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.failed(e))?;
        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());
        Ok(conn)
    }

    fn succeeded(&self) {
        if !self.healthy.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(RemoteEvent::Connected);
        }
    }

    fn failed(&self, err: redis::RedisError) -> RemoteError {
        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if self.healthy.swap(false, Ordering::SeqCst) {
            warn!(error = %err, "redis command failed");
            let _ = self.events.send(RemoteEvent::Error(err.to_string()));
            let _ = self.events.send(RemoteEvent::Disconnected);
        }
        err.into()
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T, RemoteError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.conn().await?;
        match op(conn).await {
            Ok(value) => {
                self.succeeded();
                Ok(value)
            }
            Err(err) => Err(self.failed(err)),
        }
    }
}

/// Escape glob metacharacters so a prefix matches literally in `KEYS`.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl RemoteCache for RedisRemote {
    async fn ping(&self) -> bool {
        self.run(|mut conn| async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong)
        })
        .await
        .is_ok()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let key = self.qualify(key);
        self.run(|mut conn| async move { conn.get(key).await }).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, RemoteError> {
        let key = self.qualify(key);
        let payload = value.to_vec();
        let seconds = ttl.as_secs().max(1);
        self.run(|mut conn| async move {
            let _: () = conn.set_ex(key, payload, seconds).await?;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        let key = self.qualify(key);
        self.run(|mut conn| async move {
            let removed: usize = conn.del(key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, RemoteError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = keys.iter().map(|k| self.qualify(k)).collect();
        self.run(|mut conn| async move { conn.del(keys).await }).await
    }

    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let pattern = format!("{}*", escape_glob(&self.qualify(prefix)));
        let keys: Vec<String> = self
            .run(|mut conn| async move { conn.keys(pattern).await })
            .await?;
        Ok(keys
            .iter()
            .map(|key| self.unqualify(key).to_owned())
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}
