use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::RemoteError;

/// Lifecycle signals emitted by a remote cache client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Connected,
    Reconnecting,
    Disconnected,
    Error(String),
}

/// The shared, network-attached cache tier.
///
/// Keys are passed unqualified; implementations apply their own namespace.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn ping(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
    -> Result<bool, RemoteError>;

    async fn delete(&self, key: &str) -> Result<bool, RemoteError>;

    /// Batch delete; returns how many keys existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, RemoteError>;

    /// All keys starting with `prefix`.
    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;

    /// Subscribe to connection lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent>;
}
