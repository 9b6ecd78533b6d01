//! Two-tier cache: a shared remote tier with a process-local fallback store.
//!
//! Every write is mirrored into the fallback store so a remote outage after
//! the write does not lose the value for the rest of its TTL. Reads and
//! writes consult the observable [`ConnectionState`] instead of probing the
//! remote tier, and no operation ever returns an error to the caller.

#![forbid(unsafe_code)]

pub mod error;
pub mod facade;
pub mod fallback;
pub mod memory;
pub mod redis_remote;
pub mod remote;
pub mod state;

pub use error::RemoteError;
pub use facade::{CacheFacade, CacheOptions, Invalidation, SetOutcome};
pub use fallback::FallbackStore;
pub use memory::InMemoryRemote;
pub use redis_remote::RedisRemote;
pub use remote::{RemoteCache, RemoteEvent};
pub use state::{ConnectionMonitor, ConnectionState};
