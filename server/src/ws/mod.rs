pub mod actor;
pub mod groups;
pub mod handler;
pub mod protocol;
pub mod registry;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use groups::{GroupName, GroupNames};
pub use registry::{GroupRegistry, InMemoryGroupRegistry, RegistryError};

/// Sender half of a connection's bounded outbound queue.
/// The registry clones this to push frames to a specific client.
pub type ConnectionSender = mpsc::Sender<axum::extract::ws::Message>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque per-connection identifier. Allocated from a process-wide counter,
/// so an id is never handed out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Everything the registry needs to reach one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: ConnectionSender,
    /// Cancelled by the registry when it evicts the connection.
    pub evicted: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::next(),
            sender,
            evicted: CancellationToken::new(),
        }
    }
}
