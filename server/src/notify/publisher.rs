//! Event publisher: entry point for post-commit hooks in the data layer.
//!
//! `publish` never blocks and never fails the caller. The envelope is built
//! and encoded inline, then pushed onto a bounded queue; a single dispatcher
//! task drains the queue into [`GroupRegistry::broadcast`], which keeps
//! delivery order equal to publish order for every connection.
//!
//! When the queue is full the newest envelope is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::entities::{DomainEntity, EntityKind, SerializerRegistry};
use super::envelope::{CodecError, Envelope, EventKind};
use crate::ws::{GroupName, GroupRegistry};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize {kind} payload: {source}")]
    Serialize {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("publish queue is full")]
    QueueFull,
    #[error("publish dispatcher has stopped")]
    DispatcherStopped,
}

/// What happened to a publish call. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Envelope with this id is queued for broadcast.
    Queued(Uuid),
    /// No serializer registered for the entity kind; nothing was sent.
    Unregistered(EntityKind),
    /// Envelope was built but could not be queued or encoded.
    Dropped,
}

#[derive(Debug)]
struct Outgoing {
    id: Uuid,
    group: GroupName,
    frame: String,
}

#[derive(Debug, Default)]
pub struct PublisherStats {
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub unregistered: AtomicU64,
}

#[derive(Clone)]
pub struct EventPublisher {
    queue: mpsc::Sender<Outgoing>,
    serializers: Arc<SerializerRegistry>,
    broadcast_group: GroupName,
    stats: Arc<PublisherStats>,
}

impl EventPublisher {
    /// Create a publisher and spawn its dispatcher on the current runtime.
    /// The dispatcher exits once every clone of the publisher is dropped.
    pub fn spawn(
        registry: Arc<dyn GroupRegistry>,
        serializers: SerializerRegistry,
        broadcast_group: GroupName,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(dispatch_loop(registry, rx));
        let publisher = Self {
            queue,
            serializers: Arc::new(serializers),
            broadcast_group,
            stats: Arc::new(PublisherStats::default()),
        };
        (publisher, handle)
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn broadcast_group(&self) -> &GroupName {
        &self.broadcast_group
    }

    /// Publish to the group every authenticated client belongs to.
    pub fn publish_to_broadcast(&self, event: EventKind, entity: &DomainEntity) -> PublishOutcome {
        let group = self.broadcast_group.clone();
        self.publish(&group, event, entity)
    }

    pub fn publish(&self, group: &GroupName, event: EventKind, entity: &DomainEntity) -> PublishOutcome {
        let kind = entity.kind();
        let Some(entry) = self.serializers.get(kind) else {
            self.stats.unregistered.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = %kind, "No serializer registered, skipping publish");
            return PublishOutcome::Unregistered(kind);
        };

        let result = (entry.serialize)(entity)
            .map_err(|source| PublishError::Serialize { kind, source })
            .and_then(|obj| {
                let envelope = Envelope::new(event, entry.object_name.clone(), obj);
                let frame = envelope.encode()?;
                Ok(Outgoing {
                    id: envelope.id,
                    group: group.clone(),
                    frame,
                })
            })
            .and_then(|outgoing| self.enqueue(outgoing));

        match result {
            Ok(id) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    envelope_id = %id,
                    group = %group,
                    event = event.as_str(),
                    object_name = %entry.object_name,
                    "Notification queued"
                );
                PublishOutcome::Queued(id)
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(group = %group, kind = %kind, error = %e, "Notification dropped");
                PublishOutcome::Dropped
            }
        }
    }

    fn enqueue(&self, outgoing: Outgoing) -> Result<Uuid, PublishError> {
        let id = outgoing.id;
        match self.queue.try_send(outgoing) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => Err(PublishError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(PublishError::DispatcherStopped),
        }
    }
}

async fn dispatch_loop(registry: Arc<dyn GroupRegistry>, mut rx: mpsc::Receiver<Outgoing>) {
    while let Some(outgoing) = rx.recv().await {
        let delivered = registry.broadcast(&outgoing.group, outgoing.frame).await;
        tracing::debug!(
            envelope_id = %outgoing.id,
            group = %outgoing.group,
            delivered,
            "Notification dispatched"
        );
    }
    tracing::info!("Publish dispatcher stopped");
}
