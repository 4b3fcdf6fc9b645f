//! Domain-event notifications: envelope codec, entity serializers, the
//! publisher used by data-layer hooks, and the HTTP ingress for
//! out-of-process publishers.

pub mod entities;
pub mod envelope;
pub mod ingress;
pub mod publisher;

pub use entities::{DomainEntity, EntityKind, SerializerRegistry};
pub use envelope::{Envelope, EventKind};
pub use publisher::{EventPublisher, PublishOutcome};
