use std::sync::Arc;

use crate::auth::TokenAuthenticator;
use crate::notify::EventPublisher;
use crate::ws::actor::SessionConfig;
use crate::ws::{GroupNames, GroupRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Resolves upgrade credentials to users
    pub authenticator: Arc<TokenAuthenticator>,
    /// Group membership for every live connection
    pub registry: Arc<dyn GroupRegistry>,
    /// Queue into the broadcast dispatcher
    pub publisher: EventPublisher,
    /// Broadcast and personal group naming
    pub groups: Arc<GroupNames>,
    /// Per-connection buffer and keepalive settings
    pub session: SessionConfig,
    /// Bearer secret for the event ingress endpoint; ingress is off when unset
    pub publish_token: Option<String>,
}
