use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::state::AppState;
use crate::ws::protocol::{
    self, CLOSE_GOING_AWAY, CLOSE_REGISTRATION_FAILED, CLOSE_SLOW_CONSUMER, CLOSE_UNAUTHORIZED,
};
use crate::ws::{ConnectionHandle, GroupName, GroupNames, GroupRegistry, RegistryError};

/// How long a rejected connection gets to flush its close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the per-connection outbound queue
    pub outbound_buffer: usize,
    /// Server ping interval
    pub ping_interval: Duration,
    /// Close if no pong arrives within this window after a ping
    pub pong_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("anonymous connections are not allowed")]
    Anonymous,
    #[error("session is {0:?}, expected Authenticated")]
    WrongState(SessionState),
    #[error("group registration failed: {0}")]
    Registration(#[from] RegistryError),
}

/// Server-side state of one real-time connection.
///
/// Membership is fixed when the session becomes `Active`: the broadcast group
/// plus the user's own personal group. `close` tears it down exactly once,
/// from whatever state the session reached.
pub struct Session {
    state: SessionState,
    handle: ConnectionHandle,
    identity: Identity,
    personal_group: Option<GroupName>,
    registry: Arc<dyn GroupRegistry>,
}

impl Session {
    pub fn new(registry: Arc<dyn GroupRegistry>, handle: ConnectionHandle) -> Self {
        Self {
            state: SessionState::Connecting,
            handle,
            identity: Identity::Anonymous,
            personal_group: None,
            registry,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn personal_group(&self) -> Option<&GroupName> {
        self.personal_group.as_ref()
    }

    pub fn authenticated(&mut self, identity: Identity) {
        if self.state != SessionState::Connecting {
            tracing::error!(connection = %self.handle.id, state = ?self.state, "Authenticated out of order");
            return;
        }
        self.identity = identity;
        self.state = SessionState::Authenticated;
    }

    /// Join the broadcast and personal groups, all or nothing.
    pub async fn activate(&mut self, groups: &GroupNames) -> Result<(), ActivationError> {
        if self.state != SessionState::Authenticated {
            return Err(ActivationError::WrongState(self.state));
        }
        let Identity::User(user_id) = self.identity else {
            return Err(ActivationError::Anonymous);
        };

        for group in groups.memberships(user_id) {
            if let Err(e) = self.registry.join(&group, &self.handle).await {
                // Roll back whatever did get registered.
                self.registry.leave_all(self.handle.id).await;
                return Err(e.into());
            }
        }

        self.personal_group = Some(groups.personal(user_id));
        self.state = SessionState::Active;
        Ok(())
    }

    /// Relay an inbound client frame to this user's personal group.
    /// Malformed frames are dropped. Returns the number of receivers.
    pub async fn handle_text(&self, text: &str) -> usize {
        let Some(group) = self.personal_group.as_ref().filter(|_| self.state == SessionState::Active) else {
            return 0;
        };
        match protocol::parse_client_message(text) {
            Ok(msg) => self.registry.broadcast(group, msg.message.into()).await,
            Err(e) => {
                tracing::warn!(
                    connection = %self.handle.id,
                    error = %e,
                    "Discarding malformed client frame"
                );
                0
            }
        }
    }

    /// Leave every group. Only the first call does anything.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.registry.leave_all(self.handle.id).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        // Task was cancelled or panicked before close(); finish teardown in the background.
        let registry = self.registry.clone();
        let id = self.handle.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { registry.leave_all(id).await });
        }
    }
}

/// Run one WebSocket connection from accept to close.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from the bounded outbound queue
///   and sends the eviction close frame
/// - Ping task: periodic pings, closes the connection when pongs stop
/// - Reader loop (this task): relays client frames until the connection ends
pub async fn run_connection(socket: WebSocket, state: AppState, authorization: Option<String>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.session.outbound_buffer);
    let handle = ConnectionHandle::new(tx.clone());
    let connection_id = handle.id;
    let evicted = handle.evicted.clone();

    // Cancelled when the writer stops or the registry evicts the connection.
    let closing = evicted.child_token();
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx, evicted.clone(), closing.clone()));

    let mut session = Session::new(state.registry.clone(), handle);

    let identity = state.authenticator.authenticate(authorization.as_deref()).await;
    session.authenticated(identity);

    if let Err(e) = session.activate(&state.groups).await {
        let (code, reason) = match e {
            ActivationError::Anonymous => (CLOSE_UNAUTHORIZED, "Unauthorized"),
            _ => (CLOSE_REGISTRATION_FAILED, "Registration failed"),
        };
        tracing::warn!(connection = %connection_id, close_code = code, error = %e, "WebSocket rejected");

        session.close().await;
        let _ = tx
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
        drop(tx);
        drop(session);
        let _ = timeout(CLOSE_FLUSH_TIMEOUT, writer_handle).await;
        return;
    }

    let user_id = session.identity().user_id().unwrap_or_default();
    tracing::info!(
        connection = %connection_id,
        user_id,
        "WebSocket session active"
    );

    // Latest pong; the ping task only looks at pongs newer than its last ping.
    let (pong_tx, pong_rx) = watch::channel(());
    let ping_handle = tokio::spawn(ping_task(
        tx.clone(),
        pong_rx,
        closing.clone(),
        state.session.clone(),
    ));

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = closing.cancelled() => {
                tracing::info!(connection = %connection_id, user_id, "Connection closed by server");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    session.handle_text(text.as_str()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection = %connection_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    pong_tx.send_replace(());
                }
                Message::Ping(data) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection = %connection_id,
                        user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection = %connection_id,
                    user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection = %connection_id, user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    session.close().await;
    if evicted.is_cancelled() {
        // Let the writer deliver the eviction close frame.
        let _ = timeout(CLOSE_FLUSH_TIMEOUT, &mut writer_handle).await;
    }
    writer_handle.abort();

    tracing::info!(connection = %connection_id, user_id, "WebSocket session closed");
}

/// Forwards queued frames to the socket. Stops after a close frame, a failed
/// write, or eviction; on eviction the close frame goes straight to the sink
/// since the outbound queue is likely full.
async fn writer_task<S>(
    mut ws_sender: S,
    mut rx: mpsc::Receiver<Message>,
    evicted: CancellationToken,
    closing: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = evicted.cancelled() => {
                let _ = ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_SLOW_CONSUMER,
                        reason: "Too slow".into(),
                    })))
                    .await;
                break;
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let is_close = matches!(msg, Message::Close(_));
                if ws_sender.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        }
    }
    closing.cancel();
}

async fn ping_task(
    tx: mpsc::Sender<Message>,
    mut pong_rx: watch::Receiver<()>,
    closing: CancellationToken,
    config: SessionConfig,
) {
    let mut ping_timer = interval(config.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Pongs that arrived before this ping do not count.
        let _ = pong_rx.borrow_and_update();
        match tx.try_send(Message::Ping(vec![1, 2, 3, 4].into())) {
            Ok(()) => {}
            // Backlogged peer: the registry deals with it.
            Err(TrySendError::Full(_)) => continue,
            Err(TrySendError::Closed(_)) => break,
        }

        match timeout(config.pong_timeout, pong_rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                tracing::warn!("Pong timeout, closing connection");
                let close = Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                }));
                if tx.try_send(close).is_err() {
                    closing.cancel();
                }
                break;
            }
        }
    }
}
