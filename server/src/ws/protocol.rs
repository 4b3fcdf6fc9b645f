//! Client-to-server frames and WebSocket close codes.

use serde::Deserialize;

/// Sent when the upgrade carried no usable credential. The same code is used
/// for a missing header and for a bad token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Sent when group registration failed at connect time.
pub const CLOSE_REGISTRATION_FAILED: u16 = 1011;

/// Going away: ping timeout.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Sent to a peer the registry evicted for not keeping up.
pub const CLOSE_SLOW_CONSUMER: u16 = 4008;

/// Inbound text frame: `{"message": "<string>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientMessage {
    pub message: String,
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}
