use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws/notification/
/// WebSocket upgrade endpoint. The credential is read from the
/// `Authorization: Bearer <token>` header here, while the request is still
/// HTTP, and resolved by the session after the upgrade. Connections that
/// resolve to anonymous are closed with code 4001 before any data frame.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    ws.on_upgrade(move |socket| actor::run_connection(socket, state, authorization))
}
