//! POST /api/v1/events: publish hook for the REST service.
//!
//! The CRUD service calls this after committing a change to a watched
//! entity. The handler only enqueues; it answers before delivery happens.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::{DomainEntity, EventKind, PublishOutcome};
use crate::auth::middleware::ServiceCaller;
use crate::state::AppState;
use crate::ws::GroupName;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub event: EventKind,
    /// Target group; the broadcast group when omitted.
    #[serde(default)]
    pub group: Option<String>,
    pub entity: DomainEntity,
}

pub async fn publish_event(
    State(state): State<AppState>,
    _caller: ServiceCaller,
    Json(req): Json<PublishRequest>,
) -> Result<Response, (StatusCode, String)> {
    let group = match req.group.as_deref() {
        None => state.publisher.broadcast_group().clone(),
        Some("") => return Err((StatusCode::BAD_REQUEST, "Group must not be empty".to_string())),
        Some(name) => GroupName::new(name),
    };

    match state.publisher.publish(&group, req.event, &req.entity) {
        PublishOutcome::Queued(id) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "id": id, "group": group.as_str() })),
        )
            .into_response()),
        PublishOutcome::Unregistered(_) => Ok(StatusCode::NO_CONTENT.into_response()),
        PublishOutcome::Dropped => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Notification queue is full".to_string(),
        )),
    }
}
