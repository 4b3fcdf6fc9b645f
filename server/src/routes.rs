use axum::{middleware, Router};

use crate::auth::middleware::PublishToken;
use crate::notify::ingress;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Path of the WebSocket upgrade endpoint.
pub const WS_PATH: &str = "/ws/notification/";

/// Inject the publish token into request extensions so the ServiceCaller extractor can find it.
async fn inject_publish_token(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(PublishToken(state.publish_token.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via Authorization header, resolved after upgrade)
    let ws_routes = Router::new().route(WS_PATH, axum::routing::get(ws_handler::ws_upgrade));

    // Event ingress for the REST service (service bearer token required)
    let ingress_routes = Router::new().route(
        "/api/v1/events",
        axum::routing::post(ingress::publish_event),
    );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(ingress_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_publish_token,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
