use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use coursecast_server::auth::{self, TokenAuthenticator};
use coursecast_server::config::{generate_config_template, Config};
use coursecast_server::notify::{EventPublisher, SerializerRegistry};
use coursecast_server::ws::{GroupRegistry, InMemoryGroupRegistry};
use coursecast_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("coursecast_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    tracing::info!("Coursecast server v{} starting", env!("CARGO_PKG_VERSION"));

    let groups = config.group_names()?;
    let session = config.session_config();

    // Identity store used to confirm that token subjects still exist
    let db = db::init_db(&config.data_dir)?;

    let jwt_secret = match &config.jwt_secret {
        Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
        _ => auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?,
    };

    if config.publish_token.is_none() {
        tracing::warn!("No publish_token configured, POST /api/v1/events is disabled");
    }

    // In-memory registry: fan-out is scoped to this process.
    let registry: Arc<dyn GroupRegistry> =
        Arc::new(InMemoryGroupRegistry::new(config.max_delivery_failures));

    let serializers = SerializerRegistry::standard();
    tracing::info!(
        broadcast_group = %groups.broadcast(),
        object_names = ?serializers.object_names(),
        "Notification groups configured"
    );

    let (publisher, _dispatcher) = EventPublisher::spawn(
        registry.clone(),
        serializers,
        groups.broadcast().clone(),
        config.publish_queue_capacity,
    );

    let app_state = state::AppState {
        authenticator: Arc::new(TokenAuthenticator::new(jwt_secret, db)),
        registry,
        publisher,
        groups: Arc::new(groups),
        session,
        publish_token: config.publish_token.clone(),
    };

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
