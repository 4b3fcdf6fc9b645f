//! Shared helpers: in-process server on a random port plus a WS client.

#![allow(dead_code)]

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use coursecast_server::auth::TokenAuthenticator;
use coursecast_server::db::{self, DbPool};
use coursecast_server::notify::{EventPublisher, SerializerRegistry};
use coursecast_server::state::AppState;
use coursecast_server::ws::actor::SessionConfig;
use coursecast_server::ws::{GroupName, GroupNames, InMemoryGroupRegistry};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const JWT_SECRET: &[u8] = b"integration-test-secret";
pub const PUBLISH_TOKEN: &str = "publish-secret";

pub struct TestServer {
    pub addr: SocketAddr,
    pub db: DbPool,
    pub registry: Arc<InMemoryGroupRegistry>,
    pub publisher: EventPublisher,
    pub groups: GroupNames,
    _tmp_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, coursecast_server::routes::WS_PATH)
    }

    /// Insert a user and return (user_id, access_token).
    pub fn create_user(&self, username: &str) -> (i64, String) {
        let user_id = {
            let conn = self.db.lock().unwrap();
            db::models::insert_user(&conn, username, Some("STUDENT")).unwrap()
        };
        let token =
            coursecast_server::auth::jwt::issue_access_token(JWT_SECRET, user_id, 3600).unwrap();
        (user_id, token)
    }

    pub fn broadcast_group(&self) -> GroupName {
        self.groups.broadcast().clone()
    }

    /// Wait until `group` has exactly `count` members.
    pub async fn wait_for_members(&self, group: &GroupName, count: usize) {
        for _ in 0..200 {
            if self.registry.members(group).len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "Group {} has {} members, expected {}",
            group,
            self.registry.members(group).len(),
            count
        );
    }
}

pub async fn start_test_server(publish_token: Option<&str>) -> TestServer {
    start_test_server_with(
        publish_token,
        SessionConfig {
            outbound_buffer: 32,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        },
    )
    .await
}

/// Server with custom per-connection buffering and keepalive.
pub async fn start_test_server_with(publish_token: Option<&str>, session: SessionConfig) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let db = db::init_db(&data_dir).expect("Failed to init DB");

    let groups = GroupNames::default();
    let registry = Arc::new(InMemoryGroupRegistry::new(3));
    let (publisher, _dispatcher) = EventPublisher::spawn(
        registry.clone(),
        SerializerRegistry::standard(),
        groups.broadcast().clone(),
        64,
    );

    let state = AppState {
        authenticator: Arc::new(TokenAuthenticator::new(JWT_SECRET.to_vec(), db.clone())),
        registry: registry.clone(),
        publisher: publisher.clone(),
        groups: Arc::new(groups.clone()),
        session,
        publish_token: publish_token.map(str::to_owned),
    };

    let app = coursecast_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        db,
        registry,
        publisher,
        groups,
        _tmp_dir: tmp_dir,
    }
}

/// Open a WebSocket, optionally with an `Authorization` header value.
pub async fn connect(server: &TestServer, authorization: Option<&str>) -> WsClient {
    let mut request = server.ws_url().into_client_request().unwrap();
    if let Some(value) = authorization {
        request
            .headers_mut()
            .insert("Authorization", value.parse().unwrap());
    }
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

pub async fn connect_as(server: &TestServer, token: &str) -> WsClient {
    connect(server, Some(&format!("Bearer {}", token))).await
}

/// Next text frame, failing on anything else or after two seconds.
pub async fn next_text(ws: &mut WsClient) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected a frame within timeout");
    match msg {
        Some(Ok(Message::Text(text))) => text.as_str().to_string(),
        other => panic!("Expected text frame, got: {:?}", other),
    }
}

/// Skip data and control frames until the server's close frame arrives.
pub async fn next_close(ws: &mut WsClient) -> CloseFrame {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => panic!("Expected a close frame within timeout"),
            Ok(Some(Ok(Message::Close(Some(frame))))) => return frame,
            Ok(Some(Ok(Message::Close(None)))) => panic!("Close frame carried no code"),
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("Expected close frame, got: {:?}", other),
        }
    }
}

/// Assert nothing but control frames arrives within `window`.
pub async fn assert_silent(ws: &mut WsClient, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected no frame, got: {:?}", other),
        }
    }
}
