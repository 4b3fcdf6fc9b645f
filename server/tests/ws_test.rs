//! Integration tests for WebSocket auth gating, group membership, fan-out,
//! relay, and cleanup on disconnect.

mod common;

use common::*;
use coursecast_server::auth::jwt::issue_access_token;
use coursecast_server::notify::entities::{Course, DomainEntity, User};
use coursecast_server::notify::{Envelope, EventKind, PublishOutcome};
use coursecast_server::ws::actor::SessionConfig;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

fn course(id: i64) -> DomainEntity {
    let ts = "2025-03-01T12:00:00Z".parse().unwrap();
    DomainEntity::Course(Course {
        id,
        title: "Systems Programming".to_string(),
        author: 1,
        teachers: vec![1],
        students: vec![2, 3],
        created_at: ts,
        updated_at: ts,
    })
}

/// The server must close with 4001 before sending any data frame.
async fn assert_rejected(ws: &mut WsClient) {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(4001), "Expected close code 4001");
        }
        other => panic!("Expected close frame, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_authorization_is_rejected() {
    let server = start_test_server(None).await;
    let mut ws = connect(&server, None).await;

    assert_rejected(&mut ws).await;
    assert_eq!(server.registry.group_count(), 0);
}

#[tokio::test]
async fn test_bad_credentials_are_rejected() {
    let server = start_test_server(None).await;
    let (user_id, token) = server.create_user("alice");
    let expired = issue_access_token(JWT_SECRET, user_id, -3600).unwrap();
    let ghost = issue_access_token(JWT_SECRET, user_id + 500, 3600).unwrap();

    let headers = [
        "Bearer not-a-jwt".to_string(),
        format!("Token {}", token),
        format!("Bearer {}", expired),
        format!("Bearer {}", ghost),
    ];
    for header in &headers {
        let mut ws = connect(&server, Some(header)).await;
        assert_rejected(&mut ws).await;
    }
    assert_eq!(server.registry.group_count(), 0);
}

#[tokio::test]
async fn test_valid_token_joins_broadcast_and_personal_group() {
    let server = start_test_server(None).await;
    let (user_id, token) = server.create_user("alice");
    let _ws = connect_as(&server, &token).await;

    let broadcast = server.broadcast_group();
    server.wait_for_members(&broadcast, 1).await;

    let conn = server.registry.members(&broadcast)[0];
    let mut expected = vec![broadcast.clone(), server.groups.personal(user_id)];
    expected.sort();
    assert_eq!(server.registry.groups_of(conn), expected);
    assert_eq!(server.registry.group_count(), 2);
}

#[tokio::test]
async fn test_published_update_reaches_client_once() {
    let server = start_test_server(None).await;
    let (_user_id, token) = server.create_user("alice");
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&server.broadcast_group(), 1).await;

    let outcome = server.publisher.publish_to_broadcast(EventKind::Update, &course(7));

    let envelope = Envelope::decode(&next_text(&mut ws).await).expect("Envelope should decode");
    assert_eq!(outcome, PublishOutcome::Queued(envelope.id));
    assert_eq!(envelope.event, EventKind::Update);
    assert_eq!(envelope.object_name, "course");
    assert_eq!(envelope.obj["id"], 7);
    assert_eq!(envelope.obj["title"], "Systems Programming");
    assert_eq!(envelope.obj["students"], serde_json::json!([2, 3]));

    assert_silent(&mut ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unregistered_entity_is_not_pushed() {
    let server = start_test_server(None).await;
    let (_user_id, token) = server.create_user("alice");
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&server.broadcast_group(), 1).await;

    let user = DomainEntity::User(User {
        id: 1,
        username: "alice".to_string(),
        role: None,
    });
    server.publisher.publish_to_broadcast(EventKind::Update, &user);

    assert_silent(&mut ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_relay_stays_within_personal_group() {
    let server = start_test_server(None).await;
    let (_a, token_a) = server.create_user("alice");
    let (_b, token_b) = server.create_user("bob");

    let mut a1 = connect_as(&server, &token_a).await;
    let mut a2 = connect_as(&server, &token_a).await;
    let mut b = connect_as(&server, &token_b).await;
    server.wait_for_members(&server.broadcast_group(), 3).await;

    a1.send(Message::Text(r#"{"message": "hello me"}"#.into()))
        .await
        .expect("Failed to send");

    assert_eq!(next_text(&mut a1).await, "hello me");
    assert_eq!(next_text(&mut a2).await, "hello me");
    assert_silent(&mut b, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let server = start_test_server(None).await;
    let (_user_id, token) = server.create_user("alice");
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&server.broadcast_group(), 1).await;

    ws.send(Message::Text("definitely not json".into()))
        .await
        .expect("Failed to send");
    assert_silent(&mut ws, Duration::from_millis(200)).await;

    server.publisher.publish_to_broadcast(EventKind::Create, &course(1));
    let envelope = Envelope::decode(&next_text(&mut ws).await).unwrap();
    assert_eq!(envelope.event, EventKind::Create);
}

#[tokio::test]
async fn test_frames_arrive_in_publish_order() {
    let server = start_test_server(None).await;
    let (_user_id, token) = server.create_user("alice");
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&server.broadcast_group(), 1).await;

    for id in 1..=10 {
        server.publisher.publish_to_broadcast(EventKind::Update, &course(id));
    }
    for id in 1..=10 {
        let envelope = Envelope::decode(&next_text(&mut ws).await).unwrap();
        assert_eq!(envelope.obj["id"], id);
    }
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server(None).await;
    let (_user_id, token) = server.create_user("alice");
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&server.broadcast_group(), 1).await;

    ws.send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(&data[..], &[42u8, 43, 44][..], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_releases_membership() {
    let server = start_test_server(None).await;
    let (_user_id, token) = server.create_user("alice");
    let broadcast = server.broadcast_group();

    {
        let mut ws = connect_as(&server, &token).await;
        server.wait_for_members(&broadcast, 1).await;
        ws.send(Message::Close(None)).await.expect("Failed to send close");
    }

    server.wait_for_members(&broadcast, 0).await;
    assert_eq!(server.registry.group_count(), 0);

    // Reconnect works and lands in the same personal group.
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&broadcast, 1).await;
    assert_eq!(server.registry.group_count(), 2);
    server.publisher.publish_to_broadcast(EventKind::Update, &course(2));
    let envelope = Envelope::decode(&next_text(&mut ws).await).unwrap();
    assert_eq!(envelope.obj["id"], 2);
}

#[tokio::test]
async fn test_dropped_client_does_not_block_others() {
    let server = start_test_server(None).await;
    let (_a, token_a) = server.create_user("alice");
    let (_b, token_b) = server.create_user("bob");
    let broadcast = server.broadcast_group();

    let gone = connect_as(&server, &token_a).await;
    let mut alive = connect_as(&server, &token_b).await;
    server.wait_for_members(&broadcast, 2).await;

    // Abrupt TCP drop, no close handshake.
    drop(gone);

    for id in 1..=3 {
        server.publisher.publish_to_broadcast(EventKind::Update, &course(id));
    }
    for id in 1..=3 {
        let envelope = Envelope::decode(&next_text(&mut alive).await).unwrap();
        assert_eq!(envelope.obj["id"], id);
    }
    server.wait_for_members(&broadcast, 1).await;
}

#[tokio::test]
async fn test_silent_peer_closed_after_pong_timeout() {
    let server = start_test_server_with(
        None,
        SessionConfig {
            outbound_buffer: 32,
            ping_interval: Duration::from_millis(100),
            pong_timeout: Duration::from_millis(100),
        },
    )
    .await;
    let (_user_id, token) = server.create_user("alice");
    let broadcast = server.broadcast_group();

    // The client never polls, so it never answers the server's pings.
    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&broadcast, 1).await;
    server.wait_for_members(&broadcast, 0).await;
    assert_eq!(server.registry.group_count(), 0);

    let frame = next_close(&mut ws).await;
    assert_eq!(frame.code, CloseCode::from(1001));
}

#[tokio::test]
async fn test_stalled_reader_is_evicted_with_close_frame() {
    let server = start_test_server_with(
        None,
        SessionConfig {
            outbound_buffer: 1,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        },
    )
    .await;
    let (_user_id, token) = server.create_user("alice");
    let broadcast = server.broadcast_group();

    let mut ws = connect_as(&server, &token).await;
    server.wait_for_members(&broadcast, 1).await;

    // Large frames fill the socket buffers while the client reads nothing.
    let mut big = course(1);
    if let DomainEntity::Course(c) = &mut big {
        c.title = "x".repeat(256 * 1024);
    }
    for _ in 0..400 {
        if server.registry.members(&broadcast).is_empty() {
            break;
        }
        server.publisher.publish_to_broadcast(EventKind::Update, &big);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server.wait_for_members(&broadcast, 0).await;
    assert_eq!(server.registry.group_count(), 0);
    assert_eq!(server.registry.stats().evicted.load(Ordering::Relaxed), 1);

    let frame = next_close(&mut ws).await;
    assert_eq!(frame.code, CloseCode::from(4008));
}
