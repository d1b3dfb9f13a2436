//! Delivery Scenario Tests

use pretty_assertions::assert_eq;

use chat_relay::domain::topic_for;
use chat_relay::presentation::websocket::{codes, ServerFrame};
use chat_relay::shared::error::ChatError;

use crate::common::{SharedBackend, TestApp};

fn error_code(frame: &ServerFrame) -> Option<&str> {
    match frame {
        ServerFrame::Error(e) => Some(e.code.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn test_every_member_receives_chat_once() {
    let app = TestApp::new();
    let (alice, alice_token) = app.signup("alice").await;
    let (bob, bob_token) = app.signup("bob").await;
    let room = app.create_room(alice, &[bob]).await;

    let mut a = app.connect(&alice_token, &[room]).await.unwrap();
    let mut b = app.connect(&bob_token, &[room]).await.unwrap();

    a.send_chat(room, "hi");

    // The sender sees its own chat only through the broker.
    let from_a = a.next_chat().await;
    let from_b = b.next_chat().await;
    assert_eq!(from_a, from_b);
    assert_eq!(from_b.body, "hi");
    assert_eq!(from_b.sender_id, alice);
    assert_eq!(from_b.room_id, room);

    a.assert_silent().await;
    b.assert_silent().await;
    assert_eq!(app.backend.chats.stored(room).len(), 1);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_non_member_is_rejected_before_registration() {
    let app = TestApp::new();
    let (alice, alice_token) = app.signup("alice").await;
    let (_, carol_token) = app.signup("carol").await;
    let room = app.create_room(alice, &[]).await;

    let a = app.connect(&alice_token, &[room]).await.unwrap();

    let err = app.connect_raw(&carol_token, &[room]).await.err();
    assert_eq!(err, Some(ChatError::RoomNotFound(room)));
    assert_eq!(app.state.sessions.member_count(room), 1);
    assert_eq!(app.state.sessions.registry().member_count(room), 1);

    a.close().await;
}

#[tokio::test]
async fn test_missing_or_bad_token_is_rejected() {
    let app = TestApp::new();
    let (alice, _) = app.signup("alice").await;
    let room = app.create_room(alice, &[]).await;

    let err = app.connect_raw("not-a-token", &[room]).await.err();
    assert_eq!(err, Some(ChatError::InvalidToken));
    assert_eq!(app.state.sessions.active_sessions(), 0);
}

#[tokio::test]
async fn test_broker_outage_reports_to_sender_only() {
    let app = TestApp::new();
    let (alice, alice_token) = app.signup("alice").await;
    let (bob, bob_token) = app.signup("bob").await;
    let room = app.create_room(alice, &[bob]).await;

    let mut a = app.connect(&alice_token, &[room]).await.unwrap();
    let mut b = app.connect(&bob_token, &[room]).await.unwrap();

    app.backend.broker.set_online(false);
    a.send_chat(room, "lost");

    let frame = a.next_frame().await;
    assert_eq!(error_code(&frame), Some("BROKER_UNAVAILABLE"));
    b.assert_silent().await;

    // Delivery resumes once the broker is back; nothing stale is replayed.
    app.backend.broker.set_online(true);
    a.send_chat(room, "back");
    assert_eq!(b.next_chat().await.body, "back");
    assert_eq!(a.next_chat().await.body, "back");

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_persistence_failure_still_delivers() {
    let app = TestApp::new();
    let (alice, alice_token) = app.signup("alice").await;
    let (bob, bob_token) = app.signup("bob").await;
    let room = app.create_room(alice, &[bob]).await;

    let mut a = app.connect(&alice_token, &[room]).await.unwrap();
    let mut b = app.connect(&bob_token, &[room]).await.unwrap();

    app.backend.chats.set_failing(true);
    a.send_chat(room, "unsaved");

    assert_eq!(b.next_chat().await.body, "unsaved");

    // The echo and the error frame race; accept either order.
    let frames = [a.next_frame().await, a.next_frame().await];
    assert!(frames
        .iter()
        .any(|f| matches!(f, ServerFrame::Message(chat) if chat.body == "unsaved")));
    assert!(frames
        .iter()
        .any(|f| error_code(f) == Some("PERSISTENCE_ERROR")));
    assert!(app.backend.chats.stored(room).is_empty());

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_instances_deliver_in_the_same_order() {
    let backend = SharedBackend::new();
    let first = backend.instance(1);
    let second = backend.instance(2);

    let (alice, alice_token) = first.signup("alice").await;
    let (bob, bob_token) = first.signup("bob").await;
    let (carol, carol_token) = first.signup("carol").await;
    let room = first.create_room(alice, &[bob, carol]).await;

    let mut a = first.connect(&alice_token, &[room]).await.unwrap();
    let mut b = second.connect(&bob_token, &[room]).await.unwrap();
    let mut c = second.connect(&carol_token, &[room]).await.unwrap();

    // One subscription per instance serving the room.
    assert_eq!(backend.broker.subscriber_count(&topic_for(room)), 2);

    for i in 0..5 {
        a.send_chat(room, &format!("a{}", i));
        b.send_chat(room, &format!("b{}", i));
    }

    let mut seen = Vec::new();
    for client in [&mut a, &mut b, &mut c] {
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(client.next_chat().await.id);
        }
        seen.push(ids);
    }
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1], seen[2]);

    // Chats of one sender keep their send order.
    let stored = backend.chats.stored(room);
    let alice_order: Vec<&str> = seen[0]
        .iter()
        .filter_map(|id| stored.iter().find(|c| c.id == *id))
        .filter(|c| c.sender_id == alice)
        .map(|c| c.body.as_str())
        .collect();
    assert_eq!(alice_order, vec!["a0", "a1", "a2", "a3", "a4"]);

    a.close().await;
    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn test_chat_to_unjoined_room_keeps_connection() {
    let app = TestApp::new();
    let (alice, alice_token) = app.signup("alice").await;
    let joined = app.create_room(alice, &[]).await;
    let other = app.create_room(alice, &[]).await;

    let mut a = app.connect(&alice_token, &[joined]).await.unwrap();

    a.send_chat(other, "wrong room");
    assert_eq!(error_code(&a.next_frame().await), Some(codes::ROOM_NOT_JOINED));

    a.send_chat(joined, "  ");
    assert_eq!(error_code(&a.next_frame().await), Some(codes::INVALID_MESSAGE));

    a.send_chat(joined, &"x".repeat(201));
    assert_eq!(error_code(&a.next_frame().await), Some(codes::INVALID_MESSAGE));

    a.send_chat(joined, "right room");
    assert_eq!(a.next_chat().await.body, "right room");
    assert!(app.backend.chats.stored(other).is_empty());

    a.close().await;
}

#[tokio::test]
async fn test_history_is_sent_after_joining() {
    let app = TestApp::new();
    let (alice, alice_token) = app.signup("alice").await;
    let room = app.create_room(alice, &[]).await;

    let mut first = app.connect(&alice_token, &[room]).await.unwrap();
    first.send_chat(room, "one");
    first.send_chat(room, "two");
    first.next_chat().await;
    first.next_chat().await;
    first.close().await;

    let mut second = app.connect_raw(&alice_token, &[room]).await.unwrap();
    assert!(matches!(second.next_frame().await, ServerFrame::Ready(r) if r.rooms == vec![room]));
    match second.next_frame().await {
        ServerFrame::History(history) => {
            assert_eq!(history.room_id, room);
            let bodies: Vec<_> = history.messages.iter().map(|c| c.body.as_str()).collect();
            assert_eq!(bodies, vec!["one", "two"]);
        }
        other => panic!("expected history frame, got {:?}", other),
    }

    second.close().await;
}
