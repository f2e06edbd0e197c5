//! End-to-end broadcast delivery tests over real QUIC.
//!
//! Each test starts a server on an ephemeral port and drives it with real
//! clients. Steps are sequenced by awaiting an observable effect (usually
//! the sender's own message echo) before acting again, so the expected
//! event orders are deterministic without sleeps.

use std::time::Duration;

use parley_client::{ChatClient, ServerEvent};
use parley_core::ANONYMOUS;
use parley_server::{Server, ServerRuntimeConfig};
use tokio::time::timeout;

/// Start a real server on an ephemeral port and return its address.
async fn start_server() -> String {
    let config =
        ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
    let server = Server::bind(config).unwrap();
    let addr = server.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    addr
}

/// Connect with retry. Avoids timing-dependent sleeps.
async fn connect_with_retry(addr: &str) -> ChatClient {
    for attempt in 0..20 {
        match ChatClient::connect(addr).await {
            Ok(client) => return client,
            Err(_) if attempt < 19 => {
                tokio::task::yield_now().await;
            },
            Err(e) => panic!("failed to connect after 20 attempts: {e}"),
        }
    }
    unreachable!()
}

/// Join and wait for the server to have processed it, by echoing a
/// message back to ourselves (message broadcasts include the sender).
async fn join_and_sync(client: &mut ChatClient, name: &str) {
    client.join(name).await.unwrap();

    let marker = format!("__sync_{name}");
    client.send_message(&marker).await.unwrap();

    loop {
        match timeout(Duration::from_secs(5), client.next_event()).await {
            Ok(Some(ServerEvent::Message(m))) if m.content == marker => return,
            Ok(Some(_)) => {},
            Ok(None) => panic!("connection closed while waiting for sync echo"),
            Err(_) => panic!("timed out waiting for sync echo"),
        }
    }
}

/// Next event, bounded by a timeout.
async fn expect_event(client: &mut ChatClient) -> ServerEvent {
    match timeout(Duration::from_secs(5), client.next_event()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("connection closed while waiting for an event"),
        Err(_) => panic!("timed out waiting for an event"),
    }
}

/// Assert that no further event arrives within a grace window.
async fn expect_silence(client: &mut ChatClient) {
    let result = timeout(Duration::from_millis(300), client.next_event()).await;
    assert!(result.is_err(), "expected no further events, got {result:?}");
}

#[tokio::test]
async fn message_reaches_all_connections_exactly_once() {
    let addr = start_server().await;

    let mut alice = connect_with_retry(&addr).await;
    join_and_sync(&mut alice, "alice").await;

    let mut bob = connect_with_retry(&addr).await;
    join_and_sync(&mut bob, "bob").await;

    // Alice observes bob arriving.
    match expect_event(&mut alice).await {
        ServerEvent::UserJoined(n) => {
            assert_eq!(n.username, "bob");
            assert_eq!(n.content, "bob joined");
        },
        other => panic!("expected bob's join, got {other:?}"),
    }
    match expect_event(&mut alice).await {
        ServerEvent::Message(m) => assert_eq!(m.content, "__sync_bob"),
        other => panic!("expected bob's sync echo, got {other:?}"),
    }

    alice.send_message("hello everyone").await.unwrap();

    // Delivered to every connection, sender included, exactly once.
    for client in [&mut alice, &mut bob] {
        match expect_event(client).await {
            ServerEvent::Message(m) => {
                assert_eq!(m.username, "alice");
                assert_eq!(m.content, "hello everyone");
            },
            other => panic!("expected alice's message, got {other:?}"),
        }
        expect_silence(client).await;
    }
}

#[tokio::test]
async fn join_notification_skips_the_joiner() {
    let addr = start_server().await;

    let mut alice = connect_with_retry(&addr).await;
    join_and_sync(&mut alice, "alice").await;

    let mut bob = connect_with_retry(&addr).await;
    bob.join("bob").await.unwrap();
    bob.send_message("first").await.unwrap();

    // Bob's first observed event is his own echo: his join notification
    // was never delivered back to him.
    match expect_event(&mut bob).await {
        ServerEvent::Message(m) => {
            assert_eq!(m.username, "bob");
            assert_eq!(m.content, "first");
        },
        other => panic!("expected bob's own echo first, got {other:?}"),
    }

    // Alice observes the join, then the message.
    match expect_event(&mut alice).await {
        ServerEvent::UserJoined(n) => assert_eq!(n.content, "bob joined"),
        other => panic!("expected join notification, got {other:?}"),
    }
    match expect_event(&mut alice).await {
        ServerEvent::Message(m) => assert_eq!(m.content, "first"),
        other => panic!("expected bob's message, got {other:?}"),
    }
}

#[tokio::test]
async fn typing_updates_exclude_sender_and_preserve_order() {
    let addr = start_server().await;

    let mut alice = connect_with_retry(&addr).await;
    join_and_sync(&mut alice, "alice").await;

    let mut bob = connect_with_retry(&addr).await;
    join_and_sync(&mut bob, "bob").await;

    // Drain bob's arrival from alice's stream.
    match expect_event(&mut alice).await {
        ServerEvent::UserJoined(_) => {},
        other => panic!("expected join, got {other:?}"),
    }
    match expect_event(&mut alice).await {
        ServerEvent::Message(_) => {},
        other => panic!("expected sync echo, got {other:?}"),
    }

    alice.set_typing(true).await.unwrap();
    alice.set_typing(false).await.unwrap();

    // Observer sees both updates in issue order.
    match expect_event(&mut bob).await {
        ServerEvent::Typing(t) => {
            assert_eq!(t.username, "alice");
            assert!(t.is_typing);
        },
        other => panic!("expected typing(true), got {other:?}"),
    }
    match expect_event(&mut bob).await {
        ServerEvent::Typing(t) => {
            assert_eq!(t.username, "alice");
            assert!(!t.is_typing);
        },
        other => panic!("expected typing(false), got {other:?}"),
    }

    // The sender never sees its own typing updates.
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn departure_notification_is_exactly_once() {
    let addr = start_server().await;

    let mut alice = connect_with_retry(&addr).await;
    join_and_sync(&mut alice, "alice").await;

    let mut bob = connect_with_retry(&addr).await;
    join_and_sync(&mut bob, "bob").await;

    match expect_event(&mut alice).await {
        ServerEvent::UserJoined(_) => {},
        other => panic!("expected join, got {other:?}"),
    }
    match expect_event(&mut alice).await {
        ServerEvent::Message(_) => {},
        other => panic!("expected sync echo, got {other:?}"),
    }

    bob.close();

    match expect_event(&mut alice).await {
        ServerEvent::UserLeft(n) => {
            assert_eq!(n.username, "bob");
            assert_eq!(n.content, "bob left");
        },
        other => panic!("expected departure, got {other:?}"),
    }

    // No duplicate departure.
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn unjoined_clients_relay_as_anonymous() {
    let addr = start_server().await;

    let mut alice = connect_with_retry(&addr).await;
    join_and_sync(&mut alice, "alice").await;

    // Bob never joins.
    let mut bob = connect_with_retry(&addr).await;
    bob.set_typing(true).await.unwrap();
    bob.send_message("hi").await.unwrap();

    match expect_event(&mut alice).await {
        ServerEvent::Typing(t) => {
            assert_eq!(t.username, ANONYMOUS);
            assert!(t.is_typing);
        },
        other => panic!("expected anonymous typing, got {other:?}"),
    }
    match expect_event(&mut alice).await {
        ServerEvent::Message(m) => {
            assert_eq!(m.username, ANONYMOUS);
            assert_eq!(m.content, "hi");
        },
        other => panic!("expected anonymous message, got {other:?}"),
    }

    // The anonymous departure uses the registry default too.
    bob.close();
    match expect_event(&mut alice).await {
        ServerEvent::UserLeft(n) => {
            assert_eq!(n.username, ANONYMOUS);
            assert_eq!(n.content, "Anonymous left");
        },
        other => panic!("expected anonymous departure, got {other:?}"),
    }
}
