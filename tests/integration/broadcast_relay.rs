// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for message fan-out over real loopback connections.
//!
//! These tests validate:
//! - A chat line reaches every other client and never echoes to the sender
//! - Join and leave notices are announced exactly once
//! - N clients each sending one line produce N * (N - 1) deliveries
//! - A client that stops reading does not hold up anyone else

mod support;

use std::collections::HashSet;

use support::{TestClient, start_relay, start_relay_with, test_config};

#[tokio::test]
async fn chat_line_reaches_others_but_not_sender() {
    let (server, addr, _handle) = start_relay().await;

    let mut alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    assert_eq!(alice.recv().await, "bob joined the chat.");

    alice.send("Hello Server!").await;

    assert_eq!(bob.recv().await, "alice: Hello Server!");
    bob.expect_silence().await;
    alice.expect_silence().await;

    server.shutdown();
}

#[tokio::test]
async fn welcome_names_the_client() {
    let (server, addr, _handle) = start_relay().await;

    let alice = TestClient::join(addr, "alice").await;
    assert_eq!(alice.name, "alice");
    assert_eq!(server.client_names(), vec!["alice".to_string()]);

    server.shutdown();
}

#[tokio::test]
async fn join_is_not_announced_to_the_joiner() {
    let (server, addr, _handle) = start_relay().await;

    let mut alice = TestClient::join(addr, "alice").await;
    alice.expect_silence().await;

    let mut bob = TestClient::join(addr, "bob").await;
    assert_eq!(alice.recv().await, "bob joined the chat.");
    bob.expect_silence().await;

    server.shutdown();
}

#[tokio::test]
async fn disconnect_announces_leave_exactly_once() {
    let (server, addr, _handle) = start_relay().await;

    let alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    let mut carol = TestClient::join(addr, "carol").await;
    assert_eq!(bob.recv().await, "carol joined the chat.");

    drop(alice);

    assert_eq!(bob.recv().await, "alice has left the chat.");
    assert_eq!(carol.recv().await, "alice has left the chat.");
    bob.expect_silence().await;
    carol.expect_silence().await;
    assert_eq!(
        server.client_names(),
        vec!["bob".to_string(), "carol".to_string()]
    );

    // The departed client is no longer a recipient.
    bob.send("still here?").await;
    assert_eq!(carol.recv().await, "bob: still here?");

    server.shutdown();
}

#[tokio::test]
async fn lines_from_one_sender_arrive_in_order() {
    let (server, addr, _handle) = start_relay().await;

    let mut alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    assert_eq!(alice.recv().await, "bob joined the chat.");

    for i in 0..50 {
        alice.send(&format!("message {i}")).await;
    }
    for i in 0..50 {
        assert_eq!(bob.recv().await, format!("alice: message {i}"));
    }

    server.shutdown();
}

#[tokio::test]
async fn crlf_and_blank_lines_are_relayed_as_text() {
    let (server, addr, _handle) = start_relay().await;

    let mut alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    assert_eq!(alice.recv().await, "bob joined the chat.");

    alice.send_raw(b"from windows\r\n\n").await;

    assert_eq!(bob.recv().await, "alice: from windows");
    assert_eq!(bob.recv().await, "alice: ");

    server.shutdown();
}

#[tokio::test]
async fn five_clients_produce_twenty_deliveries() {
    const CLIENTS: usize = 5;

    let (server, addr, _handle) = start_relay().await;

    let mut clients = Vec::new();
    for i in 0..CLIENTS {
        clients.push(TestClient::join(addr, &format!("user{i}")).await);
    }

    // Client i hears about every client that joined after it.
    let mut announced = HashSet::new();
    for (i, client) in clients.iter_mut().enumerate() {
        for j in i + 1..CLIENTS {
            let line = client.recv().await;
            assert_eq!(line, format!("user{j} joined the chat."));
            announced.insert(line);
        }
    }
    assert_eq!(announced.len(), CLIENTS - 1);

    let mut tasks = Vec::new();
    for mut client in clients {
        tasks.push(tokio::spawn(async move {
            client.send(&format!("hello from {}", client.name)).await;
            let mut received = Vec::new();
            for _ in 0..CLIENTS - 1 {
                received.push(client.recv().await);
            }
            client.expect_silence().await;
            (client.name.clone(), received)
        }));
    }

    let mut deliveries = 0;
    for task in tasks {
        let (name, received) = task.await.unwrap();
        let senders: HashSet<_> = received
            .iter()
            .map(|line| line.split_once(": ").unwrap().0.to_string())
            .collect();
        assert_eq!(senders.len(), CLIENTS - 1, "{name} got {received:?}");
        assert!(!senders.contains(&name), "{name} received its own line");
        deliveries += received.len();
    }
    assert_eq!(deliveries, CLIENTS * (CLIENTS - 1));

    server.shutdown();
}

#[tokio::test]
async fn stalled_reader_does_not_hold_up_others() {
    const FLOOD: usize = 4000;

    let mut config = test_config().await;
    config.outbound_queue_size = 8;
    let (server, addr, _handle) = start_relay_with(config).await;

    let mut alice = TestClient::join(addr, "alice").await;
    // Bob never reads while the flood is relayed.
    let mut bob = TestClient::join(addr, "bob").await;
    let mut carol = TestClient::join(addr, "carol").await;

    let listener = tokio::spawn(async move {
        loop {
            let line = carol.recv().await;
            if line == "alice: done" {
                return carol;
            }
            assert!(line.starts_with("alice: "), "unexpected line {line:?}");
        }
    });

    // Far more than the loopback socket buffers can absorb for bob.
    let chunk = "x".repeat(4000);
    for _ in 0..FLOOD {
        alice.send(&chunk).await;
    }
    // Let carol's queue drain so the marker is not dropped for her too.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    alice.send("done").await;

    let mut carol = tokio::time::timeout(support::WAIT * 6, listener)
        .await
        .expect("carol was held up by the stalled reader")
        .unwrap();

    // Membership changes still reach the clients that keep reading.
    let dave = TestClient::join(addr, "dave").await;
    assert_eq!(carol.recv().await, "dave joined the chat.");
    drop(dave);
    assert_eq!(carol.recv().await, "dave has left the chat.");

    // Bob overflowed but was not dropped; his backlog is simply short.
    assert!(server.client_names().contains(&"bob".to_string()));
    let backlog = bob.recv_available().await;
    let flooded = backlog
        .iter()
        .filter(|line| line.starts_with("alice: x"))
        .count();
    assert!(flooded < FLOOD, "bob received all {flooded} flood lines");

    server.shutdown();
}
