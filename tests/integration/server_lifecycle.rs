// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for server launch, failure isolation, and shutdown.
//!
//! These tests validate:
//! - Out-of-range ports and occupied addresses are reported as errors
//! - Shutdown closes every open connection and makes `launch` return
//! - A client that breaks the protocol is dropped without affecting others

mod support;

use linechat_relay::server::{Server, ServerError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use support::{TestClient, WAIT, start_relay, start_relay_with, test_config};

#[test]
fn out_of_range_ports_are_rejected() {
    for port in [0, -5, 65536] {
        assert!(matches!(Server::new(port), Err(ServerError::InvalidPort(p)) if p == port));
    }
    for port in [1, 65535] {
        assert!(Server::new(port).is_ok());
    }
}

#[tokio::test]
async fn occupied_address_is_reported() {
    let config = test_config().await;
    let occupier = tokio::net::TcpListener::bind(("127.0.0.1", u16::try_from(config.port).unwrap()))
        .await
        .unwrap();

    let server = Server::with_config(config).unwrap();
    let result = server.launch().await;

    assert!(
        matches!(result, Err(ServerError::AddressInUse(_))),
        "expected AddressInUse, got {result:?}"
    );
    drop(occupier);
}

#[tokio::test]
async fn shutdown_closes_clients_and_launch_returns() {
    let config = test_config().await;
    let addr = format!("127.0.0.1:{}", config.port).parse().unwrap();
    let server = Server::with_config(config).unwrap();

    let running = server.clone();
    let launched = tokio::spawn(async move { running.launch().await });

    let mut alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    let mut carol = TestClient::join(addr, "carol").await;
    let mut pending = TestClient::connect(addr).await;
    assert_eq!(server.client_names().len(), 3);

    server.shutdown_handle().shutdown();

    let result = tokio::time::timeout(WAIT, launched)
        .await
        .expect("launch did not return after shutdown")
        .unwrap();
    assert!(result.is_ok());

    // Join notices queued before shutdown may still arrive; leave notices
    // must not, since nobody left on their own.
    for client in [&mut alice, &mut bob, &mut carol, &mut pending] {
        let lines = client.recv_until_closed().await;
        assert!(
            lines.iter().all(|l| !l.ends_with("has left the chat.")),
            "unexpected leave notice in {lines:?}"
        );
    }
    assert!(server.client_names().is_empty());
}

#[tokio::test]
async fn accept_loop_handle_completes_after_shutdown() {
    let (server, addr, handle) = start_relay().await;
    let _alice = TestClient::join(addr, "alice").await;

    let stopper = server.shutdown_handle();
    let concurrent = tokio::spawn(async move { stopper.shutdown() });
    server.shutdown();
    concurrent.await.unwrap();

    tokio::time::timeout(WAIT, handle)
        .await
        .expect("accept loop did not stop")
        .unwrap();
    assert!(server.shutdown_handle().is_shutdown());
}

#[tokio::test]
async fn new_connections_are_refused_after_shutdown() {
    let (server, addr, handle) = start_relay().await;
    server.shutdown();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn over_long_line_drops_only_the_offender() {
    let mut config = test_config().await;
    config.max_line_length = 64;
    let (server, addr, _handle) = start_relay_with(config).await;

    let mut alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    let mut mallory = TestClient::join(addr, "mallory").await;
    assert_eq!(alice.recv().await, "bob joined the chat.");
    assert_eq!(alice.recv().await, "mallory joined the chat.");
    assert_eq!(bob.recv().await, "mallory joined the chat.");

    let flood = "x".repeat(1000);
    mallory.send(&flood).await;
    mallory.recv_until_closed().await;

    assert_eq!(alice.recv().await, "mallory has left the chat.");
    assert_eq!(bob.recv().await, "mallory has left the chat.");

    alice.send("still fine").await;
    assert_eq!(bob.recv().await, "alice: still fine");
    assert_eq!(
        server.client_names(),
        vec!["alice".to_string(), "bob".to_string()]
    );

    server.shutdown();
}

#[tokio::test]
async fn aborted_connections_do_not_stop_accepting() {
    let (server, addr, _handle) = start_relay().await;

    for _ in 0..10 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"half a nick").await.unwrap();
        drop(stream);
    }

    let mut alice = TestClient::join(addr, "alice").await;
    let mut bob = TestClient::join(addr, "bob").await;
    assert_eq!(alice.recv().await, "bob joined the chat.");
    bob.send("hi").await;
    assert_eq!(alice.recv().await, "bob: hi");

    server.shutdown();
}

#[tokio::test]
async fn servers_on_different_ports_are_independent() {
    let (first, first_addr, _h1) = start_relay().await;
    let (second, second_addr, _h2) = start_relay().await;

    let mut a = TestClient::join(first_addr, "alice").await;
    let _b = TestClient::join(second_addr, "bob").await;

    assert_eq!(first.client_names(), vec!["alice".to_string()]);
    assert_eq!(second.client_names(), vec!["bob".to_string()]);
    a.expect_silence().await;

    first.shutdown();
    second.shutdown();
}
