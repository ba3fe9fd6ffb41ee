// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! End-to-end signaling tests against an in-process relay.
//!
//! Each test starts a relay on an OS-assigned port and drives it with real
//! WebSocket clients, checking join announcements, departures, negotiation
//! forwarding, and tolerance of malformed input.
//!
//! Verification command: `cargo test --test signaling_flow`

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_proto::peer::{PeerId, PeerInfo};
use huddle_proto::signal::{self, Inbound, NegotiationKind, Payload, SignalMessage};
use huddle_relay::relay::start_server;
use tokio_tungstenite::tungstenite;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait before concluding that no frame is coming.
const QUIET: Duration = Duration::from_millis(300);

/// Starts a relay on a random port for testing.
async fn start_relay() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay")
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

/// Receives the next text frame as raw JSON.
async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .unwrap();
        if let tungstenite::Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn recv(ws: &mut WsStream) -> Inbound {
    signal::decode(&recv_text(ws).await).unwrap()
}

/// Asserts that no text frame arrives within [`QUIET`].
async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(msg))) = tokio::time::timeout(QUIET, ws.next()).await {
        panic!("expected silence, got {msg:?}");
    }
}

/// Connects, joins with `name`, and returns the socket and assigned identity.
///
/// Consumes the `your-id` and `existing-peers` frames and returns the peers
/// listed in the latter.
async fn join(addr: std::net::SocketAddr, name: &str) -> (WsStream, PeerId, Vec<PeerInfo>) {
    let mut ws = connect(addr).await;
    send_text(&mut ws, &format!(r#"{{"type":"join","name":"{name}"}}"#)).await;

    let Inbound::Signal(SignalMessage::YourId { id }) = recv(&mut ws).await else {
        panic!("expected your-id first");
    };
    let Inbound::Signal(SignalMessage::ExistingPeers { peers }) = recv(&mut ws).await else {
        panic!("expected existing-peers second");
    };
    (ws, id, peers)
}

fn new_peer(id: &PeerId, name: &str) -> Inbound {
    Inbound::Signal(SignalMessage::NewPeer {
        id: id.clone(),
        name: name.to_string(),
    })
}

fn peer_left(id: &PeerId) -> Inbound {
    Inbound::Signal(SignalMessage::PeerLeft { id: id.clone() })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn two_clients_learn_about_each_other() {
    let (addr, _handle) = start_relay().await;

    let (mut alice, alice_id, alice_peers) = join(addr, "Alice").await;
    assert!(alice_peers.is_empty());

    let (mut bob, bob_id, bob_peers) = join(addr, "Bob").await;
    assert_ne!(alice_id, bob_id);
    assert_eq!(
        bob_peers,
        vec![PeerInfo {
            id: alice_id.clone(),
            name: "Alice".to_string()
        }]
    );

    assert_eq!(recv(&mut alice).await, new_peer(&bob_id, "Bob"));
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn departure_is_announced_and_final() {
    let (addr, _handle) = start_relay().await;

    let (alice, alice_id, _) = join(addr, "Alice").await;
    let (mut bob, _bob_id, _) = join(addr, "Bob").await;

    drop(alice);
    assert_eq!(recv(&mut bob).await, peer_left(&alice_id));

    // A late offer to the departed id vanishes without an error.
    send_text(
        &mut bob,
        &format!(r#"{{"type":"offer","to":"{alice_id}","sdp":{{"type":"offer","sdp":"v=0"}}}}"#),
    )
    .await;
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn offer_answer_ice_round_trip() {
    let (addr, _handle) = start_relay().await;

    let (mut alice, alice_id, _) = join(addr, "Alice").await;
    let (mut bob, bob_id, _) = join(addr, "Bob").await;
    assert_eq!(recv(&mut alice).await, new_peer(&bob_id, "Bob"));

    // Existing participant offers to the newcomer, as browsers do on new-peer.
    let offer_sdp = r#"{"type":"offer","sdp":"v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\ns=-\r\n"}"#;
    send_text(
        &mut alice,
        &format!(r#"{{"type":"offer","to":"{bob_id}","from":"{alice_id}","sdp":{offer_sdp}}}"#),
    )
    .await;
    let Inbound::Negotiation(offer) = recv(&mut bob).await else {
        panic!("expected offer");
    };
    assert_eq!(offer.kind, NegotiationKind::Offer);
    assert_eq!(offer.from.as_ref(), Some(&alice_id));
    assert_eq!(offer.name(), Some(&Payload::from_value("Alice").unwrap()));
    assert_eq!(offer.sdp(), Some(&Payload::from_json(offer_sdp).unwrap()));

    let answer_sdp = r#"{"type":"answer","sdp":"v=0\r\n"}"#;
    send_text(
        &mut bob,
        &format!(r#"{{"type":"answer","to":"{alice_id}","sdp":{answer_sdp}}}"#),
    )
    .await;
    let Inbound::Negotiation(answer) = recv(&mut alice).await else {
        panic!("expected answer");
    };
    assert_eq!(answer.kind, NegotiationKind::Answer);
    assert_eq!(answer.from.as_ref(), Some(&bob_id));
    assert_eq!(answer.sdp().unwrap().as_json(), answer_sdp);

    let candidate = r#"{"candidate":"candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx","sdpMid":"0","sdpMLineIndex":0}"#;
    send_text(
        &mut bob,
        &format!(r#"{{"type":"ice","to":"{alice_id}","candidate":{candidate}}}"#),
    )
    .await;
    let raw = recv_text(&mut alice).await;
    assert!(raw.contains(candidate), "candidate not verbatim in {raw}");
    let Inbound::Negotiation(ice) = signal::decode(&raw).unwrap() else {
        panic!("expected ice");
    };
    assert_eq!(ice.kind, NegotiationKind::Ice);
    assert_eq!(ice.from, Some(bob_id));
}

#[tokio::test]
async fn spoofed_from_is_replaced() {
    let (addr, _handle) = start_relay().await;

    let (mut alice, alice_id, _) = join(addr, "Alice").await;
    let (mut bob, bob_id, _) = join(addr, "Bob").await;
    let _ = recv(&mut alice).await;

    send_text(
        &mut bob,
        &format!(r#"{{"type":"ice","to":"{alice_id}","from":"{alice_id}","candidate":null}}"#),
    )
    .await;
    let Inbound::Negotiation(ice) = recv(&mut alice).await else {
        panic!("expected ice");
    };
    assert_eq!(ice.from, Some(bob_id));
}

#[tokio::test]
async fn malformed_json_changes_nothing() {
    let (addr, _handle) = start_relay().await;

    let (mut alice, _alice_id, _) = join(addr, "Alice").await;
    let (mut bob, bob_id, _) = join(addr, "Bob").await;
    let _ = recv(&mut alice).await;

    for junk in ["{", "null", r#"{"type":"teleport"}"#, r#"{"type":"join","name":7}"#] {
        send_text(&mut bob, junk).await;
    }
    bob.send(tungstenite::Message::Binary(vec![0xde, 0xad].into()))
        .await
        .unwrap();
    assert_silent(&mut alice).await;
    assert_silent(&mut bob).await;

    // Bob's connection still works.
    send_text(&mut alice, r#"{"type":"join","name":"again"}"#).await;
    let (_carol, carol_id, carol_peers) = join(addr, "Carol").await;
    assert_eq!(carol_peers.len(), 2);
    assert_eq!(recv(&mut bob).await, new_peer(&carol_id, "Carol"));
    assert!(carol_peers.iter().any(|p| p.id == bob_id));
}

#[tokio::test]
async fn simultaneous_joins_are_fully_connected() {
    const CLIENTS: usize = 8;
    let (addr, _handle) = start_relay().await;

    let mut sockets = Vec::new();
    for _ in 0..CLIENTS {
        sockets.push(connect(addr).await);
    }
    // Fire every join before reading anything.
    for (i, ws) in sockets.iter_mut().enumerate() {
        send_text(ws, &format!(r#"{{"type":"join","name":"p{i}"}}"#)).await;
    }

    let mut views = Vec::new();
    for ws in &mut sockets {
        let Inbound::Signal(SignalMessage::YourId { id }) = recv(ws).await else {
            panic!("expected your-id first");
        };
        let mut known = std::collections::HashSet::new();
        let mut frames = 0;
        // Every peer arrives exactly once, via existing-peers or new-peer.
        while known.len() < CLIENTS - 1 {
            match recv(ws).await {
                Inbound::Signal(SignalMessage::ExistingPeers { peers }) => {
                    for p in peers {
                        assert!(known.insert(p.id));
                    }
                }
                Inbound::Signal(SignalMessage::NewPeer { id, .. }) => {
                    assert!(known.insert(id));
                }
                other => panic!("unexpected frame {other:?}"),
            }
            frames += 1;
            assert!(frames <= CLIENTS, "too many frames");
        }
        assert!(!known.contains(&id));
        views.push((id, known));
    }

    let all: std::collections::HashSet<PeerId> = views.iter().map(|(id, _)| id.clone()).collect();
    for (id, known) in views {
        let mut expected = all.clone();
        expected.remove(&id);
        assert_eq!(known, expected);
    }
}

#[tokio::test]
async fn unjoined_connection_is_invisible() {
    let (addr, _handle) = start_relay().await;

    let mut lurker = connect(addr).await;
    let (alice, alice_id, peers) = join(addr, "Alice").await;
    assert!(peers.is_empty());
    assert_silent(&mut lurker).await;

    drop(alice);
    assert_silent(&mut lurker).await;

    // Joining later only reports who is there now.
    send_text(&mut lurker, r#"{"type":"join"}"#).await;
    let Inbound::Signal(SignalMessage::YourId { id }) = recv(&mut lurker).await else {
        panic!("expected your-id");
    };
    assert_ne!(id, alice_id);
    assert_eq!(
        recv(&mut lurker).await,
        Inbound::Signal(SignalMessage::ExistingPeers { peers: vec![] })
    );
}
