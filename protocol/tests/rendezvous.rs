//! PeerSocket / PeerServer rendezvous through a real relay, with the
//! in-process RTC backend standing in for WebRTC.

mod common;

use std::time::Duration;

use common::{patiently, peer_options, spawn_relay, wait_for_topics};
use websign_protocol::signaling::{
    LoopbackConnector, PeerServer, PeerSignal, PeerSocket, RelayClient, RelayMessage,
    ServerEvent, SignalingError,
};
use websign_protocol::transport::{PeerTransport, TransportError, TransportEvent};

async fn expect_open(transport: &mut PeerTransport) {
    match patiently(transport.next_event()).await {
        Some(TransportEvent::Open) => {}
        other => panic!("expected open, got {other:?}"),
    }
}

async fn expect_message(transport: &mut PeerTransport) -> String {
    match patiently(transport.next_event()).await {
        Some(TransportEvent::Message(m)) => m,
        other => panic!("expected a message, got {other:?}"),
    }
}

#[tokio::test]
async fn socket_and_server_open_a_channel() {
    let relay = spawn_relay().await;
    let connector = LoopbackConnector::new();

    let mut server = PeerServer::bind("channel-1", peer_options(&relay.endpoint, &connector));
    assert!(matches!(
        patiently(server.next_event()).await,
        Some(ServerEvent::Listening)
    ));
    wait_for_topics(&relay, 1).await;

    let mut client = PeerSocket::connect("channel-1", peer_options(&relay.endpoint, &connector));
    let mut accepted = patiently(server.accept()).await.unwrap();

    expect_open(&mut client).await;
    expect_open(&mut accepted).await;

    client.send("hello from the initiator").unwrap();
    assert_eq!(expect_message(&mut accepted).await, "hello from the initiator");
    accepted.send("hello back").unwrap();
    assert_eq!(expect_message(&mut client).await, "hello back");

    // Single use: the server is done after one connection.
    assert!(patiently(server.next_event()).await.is_none());

    // Both sides are off the relay once the channel is up.
    patiently(async {
        while relay.hub.stats().connections != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(relay.hub.stats().topics, 0);

    client.close();
    assert_eq!(patiently(client.next_event()).await, Some(TransportEvent::Close));
    assert_eq!(patiently(accepted.next_event()).await, Some(TransportEvent::Close));
}

#[tokio::test]
async fn dialing_an_unbound_topic_is_room_not_found() {
    let relay = spawn_relay().await;
    let connector = LoopbackConnector::new();

    let mut client = PeerSocket::connect("nobody-home", peer_options(&relay.endpoint, &connector));
    match patiently(client.next_event()).await {
        Some(TransportEvent::Error(TransportError::Signaling(SignalingError::RoomNotFound(topic)))) => {
            assert_eq!(topic, "nobody-home");
        }
        other => panic!("expected room not found, got {other:?}"),
    }
    assert_eq!(patiently(client.next_event()).await, Some(TransportEvent::Close));
    assert_eq!(
        client.send("anyone?"),
        Err(TransportError::Closed)
    );
}

#[tokio::test]
async fn first_responder_wins_the_race() {
    let relay = spawn_relay().await;
    let connector = LoopbackConnector::new();

    // The first server owns the topic and is its oldest subscriber.
    let mut first = PeerServer::bind("contested", peer_options(&relay.endpoint, &connector));
    assert!(matches!(
        patiently(first.next_event()).await,
        Some(ServerEvent::Listening)
    ));
    wait_for_topics(&relay, 1).await;
    let mut second = PeerServer::bind("contested", peer_options(&relay.endpoint, &connector));
    assert!(matches!(
        patiently(second.next_event()).await,
        Some(ServerEvent::Listening)
    ));
    // Both subscriptions must be in before the offer goes out.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = PeerSocket::connect("contested", peer_options(&relay.endpoint, &connector));
    let mut accepted = match patiently(first.next_event()).await {
        Some(ServerEvent::Connection(link)) => link,
        other => panic!("expected a connection, got {other:?}"),
    };
    expect_open(&mut client).await;
    expect_open(&mut accepted).await;

    // The loser never hears the offer and steps down once the winner
    // leaves the relay, without an error and without being closed.
    match patiently(second.next_event()).await {
        None => {}
        other => panic!("loser should end quietly, got {other:?}"),
    }
    wait_for_topics(&relay, 0).await;
    patiently(async {
        while relay.hub.stats().connections != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // The channel stays usable after the loser is gone.
    client.send("still here").unwrap();
    assert_eq!(expect_message(&mut accepted).await, "still here");
}

#[tokio::test]
async fn lost_link_is_reported() {
    let relay = spawn_relay().await;
    let connector = LoopbackConnector::new();

    let mut server = PeerServer::bind("flaky", peer_options(&relay.endpoint, &connector));
    patiently(server.next_event()).await;
    wait_for_topics(&relay, 1).await;

    let mut client = PeerSocket::connect("flaky", peer_options(&relay.endpoint, &connector));
    let mut accepted = patiently(server.accept()).await.unwrap();
    expect_open(&mut client).await;
    expect_open(&mut accepted).await;

    connector.sever_all();
    match patiently(client.next_event()).await {
        Some(TransportEvent::Error(TransportError::Signaling(SignalingError::ConnectionLost(_)))) => {}
        other => panic!("expected connection lost, got {other:?}"),
    }
    assert_eq!(patiently(client.next_event()).await, Some(TransportEvent::Close));
}

#[tokio::test]
async fn cancelled_dial_leaves_nothing_on_the_relay() {
    let relay = spawn_relay().await;
    let connector = LoopbackConnector::new();

    let mut server = PeerServer::bind("patient", peer_options(&relay.endpoint, &connector));
    patiently(server.next_event()).await;
    wait_for_topics(&relay, 1).await;

    // Abort the server first: nobody answers, the dial hangs on the relay.
    server.close();
    wait_for_topics(&relay, 0).await;

    let mut client = PeerSocket::connect("patient", peer_options(&relay.endpoint, &connector));
    // Either the offer bounced (room not found) or we abort mid-dial; in
    // both cases the socket goes away and no error outlives the close.
    client.close();
    loop {
        match patiently(client.next_event()).await {
            Some(TransportEvent::Close) => break,
            Some(TransportEvent::Error(_)) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    patiently(async {
        while relay.hub.stats().connections != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn closing_mid_exchange_hangs_up_on_the_relay() {
    let relay = spawn_relay().await;
    let connector = LoopbackConnector::new();

    // A responder that takes the offer and never answers.
    let mut silent = RelayClient::connect(&relay.endpoint).await.unwrap();
    silent.create_topic("silent").await.unwrap();
    silent.consume("silent").await.unwrap();
    wait_for_topics(&relay, 1).await;

    let mut client = PeerSocket::connect("silent", peer_options(&relay.endpoint, &connector));
    match patiently(silent.next()).await {
        Some(Ok(RelayMessage::Message { data })) => {
            assert!(matches!(PeerSignal::parse(&data), Ok(PeerSignal::Offer { .. })));
        }
        other => panic!("expected an offer, got {other:?}"),
    }
    // The dialer's reply topic is up: it is waiting on the relay.
    assert_eq!(relay.hub.stats().topics, 2);

    client.close();
    assert_eq!(patiently(client.next_event()).await, Some(TransportEvent::Close));
    assert_eq!(patiently(client.next_event()).await, None);

    // Reply topic and connection are released; the responder stays.
    wait_for_topics(&relay, 1).await;
    patiently(async {
        while relay.hub.stats().connections != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
