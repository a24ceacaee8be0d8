//! End-to-end tests: `Client` against a real `MessageServer`.
//!
//! Every test runs the server in-process on loopback. Only the scenario on
//! the default port binds a fixed address.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use blocklink_client::{Client, ClientError, ConnectionState, LinkConfig, RequestError};
use blocklink_core::{CryptoListener, HandshakeError, SessionError, SharedSerializer};
use blocklink_crypto::{KeyExchangeAlgorithm, SymmetricAlgorithm};
use blocklink_proto::{CborSerializer, ClientId, Message, MessageKey, keys};
use blocklink_server::{DEFAULT_PORT, MessageServer, Relay, ServerConfig, ServerEvent};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(10);
const PING: MessageKey = 100;
const PONG: MessageKey = 101;

fn serializer() -> SharedSerializer<Message> {
    Arc::new(CborSerializer)
}

fn rsa512_aes256() -> LinkConfig {
    LinkConfig::with_algorithms([KeyExchangeAlgorithm::RSA_512], [SymmetricAlgorithm::AES_256])
}

fn client(link: LinkConfig) -> Client<Message> {
    Client::new(Arc::new(link), serializer())
}

async fn start(link: LinkConfig) -> (MessageServer<Message>, SocketAddr) {
    let server = MessageServer::new(Arc::new(link), serializer(), ServerConfig::default());
    let addr = server.start("127.0.0.1:0").await.unwrap();
    (server, addr)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn wait_connected(events: &mut broadcast::Receiver<ServerEvent>, id: ClientId) {
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let ServerEvent::ClientConnected { id: connected, .. } = event {
            if connected == id {
                return;
            }
        }
    }
}

async fn wait_disconnected(events: &mut broadcast::Receiver<ServerEvent>, id: ClientId) {
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if event == (ServerEvent::ClientDisconnected { id }) {
            return;
        }
    }
}

/// Connect and wait until the server has registered the client.
async fn connect_registered(
    server: &MessageServer<Message>,
    client: &Client<Message>,
    addr: SocketAddr,
) -> ClientId {
    let mut events = server.events();
    let id = client.connect(addr).await.unwrap();
    wait_connected(&mut events, id).await;
    id
}

/// Answer every `PING` with a `PONG` to its sender.
fn answer_pings(server: &MessageServer<Message>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.subscribe(PING, move |_: &Message, delivery| {
        let _ = tx.send(delivery.connection);
    });

    let server = server.clone();
    tokio::spawn(async move {
        while let Some(id) = rx.recv().await {
            let _ = server.send_message_to(Message::new(PONG, "pong"), [id]).await;
        }
    });
}

/// Client says "Hello", the server answers "Hello to you too".
async fn hello_exchange(
    server: &MessageServer<Message>,
    addr: SocketAddr,
    link: LinkConfig,
) -> Client<Message> {
    let (heard_tx, mut heard) = mpsc::unbounded_channel();
    server.subscribe(keys::TEXT, move |message: &Message, delivery| {
        let _ = heard_tx.send((message.payload_str().map(str::to_owned), delivery.connection));
    });

    let client = client(link);
    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    client.subscribe(keys::TEXT, move |message: &Message, _| {
        let _ = reply_tx.send(message.payload_str().map(str::to_owned));
    });

    let id = connect_registered(server, &client, addr).await;
    client.send(&Message::text("Hello")).await.unwrap();

    let (text, sender) = recv(&mut heard).await;
    assert_eq!(text.as_deref(), Some("Hello"));
    assert_eq!(sender, id);

    let delivered = server.send_message_to(Message::text("Hello to you too"), [sender]).await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(recv(&mut replies).await.as_deref(), Some("Hello to you too"));

    client
}

#[tokio::test]
async fn unencrypted_hello_on_default_port() {
    let server =
        MessageServer::new(Arc::new(LinkConfig::unencrypted()), serializer(), ServerConfig::default());
    let addr = server.start(&format!("127.0.0.1:{DEFAULT_PORT}")).await.unwrap();
    assert_eq!(addr.port(), 5321);

    let client = hello_exchange(&server, addr, LinkConfig::unencrypted()).await;
    let connection = client.connection().unwrap();
    assert_eq!(connection.session().info().symmetric.identifier, "None");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn rsa_aes_hello_is_encrypted() {
    let (server, addr) = start(rsa512_aes256()).await;

    let client = hello_exchange(&server, addr, rsa512_aes256()).await;
    let connection = client.connection().unwrap();
    assert_eq!(connection.session().info().key_exchange.identifier, "RSA-512");
    assert_eq!(connection.session().info().symmetric.identifier, "AES-256");
    assert_eq!(connection.session().info().block_size, 16);

    let serverside = server.client(connection.id()).unwrap();
    assert_eq!(serverside.info().symmetric.identifier, "AES-256");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn lifecycle_states_and_reconnect() {
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    let client = client(LinkConfig::unencrypted());

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.id(), None);

    let first = client.connect(addr).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.id(), Some(first));
    assert!(client.received_bytes() > 0);
    assert_eq!(client.connect(addr).await, Err(ClientError::AlreadyConnected));

    let written = client.send(&Message::text("count me")).await.unwrap();
    assert_eq!(client.sent_bytes(), written as u64);

    client.close().await;
    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.send(&Message::text("late")).await, Err(ClientError::NotConnected));

    let second = client.connect(addr).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(client.state(), ConnectionState::Connected);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn disconnect_sends_exit_and_server_forgets_client() {
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    let mut events = server.events();
    let (exit_tx, mut exits) = mpsc::unbounded_channel();
    server.subscribe(keys::EXIT, move |_: &Message, delivery| {
        let _ = exit_tx.send(delivery.connection);
    });

    let client = client(LinkConfig::unencrypted());
    let id = client.connect(addr).await.unwrap();
    wait_connected(&mut events, id).await;

    client.disconnect(&Message::new(keys::EXIT, "")).await;
    assert_eq!(client.state(), ConnectionState::Closed);

    assert_eq!(recv(&mut exits).await, id);
    wait_disconnected(&mut events, id).await;
    assert!(server.connected_clients().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn concurrent_connect_disconnect_cycles_leave_registry_empty() {
    const CLIENTS: usize = 16;
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    let mut events = server.events();

    let mut tasks = Vec::new();
    for _ in 0..CLIENTS {
        tasks.push(tokio::spawn(async move {
            let client = client(LinkConfig::unencrypted());
            let id = client.connect(addr).await.unwrap();
            client.disconnect(&Message::new(keys::EXIT, "")).await;
            id
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), CLIENTS);

    let mut disconnected = 0;
    while disconnected < CLIENTS {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if matches!(event, ServerEvent::ClientDisconnected { .. }) {
            disconnected += 1;
        }
    }
    assert!(server.connected_clients().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn relay_rebroadcasts_text_and_drops_on_exit() {
    let server =
        MessageServer::new(Arc::new(LinkConfig::unencrypted()), serializer(), ServerConfig::default());
    let relay = Relay::install(&server);
    let addr = server.start("127.0.0.1:0").await.unwrap();
    let mut events = server.events();

    let alice = client(LinkConfig::unencrypted());
    let bob = client(LinkConfig::unencrypted());
    let (heard_tx, mut bob_heard) = mpsc::unbounded_channel();
    bob.subscribe(keys::TEXT, move |message: &Message, _| {
        let _ = heard_tx.send((message.payload_str().map(str::to_owned), message.client_id));
    });

    let alice_id = alice.connect(addr).await.unwrap();
    wait_connected(&mut events, alice_id).await;
    let bob_id = bob.connect(addr).await.unwrap();
    wait_connected(&mut events, bob_id).await;

    alice.send(&Message::text("hi all")).await.unwrap();
    let (text, from) = recv(&mut bob_heard).await;
    assert_eq!(text.as_deref(), Some("hi all"));
    assert_eq!(from, Some(alice_id));

    alice.send(&Message::new(keys::EXIT, "")).await.unwrap();
    timeout(WAIT, alice.closed()).await.unwrap();
    assert_eq!(alice.state(), ConnectionState::Closed);
    wait_disconnected(&mut events, alice_id).await;
    assert_eq!(server.connected_clients(), vec![bob_id]);

    relay.remove().await;
    server.stop().await;
    timeout(WAIT, bob.closed()).await.unwrap();
    assert_eq!(bob.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn request_receives_response() {
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    answer_pings(&server);

    let client = client(LinkConfig::unencrypted());
    connect_registered(&server, &client, addr).await;

    for _ in 0..3 {
        let response = client.request(&Message::new(PING, "ping"), PONG, WAIT).await.unwrap();
        assert_eq!(response.key, PONG);
        assert_eq!(response.payload_str(), Some("pong"));
    }

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn request_times_out_without_response() {
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    answer_pings(&server);

    let client = client(LinkConfig::unencrypted());
    connect_registered(&server, &client, addr).await;

    let silence = Duration::from_millis(200);
    let result = client.request(&Message::text("anyone?"), PONG, silence).await;
    assert_eq!(result, Err(RequestError::Timeout(silence)));
    assert!(result.unwrap_err().is_transient());

    let response = client.request(&Message::new(PING, "ping"), PONG, WAIT).await.unwrap();
    assert_eq!(response.key, PONG);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn cancelled_requests_leave_no_subscription() {
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    let client = client(LinkConfig::unencrypted());
    connect_registered(&server, &client, addr).await;

    let unanswered: MessageKey = 999;
    for _ in 0..5 {
        let message = Message::text("anyone?");
        let request = client.request(&message, unanswered, WAIT);
        assert!(timeout(Duration::from_millis(20), request).await.is_err());
    }
    assert_eq!(client.subscriber_count(unanswered), 0);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn request_fails_when_server_drops_client() {
    let (server, addr) = start(LinkConfig::unencrypted()).await;
    let (ping_tx, mut pings) = mpsc::unbounded_channel();
    server.subscribe(PING, move |_: &Message, delivery| {
        let _ = ping_tx.send(delivery.connection);
    });

    let client = Arc::new(client(LinkConfig::unencrypted()));
    connect_registered(&server, &client, addr).await;

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request(&Message::new(PING, "ping"), PONG, WAIT).await })
    };

    let sender = recv(&mut pings).await;
    assert!(server.disconnect(sender).await);

    assert_eq!(pending.await.unwrap(), Err(RequestError::Disconnected));
    assert_eq!(
        client.request(&Message::new(PING, "again"), PONG, WAIT).await,
        Err(RequestError::Send(SessionError::NotConnected))
    );

    server.stop().await;
}

#[tokio::test]
async fn first_frame_must_assign_identity() {
    let listener =
        CryptoListener::<Message>::bind("127.0.0.1:0", Arc::new(LinkConfig::unencrypted()), serializer())
            .await
            .unwrap();
    let addr = listener.local_addr().unwrap();
    let impostor = tokio::spawn(async move {
        let mut stub = listener.accept_next().await.unwrap();
        stub.write(&Message::text("no identity here")).await.unwrap();
        stub
    });

    let client = client(LinkConfig::unencrypted());
    assert_eq!(client.connect(addr).await, Err(ClientError::MissingIdentity));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let _stub = impostor.await.unwrap();
}

#[tokio::test]
async fn silent_server_hits_handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(WAIT).await;
        drop(socket);
    });

    let mut link = LinkConfig::unencrypted();
    link.handshake_timeout = Duration::from_millis(200);
    let client = client(link);

    let result = client.connect(addr).await;
    assert!(matches!(result, Err(ClientError::Handshake(HandshakeError::Timeout { .. }))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn cancelled_connect_allows_next_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(WAIT).await;
        drop(socket);
    });

    let client = client(LinkConfig::unencrypted());
    assert!(timeout(Duration::from_millis(100), client.connect(silent)).await.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let (server, addr) = start(LinkConfig::unencrypted()).await;
    connect_registered(&server, &client, addr).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = client(LinkConfig::unencrypted());
    assert!(matches!(client.connect(addr).await, Err(ClientError::Handshake(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
