//! Scripted-server integration tests.
//!
//! Each test binds a loopback listener, drives the client through a real
//! registration exchange, then plays server lines and observes the events
//! and outbound traffic that result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use slirc_bot::{BotError, Client, ConnectionSettings, Event, Handler, Source};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Collector(Arc<Mutex<Vec<Event>>>);

impl Handler for Collector {
    fn on_event(&self, _bot: &Client, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn collect_events(client: &Client) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    client.add_handler(Collector(events.clone()));
    events
}

async fn wait_for_event(
    events: &Arc<Mutex<Vec<Event>>>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    for _ in 0..500 {
        if let Some(event) = events.lock().unwrap().iter().find(|e| pred(e)).cloned() {
            return event;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected event did not arrive in time");
}

/// The server side of one scripted session.
struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConn {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a client line")
            .unwrap();
        if n == 0 {
            return None;
        }
        while line.ends_with('\r') || line.ends_with('\n') {
            line.pop();
        }
        Some(line)
    }

    /// Skip traffic until a line starting with `prefix` arrives.
    async fn expect_prefix(&mut self, prefix: &str) -> String {
        loop {
            let line = self.recv().await.expect("connection closed while waiting");
            if line.starts_with(prefix) {
                return line;
            }
        }
    }
}

/// A client wired to a scripted server, already past registration.
async fn connected_pair() -> (Client, ServerConn, Arc<Mutex<Vec<Event>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new();
    client.set_name("tester");
    client.set_message_delay(Duration::ZERO);
    let events = collect_events(&client);

    let connecting = spawn_connect(&client, port);
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);

    server.expect_prefix("NICK ").await;
    server.expect_prefix("USER ").await;
    server.send(":testsrv 001 tester :Welcome").await;
    server
        .send(":testsrv 004 tester testsrv slirc-1.0 aoOirw abeiIklmnoOpqrstv")
        .await;

    connecting.await.unwrap().unwrap();
    (client, server, events)
}

fn spawn_connect(client: &Client, port: u16) -> JoinHandle<Result<(), BotError>> {
    let client = client.clone();
    tokio::spawn(async move {
        client
            .connect(ConnectionSettings::new("127.0.0.1").port(port))
            .await
    })
}

#[tokio::test]
async fn channel_message_is_dispatched() {
    let (client, mut server, events) = connected_pair().await;
    assert!(client.is_connected());

    server
        .send(":alice!~a@host.example PRIVMSG #chan :hello world")
        .await;

    let event = wait_for_event(&events, |e| matches!(e, Event::Message { .. })).await;
    assert_eq!(
        event,
        Event::Message {
            channel: "#chan".to_string(),
            sender: Source::new("alice", "~a", "host.example"),
            text: "hello world".to_string(),
        }
    );
}

#[tokio::test]
async fn join_updates_channel_set() {
    let (client, mut server, events) = connected_pair().await;

    server.send(":tester!t@h JOIN #c").await;
    wait_for_event(&events, |e| matches!(e, Event::Join { .. })).await;
    assert_eq!(client.channels(), vec!["#c".to_string()]);

    server.send(":op!o@h KICK #c tester :bye").await;
    wait_for_event(&events, |e| matches!(e, Event::Kick { .. })).await;
    assert!(client.channels().is_empty());
}

#[tokio::test]
async fn nick_collision_with_auto_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new();
    client.set_name("Foo");
    client.set_auto_nick_change(true);
    client.set_message_delay(Duration::ZERO);

    let connecting = spawn_connect(&client, port);
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);

    let first = server.expect_prefix("NICK ").await;
    assert_eq!(first, "NICK Foo");
    server.expect_prefix("USER ").await;

    server
        .send(":testsrv 433 * Foo :Nickname is already in use.")
        .await;
    let second = server.expect_prefix("NICK ").await;
    assert_eq!(second, "NICK Foo2");

    server
        .send(":testsrv 433 * Foo2 :Nickname is already in use.")
        .await;
    let third = server.expect_prefix("NICK ").await;
    assert_eq!(third, "NICK Foo3");

    server.send(":testsrv 004 Foo3 testsrv v1 ao ov").await;

    connecting.await.unwrap().unwrap();
    assert_eq!(client.nick(), "Foo3");
}

#[tokio::test]
async fn nick_collision_without_auto_change_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new();
    client.set_name("Foo");

    let connecting = spawn_connect(&client, port);
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);

    server.expect_prefix("USER ").await;
    server
        .send(":testsrv 433 * Foo :Nickname is already in use.")
        .await;

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(BotError::NickAlreadyInUse(nick)) if nick == "Foo"));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn fatal_numeric_during_registration_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new();
    client.set_name("tester");

    let connecting = spawn_connect(&client, port);
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);

    server.expect_prefix("USER ").await;
    // 439 must be ignored; the 465 that follows is fatal.
    server.send(":testsrv 439 * :Try again later").await;
    server
        .send(":testsrv 465 * :You are banned from this server")
        .await;

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(BotError::Irc(line)) if line.contains("465")));
}

#[tokio::test]
async fn ctcp_version_gets_default_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new();
    client.set_name("tester");
    client.set_version("Test-1");
    client.set_message_delay(Duration::ZERO);

    let connecting = spawn_connect(&client, port);
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);

    server.expect_prefix("USER ").await;
    server.send(":testsrv 004 tester testsrv v1 ao ov").await;
    connecting.await.unwrap().unwrap();

    server
        .send(":x!u@h PRIVMSG tester :\u{1}VERSION\u{1}")
        .await;

    let reply = server.expect_prefix("NOTICE x").await;
    assert_eq!(reply, "NOTICE x :\u{1}VERSION Test-1\u{1}");
}

#[tokio::test]
async fn server_ping_gets_pong() {
    let (_client, mut server, _events) = connected_pair().await;

    server.send("PING :probe-42").await;
    let reply = server.expect_prefix("PONG").await;
    assert_eq!(reply, "PONG :probe-42");
}

#[tokio::test]
async fn topic_reply_pair_emits_single_event() {
    let (_client, mut server, events) = connected_pair().await;

    server.send(":testsrv 332 tester #c :Topic here").await;
    server.send(":testsrv 333 tester #c alice 1700000000").await;

    let event = wait_for_event(&events, |e| matches!(e, Event::Topic { .. })).await;
    assert_eq!(
        event,
        Event::Topic {
            channel: "#c".to_string(),
            topic: "Topic here".to_string(),
            set_by: "alice".to_string(),
            epoch_ms: 1_700_000_000_000,
            changed: false,
        }
    );

    let topic_count = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::Topic { .. }))
        .count();
    assert_eq!(topic_count, 1);
}

#[tokio::test]
async fn outbound_lines_are_truncated() {
    let (client, mut server, _events) = connected_pair().await;

    let flood = "x".repeat(600);
    client.send_message("#c", &flood).unwrap();

    let line = server.expect_prefix("PRIVMSG #c").await;
    // 512 bytes total on the wire, minus the CRLF the reader consumed.
    assert_eq!(line.len(), 510);
    assert!(line.ends_with('x'));
}

#[tokio::test]
async fn queued_lines_keep_order() {
    let (client, mut server, _events) = connected_pair().await;

    client.send_message("#c", "first").unwrap();
    client.send_message("#c", "second").unwrap();
    client.send_message("#c", "third").unwrap();

    assert_eq!(server.expect_prefix("PRIVMSG").await, "PRIVMSG #c :first");
    assert_eq!(server.expect_prefix("PRIVMSG").await, "PRIVMSG #c :second");
    assert_eq!(server.expect_prefix("PRIVMSG").await, "PRIVMSG #c :third");
}

#[tokio::test]
async fn eof_broadcasts_disconnect() {
    let (client, server, events) = connected_pair().await;

    drop(server);

    wait_for_event(&events, |e| matches!(e, Event::Disconnected)).await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn connect_while_live_is_rejected() {
    let (client, _server, _events) = connected_pair().await;

    let result = client
        .connect(ConnectionSettings::new("127.0.0.1").port(1))
        .await;
    assert!(matches!(result, Err(BotError::AlreadyConnected(_))));
}

#[tokio::test]
async fn reconnect_replays_last_settings() {
    let (client, server, events) = connected_pair().await;

    // Need a fresh listener on the same port the client first used.
    let port = client.port().unwrap();
    drop(server);
    wait_for_event(&events, |e| matches!(e, Event::Disconnected)).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let reconnecting = {
        let client = client.clone();
        tokio::spawn(async move { client.reconnect().await })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);
    server.expect_prefix("USER ").await;
    server.send(":testsrv 004 tester testsrv v1 ao ov").await;

    reconnecting.await.unwrap().unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn dispose_suppresses_disconnect_event() {
    let (client, _server, events) = connected_pair().await;

    client.dispose().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let saw_disconnect = events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, Event::Disconnected));
    assert!(!saw_disconnect);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn password_sent_before_registration() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new();
    client.set_name("tester");
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect(
                    ConnectionSettings::new("127.0.0.1")
                        .port(port)
                        .password("hunter2"),
                )
                .await
        })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let mut server = ServerConn::new(stream);

    assert_eq!(server.recv().await.unwrap(), "PASS hunter2");
    assert_eq!(server.recv().await.unwrap(), "NICK tester");
    assert!(server.recv().await.unwrap().starts_with("USER "));

    server.send(":testsrv 004 tester testsrv v1 ao ov").await;
    connecting.await.unwrap().unwrap();
}
