//! Lifecycle tests against a scripted loopback server

use ircwatch_core::{
    async_trait, ChannelSink, Config, ConnectionState, EventSink, IrcClient, MentionEvent, Snapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.server.port = port;
    config.identity.nick = "watcher".to_string();
    config.identity.username = "watcher".to_string();
    config.identity.alt_nicks = vec!["watcher2".to_string()];
    config.identity.quit_message = "bye".to_string();
    config.channels = vec!["#rust".to_string()];
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    config.reconnect.jitter = 0.0;
    config.reconnect.connect_timeout_secs = 5;
    config.reconnect.registration_timeout_secs = 5;
    config.reconnect.read_timeout_secs = 30;
    config
}

/// One accepted client connection, seen from the server side
struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client never connected")
            .expect("accept failed");
        let (read, writer) = socket.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("client closed the connection")
    }

    async fn send(&mut self, lines: &[&str]) {
        for line in lines {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\r\n").await.unwrap();
        }
        self.writer.flush().await.unwrap();
    }

    /// Read the registration burst and welcome the client
    async fn register(&mut self, nick: &str) {
        assert_eq!(self.recv().await, format!("NICK {}", nick));
        assert!(self.recv().await.starts_with("USER watcher 0 * :"));
        self.send(&[&format!(":irc.test 001 {} :Welcome to the test network", nick)])
            .await;
    }
}

async fn wait_for(client: &IrcClient, what: &str, check: impl Fn(&Snapshot) -> bool) {
    let deadline = Instant::now() + WAIT;
    loop {
        if check(&client.snapshot()) {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_register_track_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sink, mut mentions) = ChannelSink::new(8);
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    // Queued before registration, written after autojoin
    client.privmsg("#rust", "hello everyone").await.unwrap();

    let mut server = Peer::accept(&listener).await;
    server.register("watcher").await;
    assert_eq!(server.recv().await, "JOIN #rust");
    assert_eq!(server.recv().await, "PRIVMSG #rust :hello everyone");

    server
        .send(&[
            ":watcher!w@host JOIN #rust",
            ":irc.test 353 watcher = #rust :watcher @alice",
            ":irc.test 366 watcher #rust :End of /NAMES list.",
            ":alice!a@host PRIVMSG #rust :watcher: ping",
        ])
        .await;
    let event = timeout(WAIT, mentions.recv()).await.unwrap().unwrap();
    assert_eq!(event.sender, "alice");
    assert_eq!(event.message, "ping");

    wait_for(&client, "NAMES to complete", |s| {
        s.channel("#rust").map(|c| c.members.len() == 2).unwrap_or(false)
    })
    .await;
    let snapshot = client.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.state, ConnectionState::Connected);
    let alice = snapshot.channel("#rust").unwrap().member_modes("alice").unwrap();
    assert!(alice.contains(&'o'));

    client.join("#extra", None).await.unwrap();
    assert_eq!(server.recv().await, "JOIN #extra");
    server.send(&[":watcher!w@host JOIN #extra"]).await;
    wait_for(&client, "second channel", |s| s.channel("#extra").is_some()).await;

    // Drop the link; channel and user data must not survive it
    drop(server);
    wait_for(&client, "state to clear", |s| !s.connected && s.channels.is_empty()).await;
    let snapshot = client.snapshot();
    assert!(snapshot.users.is_empty());
    assert_eq!(snapshot.stats.reconnects, 1);

    let mut server = Peer::accept(&listener).await;
    server.register("watcher").await;
    assert_eq!(server.recv().await, "JOIN #rust");
    assert_eq!(server.recv().await, "JOIN #extra");
    wait_for(&client, "reconnect", |s| s.connected).await;

    client.shutdown();
    assert_eq!(server.recv().await, "QUIT :bye");
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);
}

#[tokio::test]
async fn test_ping_answered_during_registration() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sink, _mentions) = ChannelSink::new(8);
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    let mut server = Peer::accept(&listener).await;
    assert_eq!(server.recv().await, "NICK watcher");
    assert!(server.recv().await.starts_with("USER "));
    server.send(&["PING :cookie-123"]).await;
    assert_eq!(server.recv().await, "PONG :cookie-123");
    assert_eq!(client.connection_state(), ConnectionState::Registering);

    client.shutdown();
    assert_eq!(server.recv().await, "QUIT :bye");
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_nick_in_use_falls_back_to_alternate() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sink, _mentions) = ChannelSink::new(8);
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    let mut server = Peer::accept(&listener).await;
    assert_eq!(server.recv().await, "NICK watcher");
    assert!(server.recv().await.starts_with("USER "));
    server
        .send(&[":irc.test 433 * watcher :Nickname is already in use"])
        .await;
    assert_eq!(server.recv().await, "NICK watcher2");
    server.send(&[":irc.test 001 watcher2 :Welcome"]).await;
    assert_eq!(server.recv().await, "JOIN #rust");

    wait_for(&client, "registration", |s| s.connected).await;
    let snapshot = client.snapshot();
    assert_eq!(snapshot.nick, "watcher2");
    assert!(snapshot.errors.iter().any(|e| e.code == 433));

    client.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_fatal_registration_error_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sink, _mentions) = ChannelSink::new(8);
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    let mut server = Peer::accept(&listener).await;
    assert_eq!(server.recv().await, "NICK watcher");
    assert!(server.recv().await.starts_with("USER "));
    server.send(&[":irc.test 465 watcher :You are banned"]).await;

    // The client gives up on this socket and dials again
    let mut server = Peer::accept(&listener).await;
    assert_eq!(server.recv().await, "NICK watcher");

    let snapshot = client.snapshot();
    assert!(snapshot.errors.iter().any(|e| e.code == 465));
    assert!(snapshot.stats.reconnects >= 1);

    client.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_while_server_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (sink, _mentions) = ChannelSink::new(8);
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    wait_for(&client, "a failed attempt", |s| s.stats.reconnects >= 1).await;
    assert!(!client.snapshot().connected);

    client.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);
}

#[tokio::test]
async fn test_reconnect_rejoins_only_channels_we_were_in() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sink, _mentions) = ChannelSink::new(8);
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    let mut server = Peer::accept(&listener).await;
    server.register("watcher").await;
    assert_eq!(server.recv().await, "JOIN #rust");
    server
        .send(&[
            ":watcher!w@host JOIN #rust",
            ":irc.test 332 watcher #elsewhere :some topic",
            ":irc.test 353 watcher = #other :alice bob",
            ":irc.test 366 watcher #other :End of /NAMES list.",
        ])
        .await;
    wait_for(&client, "reply-only channels", |s| {
        s.channel("#elsewhere").is_some() && s.channel("#other").is_some()
    })
    .await;

    drop(server);
    let mut server = Peer::accept(&listener).await;
    server.register("watcher").await;
    assert_eq!(server.recv().await, "JOIN #rust");
    // nothing else is queued ahead of the reply to this
    server.send(&["PING :after-join"]).await;
    assert_eq!(server.recv().await, "PONG :after-join");

    client.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

/// Sink that reports each delivery as it starts, then takes a while
struct SlowSink {
    started: mpsc::UnboundedSender<()>,
    inner: ChannelSink,
}

#[async_trait]
impl EventSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn deliver(&self, event: MentionEvent) -> ircwatch_core::Result<()> {
        let _ = self.started.send(());
        sleep(Duration::from_millis(300)).await;
        self.inner.deliver(event).await
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_pending_mentions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (inner, mut mentions) = ChannelSink::new(8);
    let (started_tx, mut started) = mpsc::unbounded_channel();
    let sink = SlowSink {
        started: started_tx,
        inner,
    };
    let (client, connection) = IrcClient::new(test_config(port), Arc::new(sink)).unwrap();
    let task = tokio::spawn(connection.run());

    let mut server = Peer::accept(&listener).await;
    server.register("watcher").await;
    assert_eq!(server.recv().await, "JOIN #rust");
    server.send(&[":alice!a@host PRIVMSG #rust :watcher: last words"]).await;
    timeout(WAIT, started.recv()).await.unwrap().unwrap();

    client.shutdown();
    assert_eq!(server.recv().await, "QUIT :bye");
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    let event = mentions.try_recv().expect("mention lost at shutdown");
    assert_eq!(event.message, "last words");
}
