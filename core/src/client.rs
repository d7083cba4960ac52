//! Client handle for the HTTP layer
//!
//! `IrcClient` is the only way in from outside: it reads snapshots and queues
//! outbound commands. The commands are not state writes; their effects show
//! up once the server echoes them back through the ingestion loop.

use crate::command::Command;
use crate::config::Config;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::events::EventSink;
use crate::state::{Snapshot, StateStore};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cloneable handle to a tracked connection
#[derive(Debug, Clone)]
pub struct IrcClient {
    store: StateStore,
    outbound: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl IrcClient {
    /// Build a client and the connection task that serves it.
    ///
    /// Nothing happens on the network until the returned connection's
    /// `run` future is polled.
    pub fn new(config: Config, sink: Arc<dyn EventSink>) -> Result<(Self, Connection)> {
        config.validate()?;

        let store = StateStore::new(
            config.identity.nick.clone(),
            config.state.error_log_capacity,
            config.state.event_log_capacity,
        );
        let dispatcher = Dispatcher::new(&config)?;
        let (tx, rx) = mpsc::channel(config.state.outbound_queue);
        let shutdown = CancellationToken::new();

        let client = Self {
            store: store.clone(),
            outbound: tx,
            shutdown: shutdown.clone(),
        };
        let connection = Connection::new(config, store, dispatcher, rx, sink, shutdown);
        Ok((client, connection))
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// The underlying store, for readers that want to avoid a full copy
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Current lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.store.connection_state()
    }

    /// Queue a command; it is written once the connection is registered
    pub async fn send(&self, command: Command) -> Result<()> {
        command.validate()?;
        debug!(line = %command, "queueing command");
        self.outbound
            .send(command)
            .await
            .map_err(|_| Error::Connection("connection task has stopped".to_string()))
    }

    /// Join a channel, optionally with a key
    pub async fn join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        self.send(Command::Join {
            channel: channel.to_string(),
            key: key.map(str::to_string),
        })
        .await
    }

    /// Leave a channel
    pub async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.send(Command::part(channel, reason.map(str::to_string))).await
    }

    /// Change nickname
    pub async fn nick(&self, nick: &str) -> Result<()> {
        self.send(Command::Nick(nick.to_string())).await
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::privmsg(target, text)).await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::notice(target, text)).await
    }

    /// Set modes on a channel or user
    pub async fn mode(&self, target: &str, flags: &str, args: &[&str]) -> Result<()> {
        self.send(Command::Mode {
            target: target.to_string(),
            flags: flags.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
        .await
    }

    /// Send a line verbatim
    pub async fn raw(&self, line: &str) -> Result<()> {
        self.send(Command::Raw(line.to_string())).await
    }

    /// Ask the connection task to quit and stop reconnecting
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogSink;

    fn client() -> (IrcClient, Connection) {
        IrcClient::new(Config::default(), Arc::new(LogSink)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.identity.nick = String::new();
        assert!(IrcClient::new(config, Arc::new(LogSink)).is_err());
    }

    #[tokio::test]
    async fn test_commands_are_validated_before_queueing() {
        let (client, _connection) = client();
        assert!(client.privmsg("#rust", "hi\r\nQUIT :bye").await.is_err());
        assert!(client.join("#rust", None).await.is_ok());
        assert!(client.mode("#rust", "+o", &["alice"]).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_fails_once_connection_dropped() {
        let (client, connection) = client();
        drop(connection);
        assert!(client.raw("WHOIS alice").await.is_err());
    }

    #[test]
    fn test_initial_snapshot() {
        let (client, _connection) = client();
        let snapshot = client.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(snapshot.nick, "ircwatch");
        assert!(snapshot.channels.is_empty());

        client.shutdown();
        assert!(client.is_shutdown());
    }
}
