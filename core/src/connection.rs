//! Connection lifecycle
//!
//! One `Connection` owns the socket, the dispatcher and the receiving end of
//! the outbound queue. Its `run` loop connects, registers, ingests lines
//! until the link fails, then clears per-connection state and retries with
//! exponential backoff. Only one ingestion loop exists per connection, and
//! the socket has a single writer, so outbound lines never interleave.
//!
//! Mention events are handed to the sink on their own tasks so a slow sink
//! never stalls ingestion. On shutdown, deliveries still in flight get
//! [`DELIVERY_GRACE`] to finish; whatever is left after that is dropped.

use crate::codec::LineCodec;
use crate::command::Command;
use crate::config::{Config, ReconnectConfig};
use crate::dispatcher::{Dispatcher, Reaction};
use crate::events::EventSink;
use crate::state::StateStore;
use crate::utils::casemap::irc_eq;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registering,
    Connected,
    Reconnecting,
    ShuttingDown,
}

impl ConnectionState {
    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (ShuttingDown, _) => false,
            (_, ShuttingDown) => true,
            (Disconnected, Connecting)
            | (Connecting, Registering)
            | (Connecting, Reconnecting)
            | (Registering, Connected)
            | (Registering, Reconnecting)
            | (Connected, Reconnecting)
            | (Reconnecting, Connecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Registering => "registering",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ShuttingDown => "shutting down",
        };
        write!(f, "{}", s)
    }
}

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff; `jitter` is clamped to `0.0..=1.0`
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Create a backoff from reconnect settings
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter)
    }

    /// Failed attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the given attempt before jitter
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter == 0.0 {
            return nominal;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread).min(self.max)
    }

    /// Start over from the base delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Commands that open a session, in the order they are sent
pub fn registration_commands(config: &Config) -> Vec<Command> {
    let mut commands = Vec::new();
    if let Some(ref password) = config.server.password {
        commands.push(Command::Pass(password.clone()));
    }
    if !config.capabilities.is_empty() {
        commands.push(Command::CapLs);
    }
    commands.push(Command::Nick(config.identity.nick.clone()));
    commands.push(Command::User {
        username: config.identity.username.clone(),
        realname: config.identity.realname.clone(),
    });
    commands
}

/// Why a session ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
}

type Transport = Framed<TcpStream, LineCodec>;

/// How long shutdown waits for in-flight mention deliveries
pub const DELIVERY_GRACE: Duration = Duration::from_secs(2);

/// The ingestion loop for one logical server connection
pub struct Connection {
    config: Config,
    store: StateStore,
    dispatcher: Dispatcher,
    outbound: mpsc::Receiver<Command>,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    backoff: Backoff,
    /// Channels to rejoin after the next registration
    rejoin: Vec<String>,
    registered_at: Option<Instant>,
    deliveries: JoinSet<()>,
}

impl Connection {
    pub(crate) fn new(
        config: Config,
        store: StateStore,
        dispatcher: Dispatcher,
        outbound: mpsc::Receiver<Command>,
        sink: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let backoff = Backoff::from_config(&config.reconnect);
        Self {
            config,
            store,
            dispatcher,
            outbound,
            sink,
            shutdown,
            backoff,
            rejoin: Vec::new(),
            registered_at: None,
            deliveries: JoinSet::new(),
        }
    }

    /// Run until shutdown is requested
    pub async fn run(mut self) -> Result<()> {
        info!(server = %self.config.address(), "connection task started");

        while !self.shutdown.is_cancelled() {
            self.transition(ConnectionState::Connecting);
            match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => error!("connection lost: {}", e),
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            self.check_transition(ConnectionState::Reconnecting);
            let joined = self.store.reset_for_reconnect();
            let stable = self
                .registered_at
                .map(|at| at.elapsed() >= self.config.reconnect.stable_after())
                .unwrap_or(false);
            if self.registered_at.is_some() {
                self.rejoin = joined;
            }
            if stable {
                self.backoff.reset();
            }
            self.store.write(|state| state.stats.reconnects += 1);

            let delay = self.backoff.next_delay();
            info!(attempt = self.backoff.attempt(), delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.transition(ConnectionState::ShuttingDown);
        self.drain_deliveries().await;
        info!("connection task stopped");
        Ok(())
    }

    /// Wait up to [`DELIVERY_GRACE`] for pending mention deliveries
    async fn drain_deliveries(&mut self) {
        if self.deliveries.is_empty() {
            return;
        }
        let pending = self.deliveries.len();
        let drain = async {
            while self.deliveries.join_next().await.is_some() {}
        };
        if timeout(DELIVERY_GRACE, drain).await.is_err() {
            warn!(
                pending,
                left = self.deliveries.len(),
                "mention deliveries still running at shutdown, dropping them"
            );
            self.deliveries.abort_all();
        }
    }

    fn transition(&self, next: ConnectionState) {
        if self.check_transition(next) {
            self.store.set_connection_state(next);
        }
    }

    /// Log a transition; false when already in `next`
    fn check_transition(&self, next: ConnectionState) -> bool {
        let current = self.store.connection_state();
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "unexpected connection state transition");
        }
        info!(state = %next, "connection state");
        true
    }

    /// One connect, register and ingest cycle
    async fn session(&mut self) -> Result<SessionEnd> {
        self.dispatcher.reset();
        self.registered_at = None;
        let nick = self.config.identity.nick.clone();
        self.store.write(|state| state.nick = nick);

        let address = self.config.address();
        let connect = timeout(self.config.reconnect.connect_timeout(), TcpStream::connect(&address));
        let stream = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            result = connect => result
                .map_err(|_| Error::Connection(format!("connecting to {} timed out", address)))??,
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {}", e);
        }
        info!(%address, "connected, registering");
        self.transition(ConnectionState::Registering);

        let mut transport = Framed::new(stream, LineCodec::default());
        for command in registration_commands(&self.config) {
            self.send(&mut transport, command).await?;
        }

        let read_timeout = self.config.reconnect.read_timeout();
        let registration_deadline = Instant::now() + self.config.reconnect.registration_timeout();
        let mut last_read = Instant::now();
        let mut keepalive_sent = false;
        let mut outbound_open = true;

        loop {
            let registered = self.registered_at.is_some();
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    self.quit(&mut transport).await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = sleep_until(registration_deadline), if !registered => {
                    return Err(Error::Registration("registration timed out".to_string()));
                }
                _ = sleep_until(last_read + read_timeout) => {
                    return Err(Error::Connection(format!("no data for {}s", read_timeout.as_secs())));
                }
                _ = sleep_until(last_read + read_timeout / 2), if registered && !keepalive_sent => {
                    keepalive_sent = true;
                    self.send(&mut transport, Command::Raw("PING :keepalive".to_string())).await?;
                }
                line = transport.next() => {
                    let line = match line {
                        Some(line) => line?,
                        None => return Err(Error::Connection("server closed the connection".to_string())),
                    };
                    last_read = Instant::now();
                    keepalive_sent = false;
                    for reaction in self.dispatcher.dispatch_line(&self.store, &line) {
                        self.react(&mut transport, reaction).await?;
                    }
                }
                command = self.outbound.recv(), if registered && outbound_open => {
                    match command {
                        Some(command) => self.send(&mut transport, command).await?,
                        None => {
                            debug!("outbound queue closed");
                            outbound_open = false;
                        }
                    }
                }
            }
        }
    }

    async fn react(&mut self, transport: &mut Transport, reaction: Reaction) -> Result<()> {
        match reaction {
            Reaction::Send(command) => self.send(transport, command).await?,
            Reaction::Registered => {
                self.registered_at = Some(Instant::now());
                self.transition(ConnectionState::Connected);
                for channel in self.autojoin() {
                    self.send(transport, Command::join(channel)).await?;
                }
            }
            Reaction::Mention(event) => {
                while self.deliveries.try_join_next().is_some() {}
                let sink = Arc::clone(&self.sink);
                self.deliveries.spawn(async move {
                    if let Err(e) = sink.deliver(event).await {
                        warn!(sink = sink.name(), "failed to deliver mention: {}", e);
                    }
                });
            }
            Reaction::FatalRegistration { code, message } => {
                return Err(Error::Registration(format!("{} {}", code, message)));
            }
            Reaction::ServerError(message) => {
                return Err(Error::Connection(format!("server error: {}", message)));
            }
        }
        Ok(())
    }

    /// Configured channels followed by those held before the reconnect
    fn autojoin(&self) -> Vec<String> {
        let mut channels: Vec<String> = Vec::new();
        for channel in self.config.channels.iter().chain(&self.rejoin) {
            if !channels.iter().any(|c| irc_eq(c, channel)) {
                channels.push(channel.clone());
            }
        }
        channels
    }

    async fn send(&self, transport: &mut Transport, command: Command) -> Result<()> {
        if let Err(e) = command.validate() {
            warn!("not sending command: {}", e);
            return Ok(());
        }
        debug!(line = %command, "send");
        transport.send(command).await?;
        self.store.write(|state| state.stats.record_sent());
        Ok(())
    }

    async fn quit(&self, transport: &mut Transport) {
        let reason = Some(self.config.identity.quit_message.clone());
        if let Err(e) = self.send(transport, Command::Quit(reason)).await {
            debug!("failed to send QUIT: {}", e);
        }
        if let Err(e) = SinkExt::<Command>::close(transport).await {
            debug!("failed to close transport: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use ConnectionState::*;

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Reconnecting));
        assert!(Registering.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(ShuttingDown));
        assert!(!Connected.can_transition_to(Registering));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!ShuttingDown.can_transition_to(Connecting));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(60), 0.5);
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500));
        }
        assert_eq!(backoff.nominal(40), Duration::from_secs(60));
    }

    #[test]
    fn test_registration_sequence() {
        let mut config = Config::default();
        config.server.password = Some("secret".to_string());
        config.capabilities = vec!["away-notify".to_string()];
        let lines: Vec<String> = registration_commands(&config)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "PASS secret",
                "CAP LS 302",
                "NICK ircwatch",
                "USER ircwatch 0 * :IRC state tracker",
            ]
        );

        let plain = registration_commands(&Config::default());
        assert_eq!(plain.len(), 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
