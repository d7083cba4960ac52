//! The State Store
//!
//! `IrcState` is the single aggregate holding everything learned from the
//! server. It lives behind `StateStore`, whose write access is crate private:
//! only the dispatcher and the connection loop mutate it, each line under one
//! exclusive lock, so a reader taking a snapshot never sees a half-applied
//! change.

use crate::channel::Channel;
use crate::connection::ConnectionState;
use crate::modes::{ModeSet, NamesEntry};
use crate::numeric::{ErrorCategory, Severity};
use crate::statistics::{GenericEvent, Statistics};
use crate::user::User;
use crate::utils::casemap::{irc_eq, irc_to_lower};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the server told us about itself during this connection
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    /// Creation date text from RPL_CREATED
    pub created: Option<String>,
    /// Network name from ISUPPORT `NETWORK=`
    pub network: Option<String>,
    /// Welcome line from RPL_WELCOME
    pub welcome: Option<String>,
    /// Capabilities acknowledged by the server
    pub capabilities: BTreeSet<String>,
    /// ISUPPORT tokens
    pub isupport: BTreeMap<String, Option<String>>,
    pub motd: Vec<String>,
    /// Available user modes from RPL_MYINFO
    pub user_modes: Option<String>,
    /// Available channel modes from RPL_MYINFO
    pub channel_modes: Option<String>,
}

/// A server-reported error
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IrcError {
    pub code: u16,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: ErrorCategory,
}

impl IrcError {
    /// Classify an error numeric
    pub fn new(code: u16, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp,
            severity: Severity::of(code),
            category: ErrorCategory::of(code),
        }
    }
}

/// Append-only error log; the oldest entry is evicted at capacity
#[derive(Debug, Clone)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<IrcError>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    /// Append an entry
    pub fn push(&mut self, error: IrcError) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &IrcError> {
        self.entries.iter()
    }
}

/// One channel from a LIST reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub users: u32,
    pub topic: String,
}

/// The authoritative model of one tracked connection
#[derive(Debug)]
pub struct IrcState {
    /// Lifecycle state of the connection
    pub connection: ConnectionState,
    /// Our current nickname
    pub nick: String,
    pub server: ServerInfo,
    /// Channels keyed by folded name
    pub channels: BTreeMap<String, Channel>,
    /// Users keyed by folded nick
    pub users: BTreeMap<String, User>,
    pub errors: ErrorLog,
    pub stats: Statistics,
    /// Channel directory from the last completed LIST
    pub directory: Vec<DirectoryEntry>,
    pending_names: HashMap<String, Vec<NamesEntry>>,
    pending_list: Option<Vec<DirectoryEntry>>,
}

impl IrcState {
    /// Create an empty state
    pub fn new(nick: impl Into<String>, error_capacity: usize, event_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            nick: nick.into(),
            server: ServerInfo::default(),
            channels: BTreeMap::new(),
            users: BTreeMap::new(),
            errors: ErrorLog::new(error_capacity),
            stats: Statistics::new(event_capacity),
            directory: Vec::new(),
            pending_names: HashMap::new(),
            pending_list: None,
        }
    }

    /// Whether `nick` is our own nickname
    pub fn is_self(&self, nick: &str) -> bool {
        irc_eq(nick, &self.nick)
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    /// Look up a user by nick
    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&irc_to_lower(nick))
    }

    /// Get a user, creating it on first observation
    pub(crate) fn ensure_user(&mut self, nick: &str) -> &mut User {
        self.users
            .entry(irc_to_lower(nick))
            .or_insert_with(|| User::new(nick))
    }

    /// Get a channel, creating it on first observation
    pub(crate) fn ensure_channel(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(irc_to_lower(name))
            .or_insert_with(|| Channel::new(name))
    }

    /// Add `nick` to `channel`, updating both sides
    pub(crate) fn add_member(&mut self, channel: &str, nick: &str, modes: ModeSet) {
        let channel_key = self.ensure_channel(channel).key();
        if let Some(chan) = self.channels.get_mut(&channel_key) {
            chan.add_member(nick, modes);
        }
        self.ensure_user(nick).join_channel(channel_key);
    }

    /// Remove `nick` from `channel`, updating both sides.
    ///
    /// When the nick is ours the whole channel is dropped.
    pub(crate) fn remove_member(&mut self, channel: &str, nick: &str) {
        if self.is_self(nick) {
            self.remove_channel(channel);
            return;
        }
        let channel_key = irc_to_lower(channel);
        let nick_key = irc_to_lower(nick);
        if let Some(chan) = self.channels.get_mut(&channel_key) {
            chan.remove_member(&nick_key);
        }
        if let Some(user) = self.users.get_mut(&nick_key) {
            user.part_channel(&channel_key);
        }
        self.prune_user(&nick_key);
    }

    /// Forget a channel and every membership pointing at it
    pub(crate) fn remove_channel(&mut self, channel: &str) -> Option<Channel> {
        let channel_key = irc_to_lower(channel);
        let removed = self.channels.remove(&channel_key)?;
        self.pending_names.remove(&channel_key);
        for nick_key in removed.members.keys() {
            if let Some(user) = self.users.get_mut(nick_key) {
                user.part_channel(&channel_key);
            }
            self.prune_user(nick_key);
        }
        debug!(channel = %removed.name, "channel removed");
        Some(removed)
    }

    /// Remove a user from every channel and from the directory
    pub(crate) fn remove_user(&mut self, nick: &str) -> Option<User> {
        let nick_key = irc_to_lower(nick);
        let user = self.users.remove(&nick_key)?;
        for channel_key in &user.channels {
            if let Some(chan) = self.channels.get_mut(channel_key) {
                chan.remove_member(&nick_key);
            }
        }
        // Membership the user record did not know about
        for chan in self.channels.values_mut() {
            chan.remove_member(&nick_key);
        }
        Some(user)
    }

    /// Rename a user across the directory and every channel it is in
    pub(crate) fn rename_user(&mut self, old: &str, new: &str) {
        let old_key = irc_to_lower(old);
        let new_key = irc_to_lower(new);

        let mut user = match self.users.remove(&old_key) {
            Some(user) => user,
            None => User::new(old),
        };
        if old_key != new_key && self.users.contains_key(&new_key) {
            warn!(old, new, "nick change onto a tracked nick, replacing stale entry");
            self.remove_user(new);
        }
        user.nick = new.to_string();

        for chan in self.channels.values_mut() {
            if chan.rename_member(&old_key, new) {
                user.join_channel(chan.key());
            }
        }
        if self.is_self(old) {
            info!(old, new, "our nick changed");
            self.nick = new.to_string();
        }
        self.users.insert(new_key, user);
    }

    /// Drop a user that is no longer in any tracked channel
    fn prune_user(&mut self, nick_key: &str) {
        let prune = match self.users.get(nick_key) {
            Some(user) => user.channels.is_empty() && !self.is_self(&user.nick),
            None => false,
        };
        if prune {
            self.users.remove(nick_key);
        }
    }

    /// Start or restart the NAMES list for a channel
    pub(crate) fn begin_names(&mut self, channel: &str) {
        self.pending_names.insert(irc_to_lower(channel), Vec::new());
    }

    /// Append NAMES entries, starting a list if none is in flight
    pub(crate) fn accumulate_names(&mut self, channel: &str, entries: Vec<NamesEntry>) {
        self.pending_names
            .entry(irc_to_lower(channel))
            .or_default()
            .extend(entries);
    }

    /// Whether a NAMES list is being collected for `channel`
    pub fn names_in_flight(&self, channel: &str) -> bool {
        self.pending_names.contains_key(&irc_to_lower(channel))
    }

    /// Replace a channel's membership with the collected NAMES list
    pub(crate) fn finish_names(&mut self, channel: &str) {
        let channel_key = irc_to_lower(channel);
        let entries = self.pending_names.remove(&channel_key).unwrap_or_default();
        self.ensure_channel(channel);

        let listed: BTreeSet<String> = entries.iter().map(|e| irc_to_lower(&e.nick)).collect();
        let stale: Vec<String> = match self.channels.get(&channel_key) {
            Some(chan) => chan
                .members
                .keys()
                .filter(|k| !listed.contains(*k) && !irc_eq(k.as_str(), &self.nick))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        for nick_key in &stale {
            if let Some(chan) = self.channels.get_mut(&channel_key) {
                chan.remove_member(nick_key);
            }
            if let Some(user) = self.users.get_mut(nick_key) {
                user.part_channel(&channel_key);
            }
            self.prune_user(nick_key);
        }

        if let Some(chan) = self.channels.get_mut(&channel_key) {
            for entry in &entries {
                let nick_key = irc_to_lower(&entry.nick);
                chan.members.remove(&nick_key);
                chan.add_member(&entry.nick, entry.modes.clone());
            }
        }
        for entry in entries {
            let user = self.ensure_user(&entry.nick);
            if entry.user.is_some() {
                user.username = entry.user;
            }
            if entry.host.is_some() {
                user.host = entry.host;
            }
            user.join_channel(channel_key.clone());
        }
        debug!(channel, members = listed.len(), "names list complete");
    }

    /// Start collecting a LIST reply
    pub(crate) fn begin_list(&mut self) {
        self.pending_list = Some(Vec::new());
    }

    /// Add one LIST entry
    pub(crate) fn accumulate_list(&mut self, entry: DirectoryEntry) {
        self.pending_list.get_or_insert_with(Vec::new).push(entry);
    }

    /// Publish the collected LIST as the channel directory
    pub(crate) fn finish_list(&mut self) {
        self.directory = self.pending_list.take().unwrap_or_default();
    }

    /// Record a server-reported error
    pub(crate) fn record_error(&mut self, error: IrcError) {
        self.errors.push(error);
    }

    /// Record a line no handler claimed
    pub(crate) fn record_event(&mut self, event: GenericEvent) {
        self.stats.record_event(event);
    }

    /// Start a new connection epoch on RPL_WELCOME
    pub(crate) fn begin_epoch(&mut self, nick: &str) {
        self.server = ServerInfo::default();
        self.nick = nick.to_string();
        self.stats.connected_at = Some(Utc::now());
        self.ensure_user(nick);
    }

    /// Clear per-connection data before reconnecting.
    ///
    /// Returns the names of the channels we were in. Channels tracked only
    /// from query replies are left out.
    pub(crate) fn reset_for_reconnect(&mut self) -> Vec<String> {
        let me = irc_to_lower(&self.nick);
        let joined = self
            .channels
            .values()
            .filter(|c| c.has_member(&me))
            .map(|c| c.name.clone())
            .collect();
        self.channels.clear();
        self.users.clear();
        self.pending_names.clear();
        self.pending_list = None;
        self.stats.connected_at = None;
        joined
    }

    /// Build an isolated copy for readers
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connected: self.connection == ConnectionState::Connected,
            state: self.connection,
            nick: self.nick.clone(),
            channels: self.channels.values().map(ChannelSnapshot::from).collect(),
            users: self.users.values().cloned().collect(),
            server: self.server.clone(),
            errors: self.errors.iter().cloned().collect(),
            directory: self.directory.clone(),
            stats: self.stats.clone(),
            taken_at: Utc::now(),
        }
    }
}

/// Shared handle to the state
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<RwLock<IrcState>>,
}

impl StateStore {
    /// Create a store around a fresh state
    pub fn new(nick: impl Into<String>, error_capacity: usize, event_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(IrcState::new(nick, error_capacity, event_capacity))),
        }
    }

    /// Take a consistent point-in-time copy
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().snapshot()
    }

    /// Run a read-only closure under the shared lock
    pub fn read<R>(&self, f: impl FnOnce(&IrcState) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run a mutation under the exclusive lock
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut IrcState) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Current lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.read().connection
    }

    /// Our current nickname
    pub fn nick(&self) -> String {
        self.inner.read().nick.clone()
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        let mut guard = self.inner.write();
        if guard.connection != state {
            debug!(from = ?guard.connection, to = ?state, "connection state");
            guard.connection = state;
        }
    }

    /// Enter `Reconnecting` and clear channel and user data in one step.
    ///
    /// See [`IrcState::reset_for_reconnect`].
    pub(crate) fn reset_for_reconnect(&self) -> Vec<String> {
        let mut guard = self.inner.write();
        guard.connection = ConnectionState::Reconnecting;
        guard.reset_for_reconnect()
    }
}

/// A channel as exposed to readers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub name: String,
    pub topic: Option<String>,
    pub topic_set_by: Option<String>,
    pub topic_set_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub modes: String,
    pub key: Option<String>,
    pub limit: Option<u32>,
    pub bans: Vec<String>,
    /// Member nick to flags; `None` when the member has no flags
    pub members: BTreeMap<String, Option<ModeSet>>,
}

impl From<&Channel> for ChannelSnapshot {
    fn from(chan: &Channel) -> Self {
        Self {
            name: chan.name.clone(),
            topic: chan.topic.clone(),
            topic_set_by: chan.topic_set_by.clone(),
            topic_set_at: chan.topic_set_at,
            created_at: chan.created_at,
            modes: chan.modes_string(),
            key: chan.key.clone(),
            limit: chan.limit,
            bans: chan.bans.iter().cloned().collect(),
            members: chan
                .members
                .values()
                .map(|m| {
                    let modes = (!m.modes.is_empty()).then(|| m.modes.clone());
                    (m.nick.clone(), modes)
                })
                .collect(),
        }
    }
}

impl ChannelSnapshot {
    /// Whether `nick` is listed as a member
    pub fn has_member(&self, nick: &str) -> bool {
        self.members.keys().any(|m| irc_eq(m, nick))
    }

    /// Flags of a member, `None` when absent or flagless
    pub fn member_modes(&self, nick: &str) -> Option<&ModeSet> {
        self.members
            .iter()
            .find(|(m, _)| irc_eq(m, nick))
            .and_then(|(_, modes)| modes.as_ref())
    }
}

/// Point-in-time view of the whole state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub connected: bool,
    pub state: ConnectionState,
    pub nick: String,
    pub channels: Vec<ChannelSnapshot>,
    pub users: Vec<User>,
    pub server: ServerInfo,
    pub errors: Vec<IrcError>,
    pub directory: Vec<DirectoryEntry>,
    pub stats: Statistics,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| irc_eq(&c.name, name))
    }

    /// Look up a user by nick
    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.iter().find(|u| irc_eq(&u.nick, nick))
    }

    /// Serialize to JSON for the HTTP layer
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
