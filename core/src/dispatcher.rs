//! Command and numeric dispatch
//!
//! Handlers are plain functions looked up by command kind, then by exact
//! numeric, then by numeric range group. Each parsed line is applied under a
//! single write lock on the store. Handlers never do I/O; anything that has
//! to reach the socket or the outside world is returned as a [`Reaction`].

use crate::command::Command;
use crate::config::Config;
use crate::events::MentionEvent;
use crate::mention::MentionMatcher;
use crate::message::{CommandKind, Message};
use crate::modes::{self, ModeSet};
use crate::numeric::{is_fatal_registration_error, NumericGroup, NumericReply};
use crate::state::{DirectoryEntry, IrcError, IrcState, StateStore};
use crate::statistics::GenericEvent;
use crate::utils::casemap::irc_to_lower;
use crate::utils::string::is_channel_name;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Something the connection loop has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Write a command to the server
    Send(Command),
    /// Forward a mention to the event sink
    Mention(MentionEvent),
    /// RPL_WELCOME arrived; registration is complete
    Registered,
    /// The server refused registration for good
    FatalRegistration { code: u16, message: String },
    /// The server sent ERROR and is closing the link
    ServerError(String),
}

/// Per-connection negotiation state shared by the handlers
#[derive(Debug)]
struct Session {
    registered: bool,
    nick: String,
    alt_nicks: Vec<String>,
    next_alt: usize,
    wanted_caps: Vec<String>,
    offered_caps: BTreeSet<String>,
    negotiating_caps: bool,
    mention: MentionMatcher,
}

type Handler = fn(&mut Session, &mut IrcState, &Message, &mut Vec<Reaction>);

/// Routes parsed lines to their handlers
pub struct Dispatcher {
    commands: HashMap<CommandKind, Handler>,
    numerics: HashMap<u16, Handler>,
    groups: HashMap<NumericGroup, Handler>,
    session: Session,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.commands.len())
            .field("numerics", &self.numerics.len())
            .field("session", &self.session)
            .finish()
    }
}

impl Dispatcher {
    /// Build the handler tables for a configured identity
    pub fn new(config: &Config) -> Result<Self> {
        let nick = config.identity.nick.clone();
        let session = Session {
            registered: false,
            mention: MentionMatcher::new(&nick)?,
            nick,
            alt_nicks: config.identity.alt_nicks.clone(),
            next_alt: 0,
            wanted_caps: config.capabilities.clone(),
            offered_caps: BTreeSet::new(),
            negotiating_caps: !config.capabilities.is_empty(),
        };
        Ok(Self {
            commands: command_table(),
            numerics: numeric_table(),
            groups: group_table(),
            session,
        })
    }

    /// Forget negotiation state before a new connection attempt
    pub fn reset(&mut self) {
        let session = &mut self.session;
        session.registered = false;
        session.next_alt = 0;
        session.offered_caps.clear();
        session.negotiating_caps = !session.wanted_caps.is_empty();
        if let Err(e) = session.mention.set_nick(&session.nick) {
            warn!("failed to rebuild mention matcher: {}", e);
        }
    }

    /// Whether RPL_WELCOME has been seen on this connection
    pub fn is_registered(&self) -> bool {
        self.session.registered
    }

    /// Parse and dispatch one raw line.
    ///
    /// A line that does not parse is logged and dropped.
    pub fn dispatch_line(&mut self, store: &StateStore, line: &str) -> Vec<Reaction> {
        match Message::parse(line) {
            Ok(msg) => self.dispatch(store, &msg),
            Err(e) => {
                warn!(line, "dropping line: {}", e);
                store.write(|state| state.stats.record_parse_failure());
                Vec::new()
            }
        }
    }

    /// Apply one message to the store
    pub fn dispatch(&mut self, store: &StateStore, msg: &Message) -> Vec<Reaction> {
        let kind = msg.kind();
        let handler = self.lookup(&kind);
        let session = &mut self.session;
        let mut reactions = Vec::new();

        debug!(command = %msg.command, params = msg.params.len(), "dispatch");
        store.write(|state| {
            state.stats.record_line(&msg.command);
            match handler {
                Some(handler) => handler(session, state, msg, &mut reactions),
                None => {
                    trace!(command = %kind, "no handler, recording event");
                    state.record_event(GenericEvent::from_message(msg));
                }
            }
            if reactions.iter().any(|r| matches!(r, Reaction::Mention(_))) {
                state.stats.mentions += 1;
            }
        });
        reactions
    }

    fn lookup(&self, kind: &CommandKind) -> Option<Handler> {
        match kind {
            CommandKind::Numeric(code) => self
                .numerics
                .get(code)
                .or_else(|| self.groups.get(&NumericGroup::of(*code)))
                .copied(),
            other => self.commands.get(other).copied(),
        }
    }
}

fn command_table() -> HashMap<CommandKind, Handler> {
    let mut table: HashMap<CommandKind, Handler> = HashMap::new();
    table.insert(CommandKind::Join, on_join);
    table.insert(CommandKind::Part, on_part);
    table.insert(CommandKind::Kick, on_kick);
    table.insert(CommandKind::Quit, on_quit);
    table.insert(CommandKind::Nick, on_nick);
    table.insert(CommandKind::Mode, on_mode);
    table.insert(CommandKind::Topic, on_topic);
    table.insert(CommandKind::PrivMsg, on_privmsg);
    table.insert(CommandKind::Notice, on_notice);
    table.insert(CommandKind::Ping, on_ping);
    table.insert(CommandKind::Pong, on_pong);
    table.insert(CommandKind::Error, on_server_error);
    table.insert(CommandKind::Cap, on_cap);
    table.insert(CommandKind::Away, on_away);
    table.insert(CommandKind::ChgHost, on_chghost);
    table.insert(CommandKind::Invite, on_invite);
    table
}

fn numeric_table() -> HashMap<u16, Handler> {
    use NumericReply::*;

    let entries: [(NumericReply, Handler); 34] = [
        (RplWelcome, on_welcome),
        (RplYourHost, on_your_host),
        (RplCreated, on_created),
        (RplMyInfo, on_my_info),
        (RplISupport, on_isupport),
        (RplUmodeIs, on_umode_is),
        (RplAway, on_away_reply),
        (RplUnaway, on_unaway),
        (RplNowAway, on_now_away),
        (RplWhoisUser, on_whois_user),
        (RplWhoisServer, on_whois_server),
        (RplWhoisOperator, on_whois_operator),
        (RplEndOfWho, on_end_of_reply),
        (RplWhoisIdle, on_whois_idle),
        (RplEndOfWhois, on_end_of_reply),
        (RplWhoisChannels, on_whois_channels),
        (RplListStart, on_list_start),
        (RplList, on_list),
        (RplListEnd, on_list_end),
        (RplChannelModeIs, on_channel_mode_is),
        (RplCreationTime, on_creation_time),
        (RplNoTopic, on_no_topic),
        (RplTopic, on_topic_reply),
        (RplTopicWhoTime, on_topic_who_time),
        (RplWhoReply, on_who_reply),
        (RplNameReply, on_names_reply),
        (RplEndOfNames, on_end_of_names),
        (RplMotd, on_motd),
        (RplMotdStart, on_motd_start),
        (RplEndOfMotd, on_end_of_reply),
        (ErrErroneousNickname, on_nick_error),
        (ErrNicknameInUse, on_nick_error),
        (ErrNickCollision, on_nick_error),
        (ErrUnavailResource, on_nick_error),
    ];
    entries
        .into_iter()
        .map(|(reply, handler)| (reply.numeric_code(), handler))
        .collect()
}

fn group_table() -> HashMap<NumericGroup, Handler> {
    let mut table: HashMap<NumericGroup, Handler> = HashMap::new();
    table.insert(NumericGroup::Error, on_error_numeric);
    table
}

fn unix_time(value: &str) -> Option<DateTime<Utc>> {
    let secs = value.parse::<i64>().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Text of an error numeric without our own nick in front
fn error_text(msg: &Message) -> String {
    match msg.params.len() {
        0 => String::new(),
        1 | 2 => msg.trailing().unwrap_or_default().to_string(),
        n => format!("{}: {}", msg.params[1..n - 1].join(" "), msg.params[n - 1]),
    }
}

// Commands

fn on_join(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(nick), Some(channel)) = (msg.source_nick(), msg.param(0)) else {
        return;
    };
    if state.is_self(nick) {
        info!(channel, "joined");
    }
    state.add_member(channel, nick, ModeSet::new());

    let user = state.ensure_user(nick);
    if let Some(ref prefix) = msg.prefix {
        user.update_from_prefix(prefix);
    }
    user.touch(msg.timestamp());
    // extended-join: JOIN #chan account :realname
    if msg.params.len() >= 3 {
        user.account = msg.param(1).filter(|a| *a != "*").map(str::to_string);
        user.realname = msg.param(2).map(str::to_string);
    }
}

fn on_part(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(nick), Some(channel)) = (msg.source_nick(), msg.param(0)) else {
        return;
    };
    if state.is_self(nick) {
        info!(channel, "left");
    }
    state.remove_member(channel, nick);
}

fn on_kick(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(channel), Some(target)) = (msg.param(0), msg.param(1)) else {
        return;
    };
    if state.is_self(target) {
        warn!(channel, by = msg.source_nick(), reason = msg.param(2), "kicked");
    }
    state.remove_member(channel, target);
}

fn on_quit(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let Some(nick) = msg.source_nick() else {
        return;
    };
    if !state.is_self(nick) {
        state.remove_user(nick);
    }
}

fn on_nick(session: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(old), Some(new)) = (msg.source_nick(), msg.param(0)) else {
        return;
    };
    let ours = state.is_self(old);
    state.rename_user(old, new);
    if ours {
        if let Err(e) = session.mention.set_nick(new) {
            warn!("failed to rebuild mention matcher: {}", e);
        }
    }
}

fn on_mode(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(target), Some(flags)) = (msg.param(0), msg.param(1)) else {
        return;
    };

    if !is_channel_name(target) {
        let user = state.ensure_user(target);
        for change in modes::decode_user_modes(flags) {
            user.apply_mode(&change);
        }
        return;
    }

    let decoded = modes::decode(flags, &msg.params[2..]);
    if !decoded.missing_args.is_empty() {
        warn!(channel = target, flags, missing = ?decoded.missing_args, "mode flags without arguments");
    }
    apply_channel_changes(state, target, &decoded.changes);
}

fn apply_channel_changes(state: &mut IrcState, channel: &str, changes: &[modes::ModeChange]) {
    let channel_key = state.ensure_channel(channel).key();
    for change in changes {
        match change.arg.as_deref() {
            Some(nick) if change.is_membership() => {
                let nick_key = irc_to_lower(nick);
                let known = state
                    .channels
                    .get(&channel_key)
                    .map(|c| c.has_member(&nick_key))
                    .unwrap_or(false);
                if !known {
                    state.add_member(channel, nick, ModeSet::new());
                }
                if let Some(chan) = state.channels.get_mut(&channel_key) {
                    chan.apply_member_mode(&nick_key, change.sign, change.flag);
                }
            }
            _ => {
                if let Some(chan) = state.channels.get_mut(&channel_key) {
                    chan.apply_channel_mode(change);
                }
            }
        }
    }
}

fn on_topic(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let Some(channel) = msg.param(0) else {
        return;
    };
    let topic = msg.param(1).filter(|t| !t.is_empty()).map(str::to_string);
    let setter = msg.prefix.as_ref().map(|p| p.nick().map(str::to_string).unwrap_or_else(|| p.to_string()));

    let chan = state.ensure_channel(channel);
    chan.topic = topic;
    chan.topic_set_by = setter;
    chan.topic_set_at = Some(msg.timestamp());
}

fn on_privmsg(session: &mut Session, state: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    let (Some(sender), Some(target), Some(text)) = (msg.source_nick(), msg.param(0), msg.param(1)) else {
        return;
    };
    touch_sender(state, msg, sender);
    if state.is_self(sender) {
        return;
    }

    let body = match text.strip_prefix('\u{1}') {
        Some(ctcp) => {
            let ctcp = ctcp.trim_end_matches('\u{1}');
            match ctcp.strip_prefix("ACTION ") {
                Some(action) => action,
                None => {
                    debug!(sender, "ignoring CTCP request");
                    return;
                }
            }
        }
        None => text,
    };

    if let Err(e) = session.mention.set_nick(&state.nick) {
        warn!("failed to rebuild mention matcher: {}", e);
        return;
    }
    if !session.mention.is_mention(body) {
        return;
    }

    debug!(sender, target, "mention");
    reactions.push(Reaction::Mention(MentionEvent {
        sender: sender.to_string(),
        target: target.to_string(),
        message: session.mention.strip_address(body).to_string(),
        full_message: body.to_string(),
        bot_nick: state.nick.clone(),
        timestamp: msg.timestamp(),
    }));
}

fn on_notice(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let Some(sender) = msg.source_nick() {
        touch_sender(state, msg, sender);
    }
}

fn touch_sender(state: &mut IrcState, msg: &Message, sender: &str) {
    if let Some(user) = state.users.get_mut(&irc_to_lower(sender)) {
        if let Some(ref prefix) = msg.prefix {
            user.update_from_prefix(prefix);
        }
        user.touch(msg.timestamp());
    }
}

fn on_ping(_: &mut Session, _: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    let token = msg.trailing().unwrap_or_default();
    reactions.push(Reaction::Send(Command::Pong(token.to_string())));
}

fn on_pong(_: &mut Session, _: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    trace!(token = msg.trailing(), "pong");
}

fn on_server_error(_: &mut Session, _: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    let text = msg.trailing().unwrap_or_default();
    warn!(text, "server closing link");
    reactions.push(Reaction::ServerError(text.to_string()));
}

fn on_cap(session: &mut Session, state: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    let Some(subcommand) = msg.param(1) else {
        return;
    };
    let cap_names = |list: &str| -> Vec<String> {
        list.split_whitespace()
            .map(|cap| cap.split_once('=').map(|(name, _)| name).unwrap_or(cap).to_string())
            .collect()
    };
    let list = msg.trailing().unwrap_or_default();

    match subcommand.to_ascii_uppercase().as_str() {
        "LS" => {
            // CAP * LS * :caps... means more lines follow
            let more = msg.params.len() >= 4 && msg.param(2) == Some("*");
            session.offered_caps.extend(cap_names(list));
            if more || !session.negotiating_caps {
                return;
            }
            let request: Vec<String> = session
                .wanted_caps
                .iter()
                .filter(|cap| session.offered_caps.contains(*cap))
                .cloned()
                .collect();
            if request.is_empty() {
                session.negotiating_caps = false;
                reactions.push(Reaction::Send(Command::CapEnd));
            } else {
                debug!(caps = ?request, "requesting capabilities");
                reactions.push(Reaction::Send(Command::CapReq(request)));
            }
        }
        "ACK" => {
            for cap in list.split_whitespace() {
                match cap.strip_prefix('-') {
                    Some(removed) => {
                        state.server.capabilities.remove(removed);
                    }
                    None => {
                        state.server.capabilities.insert(cap.to_string());
                    }
                }
            }
            info!(caps = list, "capabilities acknowledged");
            if session.negotiating_caps {
                session.negotiating_caps = false;
                reactions.push(Reaction::Send(Command::CapEnd));
            }
        }
        "NAK" => {
            warn!(caps = list, "capabilities refused");
            if session.negotiating_caps {
                session.negotiating_caps = false;
                reactions.push(Reaction::Send(Command::CapEnd));
            }
        }
        "NEW" => {
            let new = cap_names(list);
            let request: Vec<String> = new
                .iter()
                .filter(|cap| session.wanted_caps.contains(*cap) && !state.server.capabilities.contains(*cap))
                .cloned()
                .collect();
            session.offered_caps.extend(new);
            if !request.is_empty() {
                reactions.push(Reaction::Send(Command::CapReq(request)));
            }
        }
        "DEL" => {
            for cap in cap_names(list) {
                state.server.capabilities.remove(&cap);
                session.offered_caps.remove(&cap);
            }
        }
        _ => state.record_event(GenericEvent::from_message(msg)),
    }
}

fn on_away(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let Some(nick) = msg.source_nick() else {
        return;
    };
    if let Some(user) = state.users.get_mut(&irc_to_lower(nick)) {
        user.set_away(msg.param(0).map(str::to_string));
    }
}

fn on_chghost(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(nick), Some(username), Some(host)) = (msg.source_nick(), msg.param(0), msg.param(1)) else {
        return;
    };
    if let Some(user) = state.users.get_mut(&irc_to_lower(nick)) {
        user.username = Some(username.to_string());
        user.host = Some(host.to_string());
    }
}

fn on_invite(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    info!(from = msg.source_nick(), channel = msg.param(1), "invited");
    state.record_event(GenericEvent::from_message(msg));
}

// Registration numerics

fn on_welcome(session: &mut Session, state: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    let nick = msg.param(0).unwrap_or(&state.nick).to_string();
    state.begin_epoch(&nick);
    state.server.name = msg.prefix.as_ref().map(ToString::to_string);
    state.server.welcome = msg.trailing().map(str::to_string);

    session.registered = true;
    session.negotiating_caps = false;
    if let Err(e) = session.mention.set_nick(&nick) {
        warn!("failed to rebuild mention matcher: {}", e);
    }
    info!(nick = %nick, server = ?state.server.name, "registered");
    reactions.push(Reaction::Registered);
}

fn on_your_host(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let text = msg.trailing().unwrap_or_default();
    if let Some((_, version)) = text.split_once("running version ") {
        state.server.version = Some(version.trim().to_string());
    }
}

fn on_created(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let text = msg.trailing().unwrap_or_default();
    let created = text.strip_prefix("This server was created ").unwrap_or(text);
    state.server.created = Some(created.to_string());
}

fn on_my_info(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let server = &mut state.server;
    if let Some(name) = msg.param(1) {
        server.name = Some(name.to_string());
    }
    if let Some(version) = msg.param(2) {
        server.version = Some(version.to_string());
    }
    server.user_modes = msg.param(3).map(str::to_string);
    server.channel_modes = msg.param(4).map(str::to_string);
}

fn on_isupport(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // nick TOKEN TOKEN=value ... :are supported by this server
    if msg.params.len() < 3 {
        return;
    }
    for token in &msg.params[1..msg.params.len() - 1] {
        if let Some(removed) = token.strip_prefix('-') {
            state.server.isupport.remove(removed);
            continue;
        }
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (token.as_str(), None),
        };
        if key == "NETWORK" {
            state.server.network = value.clone();
        }
        state.server.isupport.insert(key.to_string(), value);
    }
}

// User info numerics

fn on_umode_is(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let Some(flags) = msg.param(1) else {
        return;
    };
    let nick = state.nick.clone();
    let user = state.ensure_user(&nick);
    user.modes.clear();
    user.is_operator = false;
    for change in modes::decode_user_modes(flags) {
        user.apply_mode(&change);
    }
}

fn on_away_reply(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let Some(nick) = msg.param(1) {
        let away = msg.param(2).unwrap_or_default().to_string();
        state.ensure_user(nick).set_away(Some(away));
    }
}

fn on_unaway(_: &mut Session, state: &mut IrcState, _: &Message, _: &mut Vec<Reaction>) {
    let nick = state.nick.clone();
    state.ensure_user(&nick).set_away(None);
}

fn on_now_away(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let nick = state.nick.clone();
    let text = msg.trailing().unwrap_or_default().to_string();
    state.ensure_user(&nick).set_away(Some(text));
}

fn on_whois_user(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // me nick user host * :realname
    let Some(nick) = msg.param(1) else {
        return;
    };
    let user = state.ensure_user(nick);
    user.username = msg.param(2).map(str::to_string);
    user.host = msg.param(3).map(str::to_string);
    user.realname = msg.param(5).map(str::to_string);
}

fn on_whois_server(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let (Some(nick), Some(server)) = (msg.param(1), msg.param(2)) {
        state.ensure_user(nick).server = Some(server.to_string());
    }
}

fn on_whois_operator(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let Some(nick) = msg.param(1) {
        state.ensure_user(nick).is_operator = true;
    }
}

fn on_whois_idle(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // me nick idle signon :seconds idle, signon time
    let Some(nick) = msg.param(1) else {
        return;
    };
    let user = state.ensure_user(nick);
    user.idle_seconds = msg.param(2).and_then(|s| s.parse().ok());
    if let Some(signon) = msg.param(3).and_then(unix_time) {
        user.signon = Some(signon);
    }
}

fn on_whois_channels(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(nick), Some(list)) = (msg.param(1), msg.param(2)) else {
        return;
    };
    for token in list.split_whitespace() {
        let (channel, member_modes) = modes::decode_membership_prefixes(token);
        // only channels we are in are tracked
        if state.channel(channel).is_some() {
            state.add_member(channel, nick, member_modes);
        }
    }
}

fn on_end_of_reply(_: &mut Session, _: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    trace!(numeric = %msg.command, "end of reply");
}

// Channel info numerics

fn on_list_start(_: &mut Session, state: &mut IrcState, _: &Message, _: &mut Vec<Reaction>) {
    state.begin_list();
}

fn on_list(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // me channel users :topic
    let Some(name) = msg.param(1) else {
        return;
    };
    state.accumulate_list(DirectoryEntry {
        name: name.to_string(),
        users: msg.param(2).and_then(|u| u.parse().ok()).unwrap_or(0),
        topic: msg.param(3).unwrap_or_default().to_string(),
    });
}

fn on_list_end(_: &mut Session, state: &mut IrcState, _: &Message, _: &mut Vec<Reaction>) {
    state.finish_list();
    debug!(channels = state.directory.len(), "channel list complete");
}

fn on_channel_mode_is(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let (Some(channel), Some(flags)) = (msg.param(1), msg.param(2)) else {
        return;
    };
    let decoded = modes::decode(flags, &msg.params[3..]);
    apply_channel_changes(state, channel, &decoded.changes);
}

fn on_creation_time(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let (Some(channel), Some(created)) = (msg.param(1), msg.param(2).and_then(unix_time)) {
        state.ensure_channel(channel).created_at = Some(created);
    }
}

fn on_no_topic(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let Some(channel) = msg.param(1) {
        let chan = state.ensure_channel(channel);
        chan.topic = None;
        chan.topic_set_by = None;
        chan.topic_set_at = None;
    }
}

fn on_topic_reply(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    if let (Some(channel), Some(topic)) = (msg.param(1), msg.param(2)) {
        state.ensure_channel(channel).topic = Some(topic.to_string());
    }
}

fn on_topic_who_time(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // me channel setter time
    let (Some(channel), Some(setter)) = (msg.param(1), msg.param(2)) else {
        return;
    };
    let setter = setter.split_once('!').map(|(nick, _)| nick).unwrap_or(setter);
    let chan = state.ensure_channel(channel);
    chan.topic_set_by = Some(setter.to_string());
    chan.topic_set_at = msg.param(3).and_then(unix_time);
}

fn on_who_reply(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // me channel user host server nick flags :hops realname
    if msg.params.len() < 7 {
        return;
    }
    let channel = &msg.params[1];
    let nick = &msg.params[5];
    let flags = modes::parse_who_flags(&msg.params[6]);

    let user = state.ensure_user(nick);
    user.username = Some(msg.params[2].clone());
    user.host = Some(msg.params[3].clone());
    user.server = Some(msg.params[4].clone());
    user.is_operator = flags.operator;
    if flags.away != user.away {
        user.set_away(flags.away.then(String::new));
    }
    if let Some((_, realname)) = msg.param(7).and_then(|t| t.split_once(' ')) {
        user.realname = Some(realname.to_string());
    }

    if state.channel(channel).is_some() {
        state.add_member(channel, nick, flags.modes);
    }
}

fn on_names_reply(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    // me [=*@] channel :names, the type marker is missing on some servers
    let (channel, names) = match msg.params.len() {
        n if n >= 4 => (&msg.params[2], &msg.params[3]),
        3 => (&msg.params[1], &msg.params[2]),
        _ => return,
    };
    if !state.names_in_flight(channel) {
        state.begin_names(channel);
    }
    let entries = names
        .split_whitespace()
        .filter_map(modes::parse_names_entry)
        .collect();
    state.accumulate_names(channel, entries);
}

fn on_end_of_names(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let Some(channel) = msg.param(1) else {
        return;
    };
    if state.names_in_flight(channel) || state.channel(channel).is_some() {
        state.finish_names(channel);
    }
}

// MOTD numerics

fn on_motd_start(_: &mut Session, state: &mut IrcState, _: &Message, _: &mut Vec<Reaction>) {
    state.server.motd.clear();
}

fn on_motd(_: &mut Session, state: &mut IrcState, msg: &Message, _: &mut Vec<Reaction>) {
    let line = msg.trailing().unwrap_or_default();
    let line = line.strip_prefix("- ").unwrap_or(line);
    state.server.motd.push(line.to_string());
}

// Errors

fn on_nick_error(session: &mut Session, state: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    on_error_numeric(session, state, msg, reactions);
    if session.registered {
        return;
    }
    let rejected = msg.param(1).unwrap_or(&state.nick).to_string();
    let next = match session.alt_nicks.get(session.next_alt) {
        Some(alt) => {
            session.next_alt += 1;
            alt.clone()
        }
        // appending `_` will not make an erroneous nickname valid
        None if msg.numeric() == Some(NumericReply::ErrErroneousNickname.numeric_code()) => {
            reactions.push(Reaction::FatalRegistration {
                code: NumericReply::ErrErroneousNickname.numeric_code(),
                message: format!("erroneous nickname {} and no alternates left", rejected),
            });
            return;
        }
        None => format!("{}_", rejected),
    };
    info!(rejected = %rejected, next = %next, "nickname unavailable, trying another");
    state.nick = next.clone();
    reactions.push(Reaction::Send(Command::Nick(next)));
}

fn on_error_numeric(session: &mut Session, state: &mut IrcState, msg: &Message, reactions: &mut Vec<Reaction>) {
    let Some(code) = msg.numeric() else {
        return;
    };
    let error = IrcError::new(code, error_text(msg), msg.timestamp());
    warn!(code, severity = ?error.severity, category = ?error.category, message = %error.message, "server error");

    if !session.registered && is_fatal_registration_error(code) {
        reactions.push(Reaction::FatalRegistration {
            code,
            message: error.message.clone(),
        });
    }
    state.record_error(error);
}
