//! IRC message parsing and handling
//!
//! This module implements the inbound line grammar: optional IRCv3 tags,
//! optional prefix, a command token and space separated parameters where the
//! last one may be a `:`-introduced trailing parameter containing spaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Message tags; a tag without a value maps to `None`
pub type Tags = BTreeMap<String, Option<String>>;

/// IRC message prefix (server or user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prefix {
    /// Server name
    Server(String),
    /// User prefix (nick[!user][@host])
    User {
        nick: String,
        user: Option<String>,
        host: Option<String>,
    },
}

impl Prefix {
    /// Parse the text of a prefix (without the leading `:`)
    pub fn parse(raw: &str) -> Self {
        if let Some((nick, rest)) = raw.split_once('!') {
            let (user, host) = match rest.split_once('@') {
                Some((user, host)) => (user.to_string(), Some(host.to_string())),
                None => (rest.to_string(), None),
            };
            Prefix::User {
                nick: nick.to_string(),
                user: Some(user),
                host,
            }
        } else if let Some((nick, host)) = raw.split_once('@') {
            Prefix::User {
                nick: nick.to_string(),
                user: None,
                host: Some(host.to_string()),
            }
        } else if raw.contains('.') {
            Prefix::Server(raw.to_string())
        } else {
            Prefix::User {
                nick: raw.to_string(),
                user: None,
                host: None,
            }
        }
    }

    /// Nickname, if this prefix names a user
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::User { nick, .. } => Some(nick),
            Prefix::Server(_) => None,
        }
    }

    /// Username part of a user prefix
    pub fn user(&self) -> Option<&str> {
        match self {
            Prefix::User { user, .. } => user.as_deref(),
            Prefix::Server(_) => None,
        }
    }

    /// Host part of a user prefix
    pub fn host(&self) -> Option<&str> {
        match self {
            Prefix::User { host, .. } => host.as_deref(),
            Prefix::Server(_) => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => write!(f, "{}", name),
            Prefix::User { nick, user, host } => {
                write!(f, "{}", nick)?;
                if let Some(user) = user {
                    write!(f, "!{}", user)?;
                }
                if let Some(host) = host {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

/// Classification of a command token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Join,
    Part,
    Quit,
    Kick,
    Nick,
    Mode,
    Topic,
    PrivMsg,
    Notice,
    Ping,
    Pong,
    Error,
    Cap,
    Away,
    Invite,
    ChgHost,

    /// Three digit server reply
    Numeric(u16),

    /// Anything else
    Other(String),
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::Join => "JOIN",
            CommandKind::Part => "PART",
            CommandKind::Quit => "QUIT",
            CommandKind::Kick => "KICK",
            CommandKind::Nick => "NICK",
            CommandKind::Mode => "MODE",
            CommandKind::Topic => "TOPIC",
            CommandKind::PrivMsg => "PRIVMSG",
            CommandKind::Notice => "NOTICE",
            CommandKind::Ping => "PING",
            CommandKind::Pong => "PONG",
            CommandKind::Error => "ERROR",
            CommandKind::Cap => "CAP",
            CommandKind::Away => "AWAY",
            CommandKind::Invite => "INVITE",
            CommandKind::ChgHost => "CHGHOST",
            CommandKind::Numeric(code) => return write!(f, "{:03}", code),
            CommandKind::Other(cmd) => cmd,
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for CommandKind {
    fn from(s: &str) -> Self {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = s.parse() {
                return CommandKind::Numeric(code);
            }
        }
        match s.to_ascii_uppercase().as_str() {
            "JOIN" => CommandKind::Join,
            "PART" => CommandKind::Part,
            "QUIT" => CommandKind::Quit,
            "KICK" => CommandKind::Kick,
            "NICK" => CommandKind::Nick,
            "MODE" => CommandKind::Mode,
            "TOPIC" => CommandKind::Topic,
            "PRIVMSG" => CommandKind::PrivMsg,
            "NOTICE" => CommandKind::Notice,
            "PING" => CommandKind::Ping,
            "PONG" => CommandKind::Pong,
            "ERROR" => CommandKind::Error,
            "CAP" => CommandKind::Cap,
            "AWAY" => CommandKind::Away,
            "INVITE" => CommandKind::Invite,
            "CHGHOST" => CommandKind::ChgHost,
            _ => CommandKind::Other(s.to_string()),
        }
    }
}

/// One parsed protocol line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// IRCv3 message tags
    pub tags: Tags,
    /// Optional prefix (server or user)
    pub prefix: Option<Prefix>,
    /// Command token, case preserved
    pub command: String,
    /// Message parameters
    pub params: Vec<String>,
}

impl Message {
    /// Create a new message
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tags: Tags::new(),
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Create a new message with prefix
    pub fn with_prefix(prefix: Prefix, command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: Some(prefix),
            ..Self::new(command, params)
        }
    }

    /// Parse one line, with or without its CR LF terminator
    pub fn parse(input: &str) -> crate::Result<Self> {
        let mut rest = input
            .trim_end_matches(['\r', '\n'])
            .trim_start_matches(' ');
        if rest.trim().is_empty() {
            return Err(crate::Error::MessageParse("Empty message".to_string()));
        }

        let mut tags = Tags::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw, tail) = next_token(stripped);
            tags = parse_tags(raw);
            rest = tail;
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw, tail) = next_token(stripped);
            if raw.is_empty() {
                return Err(crate::Error::MessageParse("Empty prefix".to_string()));
            }
            prefix = Some(Prefix::parse(raw));
            rest = tail;
        }

        let (command, mut rest) = next_token(rest);
        if command.is_empty() {
            return Err(crate::Error::MessageParse("No command found".to_string()));
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            let (param, tail) = next_token(rest);
            params.push(param.to_string());
            rest = tail;
        }

        Ok(Message {
            tags,
            prefix,
            command: command.to_string(),
            params,
        })
    }

    /// Classify the command token
    pub fn kind(&self) -> CommandKind {
        CommandKind::from(self.command.as_str())
    }

    /// Numeric code, if the command is a three digit reply
    pub fn numeric(&self) -> Option<u16> {
        match self.kind() {
            CommandKind::Numeric(code) => Some(code),
            _ => None,
        }
    }

    /// Nickname of the sender, when the prefix names a user
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }

    /// Parameter at `index`
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last parameter
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Value of a tag; `None` when absent or valueless
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(|v| v.as_deref())
    }

    /// Timestamp from the `server-time` tag, falling back to now
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.tag("time")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    /// Serialize with the CR LF terminator
    pub fn to_wire(&self) -> String {
        format!("{}\r\n", self)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            f.write_str("@")?;
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                f.write_str(key)?;
                if let Some(value) = value {
                    write!(f, "={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        f.write_str(&self.command)?;

        for (i, param) in self.params.iter().enumerate() {
            f.write_str(" ")?;
            let last = i == self.params.len() - 1;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                f.write_str(":")?;
            }
            f.write_str(param)?;
        }
        Ok(())
    }
}

fn next_token(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((head, tail)) => (head, tail.trim_start_matches(' ')),
        None => (s, ""),
    }
}

fn parse_tags(raw: &str) -> Tags {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once('=') {
            Some((key, "")) => (key.to_string(), None),
            Some((key, value)) => (key.to_string(), Some(unescape_tag_value(value))),
            None => (t.to_string(), None),
        })
        .collect()
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // a lone trailing backslash is dropped
            None => {}
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
