//! Outbound commands
//!
//! Every command serializes to exactly one protocol line. Arguments are
//! checked so that a caller cannot smuggle a second line onto the wire.

use crate::utils::string::is_wire_safe;
use crate::{Error, Message, Result};
use std::fmt;

/// A command queued for the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { channel: String, key: Option<String> },
    Part { channel: String, reason: Option<String> },
    Nick(String),
    Privmsg { target: String, text: String },
    Notice { target: String, text: String },
    Mode { target: String, flags: String, args: Vec<String> },
    /// Line passed through verbatim
    Raw(String),
    Pass(String),
    User { username: String, realname: String },
    CapLs,
    CapReq(Vec<String>),
    CapEnd,
    Pong(String),
    Quit(Option<String>),
}

impl Command {
    /// Join a channel
    pub fn join(channel: impl Into<String>) -> Self {
        Command::Join { channel: channel.into(), key: None }
    }

    /// Part a channel
    pub fn part(channel: impl Into<String>, reason: Option<String>) -> Self {
        Command::Part { channel: channel.into(), reason }
    }

    /// Message a channel or user
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Command::Privmsg { target: target.into(), text: text.into() }
    }

    /// Notice a channel or user
    pub fn notice(target: impl Into<String>, text: impl Into<String>) -> Self {
        Command::Notice { target: target.into(), text: text.into() }
    }

    /// Reject arguments that would break line framing
    pub fn validate(&self) -> Result<()> {
        let (single, free): (Vec<&str>, Vec<&str>) = match self {
            Command::Join { channel, key } => {
                let mut single = vec![channel.as_str()];
                single.extend(key.as_deref());
                (single, vec![])
            }
            Command::Part { channel, reason } => (vec![channel.as_str()], reason.as_deref().into_iter().collect()),
            Command::Nick(nick) => (vec![nick.as_str()], vec![]),
            Command::Privmsg { target, text } | Command::Notice { target, text } => (vec![target.as_str()], vec![text.as_str()]),
            Command::Mode { target, flags, args } => {
                let mut single = vec![target.as_str(), flags.as_str()];
                single.extend(args.iter().map(String::as_str));
                (single, vec![])
            }
            Command::Raw(line) => (vec![], vec![line.trim_end_matches(['\r', '\n'])]),
            Command::Pass(pass) => (vec![pass.as_str()], vec![]),
            Command::User { username, realname } => (vec![username.as_str()], vec![realname.as_str()]),
            Command::CapReq(caps) => (caps.iter().map(String::as_str).collect(), vec![]),
            Command::Pong(token) => (vec![], vec![token.as_str()]),
            Command::Quit(reason) => (vec![], reason.as_deref().into_iter().collect()),
            Command::CapLs | Command::CapEnd => (vec![], vec![]),
        };

        for arg in &single {
            if arg.is_empty() || arg.contains(' ') || arg.starts_with(':') || !is_wire_safe(arg) {
                return Err(Error::InvalidCommand(format!("invalid argument {:?}", arg)));
            }
        }
        for arg in &free {
            if !is_wire_safe(arg) {
                return Err(Error::InvalidCommand("line breaks are not allowed".to_string()));
            }
        }
        if let Command::Raw(line) = self {
            if line.trim().is_empty() {
                return Err(Error::InvalidCommand("empty raw line".to_string()));
            }
        }
        Ok(())
    }

    /// Build the equivalent message; raw lines are parsed
    pub fn to_message(&self) -> Result<Message> {
        let (command, params): (&str, Vec<String>) = match self {
            Command::Join { channel, key } => {
                let mut params = vec![channel.clone()];
                params.extend(key.clone());
                ("JOIN", params)
            }
            Command::Part { channel, reason } => {
                let mut params = vec![channel.clone()];
                params.extend(reason.clone());
                ("PART", params)
            }
            Command::Nick(nick) => ("NICK", vec![nick.clone()]),
            Command::Privmsg { target, text } => ("PRIVMSG", vec![target.clone(), text.clone()]),
            Command::Notice { target, text } => ("NOTICE", vec![target.clone(), text.clone()]),
            Command::Mode { target, flags, args } => {
                let mut params = vec![target.clone(), flags.clone()];
                params.extend(args.iter().cloned());
                ("MODE", params)
            }
            Command::Raw(line) => return Message::parse(line),
            Command::Pass(pass) => ("PASS", vec![pass.clone()]),
            Command::User { username, realname } => (
                "USER",
                vec![username.clone(), "0".to_string(), "*".to_string(), realname.clone()],
            ),
            Command::CapLs => ("CAP", vec!["LS".to_string(), "302".to_string()]),
            Command::CapReq(caps) => ("CAP", vec!["REQ".to_string(), caps.join(" ")]),
            Command::CapEnd => ("CAP", vec!["END".to_string()]),
            Command::Pong(token) => ("PONG", vec![token.clone()]),
            Command::Quit(reason) => ("QUIT", reason.clone().into_iter().collect()),
        };
        Ok(Message::new(command, params))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Free text always travels as the trailing parameter
        match self {
            Command::Join { channel, key: Some(key) } => write!(f, "JOIN {} {}", channel, key),
            Command::Join { channel, key: None } => write!(f, "JOIN {}", channel),
            Command::Part { channel, reason: Some(reason) } => write!(f, "PART {} :{}", channel, reason),
            Command::Part { channel, reason: None } => write!(f, "PART {}", channel),
            Command::Nick(nick) => write!(f, "NICK {}", nick),
            Command::Privmsg { target, text } => write!(f, "PRIVMSG {} :{}", target, text),
            Command::Notice { target, text } => write!(f, "NOTICE {} :{}", target, text),
            Command::Mode { target, flags, args } => {
                write!(f, "MODE {} {}", target, flags)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            Command::Raw(line) => f.write_str(line.trim_end_matches(['\r', '\n'])),
            Command::Pass(pass) => write!(f, "PASS {}", pass),
            Command::User { username, realname } => write!(f, "USER {} 0 * :{}", username, realname),
            Command::CapLs => f.write_str("CAP LS 302"),
            Command::CapReq(caps) => write!(f, "CAP REQ :{}", caps.join(" ")),
            Command::CapEnd => f.write_str("CAP END"),
            Command::Pong(token) => write!(f, "PONG :{}", token),
            Command::Quit(Some(reason)) => write!(f, "QUIT :{}", reason),
            Command::Quit(None) => f.write_str("QUIT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_lines() {
        assert_eq!(Command::join("#rust").to_string(), "JOIN #rust");
        assert_eq!(
            Command::part("#rust", Some("bye all".to_string())).to_string(),
            "PART #rust :bye all"
        );
        assert_eq!(Command::Nick("bot2".to_string()).to_string(), "NICK bot2");
        assert_eq!(Command::privmsg("#rust", "hi there").to_string(), "PRIVMSG #rust :hi there");
        assert_eq!(Command::notice("alice", "psst").to_string(), "NOTICE alice :psst");
        let mode = Command::Mode {
            target: "#rust".to_string(),
            flags: "+ov".to_string(),
            args: vec!["alice".to_string(), "bob".to_string()],
        };
        assert_eq!(mode.to_string(), "MODE #rust +ov alice bob");
        assert_eq!(Command::Raw("WHOIS alice\r\n".to_string()).to_string(), "WHOIS alice");
    }

    #[test]
    fn test_line_injection_rejected() {
        assert!(Command::privmsg("#rust", "hi\r\nQUIT").validate().is_err());
        assert!(Command::join("#a b").validate().is_err());
        assert!(Command::Nick(String::new()).validate().is_err());
        assert!(Command::Raw("  ".to_string()).validate().is_err());
        assert!(Command::privmsg("#rust", "fine text").validate().is_ok());
    }

    #[test]
    fn test_to_message_matches_display() {
        let cmd = Command::privmsg("#rust", "hello world");
        let msg = cmd.to_message().unwrap();
        assert_eq!(msg.to_string(), cmd.to_string());
    }
}
