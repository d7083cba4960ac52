//! User tracking

use crate::modes::{self, ModeChange, ModeSet};
use crate::utils::casemap::irc_to_lower;
use crate::Prefix;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

/// A user observed on the network
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity that survives nick changes
    pub id: Uuid,
    /// Current nickname
    pub nick: String,
    /// Username (ident)
    pub username: Option<String>,
    /// Hostname/IP
    pub host: Option<String>,
    /// Real name
    pub realname: Option<String>,
    /// Services account, when known
    pub account: Option<String>,
    /// Server the user is connected to
    pub server: Option<String>,
    /// Whether user is away
    pub away: bool,
    /// Away message (if any)
    pub away_message: Option<String>,
    /// Whether user is an IRC operator
    pub is_operator: bool,
    /// User modes
    pub modes: ModeSet,
    /// Folded names of tracked channels the user is in
    pub channels: BTreeSet<String>,
    /// Idle time reported by WHOIS
    pub idle_seconds: Option<u64>,
    /// Sign-on time reported by WHOIS
    pub signon: Option<DateTime<Utc>>,
    /// First time the user was observed
    pub first_seen: DateTime<Utc>,
    /// Last time the user did something we saw
    pub last_seen: DateTime<Utc>,
}

impl User {
    /// Create a new user
    pub fn new(nick: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            nick: nick.into(),
            username: None,
            host: None,
            realname: None,
            account: None,
            server: None,
            away: false,
            away_message: None,
            is_operator: false,
            modes: ModeSet::new(),
            channels: BTreeSet::new(),
            idle_seconds: None,
            signon: None,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Lookup key for this user
    pub fn key(&self) -> String {
        irc_to_lower(&self.nick)
    }

    /// Fill in username and host from a message prefix
    pub fn update_from_prefix(&mut self, prefix: &Prefix) {
        if let Some(user) = prefix.user() {
            self.username = Some(user.to_string());
        }
        if let Some(host) = prefix.host() {
            self.host = Some(host.to_string());
        }
    }

    /// Update last activity time
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    /// Set or clear the away state
    pub fn set_away(&mut self, message: Option<String>) {
        self.away = message.is_some();
        self.away_message = message;
    }

    /// Apply a user mode change
    pub fn apply_mode(&mut self, change: &ModeChange) {
        modes::apply(&mut self.modes, change.sign, change.flag);
        if change.flag == 'o' {
            self.is_operator = self.modes.contains(&'o');
        }
    }

    /// Get user modes as a string
    pub fn modes_string(&self) -> String {
        self.modes.iter().collect()
    }

    /// Record membership of a channel
    pub fn join_channel(&mut self, channel_key: String) {
        self.channels.insert(channel_key);
    }

    /// Drop membership of a channel
    pub fn part_channel(&mut self, channel_key: &str) -> bool {
        self.channels.remove(channel_key)
    }

    /// Check if user is in a channel
    pub fn is_in_channel(&self, channel_key: &str) -> bool {
        self.channels.contains(channel_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::Sign;

    #[test]
    fn test_user_creation() {
        let user = User::new("Alice[m]");
        assert_eq!(user.nick, "Alice[m]");
        assert_eq!(user.key(), "alice{m}");
        assert!(!user.away);
        assert!(!user.is_operator);
        assert!(user.channels.is_empty());
    }

    #[test]
    fn test_prefix_and_away() {
        let mut user = User::new("alice");
        user.update_from_prefix(&Prefix::parse("alice!ali@example.org"));
        assert_eq!(user.username.as_deref(), Some("ali"));
        assert_eq!(user.host.as_deref(), Some("example.org"));

        user.set_away(Some("lunch".to_string()));
        assert!(user.away);
        user.set_away(None);
        assert!(!user.away);
        assert!(user.away_message.is_none());
    }

    #[test]
    fn test_operator_follows_mode() {
        let mut user = User::new("alice");
        user.apply_mode(&ModeChange::new(Sign::Add, 'o'));
        user.apply_mode(&ModeChange::new(Sign::Add, 'i'));
        assert!(user.is_operator);
        assert_eq!(user.modes_string(), "io");
        user.apply_mode(&ModeChange::new(Sign::Remove, 'o'));
        assert!(!user.is_operator);
    }
}
