//! Channel tracking

use crate::modes::{self, ModeChange, ModeSet, Sign};
use crate::utils::casemap::irc_to_lower;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A channel member as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Nickname as the server spelled it
    pub nick: String,
    /// Membership flags (`o`, `v`, ...)
    pub modes: ModeSet,
}

/// A channel the client is in
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel name as first seen
    pub name: String,
    pub topic: Option<String>,
    pub topic_set_by: Option<String>,
    pub topic_set_at: Option<DateTime<Utc>>,
    /// Creation time from RPL_CREATIONTIME
    pub created_at: Option<DateTime<Utc>>,
    /// Channel's own flags (`n`, `t`, ...)
    pub modes: ModeSet,
    pub key: Option<String>,
    pub limit: Option<u32>,
    pub bans: BTreeSet<String>,
    /// Members keyed by folded nick
    pub members: BTreeMap<String, Member>,
}

impl Channel {
    /// Create an empty channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: None,
            topic_set_by: None,
            topic_set_at: None,
            created_at: None,
            modes: ModeSet::new(),
            key: None,
            limit: None,
            bans: BTreeSet::new(),
            members: BTreeMap::new(),
        }
    }

    /// Lookup key for this channel
    pub fn key(&self) -> String {
        irc_to_lower(&self.name)
    }

    /// Add a member, merging flags if already present
    pub fn add_member(&mut self, nick: &str, member_modes: ModeSet) {
        let member = self
            .members
            .entry(irc_to_lower(nick))
            .or_insert_with(|| Member {
                nick: nick.to_string(),
                modes: ModeSet::new(),
            });
        member.nick = nick.to_string();
        member.modes.extend(member_modes);
    }

    /// Remove a member; returns whether it was present
    pub fn remove_member(&mut self, nick_key: &str) -> bool {
        self.members.remove(nick_key).is_some()
    }

    /// Check membership by folded nick
    pub fn has_member(&self, nick_key: &str) -> bool {
        self.members.contains_key(nick_key)
    }

    /// Move a member to a new nick, keeping its flags
    pub fn rename_member(&mut self, old_key: &str, new_nick: &str) -> bool {
        match self.members.remove(old_key) {
            Some(mut member) => {
                member.nick = new_nick.to_string();
                self.members.insert(irc_to_lower(new_nick), member);
                true
            }
            None => false,
        }
    }

    /// Toggle a membership flag for an existing member
    pub fn apply_member_mode(&mut self, nick_key: &str, sign: Sign, flag: char) -> bool {
        match self.members.get_mut(nick_key) {
            Some(member) => {
                modes::apply(&mut member.modes, sign, flag);
                true
            }
            None => false,
        }
    }

    /// Apply a change to the channel's own modes, key, limit or ban list
    pub fn apply_channel_mode(&mut self, change: &ModeChange) {
        match (change.flag, change.sign) {
            ('b', Sign::Add) => {
                self.bans.extend(change.arg.clone());
            }
            ('b', Sign::Remove) => {
                if let Some(ref mask) = change.arg {
                    self.bans.remove(mask);
                }
            }
            ('k', Sign::Add) => {
                self.key = change.arg.clone();
                self.modes.insert('k');
            }
            ('k', Sign::Remove) => {
                self.key = None;
                self.modes.remove(&'k');
            }
            ('l', Sign::Add) => {
                self.limit = change.arg.as_deref().and_then(|l| l.parse().ok());
                self.modes.insert('l');
            }
            ('l', Sign::Remove) => {
                self.limit = None;
                self.modes.remove(&'l');
            }
            (flag, sign) => modes::apply(&mut self.modes, sign, flag),
        }
    }

    /// Channel modes rendered as `+flags`
    pub fn modes_string(&self) -> String {
        let mut flags = String::from("+");
        flags.extend(self.modes.iter());
        flags
    }
}
