//! Channel and user mode handling
//!
//! Decodes mode change strings (`+oo-v+h a b c d`) into individual changes,
//! encodes changes back into a compact string, and decodes the membership
//! prefixes found in NAMES and WHO replies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Set of single character mode flags
pub type ModeSet = BTreeSet<char>;

/// Channel membership modes, highest rank first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberMode {
    /// Channel owner (`~`, `+q`)
    Owner,
    /// Channel admin (`&`, `+a`)
    Admin,
    /// Channel operator (`@`, `+o`)
    Operator,
    /// Half operator (`%`, `+h`)
    HalfOp,
    /// Voice (`+`, `+v`)
    Voice,
}

impl MemberMode {
    /// All membership modes, highest rank first
    pub const ALL: [MemberMode; 5] = [
        MemberMode::Owner,
        MemberMode::Admin,
        MemberMode::Operator,
        MemberMode::HalfOp,
        MemberMode::Voice,
    ];

    /// Get the mode letter
    pub fn to_char(&self) -> char {
        match self {
            MemberMode::Owner => 'q',
            MemberMode::Admin => 'a',
            MemberMode::Operator => 'o',
            MemberMode::HalfOp => 'h',
            MemberMode::Voice => 'v',
        }
    }

    /// Get mode from its letter
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'q' => Some(MemberMode::Owner),
            'a' => Some(MemberMode::Admin),
            'o' => Some(MemberMode::Operator),
            'h' => Some(MemberMode::HalfOp),
            'v' => Some(MemberMode::Voice),
            _ => None,
        }
    }

    /// Get the NAMES/WHO prefix symbol
    pub fn prefix(&self) -> char {
        match self {
            MemberMode::Owner => '~',
            MemberMode::Admin => '&',
            MemberMode::Operator => '@',
            MemberMode::HalfOp => '%',
            MemberMode::Voice => '+',
        }
    }

    /// Get mode from its NAMES/WHO prefix symbol
    pub fn from_prefix(c: char) -> Option<Self> {
        MemberMode::ALL.into_iter().find(|m| m.prefix() == c)
    }

    /// Get description of what this mode grants
    pub fn description(&self) -> &'static str {
        match self {
            MemberMode::Owner => "Channel owner",
            MemberMode::Admin => "Channel administrator",
            MemberMode::Operator => "Channel operator",
            MemberMode::HalfOp => "Channel half-operator",
            MemberMode::Voice => "Voiced member",
        }
    }
}

impl fmt::Display for MemberMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Direction of a mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Add,
    Remove,
}

impl Sign {
    fn symbol(&self) -> char {
        match self {
            Sign::Add => '+',
            Sign::Remove => '-',
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One flag toggled by a MODE line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub sign: Sign,
    pub flag: char,
    pub arg: Option<String>,
}

impl ModeChange {
    /// Create a change with no argument
    pub fn new(sign: Sign, flag: char) -> Self {
        Self { sign, flag, arg: None }
    }

    /// Create a change carrying an argument
    pub fn with_arg(sign: Sign, flag: char, arg: impl Into<String>) -> Self {
        Self { sign, flag, arg: Some(arg.into()) }
    }

    /// Whether this change targets a channel member rather than the channel
    pub fn is_membership(&self) -> bool {
        MemberMode::from_char(self.flag).is_some()
    }
}

/// Result of decoding a mode string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedModes {
    /// Changes in the order they appeared
    pub changes: Vec<ModeChange>,
    /// Flags that needed an argument but ran out of them
    pub missing_args: Vec<char>,
    /// Arguments left over once every flag was decoded
    pub unused_args: Vec<String>,
}

impl DecodedModes {
    /// True when every flag got what it needed
    pub fn is_clean(&self) -> bool {
        self.missing_args.is_empty() && self.unused_args.is_empty()
    }
}

/// Check whether a channel flag consumes an argument
pub fn takes_argument(flag: char, sign: Sign) -> bool {
    match flag {
        'o' | 'v' | 'h' | 'a' | 'q' | 'b' | 'k' => true,
        // The limit is only given when it is set
        'l' => sign == Sign::Add,
        _ => false,
    }
}

/// Decode a channel mode string with its positional arguments.
///
/// A flag that needs an argument when none are left is reported in
/// `missing_args` and skipped; decoding continues with the next flag.
pub fn decode<S: AsRef<str>>(modes: &str, args: &[S]) -> DecodedModes {
    let mut decoded = DecodedModes::default();
    let mut args = args.iter().map(|a| a.as_ref().to_string());
    let mut sign = Sign::Add;

    for c in modes.chars() {
        match c {
            '+' => sign = Sign::Add,
            '-' => sign = Sign::Remove,
            flag if takes_argument(flag, sign) => match args.next() {
                Some(arg) => decoded.changes.push(ModeChange::with_arg(sign, flag, arg)),
                None => decoded.missing_args.push(flag),
            },
            flag => decoded.changes.push(ModeChange::new(sign, flag)),
        }
    }

    decoded.unused_args = args.collect();
    decoded
}

/// Decode a user mode string such as `+iw-x`; user modes take no arguments
pub fn decode_user_modes(modes: &str) -> Vec<ModeChange> {
    let mut sign = Sign::Add;
    let mut changes = Vec::new();
    for c in modes.chars() {
        match c {
            '+' => sign = Sign::Add,
            '-' => sign = Sign::Remove,
            flag => changes.push(ModeChange::new(sign, flag)),
        }
    }
    changes
}

/// Encode changes into a flag string and its argument list
pub fn encode(changes: &[ModeChange]) -> (String, Vec<String>) {
    let mut flags = String::new();
    let mut args = Vec::new();
    let mut current = None;

    for change in changes {
        if current != Some(change.sign) {
            flags.push(change.sign.symbol());
            current = Some(change.sign);
        }
        flags.push(change.flag);
        if let Some(ref arg) = change.arg {
            args.push(arg.clone());
        }
    }
    (flags, args)
}

/// Add or remove a flag in a mode set
pub fn apply(set: &mut ModeSet, sign: Sign, flag: char) {
    match sign {
        Sign::Add => {
            set.insert(flag);
        }
        Sign::Remove => {
            set.remove(&flag);
        }
    }
}

/// Split leading membership prefixes off a NAMES token.
///
/// `@+alice` yields `("alice", {o, v})`.
pub fn decode_membership_prefixes(token: &str) -> (&str, ModeSet) {
    let mut modes = ModeSet::new();
    let mut rest = token;
    while let Some(c) = rest.chars().next() {
        match MemberMode::from_prefix(c) {
            Some(mode) => {
                modes.insert(mode.to_char());
                rest = &rest[c.len_utf8()..];
            }
            None => break,
        }
    }
    (rest, modes)
}

/// Render a member's modes as prefix symbols, highest rank first
pub fn membership_prefixes(modes: &ModeSet) -> String {
    MemberMode::ALL
        .iter()
        .filter(|m| modes.contains(&m.to_char()))
        .map(MemberMode::prefix)
        .collect()
}

/// One member listed in a NAMES reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamesEntry {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub modes: ModeSet,
}

/// Parse a NAMES token, including the `userhost-in-names` form
pub fn parse_names_entry(token: &str) -> Option<NamesEntry> {
    let (bare, modes) = decode_membership_prefixes(token);
    let (nick, user, host) = match bare.split_once('!') {
        Some((nick, userhost)) => match userhost.split_once('@') {
            Some((user, host)) => (nick, Some(user.to_string()), Some(host.to_string())),
            None => (nick, Some(userhost.to_string()), None),
        },
        None => (bare, None, None),
    };
    if nick.is_empty() {
        return None;
    }
    Some(NamesEntry {
        nick: nick.to_string(),
        user,
        host,
        modes,
    })
}

/// Flags column of a WHO reply (`H`, `G*@`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhoFlags {
    pub away: bool,
    pub operator: bool,
    pub modes: ModeSet,
}

/// Decode the flags column of a WHO reply
pub fn parse_who_flags(flags: &str) -> WhoFlags {
    let mut parsed = WhoFlags::default();
    for c in flags.chars() {
        match c {
            'G' => parsed.away = true,
            'H' => parsed.away = false,
            '*' => parsed.operator = true,
            c => {
                if let Some(mode) = MemberMode::from_prefix(c) {
                    parsed.modes.insert(mode.to_char());
                }
            }
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(flags: &str) -> ModeSet {
        flags.chars().collect()
    }

    #[test]
    fn test_member_mode_char_conversion() {
        assert_eq!(MemberMode::Operator.to_char(), 'o');
        assert_eq!(MemberMode::from_char('v'), Some(MemberMode::Voice));
        assert_eq!(MemberMode::from_prefix('%'), Some(MemberMode::HalfOp));
        assert_eq!(MemberMode::from_prefix('~'), Some(MemberMode::Owner));
        assert_eq!(MemberMode::from_char('x'), None);
    }

    #[test]
    fn test_decode_positional_arguments() {
        let decoded = decode("+oo-v+h", &["alice", "bob", "carol", "dave"]);
        assert!(decoded.is_clean());
        assert_eq!(
            decoded.changes,
            vec![
                ModeChange::with_arg(Sign::Add, 'o', "alice"),
                ModeChange::with_arg(Sign::Add, 'o', "bob"),
                ModeChange::with_arg(Sign::Remove, 'v', "carol"),
                ModeChange::with_arg(Sign::Add, 'h', "dave"),
            ]
        );
    }

    #[test]
    fn test_decode_missing_argument_only_drops_trailing_flag() {
        let decoded = decode("+oo-v+h", &["nick1", "nick2", "nick3"]);
        assert_eq!(decoded.changes.len(), 3);
        assert_eq!(decoded.changes[2], ModeChange::with_arg(Sign::Remove, 'v', "nick3"));
        assert_eq!(decoded.missing_args, vec!['h']);
    }

    #[test]
    fn test_decode_channel_flags_and_limit() {
        let decoded = decode("+nt-l+k", &["secret"]);
        assert!(decoded.is_clean());
        assert_eq!(
            decoded.changes,
            vec![
                ModeChange::new(Sign::Add, 'n'),
                ModeChange::new(Sign::Add, 't'),
                ModeChange::new(Sign::Remove, 'l'),
                ModeChange::with_arg(Sign::Add, 'k', "secret"),
            ]
        );

        let decoded = decode("+l", &["25"]);
        assert_eq!(decoded.changes, vec![ModeChange::with_arg(Sign::Add, 'l', "25")]);
    }

    #[test]
    fn test_decode_default_sign_is_add() {
        let decoded = decode("ov", &["a", "b"]);
        assert!(decoded.changes.iter().all(|c| c.sign == Sign::Add));
    }

    #[test]
    fn test_encode_reproduces_equivalent_string() {
        let decoded = decode("+o+o-v+h", &["a", "b", "c", "d"]);
        let (flags, args) = encode(&decoded.changes);
        assert_eq!(flags, "+oo-v+h");
        assert_eq!(args, vec!["a", "b", "c", "d"]);
        assert_eq!(decode(&flags, &args).changes, decoded.changes);
    }

    #[test]
    fn test_names_prefix_decoding() {
        assert_eq!(decode_membership_prefixes("@alice"), ("alice", set("o")));
        assert_eq!(decode_membership_prefixes("+bob"), ("bob", set("v")));
        assert_eq!(decode_membership_prefixes("%carol"), ("carol", set("h")));
        assert_eq!(decode_membership_prefixes("~&dan"), ("dan", set("qa")));
        assert_eq!(decode_membership_prefixes("erin"), ("erin", set("")));
        assert_eq!(membership_prefixes(&set("vo")), "@+");
    }

    #[test]
    fn test_names_entry_with_userhost() {
        let entry = parse_names_entry("@+alice!ali@example.org").unwrap();
        assert_eq!(entry.nick, "alice");
        assert_eq!(entry.user.as_deref(), Some("ali"));
        assert_eq!(entry.host.as_deref(), Some("example.org"));
        assert_eq!(entry.modes, set("ov"));
        assert!(parse_names_entry("@").is_none());
    }

    #[test]
    fn test_who_flags() {
        let flags = parse_who_flags("G*@");
        assert!(flags.away);
        assert!(flags.operator);
        assert_eq!(flags.modes, set("o"));
        assert_eq!(parse_who_flags("H"), WhoFlags::default());
    }

    #[test]
    fn test_user_modes() {
        let changes = decode_user_modes("+iw-x");
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[2], ModeChange::new(Sign::Remove, 'x'));
    }
}
