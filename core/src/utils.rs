//! Utility functions and helpers

/// RFC 1459 case mapping
pub mod casemap {
    /// Lowercase a single character using RFC 1459 rules.
    ///
    /// Besides ASCII letters this folds `[`, `]`, `\` and `~` onto
    /// `{`, `}`, `|` and `^`.
    #[inline]
    pub const fn irc_lower_char(c: char) -> char {
        match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            'A'..='Z' => (c as u8 + 32) as char,
            _ => c,
        }
    }

    /// Fold a nick or channel name into its lookup key
    pub fn irc_to_lower(s: &str) -> String {
        s.chars().map(irc_lower_char).collect()
    }

    /// Case-insensitive comparison under RFC 1459 rules
    pub fn irc_eq(a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a.chars()
                .zip(b.chars())
                .all(|(x, y)| irc_lower_char(x) == irc_lower_char(y))
    }
}

/// String validation utilities
pub mod string {
    /// Channel name prefixes recognised when no ISUPPORT CHANTYPES is known
    pub const CHANNEL_PREFIXES: &[char] = &['#', '&', '+', '!'];

    /// Check whether a message target names a channel
    pub fn is_channel_name(name: &str) -> bool {
        name.chars()
            .next()
            .map(|c| CHANNEL_PREFIXES.contains(&c))
            .unwrap_or(false)
    }

    /// Check whether a value can be placed on the wire as a single argument
    pub fn is_wire_safe(value: &str) -> bool {
        !value.contains(['\r', '\n', '\0'])
    }
}
