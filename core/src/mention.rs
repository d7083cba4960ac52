//! Mention detection
//!
//! A nick counts as mentioned when it appears as a whole word. Word
//! characters on either side disqualify it, and so does a `/` on either
//! side (paths, `a/Hanna/b` style separators). Any other punctuation,
//! including a leading `@`, is a valid boundary.

use crate::Result;
use regex::Regex;

/// Whole-word matcher for one nickname
#[derive(Debug, Clone)]
pub struct MentionMatcher {
    nick: String,
    pattern: Regex,
    address: Regex,
}

impl MentionMatcher {
    /// Compile a matcher for `nick`
    pub fn new(nick: &str) -> Result<Self> {
        let escaped = regex::escape(nick);
        let pattern = Regex::new(&format!(r"(?i)(?:^|[^\w/]){}(?:[^\w/]|$)", escaped))?;
        let address = Regex::new(&format!(r"(?i)^\s*(?:@{0}[:,]?|{0}[:,])\s*", escaped))?;
        Ok(Self {
            nick: nick.to_string(),
            pattern,
            address,
        })
    }

    /// The nickname being matched
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Recompile for a new nickname; a no-op when it is unchanged
    pub fn set_nick(&mut self, nick: &str) -> Result<()> {
        if nick != self.nick {
            *self = Self::new(nick)?;
        }
        Ok(())
    }

    /// Check whether `text` mentions the nick
    pub fn is_mention(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Strip a leading `nick:`, `nick,` or `@nick` address from `text`
    pub fn strip_address<'a>(&self, text: &'a str) -> &'a str {
        match self.address.find(text) {
            Some(m) => &text[m.end()..],
            None => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_boundaries() {
        let matcher = MentionMatcher::new("Hanna").unwrap();
        assert!(matcher.is_mention("Hanna hello"));
        assert!(matcher.is_mention("hello Hanna"));
        assert!(matcher.is_mention("@Hanna test"));
        assert!(matcher.is_mention("HANNA hello"));
        assert!(!matcher.is_mention("Hannaah says hi"));
        assert!(!matcher.is_mention("/Hanna/"));
        assert!(!matcher.is_mention("someHanna"));
        assert!(!matcher.is_mention("Hannalore"));
    }

    #[test]
    fn test_mention_punctuation_and_slash() {
        let matcher = MentionMatcher::new("Hanna").unwrap();
        assert!(matcher.is_mention("Hanna: ping"));
        assert!(matcher.is_mention("thanks, hanna!"));
        assert!(matcher.is_mention("(Hanna)"));
        assert!(!matcher.is_mention("see docs/Hanna"));
        assert!(!matcher.is_mention("Hanna/notes"));
        assert!(!matcher.is_mention("Hanna_bot is here"));
        assert!(matcher.is_mention("someHanna and Hanna"));
    }

    #[test]
    fn test_nick_with_regex_metacharacters() {
        let matcher = MentionMatcher::new("bot[m]").unwrap();
        assert!(matcher.is_mention("hey bot[m] there"));
        assert!(!matcher.is_mention("hey botm there"));
    }

    #[test]
    fn test_set_nick_recompiles() {
        let mut matcher = MentionMatcher::new("Hanna").unwrap();
        matcher.set_nick("Hanna_").unwrap();
        assert_eq!(matcher.nick(), "Hanna_");
        assert!(matcher.is_mention("Hanna_ hi"));
        assert!(!matcher.is_mention("Hanna hi"));
    }

    #[test]
    fn test_strip_address() {
        let matcher = MentionMatcher::new("Hanna").unwrap();
        assert_eq!(matcher.strip_address("Hanna: do the thing"), "do the thing");
        assert_eq!(matcher.strip_address("hanna, status?"), "status?");
        assert_eq!(matcher.strip_address("@Hanna test"), "test");
        assert_eq!(matcher.strip_address("hello Hanna"), "hello Hanna");
        assert_eq!(matcher.strip_address("Hanna hello"), "Hanna hello");
    }
}
