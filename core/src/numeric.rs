//! IRC numeric replies consumed by the tracker
//!
//! Only the replies that feed the state model get a named variant; every
//! other code is still classified by its range group.

use serde::{Deserialize, Serialize};

/// Named numeric reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NumericReply {
    // Registration
    RplWelcome = 1,
    RplYourHost = 2,
    RplCreated = 3,
    RplMyInfo = 4,
    RplISupport = 5,

    // Command responses
    RplUmodeIs = 221,

    // User info / WHOIS
    RplAway = 301,
    RplUnaway = 305,
    RplNowAway = 306,
    RplWhoisUser = 311,
    RplWhoisServer = 312,
    RplWhoisOperator = 313,
    RplEndOfWho = 315,
    RplWhoisIdle = 317,
    RplEndOfWhois = 318,
    RplWhoisChannels = 319,

    // Channel info
    RplListStart = 321,
    RplList = 322,
    RplListEnd = 323,
    RplChannelModeIs = 324,
    RplCreationTime = 329,
    RplNoTopic = 331,
    RplTopic = 332,
    RplTopicWhoTime = 333,
    RplWhoReply = 352,
    RplNameReply = 353,
    RplEndOfNames = 366,

    // MOTD
    RplMotd = 372,
    RplMotdStart = 375,
    RplEndOfMotd = 376,

    // Errors with registration side effects
    ErrNoMotd = 422,
    ErrErroneousNickname = 432,
    ErrNicknameInUse = 433,
    ErrNickCollision = 436,
    ErrUnavailResource = 437,
}

impl NumericReply {
    const KNOWN: [NumericReply; 35] = [
        NumericReply::RplWelcome,
        NumericReply::RplYourHost,
        NumericReply::RplCreated,
        NumericReply::RplMyInfo,
        NumericReply::RplISupport,
        NumericReply::RplUmodeIs,
        NumericReply::RplAway,
        NumericReply::RplUnaway,
        NumericReply::RplNowAway,
        NumericReply::RplWhoisUser,
        NumericReply::RplWhoisServer,
        NumericReply::RplWhoisOperator,
        NumericReply::RplEndOfWho,
        NumericReply::RplWhoisIdle,
        NumericReply::RplEndOfWhois,
        NumericReply::RplWhoisChannels,
        NumericReply::RplListStart,
        NumericReply::RplList,
        NumericReply::RplListEnd,
        NumericReply::RplChannelModeIs,
        NumericReply::RplCreationTime,
        NumericReply::RplNoTopic,
        NumericReply::RplTopic,
        NumericReply::RplTopicWhoTime,
        NumericReply::RplWhoReply,
        NumericReply::RplNameReply,
        NumericReply::RplEndOfNames,
        NumericReply::RplMotd,
        NumericReply::RplMotdStart,
        NumericReply::RplEndOfMotd,
        NumericReply::ErrNoMotd,
        NumericReply::ErrErroneousNickname,
        NumericReply::ErrNicknameInUse,
        NumericReply::ErrNickCollision,
        NumericReply::ErrUnavailResource,
    ];

    /// Get the numeric code
    pub fn numeric_code(&self) -> u16 {
        *self as u16
    }

    /// Get the numeric code as a zero padded string
    pub fn code(&self) -> String {
        format!("{:03}", self.numeric_code())
    }

    /// Look up a named reply by code
    pub fn from_code(code: u16) -> Option<Self> {
        Self::KNOWN.into_iter().find(|n| n.numeric_code() == code)
    }

    /// Range group of this reply
    pub fn group(&self) -> NumericGroup {
        NumericGroup::of(self.numeric_code())
    }
}

/// Range groupings of numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericGroup {
    /// 001-099
    Registration,
    /// 200-299
    CommandResponse,
    /// 301-319
    UserInfo,
    /// 321-366
    ChannelInfo,
    /// 372-376
    Motd,
    /// 400-599
    Error,
    /// Anything outside the ranges above
    Other,
}

impl NumericGroup {
    /// Classify a code by range
    pub fn of(code: u16) -> Self {
        match code {
            1..=99 => NumericGroup::Registration,
            200..=299 => NumericGroup::CommandResponse,
            301..=319 => NumericGroup::UserInfo,
            321..=366 => NumericGroup::ChannelInfo,
            372..=376 => NumericGroup::Motd,
            400..=599 => NumericGroup::Error,
            _ => NumericGroup::Other,
        }
    }
}

/// Severity of a server-reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Derive severity from the numeric range
    pub fn of(code: u16) -> Self {
        match code {
            // Connection refused for this host or credentials
            463..=466 => Severity::Fatal,
            // Nickname problems and missing registration
            430..=439 | 451 | 461 | 462 => Severity::Error,
            400..=499 => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Category of a server-reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Unknown nick, server or message target
    Target,
    /// Unknown or malformed command
    Command,
    /// Nickname rejected or taken
    Nickname,
    /// Channel membership or access
    Channel,
    /// Registration state and credentials
    Registration,
    /// Operator privileges
    Privilege,
    /// Mode flags
    Mode,
    Other,
}

impl ErrorCategory {
    /// Classify an error numeric
    pub fn of(code: u16) -> Self {
        match code {
            403 | 404 | 405 | 441..=443 | 471 | 473..=478 => ErrorCategory::Channel,
            401 | 402 | 406..=409 | 411..=415 => ErrorCategory::Target,
            421..=424 => ErrorCategory::Command,
            431..=437 => ErrorCategory::Nickname,
            451 | 461..=466 => ErrorCategory::Registration,
            472 | 501 | 502 => ErrorCategory::Mode,
            481..=485 | 491 => ErrorCategory::Privilege,
            _ => ErrorCategory::Other,
        }
    }
}

/// Check whether an error numeric aborts registration
pub fn is_fatal_registration_error(code: u16) -> bool {
    Severity::of(code) == Severity::Fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes() {
        assert_eq!(NumericReply::RplWelcome.code(), "001");
        assert_eq!(NumericReply::from_code(353), Some(NumericReply::RplNameReply));
        assert_eq!(NumericReply::from_code(999), None);
        assert_eq!(NumericReply::RplEndOfNames.group(), NumericGroup::ChannelInfo);
    }

    #[test]
    fn test_range_groups() {
        assert_eq!(NumericGroup::of(1), NumericGroup::Registration);
        assert_eq!(NumericGroup::of(5), NumericGroup::Registration);
        assert_eq!(NumericGroup::of(221), NumericGroup::CommandResponse);
        assert_eq!(NumericGroup::of(311), NumericGroup::UserInfo);
        assert_eq!(NumericGroup::of(320), NumericGroup::Other);
        assert_eq!(NumericGroup::of(353), NumericGroup::ChannelInfo);
        assert_eq!(NumericGroup::of(372), NumericGroup::Motd);
        assert_eq!(NumericGroup::of(433), NumericGroup::Error);
        assert_eq!(NumericGroup::of(599), NumericGroup::Error);
        assert_eq!(NumericGroup::of(900), NumericGroup::Other);
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(Severity::of(401), Severity::Warning);
        assert_eq!(Severity::of(433), Severity::Error);
        assert_eq!(Severity::of(465), Severity::Fatal);
        assert_eq!(Severity::of(501), Severity::Info);
        assert!(is_fatal_registration_error(464));
        assert!(!is_fatal_registration_error(433));

        assert_eq!(ErrorCategory::of(403), ErrorCategory::Channel);
        assert_eq!(ErrorCategory::of(401), ErrorCategory::Target);
        assert_eq!(ErrorCategory::of(433), ErrorCategory::Nickname);
        assert_eq!(ErrorCategory::of(482), ErrorCategory::Privilege);
        assert_eq!(ErrorCategory::of(472), ErrorCategory::Mode);
        assert_eq!(ErrorCategory::of(599), ErrorCategory::Other);
    }
}
