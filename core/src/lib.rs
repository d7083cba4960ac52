//! IRC protocol state tracker
//!
//! This crate turns the line stream of one IRC server connection into a
//! queryable model of server, channel, user and error state, keeps that
//! connection alive through a reconnect state machine, and reports mentions
//! of our nickname.

pub mod channel;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mention;
pub mod message;
pub mod modes;
pub mod numeric;
pub mod state;
pub mod statistics;
pub mod user;
pub mod utils;

#[cfg(test)]
mod tests;

pub use channel::{Channel, Member};
pub use client::IrcClient;
pub use codec::LineCodec;
pub use command::Command;
pub use config::Config;
pub use connection::{Backoff, Connection, ConnectionState};
pub use dispatcher::{Dispatcher, Reaction};
pub use error::{Error, Result};
pub use events::{ChannelSink, EventSink, LogSink, MentionEvent};
pub use mention::MentionMatcher;
pub use message::{CommandKind, Message, Prefix, Tags};
pub use modes::{MemberMode, ModeChange, ModeSet, Sign};
pub use numeric::{ErrorCategory, NumericGroup, NumericReply, Severity};
pub use state::{ChannelSnapshot, IrcError, ServerInfo, Snapshot, StateStore};
pub use statistics::{GenericEvent, Statistics};
pub use user::User;

/// Re-exports for convenience
pub use async_trait::async_trait;
