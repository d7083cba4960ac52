//! Statistics tracking for the ingestion loop

use crate::numeric::NumericGroup;
use crate::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// A line nothing handled, kept so it still shows up on the status surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericEvent {
    /// Command token or numeric code as received
    pub command: String,
    /// Range group when the command is numeric
    pub group: Option<NumericGroup>,
    /// Sender nick or server name
    pub source: Option<String>,
    pub params: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl GenericEvent {
    /// Build an event from a message
    pub fn from_message(msg: &Message) -> Self {
        Self {
            command: msg.command.clone(),
            group: msg.numeric().map(NumericGroup::of),
            source: msg.prefix.as_ref().map(ToString::to_string),
            params: msg.params.clone(),
            timestamp: msg.timestamp(),
        }
    }
}

/// Counters for one tracker instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    /// Tracker start time
    pub started_at: DateTime<Utc>,
    /// Start of the current registered session
    pub connected_at: Option<DateTime<Utc>>,
    /// Total lines received
    pub lines_received: u64,
    /// Total lines written
    pub lines_sent: u64,
    /// Lines dropped because they did not parse
    pub parse_failures: u64,
    /// Numerics no handler claimed
    pub unhandled_numerics: u64,
    /// Completed reconnect cycles
    pub reconnects: u64,
    /// Mention events produced
    pub mentions: u64,
    /// Command usage counts
    pub command_usage: BTreeMap<String, u64>,
    /// Most recent generic events, oldest first
    pub events: VecDeque<GenericEvent>,
    #[serde(skip)]
    event_capacity: usize,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Statistics {
    /// Create new statistics keeping at most `event_capacity` events
    pub fn new(event_capacity: usize) -> Self {
        Self {
            started_at: Utc::now(),
            connected_at: None,
            lines_received: 0,
            lines_sent: 0,
            parse_failures: 0,
            unhandled_numerics: 0,
            reconnects: 0,
            mentions: 0,
            command_usage: BTreeMap::new(),
            events: VecDeque::new(),
            event_capacity,
        }
    }

    /// Get tracker uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Record a received line
    pub fn record_line(&mut self, command: &str) {
        self.lines_received += 1;
        *self
            .command_usage
            .entry(command.to_ascii_uppercase())
            .or_insert(0) += 1;
    }

    /// Record a line written to the server
    pub fn record_sent(&mut self) {
        self.lines_sent += 1;
    }

    /// Record a line that failed to parse
    pub fn record_parse_failure(&mut self) {
        self.lines_received += 1;
        self.parse_failures += 1;
    }

    /// Record an event no handler claimed
    pub fn record_event(&mut self, event: GenericEvent) {
        if event.group.is_some() {
            self.unhandled_numerics += 1;
        }
        if self.event_capacity == 0 {
            return;
        }
        while self.events.len() >= self.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Get top commands by usage
    pub fn top_commands(&self, limit: usize) -> Vec<(String, u64)> {
        let mut commands: Vec<_> = self.command_usage.iter().collect();
        commands.sort_by(|a, b| b.1.cmp(a.1));
        commands.truncate(limit);
        commands.into_iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
