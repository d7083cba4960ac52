//! Mention events and where they go

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Payload forwarded when someone mentions us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionEvent {
    /// Nick of whoever sent the message
    pub sender: String,
    /// Channel, or our nick for a private message
    pub target: String,
    /// Text with a leading address removed
    pub message: String,
    /// Text as received
    pub full_message: String,
    /// Our nick when the message arrived
    pub bot_nick: String,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of mention events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &str;

    /// Deliver one event
    async fn deliver(&self, event: MentionEvent) -> Result<()>;
}

/// Sink that hands events to an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MentionEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<MentionEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, event: MentionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Delivery("mention receiver dropped".to_string()))
    }
}

/// Sink that only logs events
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: MentionEvent) -> Result<()> {
        info!(
            sender = %event.sender,
            target = %event.target,
            message = %event.message,
            "mention"
        );
        Ok(())
    }
}
