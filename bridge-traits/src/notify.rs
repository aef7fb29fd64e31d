//! Inbound Notification Channel
//!
//! The push-notification transport (websocket framing, reconnect handling)
//! is opaque to the engine. It delivers already-decoded messages, consumed
//! one at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Remote processing state carried on timeline notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineState {
    Created,
    Matching,
    Downloading,
    Loading,
    Finished,
    Analyzing,
    Deleted,
}

impl TimelineState {
    /// Map the wire state code. Unknown codes yield `None` and the entry is
    /// ignored.
    pub fn from_wire_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            2 => Some(Self::Matching),
            3 => Some(Self::Downloading),
            4 => Some(Self::Loading),
            5 => Some(Self::Finished),
            6 => Some(Self::Analyzing),
            9 => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One catalog-change entry from a timeline notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Source identifier; DVR-sourced entries carry ids that are not
    /// guaranteed unique and are filtered out.
    pub identifier: String,
    pub type_code: u32,
    pub state_code: u32,
    /// Remote item id; missing or "0" marks the message malformed.
    pub item_id: Option<String>,
}

/// Playback state reported by a "playing" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
    Buffering,
}

/// One playback-state entry from a "playing" notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayingEntry {
    pub session_key: String,
    pub item_id: String,
    pub state: PlayState,
    /// Resume offset as reported; occasionally in milliseconds rather than
    /// seconds, normalized by the engine against the item duration.
    pub view_offset: u64,
}

/// A decoded push notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationMessage {
    Timeline(Vec<TimelineEntry>),
    Playing(Vec<PlayingEntry>),
}

/// Consumer side of the push-notification transport.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Receive the next message without blocking. `Ok(None)` means the
    /// queue is currently empty; `Err` means the transport has shut down.
    async fn try_recv(&self) -> Result<Option<NotificationMessage>, ChannelClosed>;
}

/// The notification transport has closed its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

impl std::fmt::Display for ChannelClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification channel closed")
    }
}

impl std::error::Error for ChannelClosed {}

/// In-process notification queue backed by a tokio mpsc channel.
///
/// The production transport feeds its decoder output into the sender half;
/// tests push messages directly.
pub struct MpscNotificationQueue {
    rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<NotificationMessage>>,
}

impl MpscNotificationQueue {
    pub fn new() -> (tokio::sync::mpsc::UnboundedSender<NotificationMessage>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl NotificationQueue for MpscNotificationQueue {
    async fn try_recv(&self) -> Result<Option<NotificationMessage>, ChannelClosed> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => Err(ChannelClosed),
        }
    }
}
