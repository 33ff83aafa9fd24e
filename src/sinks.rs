//! Collaborator interfaces the engine drives around a send.
//!
//! The transport, identity lookup, and post-send side effects all live
//! outside this crate; the engine only sees these traits. Methods are sync
//! and are invoked from the dispatch worker, mirroring how the host's
//! channel plumbing is expected to wrap them.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Transport rejection. Any error takes the dispatch down the Cancelled
/// path; the engine never retries.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send rejected: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Failure in a post-send side effect. One failing sink never affects the
/// others or the Sent state transition.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Sends a reply into a chat channel.
pub trait ReplyTransport: Send + Sync {
    fn send_reply(&self, channel: &str, text: &str) -> Result<(), TransportError>;
}

/// Who the engine is running as, for self-ignore and mention classification.
pub trait IdentityProvider: Send + Sync {
    fn is_self_author(&self, name: &str) -> bool;
    fn current_identity(&self) -> String;
}

/// Desktop notification emission.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, channel: &str, title: &str, body: &str) -> Result<(), SinkError>;
}

/// Sound playback. Never called for empty or "off" references.
pub trait SoundSink: Send + Sync {
    fn play(&self, sound_ref: &str) -> Result<(), SinkError>;
}

/// Activity-log recording of completed sends.
pub trait ActivityLog: Send + Sync {
    fn record_sent(&self, event: &SentEvent) -> Result<(), SinkError>;
}

/// Details of a completed send, as handed to the activity log.
#[derive(Debug, Clone, Serialize)]
pub struct SentEvent {
    pub matched_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub profile_name: String,
    /// Display label of the trigger (its pattern text).
    pub trigger_label: String,
    pub channel: String,
    pub author: String,
    pub reply_text: String,
}

impl SentEvent {
    /// Time spent between the qualifying match and the actual send.
    pub fn delay(&self) -> chrono::Duration {
        self.sent_at - self.matched_at
    }
}

/// Optional post-send side-effect handlers, fired in order after every
/// successful send: notification, then sound, then activity log.
#[derive(Default, Clone)]
pub struct EventSinks {
    pub notifications: Option<std::sync::Arc<dyn NotificationSink>>,
    pub sound: Option<std::sync::Arc<dyn SoundSink>>,
    pub activity: Option<std::sync::Arc<dyn ActivityLog>>,
}

impl EventSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(mut self, sink: std::sync::Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    pub fn with_sound(mut self, sink: std::sync::Arc<dyn SoundSink>) -> Self {
        self.sound = Some(sink);
        self
    }

    pub fn with_activity(mut self, sink: std::sync::Arc<dyn ActivityLog>) -> Self {
        self.activity = Some(sink);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_event_delay() {
        let matched = Utc::now();
        let event = SentEvent {
            matched_at: matched,
            sent_at: matched + chrono::Duration::milliseconds(1500),
            profile_name: "p".into(),
            trigger_label: "hello".into(),
            channel: "#general".into(),
            author: "alice".into(),
            reply_text: "hi".into(),
        };
        assert_eq!(event.delay(), chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn sent_event_serializes() {
        let now = Utc::now();
        let event = SentEvent {
            matched_at: now,
            sent_at: now,
            profile_name: "p".into(),
            trigger_label: "hello".into(),
            channel: "#general".into(),
            author: "alice".into(),
            reply_text: "hi".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"trigger_label\":\"hello\""));
    }
}
