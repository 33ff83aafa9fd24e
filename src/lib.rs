//! Trigger-based auto-reply engine for chat channels.
//!
//! Watches a stream of incoming chat messages and decides, per configured
//! trigger, whether and when to emit an automated reply: lexical/regex
//! matching, sliding-window mention thresholds, per-trigger and global
//! cooldowns, random/sequential reply selection with persisted progress,
//! randomized send delay, and a strictly ordered dispatch queue.
//!
//! The host supplies the outside world through the traits in [`sinks`]:
//! the send transport, the engine's own chat identity, and the optional
//! post-send side effects (notification, sound, activity log). Configuration
//! is owned by a [`config::manager::ConfigManager`]; installing a new
//! snapshot is atomic and never leaves a half-edited view visible to
//! matching.

pub mod config;
pub mod engine;
pub mod sinks;

pub use config::manager::{ConfigManager, CursorStore, JsonFileCursorStore, MemoryCursorStore};
pub use config::{
    ConfigError, ConfigSnapshot, PatternKind, Profile, ReplySelection, Trigger,
    GLOBAL_COOLDOWN_FLOOR_SECS,
};
pub use engine::{ChatMessage, Engine, MentionCategory};
pub use sinks::{
    ActivityLog, EventSinks, IdentityProvider, NotificationSink, ReplyTransport, SentEvent,
    SinkError, SoundSink, TransportError,
};
