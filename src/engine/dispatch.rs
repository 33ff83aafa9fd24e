//! Ordered dispatch of pending replies.
//!
//! One worker task consumes the pending-reply channel strictly in order. For
//! each item it holds through the delay jitter, then through the global
//! cooldown clock, re-validates the item against the live configuration, and
//! only then sends. Nothing else in the engine ever sends, so the
//! at-most-one-in-flight and global-spacing guarantees hold structurally.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use crate::engine::Engine;

/// A reply that passed every gate and is waiting for its send slot.
#[derive(Debug)]
pub(crate) struct PendingReply {
    pub trigger_id: String,
    /// Configuration generation this reply was matched under; a snapshot
    /// install bumps the generation and thereby discards older items.
    pub generation: u64,
    pub channel: String,
    pub author: String,
    pub reply: String,
    pub matched_at: DateTime<Utc>,
    /// Monotonic engine time at which the delay jitter elapses.
    pub scheduled_at_ms: u64,
    pub cooldown_ms: u64,
    /// Whether a confirmed send advances the sequential cursor.
    pub advance_cursor: bool,
    pub pool_len: usize,
    pub loop_replies: bool,
    pub trigger_label: String,
    pub profile_name: String,
    pub notify: bool,
    pub sound: Option<String>,
}

/// Run the dispatch worker until shutdown or the channel closes.
pub(crate) async fn dispatch_loop(
    engine: Arc<Engine>,
    mut rx: mpsc::UnboundedReceiver<PendingReply>,
    mut shutdown: watch::Receiver<bool>,
) {
    'worker: loop {
        let pending = tokio::select! {
            item = rx.recv() => match item {
                Some(pending) => pending,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        if *shutdown.borrow() {
            break;
        }

        // Delay jitter: hold until the item's scheduled send time.
        let wait = engine.ms_until(pending.scheduled_at_ms);
        if wait > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                _ = shutdown.changed() => break 'worker,
            }
        }

        // Global pacing: hold until the shared clock opens. Re-read after
        // every sleep — a send that completed meanwhile cannot have moved
        // the clock backward, only forward.
        loop {
            let wait = engine.global_wait_ms();
            if wait == 0 {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                _ = shutdown.changed() => break 'worker,
            }
        }

        if *shutdown.borrow() {
            break;
        }
        engine.dispatch_pending(pending);
    }
}
