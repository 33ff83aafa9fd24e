//! Auto-reply engine: ingestion, runtime state, and dispatch wiring.
//!
//! Messages come in on the producer's context through [`Engine::handle_message`];
//! everything that has to wait (delay jitter, global pacing) happens on the
//! single dispatch worker started by [`Engine::start`].

mod cooldown;
mod dispatch;
mod matcher;
mod mentions;
mod selector;

pub use mentions::MentionCategory;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::manager::ConfigManager;
use crate::config::{ConfigSnapshot, ReplySelection, Trigger, GLOBAL_COOLDOWN_FLOOR_SECS};
use crate::engine::cooldown::{GlobalCooldown, TriggerCooldown};
use crate::engine::dispatch::PendingReply;
use crate::engine::matcher::{normalize, AuthorFilter, CompiledPattern};
use crate::engine::mentions::{classify, MentionWindow};
use crate::engine::selector::{advance_cursor, ReplyPool};
use crate::sinks::{EventSinks, IdentityProvider, ReplyTransport, SentEvent};

/// An incoming chat message as seen by the engine.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub channel: String,
    pub author: String,
    pub text: String,
    /// Author the message replies to, when the source protocol carries one.
    pub reply_target: Option<String>,
    /// Replayed history; never matched.
    pub historic: bool,
}

impl ChatMessage {
    pub fn new(
        channel: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            author: author.into(),
            text: text.into(),
            reply_target: None,
            historic: false,
        }
    }

    pub fn with_reply_target(mut self, target: impl Into<String>) -> Self {
        self.reply_target = Some(target.into());
        self
    }

    pub fn historic(mut self, historic: bool) -> Self {
        self.historic = historic;
        self
    }
}

/// One trigger compiled for evaluation: pattern, filters, and reply pool
/// ready to run against every message.
struct PreparedTrigger {
    id: String,
    /// Display label (the pattern text) used in notifications and log events.
    label: String,
    pattern: CompiledPattern,
    authors: AuthorFilter,
    /// Lowercased author → override reply; blank overrides dropped.
    overrides: HashMap<String, String>,
    pool: ReplyPool,
    cooldown_ms: u64,
    window_ms: u64,
    /// Effective minimums, never below 1.
    min_unique: u32,
    min_mentions: u32,
    min_delay_ms: u64,
    max_delay_ms: u64,
    selection: ReplySelection,
    loop_replies: bool,
    notify: bool,
    sound: Option<String>,
}

impl PreparedTrigger {
    fn compile(trigger: &Trigger) -> Self {
        let (min_delay_ms, max_delay_ms) = trigger.delay_range_ms();
        let overrides = trigger
            .author_overrides
            .iter()
            .filter(|(key, value)| !key.trim().is_empty() && !value.trim().is_empty())
            .map(|(key, value)| (key.trim().to_lowercase(), value.clone()))
            .collect();
        Self {
            id: trigger.id.clone(),
            label: trigger.pattern.clone(),
            pattern: CompiledPattern::compile(trigger),
            authors: AuthorFilter::compile(trigger),
            overrides,
            pool: ReplyPool::parse(&trigger.reply),
            cooldown_ms: trigger.cooldown_secs * 1000,
            window_ms: trigger.time_window_secs * 1000,
            min_unique: trigger.min_unique_users.max(1),
            min_mentions: trigger.min_mentions_per_user.max(1),
            min_delay_ms,
            max_delay_ms,
            selection: trigger.reply_selection,
            loop_replies: trigger.loop_replies,
            notify: trigger.notify,
            sound: trigger.sound.clone(),
        }
    }

    /// Resolve the reply for an author. Overrides bypass selection and never
    /// advance the cursor; the bool reports whether a confirmed send should.
    fn select_reply(&self, author_lower: &str, cursor: u32) -> Option<(String, bool)> {
        if let Some(text) = self.overrides.get(author_lower) {
            return Some((text.clone(), false));
        }
        match self.selection {
            ReplySelection::Sequential => self
                .pool
                .variant_at(cursor)
                .map(|text| (text.to_string(), true)),
            ReplySelection::Random => self.pool.pick_random().map(|text| (text.to_string(), false)),
        }
    }

    /// Uniform draw from the jitter range.
    fn pick_delay_ms(&self) -> u64 {
        if self.max_delay_ms <= self.min_delay_ms {
            return self.min_delay_ms;
        }
        rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms)
    }
}

/// Mutable per-trigger state; survives snapshot installs that keep the id.
#[derive(Default)]
struct TriggerRuntime {
    window: MentionWindow,
    cooldown: TriggerCooldown,
    cursor: u32,
}

struct EngineState {
    snapshot: Arc<ConfigSnapshot>,
    profile_name: String,
    prepared: Vec<PreparedTrigger>,
    runtime: HashMap<String, TriggerRuntime>,
    global: GlobalCooldown,
    /// Bumped on every snapshot install; queued replies carrying an older
    /// generation are dropped by the worker.
    generation: u64,
}

/// The auto-reply engine. Ingestion is sync and lock-bounded; sends happen
/// on the dispatch worker.
pub struct Engine {
    transport: Arc<dyn ReplyTransport>,
    identity: Arc<dyn IdentityProvider>,
    sinks: EventSinks,
    manager: Arc<ConfigManager>,
    state: Mutex<EngineState>,
    epoch: tokio::time::Instant,
    tx: mpsc::UnboundedSender<PendingReply>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<PendingReply>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Build an engine against the provider's current snapshot. Call
    /// [`Engine::start`] to spawn the dispatch worker and
    /// [`Engine::watch_config`] to follow provider changes.
    pub fn new(
        transport: Arc<dyn ReplyTransport>,
        identity: Arc<dyn IdentityProvider>,
        sinks: EventSinks,
        manager: Arc<ConfigManager>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let engine = Self {
            transport,
            identity,
            sinks,
            manager: manager.clone(),
            state: Mutex::new(EngineState {
                snapshot: Arc::new(ConfigSnapshot::default()),
                profile_name: "default".to_string(),
                prepared: Vec::new(),
                runtime: HashMap::new(),
                global: GlobalCooldown::new(GLOBAL_COOLDOWN_FLOOR_SECS * 1000),
                generation: 0,
            }),
            epoch: tokio::time::Instant::now(),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown_tx,
        };
        engine.apply_snapshot(manager.snapshot());
        engine
    }

    /// Spawn the dispatch worker. Subsequent calls are no-ops.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        match self.rx.lock().take() {
            Some(rx) => {
                let engine = Arc::clone(self);
                let shutdown = self.shutdown_tx.subscribe();
                tokio::spawn(dispatch::dispatch_loop(engine, rx, shutdown))
            }
            None => {
                warn!("dispatch worker already started");
                tokio::spawn(async {})
            }
        }
    }

    /// Follow the configuration provider: every applied snapshot is
    /// installed into the engine.
    pub fn watch_config(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.manager.subscribe(move |snapshot| {
            if let Some(engine) = weak.upgrade() {
                engine.apply_snapshot(snapshot.clone());
            }
        });
    }

    /// Stop accepting messages and wind the worker down. Pending timers are
    /// cancelled; no send is attempted after this returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Install a new configuration snapshot: recompile the active profile,
    /// merge runtime state by trigger id, discard the queued backlog, and
    /// reset the global clock to now.
    pub fn apply_snapshot(&self, snapshot: Arc<ConfigSnapshot>) {
        let now_ms = self.now_ms();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.generation += 1;

        let profile = snapshot.active_profile();
        state.profile_name = profile
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "default".to_string());

        let prepared: Vec<PreparedTrigger> = profile
            .map(|p| {
                p.triggers
                    .iter()
                    .filter(|t| t.enabled)
                    .map(PreparedTrigger::compile)
                    .collect()
            })
            .unwrap_or_default();

        let mut runtime = HashMap::with_capacity(prepared.len());
        for trigger in &prepared {
            let entry = match state.runtime.remove(&trigger.id) {
                Some(mut existing) => {
                    // Whatever was in flight for this trigger died with the
                    // old queue generation; release its reservation.
                    existing.cooldown.cancel();
                    existing
                }
                None => TriggerRuntime {
                    cursor: self.manager.sequential_index(&trigger.id),
                    ..Default::default()
                },
            };
            runtime.insert(trigger.id.clone(), entry);
        }

        state.prepared = prepared;
        state.runtime = runtime;
        state.global = GlobalCooldown::new(snapshot.effective_global_cooldown_ms());
        state.global.reset(now_ms);
        state.snapshot = snapshot;
        debug!(
            generation = state.generation,
            triggers = state.prepared.len(),
            profile = %state.profile_name,
            "auto reply configuration installed"
        );
    }

    /// Evaluate one incoming message. At most one trigger fires: the first
    /// in profile order to pass every gate wins and evaluation stops.
    pub fn handle_message(&self, message: &ChatMessage) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        if message.historic {
            return;
        }
        let author = message.author.trim();
        if author.is_empty() || message.text.trim().is_empty() {
            return;
        }

        let self_name = self.identity.current_identity();
        let now_ms = self.now_ms();
        let matched_at = Utc::now();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let snapshot = state.snapshot.clone();
        if !snapshot.enabled || state.prepared.is_empty() {
            return;
        }
        if snapshot.self_ignore && self.identity.is_self_author(author) {
            return;
        }

        let category = classify(&message.text, message.reply_target.as_deref(), &self_name);
        let normalized_text = normalize(&message.text);
        let author_lower = author.to_lowercase();

        for trigger in &state.prepared {
            if !trigger.pattern.is_active() {
                continue;
            }
            if !trigger.authors.allows(&author_lower) {
                continue;
            }
            if !trigger.pattern.matches(&message.text, &normalized_text) {
                continue;
            }

            let Some(runtime) = state.runtime.get_mut(&trigger.id) else {
                continue;
            };
            runtime.window.record(
                &author_lower,
                category,
                now_ms,
                trigger.window_ms,
                trigger.min_mentions,
            );
            if !runtime.window.is_ready(
                &author_lower,
                now_ms,
                trigger.window_ms,
                trigger.min_unique,
                trigger.min_mentions,
            ) {
                continue;
            }
            if !runtime.cooldown.is_open(now_ms) {
                continue;
            }
            // An empty template (and no override) never dispatches, but the
            // accumulated window stays intact for a future configuration.
            let Some((reply, advances)) = trigger.select_reply(&author_lower, runtime.cursor)
            else {
                continue;
            };

            let delay_ms = trigger.pick_delay_ms();
            let scheduled_at_ms = now_ms + delay_ms;
            runtime.window.reset();
            runtime.cooldown.reserve(scheduled_at_ms, trigger.cooldown_ms);

            let pending = PendingReply {
                trigger_id: trigger.id.clone(),
                generation: state.generation,
                channel: message.channel.clone(),
                author: author.to_string(),
                reply,
                matched_at,
                scheduled_at_ms,
                cooldown_ms: trigger.cooldown_ms,
                advance_cursor: advances,
                pool_len: trigger.pool.len(),
                loop_replies: trigger.loop_replies,
                trigger_label: trigger.label.clone(),
                profile_name: state.profile_name.clone(),
                notify: trigger.notify || snapshot.default_notification,
                sound: trigger.sound.clone().or_else(|| snapshot.default_sound.clone()),
            };
            debug!(
                trigger_id = %pending.trigger_id,
                channel = %pending.channel,
                author = %pending.author,
                category = ?category,
                delay_ms,
                "auto reply scheduled"
            );
            let _ = self.tx.send(pending);
            break;
        }
    }

    /// Monotonic engine time in milliseconds.
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn ms_until(&self, target_ms: u64) -> u64 {
        target_ms.saturating_sub(self.now_ms())
    }

    pub(crate) fn global_wait_ms(&self) -> u64 {
        self.state.lock().global.wait_remaining(self.now_ms())
    }

    /// Final leg of a dispatch, on the worker: re-validate, send, and either
    /// commit (clocks, cursor, side effects) or cancel cleanly.
    pub(crate) fn dispatch_pending(&self, pending: PendingReply) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if pending.generation != state.generation {
                debug!(
                    trigger_id = %pending.trigger_id,
                    "dropping reply queued under a replaced configuration"
                );
                return;
            }
            if !state.prepared.iter().any(|t| t.id == pending.trigger_id) {
                if let Some(runtime) = state.runtime.get_mut(&pending.trigger_id) {
                    runtime.cooldown.cancel();
                }
                debug!(
                    trigger_id = %pending.trigger_id,
                    "trigger no longer active, dispatch cancelled"
                );
                return;
            }
        }

        let result = self
            .transport
            .send_reply(&pending.channel, &pending.reply);
        let sent_at = Utc::now();
        let now_ms = self.now_ms();

        match result {
            Ok(()) => {
                let mut cursor_update = None;
                {
                    let mut guard = self.state.lock();
                    let state = &mut *guard;
                    state.global.commit(now_ms);
                    if let Some(runtime) = state.runtime.get_mut(&pending.trigger_id) {
                        runtime
                            .cooldown
                            .commit(pending.scheduled_at_ms, pending.cooldown_ms);
                        if pending.advance_cursor {
                            runtime.cursor = advance_cursor(
                                runtime.cursor,
                                pending.pool_len,
                                pending.loop_replies,
                            );
                            cursor_update = Some(runtime.cursor);
                        }
                    }
                }
                if let Some(index) = cursor_update {
                    self.manager
                        .store_sequential_index(&pending.trigger_id, index);
                }
                self.fire_side_effects(&pending, sent_at);
            }
            Err(e) => {
                let mut guard = self.state.lock();
                if let Some(runtime) = guard.runtime.get_mut(&pending.trigger_id) {
                    runtime.cooldown.cancel();
                }
                debug!(
                    trigger_id = %pending.trigger_id,
                    channel = %pending.channel,
                    error = %e,
                    "auto reply not sent"
                );
            }
        }
    }

    /// Post-send side effects, in order: notification, sound, activity log.
    /// Each handler is contained on its own; one failure never stops the rest.
    fn fire_side_effects(&self, pending: &PendingReply, sent_at: chrono::DateTime<Utc>) {
        if pending.notify {
            if let Some(sink) = &self.sinks.notifications {
                let title = format!("[Auto Reply] {}", pending.trigger_label);
                let body = format!("{} -> {}", pending.author, pending.reply);
                run_sink("notification", || sink.notify(&pending.channel, &title, &body));
            }
        }

        if let Some(sound) = pending.sound.as_deref() {
            let sound = sound.trim();
            if !sound.is_empty() && !sound.eq_ignore_ascii_case("off") {
                if let Some(sink) = &self.sinks.sound {
                    run_sink("sound", || sink.play(sound));
                }
            }
        }

        if let Some(sink) = &self.sinks.activity {
            let event = SentEvent {
                matched_at: pending.matched_at,
                sent_at,
                profile_name: pending.profile_name.clone(),
                trigger_label: pending.trigger_label.clone(),
                channel: pending.channel.clone(),
                author: pending.author.clone(),
                reply_text: pending.reply.clone(),
            };
            run_sink("activity log", || sink.record_sent(&event));
        }
    }
}

/// Invoke one side-effect handler, containing both errors and panics.
fn run_sink(label: &str, call: impl FnOnce() -> Result<(), crate::sinks::SinkError>) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(call));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(sink = label, error = %e, "auto reply side effect failed"),
        Err(_) => warn!(sink = label, "auto reply side effect panicked"),
    }
}
