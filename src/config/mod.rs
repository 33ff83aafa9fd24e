//! Auto-reply configuration model.
//!
//! Profiles group ordered triggers; a [`ConfigSnapshot`] is the immutable view
//! the engine matches against. Snapshots are replaced wholesale on every
//! configuration change — matching logic never observes a partial edit.

pub mod manager;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Minimum spacing between any two automated sends, enforced even when the
/// configured global cooldown is lower.
pub const GLOBAL_COOLDOWN_FLOOR_SECS: u64 = 2;

/// Errors from configuration validation and cursor persistence.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate trigger id: {0}")]
    DuplicateTriggerId(String),
    #[error("invalid regex pattern in trigger {trigger_id}: {message}")]
    InvalidRegex { trigger_id: String, message: String },
    #[error("cursor store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cursor store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// How a trigger's pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Case-insensitive, whitespace-collapsed substring match.
    #[default]
    Plain,
    /// Case-insensitive, unicode-aware regex, matched anywhere in the message.
    Regex,
}

impl PatternKind {
    /// Parse a loosely-typed settings string; anything unrecognized is plain.
    pub fn parse(input: &str) -> Self {
        if input.trim().eq_ignore_ascii_case("regex") {
            Self::Regex
        } else {
            Self::Plain
        }
    }
}

/// How a reply variant is picked from a multi-variant template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySelection {
    /// Uniformly sample one variant per firing.
    #[default]
    Random,
    /// Walk the variants in order, advancing only on a confirmed send.
    Sequential,
}

impl ReplySelection {
    /// Parse a loosely-typed settings string; anything unrecognized is random.
    pub fn parse(input: &str) -> Self {
        if input.trim().eq_ignore_ascii_case("sequential") {
            Self::Sequential
        } else {
            Self::Random
        }
    }
}

fn default_true() -> bool {
    true
}

/// A single auto-reply rule: pattern, reply template, and gating knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Stable identifier; runtime state and the sequential cursor key off it.
    pub id: String,
    /// Pattern text, interpreted per `pattern_kind`.
    pub pattern: String,
    #[serde(default)]
    pub pattern_kind: PatternKind,
    /// Reply template. Blank-line-separated paragraphs are the variant list.
    pub reply: String,
    /// Per-author reply overrides; keys are lowercased on ingest.
    #[serde(default)]
    pub author_overrides: HashMap<String, String>,
    /// Seconds between firings of this trigger (0 = none).
    #[serde(default)]
    pub cooldown_secs: u64,
    /// Distinct authors required inside the window (0 = any one author).
    #[serde(default)]
    pub min_unique_users: u32,
    /// Matches required from the acting author inside the window (0 = one).
    #[serde(default)]
    pub min_mentions_per_user: u32,
    /// Sliding-window length in seconds (0 = unlimited retention).
    #[serde(default)]
    pub time_window_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Send-delay jitter bounds in milliseconds; min is clamped ≤ max on write.
    #[serde(default)]
    pub min_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub reply_selection: ReplySelection,
    /// Whether the sequential cursor wraps after the last variant.
    #[serde(default)]
    pub loop_replies: bool,
    /// Authors allowed to fire this trigger (empty = everyone).
    #[serde(default)]
    pub allow_authors: Vec<String>,
    /// Authors never allowed to fire this trigger.
    #[serde(default)]
    pub block_authors: Vec<String>,
    /// Emit a desktop notification after a send.
    #[serde(default)]
    pub notify: bool,
    /// Sound reference played after a send; `None`/empty/"off" suppress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

impl Trigger {
    /// Create a trigger with a generated id and default gating.
    pub fn new(pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pattern: pattern.into(),
            pattern_kind: PatternKind::Plain,
            reply: reply.into(),
            author_overrides: HashMap::new(),
            cooldown_secs: 0,
            min_unique_users: 0,
            min_mentions_per_user: 0,
            time_window_secs: 0,
            enabled: true,
            min_delay_ms: 0,
            max_delay_ms: 0,
            reply_selection: ReplySelection::Random,
            loop_replies: false,
            allow_authors: Vec::new(),
            block_authors: Vec::new(),
            notify: false,
            sound: None,
        }
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_pattern_kind(mut self, kind: PatternKind) -> Self {
        self.pattern_kind = kind;
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Group thresholds: distinct authors and per-author matches required
    /// within `window_secs` (0 disables the respective gate / the window).
    pub fn with_thresholds(mut self, unique_users: u32, per_user: u32, window_secs: u64) -> Self {
        self.min_unique_users = unique_users;
        self.min_mentions_per_user = per_user;
        self.time_window_secs = window_secs;
        self
    }

    /// Send-delay jitter bounds; `max` is raised to `min` when inverted.
    pub fn with_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.min_delay_ms = min;
        self.max_delay_ms = max.max(min);
        self
    }

    pub fn with_reply_selection(mut self, selection: ReplySelection) -> Self {
        self.reply_selection = selection;
        self
    }

    pub fn with_loop_replies(mut self, looped: bool) -> Self {
        self.loop_replies = looped;
        self
    }

    pub fn with_allow_authors(mut self, authors: Vec<String>) -> Self {
        self.allow_authors = authors;
        self
    }

    pub fn with_block_authors(mut self, authors: Vec<String>) -> Self {
        self.block_authors = authors;
        self
    }

    /// Add a per-author reply override; the key is lowercased.
    pub fn with_author_override(
        mut self,
        author: impl AsRef<str>,
        reply: impl Into<String>,
    ) -> Self {
        self.author_overrides
            .insert(author.as_ref().to_lowercase(), reply.into());
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Jitter bounds with the min ≤ max invariant applied on read as well,
    /// so a hand-edited snapshot cannot produce an inverted range.
    pub fn delay_range_ms(&self) -> (u64, u64) {
        (self.min_delay_ms, self.max_delay_ms.max(self.min_delay_ms))
    }

    /// Parse a trigger from the loosely-typed settings shape
    /// (string/number booleans, numeric strings, `authors`/`allow` aliases).
    /// Returns `None` when the value is not a map.
    pub fn from_settings_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let id = read_string(map.get("id")).unwrap_or_else(|| Uuid::new_v4().to_string());
        let min_delay = read_u64(map.get("minDelayMs"), 0);
        let allow = map.get("authors").or_else(|| map.get("allow"));
        let mut overrides = HashMap::new();
        if let Some(Value::Object(raw)) = map.get("authorOverrides") {
            for (key, val) in raw {
                let key = key.trim();
                if !key.is_empty() {
                    overrides.insert(
                        key.to_lowercase(),
                        read_string(Some(val)).unwrap_or_default(),
                    );
                }
            }
        }
        Some(Self {
            id,
            pattern: read_string(map.get("pattern")).unwrap_or_default(),
            pattern_kind: PatternKind::parse(
                &read_string(map.get("patternType")).unwrap_or_default(),
            ),
            reply: read_string(map.get("reply")).unwrap_or_default(),
            author_overrides: overrides,
            cooldown_secs: read_u64(map.get("cooldown"), 0),
            min_unique_users: read_u64(map.get("minUniqueUsers"), 0) as u32,
            min_mentions_per_user: read_u64(map.get("minMentionsPerUser"), 0) as u32,
            time_window_secs: read_u64(map.get("timeWindowSec"), 0),
            enabled: read_bool(map.get("enabled"), true),
            min_delay_ms: min_delay,
            max_delay_ms: read_u64(map.get("maxDelayMs"), min_delay).max(min_delay),
            reply_selection: ReplySelection::parse(
                &read_string(map.get("replySelection")).unwrap_or_default(),
            ),
            loop_replies: read_bool(map.get("replyLoop"), false),
            allow_authors: read_string_list(allow),
            block_authors: read_string_list(map.get("blockAuthors")),
            notify: read_bool(map.get("notify"), false),
            sound: read_string(map.get("sound")),
        })
    }
}

/// A named, ordered collection of triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl Profile {
    /// Create a profile with a generated id.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            triggers: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Parse a profile from the loosely-typed settings shape.
    pub fn from_settings_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let id = read_string(map.get("id")).unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = read_string(map.get("name")).unwrap_or_else(|| id.clone());
        let triggers = map
            .get("triggers")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Trigger::from_settings_value)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { id, name, triggers })
    }
}

/// Immutable view of the full auto-reply configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Id of the active profile; falls back to the first profile when stale.
    #[serde(default)]
    pub active_profile_id: String,
    /// Configured global cooldown in seconds; the floor still applies below it.
    #[serde(default)]
    pub global_cooldown_secs: u64,
    /// Ignore messages authored by the engine's own identity.
    #[serde(default = "default_true")]
    pub self_ignore: bool,
    /// Notify on sends even for triggers that don't request it themselves.
    #[serde(default)]
    pub default_notification: bool,
    /// Fallback sound for triggers without one; empty/"off" suppress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sound: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            active_profile_id: String::new(),
            global_cooldown_secs: 0,
            self_ignore: true,
            default_notification: false,
            default_sound: None,
            enabled: true,
        }
    }
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        if self.active_profile_id.is_empty() {
            self.active_profile_id = profile.id.clone();
        }
        self.profiles.push(profile);
        self
    }

    pub fn with_active_profile(mut self, id: impl Into<String>) -> Self {
        self.active_profile_id = id.into();
        self
    }

    pub fn with_global_cooldown_secs(mut self, secs: u64) -> Self {
        self.global_cooldown_secs = secs;
        self
    }

    pub fn with_self_ignore(mut self, ignore: bool) -> Self {
        self.self_ignore = ignore;
        self
    }

    pub fn with_default_notification(mut self, notify: bool) -> Self {
        self.default_notification = notify;
        self
    }

    pub fn with_default_sound(mut self, sound: impl Into<String>) -> Self {
        self.default_sound = Some(sound.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Resolve the active profile: exact id match, else the first profile,
    /// else `None` (the engine idles).
    pub fn active_profile(&self) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.id == self.active_profile_id)
            .or_else(|| self.profiles.first())
    }

    /// Global cooldown with the floor applied.
    pub fn effective_global_cooldown_ms(&self) -> u64 {
        self.global_cooldown_secs.max(GLOBAL_COOLDOWN_FLOOR_SECS) * 1000
    }

    /// All trigger ids across every profile, active or not. Used to prune
    /// persisted cursors.
    pub fn all_trigger_ids(&self) -> HashSet<String> {
        self.profiles
            .iter()
            .flat_map(|p| p.triggers.iter().map(|t| t.id.clone()))
            .collect()
    }

    /// Diagnostic validation: duplicate trigger ids and regex patterns that
    /// will not compile. An invalid regex does not block installation — the
    /// trigger simply stays inert — but surfacing it early helps the editor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            for trigger in &profile.triggers {
                if !seen.insert(trigger.id.as_str()) {
                    return Err(ConfigError::DuplicateTriggerId(trigger.id.clone()));
                }
                if trigger.pattern_kind == PatternKind::Regex {
                    if let Err(e) = regex::Regex::new(&trigger.pattern) {
                        return Err(ConfigError::InvalidRegex {
                            trigger_id: trigger.id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_string(value: Option<&Value>) -> Option<String> {
    let value = value?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn read_u64(value: Option<&Value>, default: u64) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(|v| v.max(0) as u64).unwrap_or(default),
        _ => default,
    }
}

fn read_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse::<bool>().unwrap_or(default),
        _ => default,
    }
}

fn read_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| read_string(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_builder_defaults() {
        let trigger = Trigger::new("hello", "hi there");
        assert!(trigger.enabled);
        assert_eq!(trigger.pattern_kind, PatternKind::Plain);
        assert_eq!(trigger.reply_selection, ReplySelection::Random);
        assert!(!trigger.id.is_empty());
    }

    #[test]
    fn delay_bounds_clamp_on_write_and_read() {
        let trigger = Trigger::new("x", "y").with_delay_ms(500, 100);
        assert_eq!(trigger.delay_range_ms(), (500, 500));

        // An inverted range smuggled in through direct field edits still
        // reads as a valid range.
        let mut trigger = Trigger::new("x", "y");
        trigger.min_delay_ms = 900;
        trigger.max_delay_ms = 300;
        assert_eq!(trigger.delay_range_ms(), (900, 900));
    }

    #[test]
    fn active_profile_resolution() {
        let a = Profile::new("alpha").with_id("a");
        let b = Profile::new("beta").with_id("b");
        let snap = ConfigSnapshot::new()
            .with_profile(a)
            .with_profile(b)
            .with_active_profile("b");
        assert_eq!(snap.active_profile().unwrap().name, "beta");

        // Stale active id falls back to the first profile.
        let snap = snap.with_active_profile("missing");
        assert_eq!(snap.active_profile().unwrap().name, "alpha");

        let empty = ConfigSnapshot::new();
        assert!(empty.active_profile().is_none());
    }

    #[test]
    fn global_cooldown_floor() {
        let snap = ConfigSnapshot::new().with_global_cooldown_secs(0);
        assert_eq!(snap.effective_global_cooldown_ms(), 2000);
        let snap = ConfigSnapshot::new().with_global_cooldown_secs(10);
        assert_eq!(snap.effective_global_cooldown_ms(), 10_000);
    }

    #[test]
    fn validate_duplicate_trigger_ids() {
        let snap = ConfigSnapshot::new().with_profile(
            Profile::new("p")
                .with_trigger(Trigger::new("a", "x").with_id("dup"))
                .with_trigger(Trigger::new("b", "y").with_id("dup")),
        );
        assert!(matches!(
            snap.validate(),
            Err(ConfigError::DuplicateTriggerId(id)) if id == "dup"
        ));
    }

    #[test]
    fn validate_invalid_regex() {
        let snap = ConfigSnapshot::new().with_profile(
            Profile::new("p").with_trigger(
                Trigger::new("[invalid", "x")
                    .with_id("re")
                    .with_pattern_kind(PatternKind::Regex),
            ),
        );
        assert!(matches!(
            snap.validate(),
            Err(ConfigError::InvalidRegex { trigger_id, .. }) if trigger_id == "re"
        ));
    }

    #[test]
    fn settings_value_parsing_is_tolerant() {
        let raw = json!({
            "id": "t1",
            "pattern": "  hello  ",
            "patternType": "REGEX",
            "reply": "hi",
            "cooldown": "30",
            "minUniqueUsers": 3,
            "minMentionsPerUser": "2",
            "timeWindowSec": 60,
            "notify": 1,
            "enabled": "true",
            "minDelayMs": 200,
            "maxDelayMs": 100,
            "replySelection": "Sequential",
            "replyLoop": true,
            "authors": ["Alice", "", "Bob"],
        });
        let trigger = Trigger::from_settings_value(&raw).unwrap();
        assert_eq!(trigger.id, "t1");
        assert_eq!(trigger.pattern, "hello");
        assert_eq!(trigger.pattern_kind, PatternKind::Regex);
        assert_eq!(trigger.cooldown_secs, 30);
        assert_eq!(trigger.min_unique_users, 3);
        assert_eq!(trigger.min_mentions_per_user, 2);
        assert!(trigger.notify);
        assert!(trigger.enabled);
        // Inverted delay bounds clamp at parse time.
        assert_eq!(trigger.delay_range_ms(), (200, 200));
        assert_eq!(trigger.reply_selection, ReplySelection::Sequential);
        assert!(trigger.loop_replies);
        assert_eq!(trigger.allow_authors, vec!["Alice", "Bob"]);
    }

    #[test]
    fn settings_value_generates_missing_ids() {
        let trigger = Trigger::from_settings_value(&json!({"pattern": "x", "reply": "y"})).unwrap();
        assert!(!trigger.id.is_empty());
        assert!(Trigger::from_settings_value(&json!("not a map")).is_none());
    }

    #[test]
    fn profile_settings_value_parsing() {
        let raw = json!({
            "id": "p1",
            "name": "main",
            "triggers": [
                {"pattern": "a", "reply": "x"},
                "garbage",
                {"pattern": "b", "reply": "y"},
            ],
        });
        let profile = Profile::from_settings_value(&raw).unwrap();
        assert_eq!(profile.name, "main");
        assert_eq!(profile.triggers.len(), 2);
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let snap = ConfigSnapshot::new()
            .with_profile(
                Profile::new("p").with_trigger(
                    Trigger::new("hello", "hi\n\nhey")
                        .with_reply_selection(ReplySelection::Sequential)
                        .with_author_override("Alice", "hello alice"),
                ),
            )
            .with_global_cooldown_secs(5);
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: ConfigSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.global_cooldown_secs, 5);
        let trigger = &parsed.active_profile().unwrap().triggers[0];
        assert_eq!(trigger.author_overrides.get("alice").unwrap(), "hello alice");
        assert_eq!(trigger.reply_selection, ReplySelection::Sequential);
    }
}
