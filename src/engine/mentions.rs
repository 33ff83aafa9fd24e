//! Mention classification and sliding-window aggregation.
//!
//! Each trigger keeps a per-author deque of timestamped matches. Thresholds
//! are only ever evaluated against entries inside the trigger's time window;
//! a window of zero keeps everything.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use regex::Regex;

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_]{3,25})").unwrap())
}

/// Who a message addresses, computed once per incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionCategory {
    /// Addresses the engine's own identity, via reply-target tag or token.
    Direct,
    /// Mentions somebody else.
    Recipient,
    /// No mention tokens at all.
    General,
}

/// Classify a message against the engine's own identity.
pub(crate) fn classify(
    text: &str,
    reply_target: Option<&str>,
    self_name: &str,
) -> MentionCategory {
    let self_lower = self_name.to_lowercase();
    if !self_lower.is_empty() {
        if let Some(target) = reply_target {
            if target.eq_ignore_ascii_case(&self_lower) {
                return MentionCategory::Direct;
            }
        }
    }
    let mut any_mention = false;
    for capture in mention_regex().captures_iter(text) {
        any_mention = true;
        if !self_lower.is_empty() && capture[1].to_lowercase() == self_lower {
            return MentionCategory::Direct;
        }
    }
    if any_mention {
        MentionCategory::Recipient
    } else {
        MentionCategory::General
    }
}

#[derive(Debug, Clone, Copy)]
struct MentionEntry {
    at_ms: u64,
    #[allow(dead_code)]
    category: MentionCategory,
}

/// Per-author sliding windows of qualifying matches for one trigger.
#[derive(Debug, Default)]
pub(crate) struct MentionWindow {
    authors: HashMap<String, VecDeque<MentionEntry>>,
}

impl MentionWindow {
    /// Record a qualifying match and prune the author's window. `window_ms`
    /// of zero disables time pruning; the deque is still capped at
    /// `per_user_cap` (the effective per-user requirement), newest kept.
    pub(crate) fn record(
        &mut self,
        author_lower: &str,
        category: MentionCategory,
        now_ms: u64,
        window_ms: u64,
        per_user_cap: u32,
    ) {
        let entries = self.authors.entry(author_lower.to_string()).or_default();
        entries.push_back(MentionEntry {
            at_ms: now_ms,
            category,
        });
        prune_deque(entries, now_ms, window_ms, per_user_cap);
    }

    /// Evaluate both group gates after pruning every author's window:
    /// the acting author must have at least `min_mentions` entries, and at
    /// least `min_unique` distinct authors must have that many. Both
    /// minimums are effective values (≥ 1).
    pub(crate) fn is_ready(
        &mut self,
        author_lower: &str,
        now_ms: u64,
        window_ms: u64,
        min_unique: u32,
        min_mentions: u32,
    ) -> bool {
        self.prune_all(now_ms, window_ms, min_mentions);

        let acting = self
            .authors
            .get(author_lower)
            .map(|entries| entries.len())
            .unwrap_or(0);
        if acting < min_mentions as usize {
            return false;
        }

        let qualifying = self
            .authors
            .values()
            .filter(|entries| entries.len() >= min_mentions as usize)
            .count();
        qualifying >= min_unique as usize
    }

    /// Clear every author's window, forcing thresholds to re-accumulate.
    pub(crate) fn reset(&mut self) {
        self.authors.clear();
    }

    fn prune_all(&mut self, now_ms: u64, window_ms: u64, per_user_cap: u32) {
        self.authors.retain(|_, entries| {
            prune_deque(entries, now_ms, window_ms, per_user_cap);
            !entries.is_empty()
        });
    }
}

fn prune_deque(entries: &mut VecDeque<MentionEntry>, now_ms: u64, window_ms: u64, cap: u32) {
    if window_ms > 0 {
        let cutoff = now_ms.saturating_sub(window_ms);
        while entries.front().is_some_and(|e| e.at_ms < cutoff) {
            entries.pop_front();
        }
    }
    while entries.len() > cap as usize {
        entries.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_direct_via_token() {
        assert_eq!(
            classify("hey @MyBot how are you", None, "mybot"),
            MentionCategory::Direct
        );
    }

    #[test]
    fn classify_direct_via_reply_target() {
        assert_eq!(
            classify("sure thing", Some("MyBot"), "mybot"),
            MentionCategory::Direct
        );
    }

    #[test]
    fn classify_recipient_and_general() {
        assert_eq!(
            classify("hey @someone_else", None, "mybot"),
            MentionCategory::Recipient
        );
        assert_eq!(classify("plain text", None, "mybot"), MentionCategory::General);
        // Tokens shorter than three characters are not mentions.
        assert_eq!(classify("hi @ab", None, "mybot"), MentionCategory::General);
    }

    #[test]
    fn classify_with_empty_identity_never_direct() {
        assert_eq!(
            classify("hey @anyone", None, ""),
            MentionCategory::Recipient
        );
    }

    #[test]
    fn single_author_single_mention_is_ready_by_default() {
        let mut window = MentionWindow::default();
        window.record("alice", MentionCategory::General, 1_000, 60_000, 1);
        assert!(window.is_ready("alice", 1_000, 60_000, 1, 1));
    }

    #[test]
    fn unique_user_threshold_needs_distinct_authors() {
        let mut window = MentionWindow::default();
        // Five mentions from the same author never satisfy min_unique=3.
        for i in 0..5u64 {
            window.record("alice", MentionCategory::General, i * 1_000, 60_000, 1);
            assert!(!window.is_ready("alice", i * 1_000, 60_000, 3, 1));
        }

        window.record("bob", MentionCategory::General, 6_000, 60_000, 1);
        assert!(!window.is_ready("bob", 6_000, 60_000, 3, 1));
        window.record("carol", MentionCategory::General, 7_000, 60_000, 1);
        assert!(window.is_ready("carol", 7_000, 60_000, 3, 1));
    }

    #[test]
    fn per_user_threshold_counts_acting_author() {
        let mut window = MentionWindow::default();
        window.record("alice", MentionCategory::General, 1_000, 60_000, 3);
        window.record("alice", MentionCategory::Direct, 2_000, 60_000, 3);
        assert!(!window.is_ready("alice", 2_000, 60_000, 1, 3));
        window.record("alice", MentionCategory::General, 3_000, 60_000, 3);
        assert!(window.is_ready("alice", 3_000, 60_000, 1, 3));

        // A different acting author with a thin window is not ready, even
        // though alice qualifies.
        window.record("bob", MentionCategory::General, 3_500, 60_000, 3);
        assert!(!window.is_ready("bob", 3_500, 60_000, 1, 3));
    }

    #[test]
    fn entries_outside_window_are_pruned() {
        let mut window = MentionWindow::default();
        window.record("alice", MentionCategory::General, 0, 60_000, 2);
        window.record("alice", MentionCategory::General, 30_000, 60_000, 2);
        assert!(window.is_ready("alice", 30_000, 60_000, 1, 2));

        // 70s later the first entry fell out; only one remains.
        assert!(!window.is_ready("alice", 70_000, 60_000, 1, 2));
        // 100s after that, everything is gone.
        assert!(!window.is_ready("alice", 130_000, 60_000, 1, 1));
    }

    #[test]
    fn zero_window_retains_forever() {
        let mut window = MentionWindow::default();
        window.record("alice", MentionCategory::General, 0, 0, 2);
        window.record("alice", MentionCategory::General, 1, 0, 2);
        // A week later the entries still count.
        assert!(window.is_ready("alice", 7 * 24 * 3600 * 1000, 0, 1, 2));
    }

    #[test]
    fn deque_capped_at_per_user_requirement() {
        let mut window = MentionWindow::default();
        for i in 0..10u64 {
            window.record("alice", MentionCategory::General, i, 0, 2);
        }
        assert_eq!(window.authors.get("alice").unwrap().len(), 2);
    }

    #[test]
    fn reset_clears_all_authors() {
        let mut window = MentionWindow::default();
        window.record("alice", MentionCategory::General, 0, 0, 1);
        window.record("bob", MentionCategory::General, 0, 0, 1);
        window.reset();
        assert!(!window.is_ready("alice", 1, 0, 1, 1));
    }
}
