//! Pattern compilation and author gating.
//!
//! Patterns are compiled once per snapshot install. A pattern that fails to
//! compile leaves the trigger inert: it never matches and never surfaces an
//! error during message evaluation.

use std::collections::HashSet;

use regex::RegexBuilder;
use tracing::warn;

use crate::config::{PatternKind, Trigger};

/// A trigger pattern ready for evaluation.
#[derive(Debug)]
pub(crate) enum CompiledPattern {
    /// Normalized substring match; `at_stripped` carries the fallback form
    /// with `@` removed when the pattern contains one, so "hi @bot" still
    /// matches a message saying "hi bot".
    Plain {
        normalized: String,
        at_stripped: Option<String>,
    },
    Regex(regex::Regex),
    /// Empty or invalid pattern; matches nothing, forever.
    Inert,
}

impl CompiledPattern {
    pub(crate) fn compile(trigger: &Trigger) -> Self {
        let pattern = trigger.pattern.trim();
        if pattern.is_empty() {
            return Self::Inert;
        }
        match trigger.pattern_kind {
            PatternKind::Regex => match RegexBuilder::new(pattern)
                .case_insensitive(true)
                .unicode(true)
                .build()
            {
                Ok(re) => Self::Regex(re),
                Err(e) => {
                    warn!(trigger_id = %trigger.id, pattern = %pattern, error = %e,
                        "invalid auto reply regex pattern, trigger disabled");
                    Self::Inert
                }
            },
            PatternKind::Plain => {
                let normalized = normalize(pattern);
                if normalized.is_empty() {
                    return Self::Inert;
                }
                let at_stripped = normalized
                    .contains('@')
                    .then(|| normalize(&normalized.replace('@', "")))
                    .filter(|s| !s.is_empty());
                Self::Plain {
                    normalized,
                    at_stripped,
                }
            }
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !matches!(self, Self::Inert)
    }

    /// `text` is the raw message, `normalized_text` its normalized form
    /// (computed once per message by the caller).
    pub(crate) fn matches(&self, text: &str, normalized_text: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(text),
            Self::Plain {
                normalized,
                at_stripped,
            } => {
                if normalized_text.contains(normalized.as_str()) {
                    return true;
                }
                match at_stripped {
                    Some(stripped) => {
                        normalize(&normalized_text.replace('@', "")).contains(stripped.as_str())
                    }
                    None => false,
                }
            }
            Self::Inert => false,
        }
    }
}

/// Lowercase and collapse whitespace runs to single spaces.
pub(crate) fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Allow/block author sets, lowercased at compile time.
#[derive(Debug, Default)]
pub(crate) struct AuthorFilter {
    allow: HashSet<String>,
    block: HashSet<String>,
}

impl AuthorFilter {
    pub(crate) fn compile(trigger: &Trigger) -> Self {
        Self {
            allow: lowercase_set(&trigger.allow_authors),
            block: lowercase_set(&trigger.block_authors),
        }
    }

    /// Non-empty allow-set requires membership; the block-set always wins.
    pub(crate) fn allows(&self, author_lower: &str) -> bool {
        if !self.allow.is_empty() && !self.allow.contains(author_lower) {
            return false;
        }
        !self.block.contains(author_lower)
    }
}

fn lowercase_set(entries: &[String]) -> HashSet<String> {
    entries
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
