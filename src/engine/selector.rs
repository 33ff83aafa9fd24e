//! Reply-variant parsing and selection.
//!
//! A template splits into paragraph variants on blank lines. Random mode
//! samples uniformly; sequential mode walks a cursor that only advances on a
//! confirmed send.

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

fn paragraph_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\r?\n){2,}").unwrap())
}

/// The parsed variant list of one trigger's reply template.
#[derive(Debug, Default)]
pub(crate) struct ReplyPool {
    variants: Vec<String>,
}

impl ReplyPool {
    /// Split on blank lines, trim, drop empties. When no paragraph survives
    /// but the raw template trims non-empty, the whole template is the
    /// single variant. A blank template yields an empty pool.
    pub(crate) fn parse(template: &str) -> Self {
        let mut variants: Vec<String> = paragraph_split()
            .split(template)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if variants.is_empty() {
            let trimmed = template.trim();
            if !trimmed.is_empty() {
                variants.push(trimmed.to_string());
            }
        }
        Self { variants }
    }

    pub(crate) fn len(&self) -> usize {
        self.variants.len()
    }

    /// Variant at `cursor`, clamped to the last index when the template
    /// shrank since the cursor was recorded.
    pub(crate) fn variant_at(&self, cursor: u32) -> Option<&str> {
        let last = self.variants.len().checked_sub(1)?;
        let index = (cursor as usize).min(last);
        Some(&self.variants[index])
    }

    /// Uniformly sample one variant.
    pub(crate) fn pick_random(&self) -> Option<&str> {
        if self.variants.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.variants.len());
        Some(&self.variants[index])
    }

    #[cfg(test)]
    fn variants(&self) -> Vec<&str> {
        self.variants.iter().map(String::as_str).collect()
    }
}

/// Next cursor after a confirmed send: advance, then wrap to 0 (loop) or pin
/// at the last index (no loop).
pub(crate) fn advance_cursor(cursor: u32, pool_len: usize, looped: bool) -> u32 {
    if pool_len == 0 {
        return 0;
    }
    let last = (pool_len - 1) as u32;
    let cursor = cursor.min(last);
    if cursor < last {
        cursor + 1
    } else if looped {
        0
    } else {
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_blank_lines() {
        let pool = ReplyPool::parse("first reply\n\nsecond reply\r\n\r\nthird");
        assert_eq!(pool.variants(), ["first reply", "second reply", "third"]);
    }

    #[test]
    fn parse_single_lines_stay_one_variant() {
        // Single newlines do not split: a variant may span several lines.
        let pool = ReplyPool::parse("line one\nline two");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.variant_at(0), Some("line one\nline two"));
    }

    #[test]
    fn parse_blank_template_is_empty() {
        assert_eq!(ReplyPool::parse("").len(), 0);
        assert_eq!(ReplyPool::parse("  \n\n  \n  ").len(), 0);
    }

    #[test]
    fn parse_trims_variants() {
        let pool = ReplyPool::parse("  padded  \n\n\n  more  ");
        assert_eq!(pool.variants(), ["padded", "more"]);
    }

    #[test]
    fn variant_at_clamps_to_last() {
        let pool = ReplyPool::parse("a\n\nb");
        assert_eq!(pool.variant_at(0), Some("a"));
        assert_eq!(pool.variant_at(1), Some("b"));
        // Cursor beyond the end (template shrank) clamps.
        assert_eq!(pool.variant_at(9), Some("b"));
    }

    #[test]
    fn pick_random_stays_in_pool() {
        let pool = ReplyPool::parse("a\n\nb\n\nc");
        for _ in 0..50 {
            let picked = pool.pick_random().unwrap();
            assert!(["a", "b", "c"].contains(&picked));
        }
        assert!(ReplyPool::parse("").pick_random().is_none());
    }

    #[test]
    fn advance_without_loop_pins_at_last() {
        assert_eq!(advance_cursor(0, 3, false), 1);
        assert_eq!(advance_cursor(1, 3, false), 2);
        // Exhausted: stays pinned indefinitely.
        assert_eq!(advance_cursor(2, 3, false), 2);
        assert_eq!(advance_cursor(2, 3, false), 2);
    }

    #[test]
    fn advance_with_loop_wraps_to_zero() {
        assert_eq!(advance_cursor(2, 3, true), 0);
        assert_eq!(advance_cursor(0, 1, true), 0);
    }

    #[test]
    fn advance_clamps_stale_cursor() {
        // Template shrank from 5 to 2 variants while the cursor sat at 4.
        assert_eq!(advance_cursor(4, 2, false), 1);
        assert_eq!(advance_cursor(4, 2, true), 0);
    }
}
