//! Strategy similarity.
//!
//! Two strategy descriptions are compared as sets of normalized word tokens:
//! lowercased, split on anything that is not a letter or digit, with articles
//! dropped. The score is the Jaccard index of the two sets.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Default Jaccard threshold.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

const STOP_WORDS: &[&str] = &["a", "an", "the"];

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("invalid word pattern"));

/// Normalized token set of `text`.
pub fn tokens(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Jaccard index of the token sets; 0.0 when either set is empty.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let total = left.union(&right).count();
    shared as f64 / total as f64
}

/// Threshold comparison of strategy texts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategySimilarity {
    threshold: f64,
}

impl Default for StrategySimilarity {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl StrategySimilarity {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_similar(&self, a: &str, b: &str) -> bool {
        jaccard(a, b) >= self.threshold
    }

    /// Prior matches the newest strategy needs within a `window` to count as
    /// a repeat: two, or one when the window only holds a single prior.
    pub fn required_matches(window: usize) -> usize {
        window.saturating_sub(1).clamp(1, 2)
    }

    /// Whether the newest strategy repeats the earlier ones.
    ///
    /// `strategies` is oldest first and holds at most `window` entries. Until
    /// enough prior strategies exist the answer is `false`.
    pub fn is_repetitive(&self, strategies: &[String], window: usize) -> bool {
        let Some((latest, prior)) = strategies.split_last() else {
            return false;
        };
        let needed = Self::required_matches(window);
        if prior.len() < needed {
            return false;
        }
        let matches = prior.iter().filter(|p| self.is_similar(latest, p)).count();
        matches >= needed
    }
}
