//! # Text Processing Utilities
//!
//! Normalization and matching helpers used by the in-memory row search.
//!
//! Search text is folded before comparison: lowercased, stripped of
//! combining diacritics, and with `ё` folded onto `е`. Approximate matching
//! follows the familiar threshold/distance model: a match scores
//! `errors / pattern_length + start / distance`, and it is accepted when the
//! score does not exceed the threshold.

use serde::{Deserialize, Serialize};
use unicode_normalization::char::{decompose_canonical, is_combining_mark};

/// Tuning for [`approximate_score`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproximateOptions {
    /// `0.0` accepts only exact matches at the start of the text; `1.0` accepts anything.
    pub threshold: f64,
    /// How many characters into the text a match may start before it costs a full point.
    pub distance: usize,
}

impl Default for ApproximateOptions {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            distance: 100,
        }
    }
}

/// Folds text for search comparison.
///
/// # Example
/// ```rust
/// use tabula_util::normalize_search_text;
///
/// assert_eq!(normalize_search_text("Crème BRÛLÉE"), "creme brulee");
/// assert_eq!(normalize_search_text("Ёлка"), "елка");
/// assert_eq!(normalize_search_text("Йошкар-Ола"), "йошкар-ола");
/// ```
pub fn normalize_search_text(input: &str) -> String {
    let mut normalized = String::with_capacity(input.len());
    for character in input.chars().flat_map(char::to_lowercase) {
        match character {
            'ё' => normalized.push('е'),
            // The breve is part of the letter, not a diacritic.
            'й' => normalized.push('й'),
            other => decompose_canonical(other, |part| {
                if !is_combining_mark(part) {
                    normalized.push(part);
                }
            }),
        }
    }
    normalized
}

/// Scores an approximate occurrence of `pattern` anywhere in `text`.
///
/// Both inputs are expected to be normalized already. Returns `Some(score)`
/// (lower is better, `0.0` is an exact match at the start) when the best
/// occurrence is within `options.threshold`, otherwise `None`.
///
/// # Arguments
/// * `text` - The haystack
/// * `pattern` - The query to look for
/// * `options` - Threshold and positional distance
///
/// # Example
/// ```rust
/// use tabula_util::{ApproximateOptions, approximate_score};
///
/// let options = ApproximateOptions::default();
/// assert_eq!(approximate_score("hello world", "hello", options), Some(0.0));
/// assert!(approximate_score("hello world", "helo", options).is_some());
/// assert!(approximate_score("hello world", "qqqq", options).is_none());
/// ```
pub fn approximate_score(text: &str, pattern: &str, options: ApproximateOptions) -> Option<f64> {
    let pattern: Vec<char> = pattern.chars().collect();
    if pattern.is_empty() {
        return Some(0.0);
    }
    let text: Vec<char> = text.chars().collect();
    let score = best_occurrence_score(&text, &pattern, options.distance);

    if options.threshold >= 1.0 || score <= options.threshold {
        Some(score)
    } else {
        None
    }
}

/// Approximate substring search (Sellers) tracking where each alignment starts.
///
/// Row `i` of the table holds, for every end position in the text, the fewest
/// edits aligning `pattern[..i]` to a substring ending there, plus that
/// substring's start. Ties prefer the earlier start.
fn best_occurrence_score(text: &[char], pattern: &[char], distance: usize) -> f64 {
    let width = text.len() + 1;
    let mut previous_cost = vec![0usize; width];
    let mut previous_start: Vec<usize> = (0..width).collect();
    let mut cost = vec![0usize; width];
    let mut start = vec![0usize; width];

    for (row, pattern_character) in pattern.iter().enumerate() {
        cost[0] = row + 1;
        start[0] = 0;
        for column in 1..width {
            let substitution = (
                previous_cost[column - 1] + usize::from(*pattern_character != text[column - 1]),
                previous_start[column - 1],
            );
            let skip_pattern = (previous_cost[column] + 1, previous_start[column]);
            let skip_text = (cost[column - 1] + 1, start[column - 1]);

            let (best_cost, best_start) = [substitution, skip_pattern, skip_text]
                .into_iter()
                .min()
                .unwrap_or(substitution);
            cost[column] = best_cost;
            start[column] = best_start;
        }
        std::mem::swap(&mut previous_cost, &mut cost);
        std::mem::swap(&mut previous_start, &mut start);
    }

    let pattern_length = pattern.len() as f64;
    previous_cost
        .iter()
        .zip(previous_start.iter())
        .map(|(errors, start)| *errors as f64 / pattern_length + proximity(*start, distance))
        .fold(f64::INFINITY, f64::min)
}

fn proximity(start: usize, distance: usize) -> f64 {
    match (start, distance) {
        (0, _) => 0.0,
        (_, 0) => 1.0,
        (start, distance) => start as f64 / distance as f64,
    }
}
