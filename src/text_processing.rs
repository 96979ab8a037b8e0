//! # Text Processing Module
//!
//! Text comparison for fitness scoring: normalisation of extracted text and
//! character-level Levenshtein distance.
//!
//! Both sides of a comparison go through [`normalize_text`], so differences in
//! case or whitespace layout never count as edits.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE_RUN: Regex =
        Regex::new(r"\s+").expect("Whitespace pattern should be valid");
}

/// Lowercases, collapses every whitespace run to a single space and trims.
///
/// # Examples
///
/// ```
/// use ocr_filter_tuner::text_processing::normalize_text;
///
/// assert_eq!(normalize_text("  Hello\n\tWORLD  "), "hello world");
/// ```
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    WHITESPACE_RUN.replace_all(lowered.trim(), " ").into_owned()
}

/// Levenshtein distance over Unicode scalar values with unit costs.
///
/// Uses two rolling rows, so memory is linear in the shorter input.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    // Iterate over the longer string so the rows span the shorter one
    let (long, short) = if a_chars.len() >= b_chars.len() {
        (&a_chars, &b_chars)
    } else {
        (&b_chars, &a_chars)
    };

    if short.is_empty() {
        return long.len();
    }

    let mut previous: Vec<usize> = (0..=short.len()).collect();
    let mut current = vec![0; short.len() + 1];

    for (i, long_char) in long.iter().enumerate() {
        current[0] = i + 1;
        for (j, short_char) in short.iter().enumerate() {
            let cost = usize::from(long_char != short_char);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[short.len()]
}

/// Edit distance between two texts after normalising both.
pub fn normalized_distance(expected: &str, actual: &str) -> usize {
    levenshtein(&normalize_text(expected), &normalize_text(actual))
}
