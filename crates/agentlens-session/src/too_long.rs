// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Recognizing a provider's "prompt too long" error text and extracting the
//! token total it reports, per spec.md §7's `ModelTokenLimitExceeded`
//! taxonomy entry.

use regex::Regex;

fn exceeds_maximum_re() -> Regex {
    Regex::new(r"([\d,]+)\s*tokens\s*>\s*([\d,]+)\s*maximum")
        .expect("fixed valid pattern")
}

fn exceeds_phrase_re() -> Regex {
    Regex::new(r"(?i)exceeds[^\d]*([\d,]+)\s*tokens")
        .expect("fixed valid pattern")
}

fn parse_count(s: &str) -> Option<u64> {
    s.replace(',', "").parse().ok()
}

/// Recognize `"NNN tokens > MMM maximum"` or `"exceeds … NNN tokens"` in a
/// provider error message and return the reported `NNN` (the size the
/// request actually was, not the ceiling it exceeded).
pub fn parse_too_long(message: &str) -> Option<u64> {
    if let Some(caps) = exceeds_maximum_re().captures(message) {
        return parse_count(&caps[1]);
    }
    if let Some(caps) = exceeds_phrase_re().captures(message) {
        return parse_count(&caps[1]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tokens_greater_than_maximum_form() {
        let msg = "prompt is too long: 210000 tokens > 200000 maximum";
        assert_eq!(parse_too_long(msg), Some(210_000));
    }

    #[test]
    fn parses_tokens_greater_than_maximum_form_with_thousands_separators() {
        let msg = "prompt is too long: 210,000 tokens > 200,000 maximum";
        assert_eq!(parse_too_long(msg), Some(210_000));
    }

    #[test]
    fn parses_exceeds_phrase_form() {
        let msg = "input exceeds the model's context window of 128000 tokens";
        assert_eq!(parse_too_long(msg), Some(128_000));
    }

    #[test]
    fn returns_none_for_unrelated_message() {
        assert_eq!(parse_too_long("connection reset by peer"), None);
    }
}
