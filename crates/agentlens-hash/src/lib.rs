// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic short-digest functions used to reconstruct agent identity
//! from opaque chat traffic.
//!
//! Every hash in this crate is a 16-hex-character (8-byte) truncation of a
//! SHA-256 digest over a canonicalized string. Canonicalization happens in
//! the functions below, not at the call site, so that identical logical
//! inputs always produce identical digests regardless of incidental
//! whitespace or ordering differences upstream.

use std::fmt;

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A 16-hex-character identity digest.
///
/// Hashable, orderable, and serializable (as its hex string) so it can key
/// maps, sort deterministically in diagnostic dumps, and round-trip through
/// JSON without ever emitting a raw byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha16([u8; 8]);

impl Serialize for Sha16 {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Sha16 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Sha16::from_hex(&s).ok_or_else(|| D::Error::custom("expected 16 hex chars"))
    }
}

impl Sha16 {
    /// Hash arbitrary bytes, keeping the first 8 bytes (16 hex chars) of the
    /// SHA-256 digest.
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(data.as_ref());
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        Sha16(out)
    }

    /// Parse a previously hex-encoded digest (e.g. from a persisted dump).
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(Sha16(arr))
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// System-prompt hash: trimmed UTF-8 of the system text.
pub fn system_prompt_hash(system_text: &str) -> Sha16 {
    Sha16::of(system_text.trim())
}

/// Tool-set hash: tool names sorted ascending, joined by `|`.
pub fn tool_set_hash<I, S>(tool_names: I) -> Sha16
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = tool_names.into_iter().map(|n| n.as_ref().to_string()).collect();
    names.sort();
    Sha16::of(names.join("|"))
}

/// Agent-type hash: SHA-256 of (system prompt hash ∥ tool set hash).
pub fn agent_type_hash(system_prompt_hash: Sha16, tool_set_hash: Sha16) -> Sha16 {
    Sha16::of(format!("{system_prompt_hash}{tool_set_hash}"))
}

/// First-user-message hash: trimmed UTF-8 of the first user text part.
pub fn first_user_message_hash(first_user_text: &str) -> Sha16 {
    Sha16::of(first_user_text.trim())
}

/// First-assistant-response hash: first text content, trimmed, truncated to
/// 500 characters.
pub fn first_assistant_response_hash(first_assistant_text: &str) -> Sha16 {
    let trimmed = first_assistant_text.trim();
    let truncated: String = trimmed.chars().take(500).collect();
    Sha16::of(truncated)
}

/// Conversation hash: SHA-256 of (agent type hash ∥ first user message hash
/// ∥ first assistant response hash).
pub fn conversation_hash(
    agent_type_hash: Sha16,
    first_user_message_hash: Sha16,
    first_assistant_response_hash: Sha16,
) -> Sha16 {
    Sha16::of(format!(
        "{agent_type_hash}{first_user_message_hash}{first_assistant_response_hash}"
    ))
}

/// The `systemPromptHash + ':' + firstUserMessageHash` key used to detect a
/// turn extending the same logical conversation before a conversation hash
/// exists.
pub fn partial_key(system_prompt_hash: Sha16, first_user_message_hash: Sha16) -> String {
    format!("{system_prompt_hash}:{first_user_message_hash}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_yields_same_digest() {
        assert_eq!(system_prompt_hash("hello"), system_prompt_hash("hello"));
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(system_prompt_hash("  hello  "), system_prompt_hash("hello"));
    }

    #[test]
    fn different_input_yields_different_digest() {
        assert_ne!(system_prompt_hash("hello"), system_prompt_hash("goodbye"));
    }

    #[test]
    fn tool_set_hash_ignores_input_order() {
        let a = tool_set_hash(["read_file", "write_file", "grep"]);
        let b = tool_set_hash(["grep", "write_file", "read_file"]);
        assert_eq!(a, b);
    }

    #[test]
    fn tool_set_hash_is_case_sensitive() {
        let a = tool_set_hash(["Read"]);
        let b = tool_set_hash(["read"]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_tool_set_hashes_deterministically() {
        let a = tool_set_hash(Vec::<&str>::new());
        let b = tool_set_hash(Vec::<&str>::new());
        assert_eq!(a, b);
    }

    #[test]
    fn agent_type_hash_depends_on_both_inputs() {
        let sp_a = system_prompt_hash("A");
        let sp_b = system_prompt_hash("B");
        let ts = tool_set_hash(["x"]);
        assert_ne!(agent_type_hash(sp_a, ts), agent_type_hash(sp_b, ts));
    }

    #[test]
    fn first_assistant_response_hash_truncates_to_500_chars() {
        let short = "a".repeat(500);
        let long = "a".repeat(5000);
        assert_eq!(
            first_assistant_response_hash(&short),
            first_assistant_response_hash(&long)
        );
    }

    #[test]
    fn first_assistant_response_hash_trims_before_truncating() {
        let padded = format!("  {}  ", "x".repeat(500));
        assert_eq!(
            first_assistant_response_hash(&padded),
            first_assistant_response_hash(&"x".repeat(500))
        );
    }

    #[test]
    fn conversation_hash_is_immutable_function_of_inputs() {
        let at = agent_type_hash(system_prompt_hash("A"), tool_set_hash(["t"]));
        let fu = first_user_message_hash("hi");
        let fa = first_assistant_response_hash("ok");
        let h1 = conversation_hash(at, fu, fa);
        let h2 = conversation_hash(at, fu, fa);
        assert_eq!(h1, h2);
    }

    #[test]
    fn partial_key_formats_as_colon_separated_pair() {
        let sp = system_prompt_hash("A");
        let fu = first_user_message_hash("hi");
        assert_eq!(partial_key(sp, fu), format!("{sp}:{fu}"));
    }

    #[test]
    fn sha16_hex_round_trips() {
        let h = system_prompt_hash("round trip me");
        let hex = h.as_hex();
        assert_eq!(hex.len(), 16);
        assert_eq!(Sha16::from_hex(&hex), Some(h));
    }

    #[test]
    fn sha16_display_matches_as_hex() {
        let h = system_prompt_hash("x");
        assert_eq!(h.to_string(), h.as_hex());
    }

    #[test]
    fn sha16_serializes_as_hex_string() {
        let h = system_prompt_hash("x");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.as_hex()));
    }
}
