// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonicalization of a [`Message`] for [`crate::ConversationState`]
//! equality. Binary content is never hashed by raw bytes; instead each part
//! contributes `(type, mime, digest, length)` so two structurally identical
//! messages hash identically without the estimator ever holding attachment
//! bytes in memory.

use agentlens_hash::Sha16;
use agentlens_model::{ContentPart, Message, MessageContent, Role};

fn role_tag(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn part_tag(part: &ContentPart) -> String {
    match part {
        ContentPart::Text { text } => format!("text:{text}"),
        ContentPart::Image { image_url, detail } => {
            let mime = image_url
                .strip_prefix("data:")
                .and_then(|s| s.split(';').next())
                .unwrap_or("application/octet-stream");
            let digest = Sha16::of(image_url.as_bytes());
            format!(
                "image:{mime}:{digest}:{len}:{detail}",
                len = image_url.len(),
                detail = detail.as_deref().unwrap_or("")
            )
        }
    }
}

/// Canonical hash of one message's `(role, name, parts)`.
pub fn message_hash(message: &Message) -> Sha16 {
    let mut canonical = String::new();
    canonical.push_str(role_tag(&message.role));
    canonical.push('|');
    canonical.push_str(message.name.as_deref().unwrap_or(""));
    canonical.push('|');
    match &message.content {
        MessageContent::Text(text) => canonical.push_str(&part_tag(&ContentPart::Text { text: text.clone() })),
        MessageContent::ContentParts(parts) => {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    canonical.push(';');
                }
                canonical.push_str(&part_tag(part));
            }
        }
        MessageContent::ToolCall { tool_call_id, function } => {
            canonical.push_str(&format!(
                "tool-call:{tool_call_id}:{}:{}",
                function.name, function.arguments
            ));
        }
        MessageContent::ToolResult { tool_call_id, content } => {
            canonical.push_str(&format!("tool-result:{tool_call_id}:{content}"));
        }
    }
    Sha16::of(canonical)
}

/// A coarse fingerprint of a conversation: the first two and last two
/// message hashes. Used to detect whether a "too long" bias still applies
/// to the current conversation without comparing every message.
pub fn conversation_fingerprint(messages: &[Message]) -> Sha16 {
    let hashes: Vec<Sha16> = messages.iter().map(message_hash).collect();
    let mut parts = Vec::new();
    let head = hashes.iter().take(2);
    let tail_start = hashes.len().saturating_sub(2);
    let tail = hashes.iter().skip(tail_start);
    parts.extend(head);
    parts.extend(tail);
    let joined = parts.iter().map(Sha16::to_string).collect::<Vec<_>>().join(",");
    Sha16::of(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_messages_hash_identically() {
        assert_eq!(message_hash(&Message::user("hi")), message_hash(&Message::user("hi")));
    }

    #[test]
    fn different_text_hashes_differently() {
        assert_ne!(message_hash(&Message::user("hi")), message_hash(&Message::user("bye")));
    }

    #[test]
    fn different_roles_hash_differently() {
        assert_ne!(message_hash(&Message::user("hi")), message_hash(&Message::assistant("hi")));
    }

    #[test]
    fn fingerprint_is_stable_for_identical_conversations() {
        let a = vec![Message::user("1"), Message::assistant("2"), Message::user("3")];
        let b = vec![Message::user("1"), Message::assistant("2"), Message::user("3")];
        assert_eq!(conversation_fingerprint(&a), conversation_fingerprint(&b));
    }

    #[test]
    fn fingerprint_changes_when_middle_message_changes_but_ends_match() {
        // Fingerprint only samples head/tail, so a short conversation (<=4
        // messages) still reacts to a middle change because the middle falls
        // inside the head or tail window; this guards that overlap case.
        let a = vec![Message::user("1"), Message::user("2"), Message::user("3")];
        let b = vec![Message::user("1"), Message::user("CHANGED"), Message::user("3")];
        assert_ne!(conversation_fingerprint(&a), conversation_fingerprint(&b));
    }

    #[test]
    fn fingerprint_handles_short_conversations() {
        let msgs = vec![Message::user("only one")];
        let fp = conversation_fingerprint(&msgs);
        assert_eq!(fp, conversation_fingerprint(&msgs));
    }
}
