// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide cache of per-message actual token counts, keyed by
//! `(modelFamily, messageHash)` (spec.md §5). A streamed turn only ever
//! reports one *total* input-token figure; this cache recovers a
//! per-message breakdown by distributing that total across the turn's
//! messages in proportion to their estimates, fixing the inevitable
//! rounding drift with a largest-remainder allocation so the distributed
//! amounts always sum back to exactly the reported total.
//!
//! Entries are purely additive: a message hash that recurs across turns
//! (the same system prompt resent every turn, for instance) accumulates
//! tokens rather than being overwritten, matching the "pure-additive"
//! wording in spec.md §5.

use std::collections::HashMap;

use agentlens_hash::Sha16;
use agentlens_model::Message;

use crate::message_hash::message_hash;

#[derive(Debug, Default)]
pub struct PerMessageTokenCache {
    entries: HashMap<(String, Sha16), u64>,
}

impl PerMessageTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distribute `total_actual` across `messages` in proportion to
    /// `estimates` (one entry per message), accumulating the result into
    /// each message's running total for `model_family`.
    ///
    /// Uses the largest-remainder method: every message gets at least the
    /// floor of its proportional share, then the leftover units (at most
    /// `messages.len() - 1` of them) go to the messages whose shares had
    /// the largest fractional remainder, so the allocation always sums to
    /// exactly `total_actual`.
    pub fn record_distributed(&mut self, model_family: &str, messages: &[Message], estimates: &[u64], total_actual: u64) {
        debug_assert_eq!(messages.len(), estimates.len());
        if messages.is_empty() {
            return;
        }
        let sum_est: u64 = estimates.iter().sum();
        if sum_est == 0 {
            return;
        }

        let mut allocated = vec![0u64; messages.len()];
        let mut remainders = vec![0.0f64; messages.len()];
        let mut running = 0u64;
        for (i, &estimate) in estimates.iter().enumerate() {
            let share = (estimate as f64) * (total_actual as f64) / (sum_est as f64);
            allocated[i] = share.floor() as u64;
            remainders[i] = share - allocated[i] as f64;
            running += allocated[i];
        }

        let mut drift = total_actual.saturating_sub(running);
        let mut by_remainder: Vec<usize> = (0..messages.len()).collect();
        by_remainder.sort_by(|&a, &b| remainders[b].partial_cmp(&remainders[a]).unwrap_or(std::cmp::Ordering::Equal));
        for &i in &by_remainder {
            if drift == 0 {
                break;
            }
            allocated[i] += 1;
            drift -= 1;
        }

        for (message, tokens) in messages.iter().zip(allocated) {
            let key = (model_family.to_string(), message_hash(message));
            *self.entries.entry(key).or_insert(0) += tokens;
        }
    }

    /// The accumulated actual-token total attributed to `message` under
    /// `model_family`, if any turn has reported usage for it yet.
    pub fn get(&self, model_family: &str, message: &Message) -> Option<u64> {
        self.entries.get(&(model_family.to_string(), message_hash(message))).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_model::Message;

    #[test]
    fn distributes_proportionally_to_estimates() {
        let mut cache = PerMessageTokenCache::new();
        let messages = vec![Message::user("a"), Message::user("bb")];
        cache.record_distributed("gpt", &messages, &[1, 3], 100);
        assert_eq!(cache.get("gpt", &messages[0]), Some(25));
        assert_eq!(cache.get("gpt", &messages[1]), Some(75));
    }

    #[test]
    fn allocation_always_sums_to_reported_total_despite_rounding() {
        let mut cache = PerMessageTokenCache::new();
        let messages = vec![Message::user("a"), Message::user("b"), Message::user("c")];
        cache.record_distributed("gpt", &messages, &[1, 1, 1], 100);
        let total: u64 = messages.iter().map(|m| cache.get("gpt", m).unwrap()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn entries_accumulate_across_turns() {
        let mut cache = PerMessageTokenCache::new();
        let messages = vec![Message::user("repeated system context")];
        cache.record_distributed("gpt", &messages, &[1], 50);
        cache.record_distributed("gpt", &messages, &[1], 30);
        assert_eq!(cache.get("gpt", &messages[0]), Some(80));
    }

    #[test]
    fn entries_are_scoped_per_model_family() {
        let mut cache = PerMessageTokenCache::new();
        let messages = vec![Message::user("hi")];
        cache.record_distributed("gpt", &messages, &[1], 10);
        assert_eq!(cache.get("claude", &messages[0]), None);
    }

    #[test]
    fn empty_estimate_sum_is_a_no_op() {
        let mut cache = PerMessageTokenCache::new();
        let messages = vec![Message::user("")];
        cache.record_distributed("gpt", &messages, &[0], 10);
        assert_eq!(cache.get("gpt", &messages[0]), None);
    }
}
