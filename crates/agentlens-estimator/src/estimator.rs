// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Instant;

use agentlens_hash::Sha16;
use agentlens_model::{Message, ToolSchema};

use crate::conversation_state::{ConversationState, Lookup};
use crate::message_hash::{conversation_fingerprint, message_hash};
use crate::per_message_cache::PerMessageTokenCache;

/// A small multiplicative safety margin applied on top of the raw
/// character-based estimate, to bias slightly toward over-estimating rather
/// than under-estimating input size.
const SAFETY_MARGIN: f64 = 1.05;

/// Structural token overhead the wire format adds per new message once a
/// prefix or full estimate (not ground truth) is in play.
const PER_MESSAGE_STRUCTURAL_OVERHEAD: u64 = 4;

const SYSTEM_PROMPT_STRUCTURAL_OVERHEAD: u64 = 28;

/// Bias multiplier applied while a "too long" condition is active for the
/// current conversation.
const TOO_LONG_BIAS: f64 = 1.5;

/// Where a [`ConversationEstimate`]'s token count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSource {
    /// Ground truth from a prior successful reply to the identical message list.
    Exact,
    /// Ground truth for a known prefix, plus a fresh estimate of the new suffix.
    Delta,
    /// No usable prior record; every message was estimated.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEstimate {
    pub tokens: u64,
    pub source: EstimateSource,
    pub known_tokens: Option<u64>,
    pub estimated_tokens: Option<u64>,
    pub new_message_count: usize,
}

fn text_tokens(text: &str) -> u64 {
    ((text.len() as f64 / 4.0).ceil() as u64).max(1)
}

/// Estimates input tokens for a message sequence, using exact replay, a
/// prefix-delta, or a full estimate depending on what [`ConversationState`]
/// already knows, and learns from "input too long" errors by biasing future
/// estimates for the same conversation upward until it is summarized.
pub struct TokenEstimator {
    state: ConversationState,
    /// Per-model-family EMA correction factor, `0.7*prev + 0.3*new`. A
    /// second, deliberately global and untagged-by-model version of this
    /// same feedback loop lives at the `ChatSession` layer — see DESIGN.md.
    calibration_factors: HashMap<String, f64>,
    /// Set when the most recent request for this conversation ended in a
    /// "too long" error; cleared on the next successful `record_actual` or
    /// once the conversation's fingerprint changes.
    biased_fingerprint: Option<Sha16>,
    /// Process-wide per-message actual totals (spec.md §5's `TokenCache`).
    per_message_cache: PerMessageTokenCache,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            state: ConversationState::new(),
            calibration_factors: HashMap::new(),
            biased_fingerprint: None,
            per_message_cache: PerMessageTokenCache::new(),
        }
    }

    /// Per-message estimate with the safety margin and this family's
    /// learned calibration factor applied. The model family parameter is
    /// also accepted for forward compatibility with a real tokenizer
    /// lookup; the current implementation always falls back to the
    /// character-length heuristic.
    pub fn estimate_message(&self, message: &Message, model_family: &str) -> u64 {
        let raw = message.approx_tokens() as f64;
        (raw * SAFETY_MARGIN * self.calibration_factor(model_family)).ceil() as u64
    }

    /// `16 + 8 * tools.len() + 1.1 * Σ tokens(name + description + schema)`.
    pub fn count_tools_tokens(&self, tools: &[ToolSchema], _model_family: &str) -> u64 {
        let body_tokens: u64 = tools
            .iter()
            .map(|t| {
                let schema_text = t.parameters.to_string();
                text_tokens(&format!("{}{}{}", t.name, t.description, schema_text))
            })
            .sum();
        16 + 8 * tools.len() as u64 + ((body_tokens as f64) * 1.1).ceil() as u64
    }

    /// `tokens(text) + 28` structural overhead.
    pub fn count_system_prompt_tokens(&self, text: &str, _model_family: &str) -> u64 {
        text_tokens(text) + SYSTEM_PROMPT_STRUCTURAL_OVERHEAD
    }

    /// Estimate total input tokens for `messages`, consulting
    /// [`ConversationState`] for exact or prefix matches first.
    pub fn estimate_conversation(
        &mut self,
        messages: &[Message],
        model_family: &str,
        conversation_id: Option<&str>,
    ) -> ConversationEstimate {
        let hashes: Vec<Sha16> = messages.iter().map(message_hash).collect();
        let lookup = self.state.lookup(&hashes, model_family, conversation_id);

        let mut estimate = match lookup {
            Lookup::Exact { known_tokens } => ConversationEstimate {
                tokens: known_tokens,
                source: EstimateSource::Exact,
                known_tokens: Some(known_tokens),
                estimated_tokens: None,
                new_message_count: 0,
            },
            Lookup::Prefix { known_tokens, new_message_count, new_message_indices } => {
                let estimated_tokens: u64 = new_message_indices
                    .iter()
                    .map(|&i| self.estimate_message(&messages[i], model_family))
                    .sum();
                let estimated_tokens =
                    estimated_tokens + PER_MESSAGE_STRUCTURAL_OVERHEAD * new_message_count as u64;
                ConversationEstimate {
                    tokens: known_tokens + estimated_tokens,
                    source: EstimateSource::Delta,
                    known_tokens: Some(known_tokens),
                    estimated_tokens: Some(estimated_tokens),
                    new_message_count,
                }
            }
            Lookup::None => {
                let estimated_tokens: u64 =
                    messages.iter().map(|m| self.estimate_message(m, model_family)).sum();
                let estimated_tokens =
                    estimated_tokens + PER_MESSAGE_STRUCTURAL_OVERHEAD * messages.len() as u64;
                ConversationEstimate {
                    tokens: estimated_tokens,
                    source: EstimateSource::Full,
                    known_tokens: None,
                    estimated_tokens: Some(estimated_tokens),
                    new_message_count: messages.len(),
                }
            }
        };

        if !matches!(estimate.source, EstimateSource::Exact) {
            let fingerprint = conversation_fingerprint(messages);
            match self.biased_fingerprint {
                Some(fp) if fp == fingerprint => {
                    estimate.tokens = (estimate.tokens as f64 * TOO_LONG_BIAS).ceil() as u64;
                }
                Some(_) => {
                    // Fingerprint changed: the host summarized or moved on.
                    self.biased_fingerprint = None;
                }
                None => {}
            }
        }

        estimate
    }

    /// Record the actual input token total the model reported for
    /// `messages`, and clear any active "too long" bias (a successful
    /// completion means the conversation fit).
    ///
    /// Callers must only call this with a genuine, reported token total:
    /// storing `0` here would poison [`ConversationState`] with a bogus
    /// exact match for every identical future request. A `finish` chunk
    /// with no usage at all should call [`Self::clear_bias`] instead, to
    /// still satisfy §4.7(b)'s "clear the learned total on any successful
    /// finish" without recording ground truth that was never reported.
    pub fn record_actual(
        &mut self,
        messages: &[Message],
        model_family: &str,
        actual_tokens: u64,
        conversation_id: Option<&str>,
        now: Instant,
    ) {
        let hashes: Vec<Sha16> = messages.iter().map(message_hash).collect();
        self.state.record_actual(hashes, model_family, actual_tokens, conversation_id, now);
        self.biased_fingerprint = None;
    }

    /// Clear any active "too long" bias without touching
    /// [`ConversationState`] — used when a turn finishes successfully but
    /// reports no usable token total (spec.md §4.7(b)).
    pub fn clear_bias(&mut self) {
        self.biased_fingerprint = None;
    }

    /// Distribute a turn's reported total input tokens across `messages`,
    /// in proportion to each message's own estimate, and accumulate the
    /// result into the process-wide per-message cache (spec.md §5).
    pub fn distribute_actual_tokens(&mut self, messages: &[Message], model_family: &str, total_actual: u64) {
        let estimates: Vec<u64> = messages.iter().map(|m| self.estimate_message(m, model_family)).collect();
        self.per_message_cache.record_distributed(model_family, messages, &estimates, total_actual);
    }

    /// The accumulated actual-token total attributed to one message under
    /// `model_family`, if any turn has reported usage for it yet.
    pub fn per_message_actual(&self, model_family: &str, message: &Message) -> Option<u64> {
        self.per_message_cache.get(model_family, message)
    }

    /// Mark `messages`'s conversation as having just failed with a "too
    /// long" error, so the next `estimate_conversation` call for the same
    /// conversation is biased upward.
    pub fn mark_too_long(&mut self, messages: &[Message]) {
        self.biased_fingerprint = Some(conversation_fingerprint(messages));
    }

    /// `true` if a "too long" bias is currently active for `messages`'s conversation.
    pub fn is_biased(&self, messages: &[Message]) -> bool {
        self.biased_fingerprint == Some(conversation_fingerprint(messages))
    }

    /// Update the EMA correction factor for `model_family` toward `actual / estimated`.
    pub fn update_calibration(&mut self, model_family: &str, actual: u64, estimated: u64) {
        if estimated == 0 {
            return;
        }
        let sample = actual as f64 / estimated as f64;
        let prev = self.calibration_factor(model_family);
        self.calibration_factors.insert(model_family.to_string(), 0.7 * prev + 0.3 * sample);
    }

    /// Current EMA correction factor for `model_family`, defaulting to `1.0`.
    pub fn calibration_factor(&self, model_family: &str) -> f64 {
        self.calibration_factors.get(model_family).copied().unwrap_or(1.0)
    }
}
