// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use agentlens_hash::Sha16;

/// Lifecycle state of one live chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Streaming,
    Complete,
    Error,
}

/// A provider-reported edit that cleared tool uses or thinking turns from
/// context to free input tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextManagement {
    pub applied_edits: Vec<String>,
}

/// One logical chat participant — the main agent or a sub-agent — tracked
/// across one or more request/response turns.
///
/// Every `Agent` is exclusively owned by [`crate::AgentTree`]; external
/// holders keep only its opaque `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Host-assigned opaque request id this agent was created from. Later
    /// requests that resume this agent are tracked as aliases in the tree,
    /// not stored here.
    pub id: String,
    pub name: String,
    pub start_time: u64,
    pub last_update_time: u64,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub max_observed_input_tokens: u64,
    pub total_output_tokens: u64,
    pub turn_count: u32,

    pub max_input_tokens: Option<u64>,
    pub model_id: Option<String>,
    /// Set while a `startAgent` call is outstanding for this agent and no
    /// turn has completed yet.
    pub estimated_input_tokens: Option<u64>,

    pub status: AgentStatus,
    pub context_management: Option<ContextManagement>,
    pub dimmed: bool,
    pub is_main: bool,
    /// Monotonic index assigned at completion; `None` until the agent
    /// completes its first turn.
    pub completion_order: Option<u64>,

    pub system_prompt_hash: Option<Sha16>,
    pub agent_type_hash: Option<Sha16>,
    pub first_user_message_hash: Option<Sha16>,
    /// Immutable once set (invariant 2 / 8).
    pub conversation_hash: Option<Sha16>,
    pub parent_conversation_hash: Option<Sha16>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            start_time: now,
            last_update_time: now,
            input_tokens: 0,
            output_tokens: 0,
            max_observed_input_tokens: 0,
            total_output_tokens: 0,
            turn_count: 0,
            max_input_tokens: None,
            model_id: None,
            estimated_input_tokens: None,
            status: AgentStatus::Streaming,
            context_management: None,
            dimmed: false,
            is_main: false,
            completion_order: None,
            system_prompt_hash: None,
            agent_type_hash: None,
            first_user_message_hash: None,
            conversation_hash: None,
            parent_conversation_hash: None,
        }
    }

    /// `systemPromptHash + ':' + firstUserMessageHash`, when both are known.
    pub fn partial_key(&self) -> Option<String> {
        match (&self.system_prompt_hash, &self.first_user_message_hash) {
            (Some(sp), Some(fu)) => Some(agentlens_hash::partial_key(*sp, *fu)),
            _ => None,
        }
    }

    /// `true` if another live agent referencing this one by
    /// `parentConversationHash` would keep it alive during aging.
    pub fn identifiers(&self) -> Vec<Sha16> {
        [self.conversation_hash, self.agent_type_hash].into_iter().flatten().collect()
    }
}
