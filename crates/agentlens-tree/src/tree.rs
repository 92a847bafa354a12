// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use agentlens_claims::ClaimRegistry;
use agentlens_hash::Sha16;

use crate::agent::{Agent, AgentStatus, ContextManagement};

/// Token usage reported at the end of one turn. Kept local to this crate
/// rather than imported from the gateway model crate: the tree has no
/// business knowing about providers, only about the counts it accumulates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Arguments to [`AgentTree::start_agent`].
#[derive(Debug, Clone, Default)]
pub struct StartAgentRequest {
    pub request_id: String,
    pub estimated_tokens: Option<u64>,
    pub max_tokens: Option<u64>,
    pub model_id: Option<String>,
    pub system_prompt_hash: Option<Sha16>,
    pub agent_type_hash: Option<Sha16>,
    pub first_user_message_hash: Option<Sha16>,
    /// A host-supplied name hint (e.g. the tool name that invoked a
    /// sub-agent) used only to derive the preliminary name claim matching
    /// attempts against. Distinct from `model_id`: a host rarely knows the
    /// exact claimed child name in advance, but it usually knows which tool
    /// it just called.
    pub preliminary_name_hint: Option<String>,
}

/// Serializable projection of a pending claim for [`AgentTree::create_diagnostic_dump`].
/// Claim timestamps are `Instant`s and aren't meaningful outside the process,
/// so the dump carries only the identifying fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSnapshot {
    pub parent_identifier: String,
    pub expected_child_name: String,
    pub expected_child_agent_type_hash: Option<String>,
}

/// A disposable handle to [`AgentTree`]'s change notifications. Holding one
/// keeps the underlying `broadcast` receiver registered; dropping it
/// unsubscribes, mirroring the teacher's RAII-disposal convention for
/// background fan-out subscribers.
pub struct AgentTreeSubscription(broadcast::Receiver<()>);

impl AgentTreeSubscription {
    /// Waits for the next mutation. Returns `Ok(())` on a fresh
    /// notification, or `Err` if the tree lagged past this subscriber's
    /// buffer or was dropped.
    pub async fn changed(&mut self) -> Result<(), broadcast::error::RecvError> {
        self.0.recv().await.map(|_| ())
    }
}

/// A point-in-time snapshot suitable for a forensic JSONL sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticDump {
    pub agents: Vec<Agent>,
    pub partial_key_index: HashMap<String, String>,
    pub pending_claims: Vec<ClaimSnapshot>,
    pub main_agent_id: Option<String>,
    pub active_agent_id: Option<String>,
    pub invariant_violations: Vec<String>,
}

/// Live reconstruction of the agent/sub-agent tree from opaque chat request
/// traffic. Every agent is exclusively owned by this struct; callers see only
/// the opaque id returned by [`AgentTree::start_agent`].
pub struct AgentTree {
    agents: HashMap<String, Agent>,
    conversation_index: HashMap<Sha16, String>,
    partial_key_index: HashMap<String, String>,
    aliases: HashMap<String, String>,
    main_agent_id: Option<String>,
    active_agent_id: Option<String>,
    main_system_prompt_hash: Option<Sha16>,
    completed_agent_count: u64,
    claims: ClaimRegistry,
    change_tx: broadcast::Sender<()>,
}

impl Default for AgentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentTree {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            agents: HashMap::new(),
            conversation_index: HashMap::new(),
            partial_key_index: HashMap::new(),
            aliases: HashMap::new(),
            main_agent_id: None,
            active_agent_id: None,
            main_system_prompt_hash: None,
            completed_agent_count: 0,
            claims: ClaimRegistry::new(),
            change_tx,
        }
    }

    /// Subscribe to tree mutations. The returned guard's `changed()` values
    /// carry no payload; subscribers re-read whatever slice of state they
    /// need. Dropping the guard unsubscribes (bounded-fanout multicast with
    /// a disposable handle, spec.md §9).
    pub fn subscribe(&self) -> AgentTreeSubscription {
        AgentTreeSubscription(self.change_tx.subscribe())
    }

    fn notify_changed(&self) {
        let _ = self.change_tx.send(());
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn main_agent_id(&self) -> Option<&str> {
        self.main_agent_id.as_deref()
    }

    pub fn active_agent_id(&self) -> Option<&str> {
        self.active_agent_id.as_deref()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn pending_claim_count(&self) -> usize {
        self.claims.pending_claim_count()
    }

    /// Drop claims older than [`agentlens_claims::CLAIM_EXPIRY`], independent
    /// of [`AgentTree::age_agents`]. Meant to be driven by its own 10s
    /// `tokio::time::interval` (spec.md §5), separate from the 2s agent-aging
    /// sweep — pending claims should expire even during a long stretch with
    /// no completions to otherwise trigger `age_agents`.
    pub fn sweep_expired_claims(&mut self, now: Instant) -> usize {
        self.claims.sweep_expired(now)
    }

    fn canonical_id(&self, request_id: &str) -> Option<String> {
        if self.agents.contains_key(request_id) {
            return Some(request_id.to_string());
        }
        self.aliases.get(request_id).cloned()
    }

    fn upsert_partial_key(&mut self, system_prompt_hash: Option<Sha16>, first_user_message_hash: Option<Sha16>, id: &str) {
        if let (Some(sp), Some(fu)) = (system_prompt_hash, first_user_message_hash) {
            self.partial_key_index.insert(agentlens_hash::partial_key(sp, fu), id.to_string());
        }
    }

    /// Decision order is part of the contract: reordering these steps changes
    /// which agent a given request resumes or creates.
    pub fn start_agent(&mut self, req: StartAgentRequest, now: Instant, now_ms: u64) -> String {
        let partial_key = match (req.system_prompt_hash, req.first_user_message_hash) {
            (Some(sp), Some(fu)) => Some(agentlens_hash::partial_key(sp, fu)),
            _ => None,
        };

        // Step 2: a pending claim always wins over a partial-key resume — a
        // parent may have injected a summary that makes its own next turn
        // look identical to a sub-agent's first turn.
        if self.claims.pending_claim_count() > 0 {
            if let Some(agent_type_hash) = req.agent_type_hash {
                let preliminary_name = match (req.system_prompt_hash, self.main_system_prompt_hash) {
                    (Some(sp), Some(main_sp)) if sp != main_sp => "sub".to_string(),
                    _ => req
                        .preliminary_name_hint
                        .clone()
                        .or_else(|| req.model_id.clone())
                        .unwrap_or_else(|| "agent".to_string()),
                };
                if let Some(matched) = self.claims.match_claim(&preliminary_name, agent_type_hash, now) {
                    let id = req.request_id.clone();
                    let mut agent = Agent::new(id.clone(), matched.expected_child_name, now_ms);
                    agent.is_main = false;
                    agent.parent_conversation_hash = Some(matched.parent_identifier);
                    agent.max_input_tokens = req.max_tokens;
                    agent.model_id = req.model_id;
                    agent.estimated_input_tokens = req.estimated_tokens;
                    agent.system_prompt_hash = req.system_prompt_hash;
                    agent.agent_type_hash = Some(agent_type_hash);
                    agent.first_user_message_hash = req.first_user_message_hash;
                    self.upsert_partial_key(req.system_prompt_hash, req.first_user_message_hash, &id);
                    self.agents.insert(id.clone(), agent);
                    self.active_agent_id = Some(id.clone());
                    self.notify_changed();
                    return id;
                }
            }
        }

        // Step 3: resume an agent already tracked under this partial key.
        if let Some(pk) = &partial_key {
            if let Some(canonical_id) = self.partial_key_index.get(pk).cloned() {
                self.resume(&canonical_id, &req, now_ms);
                self.notify_changed();
                return canonical_id;
            }
        }

        // Step 4: brand-new agent, or the main agent continuing under a
        // drifted system-prompt hash (host-side summary injection).
        if self.main_agent_id.is_none() {
            let id = req.request_id.clone();
            let name = req.model_id.clone().unwrap_or_else(|| "agent".to_string());
            let mut agent = Agent::new(id.clone(), name, now_ms);
            agent.is_main = true;
            agent.max_input_tokens = req.max_tokens;
            agent.model_id = req.model_id.clone();
            agent.estimated_input_tokens = req.estimated_tokens;
            agent.system_prompt_hash = req.system_prompt_hash;
            agent.agent_type_hash = req.agent_type_hash;
            agent.first_user_message_hash = req.first_user_message_hash;
            self.main_agent_id = Some(id.clone());
            self.main_system_prompt_hash = req.system_prompt_hash;
            self.upsert_partial_key(req.system_prompt_hash, req.first_user_message_hash, &id);
            self.agents.insert(id.clone(), agent);
            self.active_agent_id = Some(id.clone());
            self.notify_changed();
            return id;
        }

        if let Some(sp) = req.system_prompt_hash {
            // The tree already has exactly one main; this request continues
            // it even if the system prompt drifted (host-injected summary).
            if self.main_system_prompt_hash != Some(sp) {
                self.main_system_prompt_hash = Some(sp);
            }
            let main_id = self.main_agent_id.clone().expect("checked above");
            self.resume(&main_id, &req, now_ms);
            self.notify_changed();
            return main_id;
        }

        // No identifying hash at all: an anonymous, unresumable sub-agent.
        let id = req.request_id.clone();
        let mut agent = Agent::new(id.clone(), "sub", now_ms);
        agent.is_main = false;
        agent.max_input_tokens = req.max_tokens;
        agent.model_id = req.model_id;
        agent.estimated_input_tokens = req.estimated_tokens;
        self.agents.insert(id.clone(), agent);
        self.active_agent_id = Some(id.clone());
        self.notify_changed();
        id
    }

    /// Resume `canonical_id` under a (possibly aliased) incoming request:
    /// refresh the per-request fields but never the cumulative counters.
    fn resume(&mut self, canonical_id: &str, req: &StartAgentRequest, now_ms: u64) {
        if req.request_id != canonical_id {
            self.aliases.insert(req.request_id.clone(), canonical_id.to_string());
        }
        if let Some(agent) = self.agents.get_mut(canonical_id) {
            agent.status = AgentStatus::Streaming;
            agent.estimated_input_tokens = req.estimated_tokens.or(agent.estimated_input_tokens);
            agent.model_id = req.model_id.clone().or_else(|| agent.model_id.clone());
            agent.max_input_tokens = req.max_tokens.or(agent.max_input_tokens);
            agent.system_prompt_hash = req.system_prompt_hash.or(agent.system_prompt_hash);
            agent.agent_type_hash = req.agent_type_hash.or(agent.agent_type_hash);
            agent.first_user_message_hash = req.first_user_message_hash.or(agent.first_user_message_hash);
            agent.last_update_time = now_ms;
        }
        self.upsert_partial_key(req.system_prompt_hash, req.first_user_message_hash, canonical_id);
        self.active_agent_id = Some(canonical_id.to_string());
    }

    /// `parentConversationHash == identifier` for any agent whose identity we
    /// know, walking either the conversation hash or the agent-type hash.
    fn has_live_child(&self, agent: &Agent) -> bool {
        self.agents.values().any(|other| {
            if std::ptr::eq(other, agent) {
                return false;
            }
            match other.parent_conversation_hash {
                Some(parent) => Some(parent) == agent.conversation_hash || Some(parent) == agent.agent_type_hash,
                None => false,
            }
        })
    }

    fn is_claimed_as_parent(&self, agent: &Agent) -> bool {
        self.claims
            .claims()
            .iter()
            .any(|c| Some(c.parent_identifier) == agent.conversation_hash || Some(c.parent_identifier) == agent.agent_type_hash)
    }

    pub fn complete_agent(
        &mut self,
        request_id: &str,
        usage: TurnUsage,
        first_assistant_response_text: Option<&str>,
        context_management: Option<ContextManagement>,
        now: Instant,
        now_ms: u64,
    ) {
        let Some(canonical_id) = self.canonical_id(request_id) else {
            warn!(request_id, "completeAgent: no agent found for request id");
            return;
        };

        let mut reconcile: Option<(Sha16, Sha16)> = None;
        if let Some(agent) = self.agents.get_mut(&canonical_id) {
            agent.input_tokens = usage.input_tokens;
            agent.output_tokens = usage.output_tokens;
            agent.max_observed_input_tokens = agent.max_observed_input_tokens.max(usage.input_tokens);
            agent.total_output_tokens += usage.output_tokens;
            agent.turn_count += 1;
            agent.status = AgentStatus::Complete;
            agent.completion_order = Some(self.completed_agent_count);
            agent.estimated_input_tokens = None;
            agent.last_update_time = now_ms;
            if context_management.is_some() {
                agent.context_management = context_management;
            }

            if agent.conversation_hash.is_none() {
                if let (Some(agent_type_hash), Some(first_user), Some(first_assistant)) =
                    (agent.agent_type_hash, agent.first_user_message_hash, first_assistant_response_text)
                {
                    let first_assistant_hash = agentlens_hash::first_assistant_response_hash(first_assistant);
                    let conversation_hash = agentlens_hash::conversation_hash(agent_type_hash, first_user, first_assistant_hash);
                    agent.conversation_hash = Some(conversation_hash);
                    reconcile = Some((agent_type_hash, conversation_hash));
                }
            }
        }
        self.completed_agent_count += 1;

        if let Some((agent_type_hash, conversation_hash)) = reconcile {
            self.conversation_index.insert(conversation_hash, canonical_id.clone());
            self.reconcile_provisional_children(agent_type_hash, conversation_hash);
        }

        if self.active_agent_id.as_deref() == Some(canonical_id.as_str()) {
            self.active_agent_id = None;
        }
        self.aliases.remove(request_id);

        self.age_agents(now);
        self.notify_changed();
    }

    /// Every live agent provisionally parented to `agent_type_hash` (the
    /// parent's identity before its conversation hash was known) is rewritten
    /// to the real `conversation_hash`.
    fn reconcile_provisional_children(&mut self, agent_type_hash: Sha16, conversation_hash: Sha16) {
        for agent in self.agents.values_mut() {
            if agent.parent_conversation_hash == Some(agent_type_hash) {
                agent.parent_conversation_hash = Some(conversation_hash);
            }
        }
    }

    pub fn error_agent(&mut self, request_id: &str, now: Instant, now_ms: u64) {
        let Some(canonical_id) = self.canonical_id(request_id) else {
            warn!(request_id, "errorAgent: no agent found for request id");
            return;
        };
        if let Some(agent) = self.agents.get_mut(&canonical_id) {
            agent.status = AgentStatus::Error;
            agent.estimated_input_tokens = None;
            agent.last_update_time = now_ms;
        }
        if self.active_agent_id.as_deref() == Some(canonical_id.as_str()) {
            self.active_agent_id = None;
        }
        self.aliases.remove(request_id);
        self.age_agents(now);
        self.notify_changed();
    }

    pub fn create_child_claim(&mut self, parent_request_id: &str, expected_child_name: impl Into<String>, now: Instant) -> anyhow::Result<()> {
        let canonical_id = self
            .canonical_id(parent_request_id)
            .ok_or_else(|| anyhow::anyhow!("createChildClaim: unknown parent request id {parent_request_id}"))?;
        let parent = self
            .agents
            .get(&canonical_id)
            .ok_or_else(|| anyhow::anyhow!("createChildClaim: parent agent vanished"))?;
        let parent_agent_type_hash = parent
            .agent_type_hash
            .ok_or_else(|| anyhow::anyhow!("createChildClaim: parent has no agentTypeHash yet"))?;
        let parent_identifier = parent.conversation_hash.unwrap_or(parent_agent_type_hash);
        self.claims.create_claim(parent_identifier, parent_agent_type_hash, expected_child_name, None, now);
        Ok(())
    }

    /// Called after every completion and on a periodic sweep. Never touches
    /// the main agent or any streaming agent.
    pub fn age_agents(&mut self, now: Instant) {
        self.claims.sweep_expired(now);

        let mut to_remove = Vec::new();
        let mut to_dim = Vec::new();
        for agent in self.agents.values() {
            if agent.is_main || agent.status == AgentStatus::Streaming {
                continue;
            }
            let Some(completion_order) = agent.completion_order else {
                continue;
            };
            if self.has_live_child(agent) || self.is_claimed_as_parent(agent) {
                continue;
            }
            let age = self.completed_agent_count.saturating_sub(completion_order).saturating_sub(1);
            if age >= 5 {
                to_remove.push(agent.id.clone());
            } else if age >= 2 && !agent.dimmed {
                to_dim.push(agent.id.clone());
            }
        }

        for id in to_dim {
            if let Some(agent) = self.agents.get_mut(&id) {
                agent.dimmed = true;
            }
        }

        for id in to_remove {
            self.remove_agent(&id);
        }
    }

    fn remove_agent(&mut self, id: &str) {
        let Some(agent) = self.agents.remove(id) else { return };
        self.partial_key_index.retain(|_, v| v != id);
        self.aliases.retain(|_, v| v != id);
        if let Some(conversation_hash) = agent.conversation_hash {
            self.conversation_index.remove(&conversation_hash);
        }
        if self.main_agent_id.as_deref() == Some(id) {
            self.main_agent_id = None;
        }
        if self.active_agent_id.as_deref() == Some(id) {
            self.active_agent_id = None;
        }
    }

    pub fn create_diagnostic_dump(&self) -> DiagnosticDump {
        let mut agents: Vec<Agent> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));

        let pending_claims = self
            .claims
            .claims()
            .iter()
            .map(|c| ClaimSnapshot {
                parent_identifier: c.parent_identifier.as_hex(),
                expected_child_name: c.expected_child_name.clone(),
                expected_child_agent_type_hash: c.expected_child_agent_type_hash.map(|h| h.as_hex()),
            })
            .collect();

        let invariant_violations = self.check_invariants();

        DiagnosticDump {
            agents,
            partial_key_index: self.partial_key_index.clone(),
            pending_claims,
            main_agent_id: self.main_agent_id.clone(),
            active_agent_id: self.active_agent_id.clone(),
            invariant_violations,
        }
    }

    fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let main_count = self.agents.values().filter(|a| a.is_main).count();
        if !self.agents.is_empty() && main_count != 1 {
            violations.push(format!("expected exactly 1 main agent, found {main_count}"));
        }
        for agent in self.agents.values() {
            if agent.parent_conversation_hash.is_some() && agent.is_main {
                violations.push(format!("main agent {} unexpectedly has a parentConversationHash", agent.id));
            }
        }
        violations
    }
}
