// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! [`AgentObservabilityCore`] is the facade a host (the code-editor chat
//! extension) constructs once per process. It owns the single shared
//! [`AgentTree`] and [`TokenEstimator`] behind a `tokio::sync::Mutex`
//! (spec.md §5: single-owner mutation, matching the teacher's
//! single-owner-with-async-`Mutex` convention for `sven-core::agent::Agent`),
//! hands out per-request [`ChatSession`]s that share that state, and drives
//! the two background sweeps (claim expiry, agent aging) described in §5.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use agentlens_estimator::TokenEstimator;
use agentlens_model::GatewayClient;
use agentlens_presenter::StatusLine;
use agentlens_session::{ChatSession, CredentialProvider};
use agentlens_tree::{AgentTree, AgentTreeSubscription};

use crate::forensics::ForensicSink;
use crate::persistence::{PersistentStore, SessionStatsRecord};

const CLAIM_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_millis(10_000);
const AGENT_AGING_SWEEP_INTERVAL: Duration = Duration::from_millis(2_000);

/// The process-wide agent observability core.
///
/// Construct one per host process with [`AgentObservabilityCore::new`], hand
/// out [`ChatSession`]s with [`AgentObservabilityCore::session`] per chat
/// request, and call [`AgentObservabilityCore::dispose`] (or simply drop it)
/// when the host extension deactivates — that cancels both background
/// sweeps via `JoinHandle::abort`.
pub struct AgentObservabilityCore {
    tree: Arc<Mutex<AgentTree>>,
    estimator: Arc<Mutex<TokenEstimator>>,
    store: Arc<dyn PersistentStore>,
    forensics: Arc<dyn ForensicSink>,
    sweep_handles: Vec<JoinHandle<()>>,
}

impl AgentObservabilityCore {
    pub fn new(store: Arc<dyn PersistentStore>, forensics: Arc<dyn ForensicSink>) -> Self {
        let tree = Arc::new(Mutex::new(AgentTree::new()));
        let estimator = Arc::new(Mutex::new(TokenEstimator::new()));
        let sweep_handles = spawn_sweeps(tree.clone());

        Self { tree, estimator, store, forensics, sweep_handles }
    }

    /// A [`ChatSession`] wired to this core's shared tree and estimator, for
    /// one request's gateway client and credential provider.
    pub fn session(&self, gateway: Arc<dyn GatewayClient>, credentials: Arc<dyn CredentialProvider>) -> ChatSession {
        ChatSession::new(self.tree.clone(), self.estimator.clone(), gateway, credentials)
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    pub fn forensics(&self) -> &Arc<dyn ForensicSink> {
        &self.forensics
    }

    /// The status bar's one-line text, or `None` before the first agent
    /// starts.
    pub async fn status(&self) -> Option<StatusLine> {
        let tree = self.tree.lock().await;
        agentlens_presenter::render_status(&tree)
    }

    /// The tooltip text shown alongside the status bar.
    pub async fn tooltip(&self) -> String {
        let tree = self.tree.lock().await;
        agentlens_presenter::render_tooltip(&tree)
    }

    /// Subscribe to tree mutations, to re-render the status bar on change.
    pub async fn subscribe(&self) -> AgentTreeSubscription {
        self.tree.lock().await.subscribe()
    }

    /// A snapshot of the session-stats record the host persists under
    /// [`crate::persistence::SESSION_STATS_KEY`].
    pub async fn session_stats(&self, now_ms: u64) -> SessionStatsRecord {
        let tree = self.tree.lock().await;
        let mut agent_count = 0u64;
        let mut main_agent_turns = 0u32;
        let mut max_observed_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        let mut model_id = None;
        for agent in tree.agents() {
            agent_count += 1;
            max_observed_input_tokens = max_observed_input_tokens.max(agent.max_observed_input_tokens);
            total_output_tokens += agent.total_output_tokens;
            if agent.is_main {
                main_agent_turns = agent.turn_count;
                model_id = agent.model_id.clone();
            }
        }
        SessionStatsRecord {
            timestamp: now_ms,
            agent_count,
            main_agent_turns,
            max_observed_input_tokens,
            total_output_tokens,
            model_id,
        }
    }

    /// Cancel both background sweeps. Idempotent; also run on `Drop`.
    pub fn dispose(&mut self) {
        for handle in self.sweep_handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for AgentObservabilityCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_sweeps(tree: Arc<Mutex<AgentTree>>) -> Vec<JoinHandle<()>> {
    let claim_tree = tree.clone();
    let claim_expiry_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLAIM_EXPIRY_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            claim_tree.lock().await.sweep_expired_claims(Instant::now());
        }
    });

    let aging_tree = tree;
    let agent_aging_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AGENT_AGING_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            aging_tree.lock().await.age_agents(Instant::now());
        }
    });

    vec![claim_expiry_task, agent_aging_task]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forensics::NullForensicSink;
    use crate::persistence::InMemoryStore;

    fn core() -> AgentObservabilityCore {
        AgentObservabilityCore::new(Arc::new(InMemoryStore::new()), Arc::new(NullForensicSink))
    }

    #[tokio::test]
    async fn status_is_none_before_any_agent_starts() {
        let core = core();
        assert!(core.status().await.is_none());
    }

    #[tokio::test]
    async fn dispose_aborts_background_sweeps() {
        let mut core = core();
        assert_eq!(core.sweep_handles.len(), 2);
        core.dispose();
        assert!(core.sweep_handles.is_empty());
    }

    #[tokio::test]
    async fn session_stats_reflect_an_empty_tree() {
        let core = core();
        let stats = core.session_stats(1_000).await;
        assert_eq!(stats.agent_count, 0);
        assert_eq!(stats.timestamp, 1_000);
        assert_eq!(stats.model_id, None);
    }
}
