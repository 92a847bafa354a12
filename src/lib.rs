// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent observability core for a code-editor chat extension.
//!
//! A host embeds this crate to reconstruct the live agent/sub-agent tree
//! from opaque chat request traffic, estimate input-token budgets ahead of
//! a provider call, stream one chat turn through [`ChatSession`], and render
//! a status bar and tooltip over the result — all without the core itself
//! knowing about transport, credentials, or UI toolkits, which stay the
//! host's concern (spec.md §1, §9).
//!
//! [`AgentObservabilityCore`] is the one type most hosts construct directly;
//! everything else re-exported here is what it's built from.

mod core;
mod forensics;
mod persistence;

pub use crate::core::AgentObservabilityCore;
pub use forensics::{ForensicRecord, ForensicSink, HostEnvironment, MessageSummary, NullForensicSink, VecForensicSink};
pub use persistence::{
    EnrichmentCacheEntry, EnrichmentCacheRecord, InMemoryStore, ModelsCacheRecord, PersistentStore, SessionStatsRecord,
    ENRICHMENT_CACHE_KEY, LAST_SELECTED_MODEL_KEY, MODELS_CACHE_KEY, SESSION_STATS_KEY,
};

pub use agentlens_config as config;
pub use agentlens_estimator as estimator;
pub use agentlens_hash as hash;
pub use agentlens_model as model;
pub use agentlens_presenter as presenter;
pub use agentlens_session as session;
pub use agentlens_tree as tree;
