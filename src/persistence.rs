// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The host-supplied persisted-state layout (spec.md §6).
//!
//! The core never touches disk itself: it reads and writes through
//! [`PersistentStore`], a single opaque key-value boundary the host (the
//! code-editor extension) implements over whatever storage API it already
//! has. Only the keys and value shapes are defined here.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentlens_model::ModelCatalogEntry;

pub const LAST_SELECTED_MODEL_KEY: &str = "vercelAiGateway.lastSelectedModel";
pub const MODELS_CACHE_KEY: &str = "vercelAiGateway.modelsCache";
pub const ENRICHMENT_CACHE_KEY: &str = "vercelAiGateway.enrichmentCache";
pub const SESSION_STATS_KEY: &str = "vercelAiGateway.sessionStats";

/// A single opaque key-value store provided by the host. No key namespacing
/// or TTL policy is implemented here: those are entirely the host's concern.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// `vercelAiGateway.modelsCache`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsCacheRecord {
    pub fetched_at: u64,
    pub etag: Option<String>,
    pub raw_models: Vec<Value>,
    pub models: Vec<ModelCatalogEntry>,
}

/// One entry of `vercelAiGateway.enrichmentCache.entries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentCacheEntry {
    pub fetched_at: u64,
    pub data: Value,
}

/// `vercelAiGateway.enrichmentCache`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentCacheRecord {
    pub version: u8,
    pub entries: HashMap<String, EnrichmentCacheEntry>,
}

impl EnrichmentCacheRecord {
    pub fn new() -> Self {
        Self { version: 1, entries: HashMap::new() }
    }
}

/// The session-stats record (spec.md §6, unnamed key — stored under
/// [`SESSION_STATS_KEY`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsRecord {
    pub timestamp: u64,
    pub agent_count: u64,
    pub main_agent_turns: u32,
    pub max_observed_input_tokens: u64,
    pub total_output_tokens: u64,
    pub model_id: Option<String>,
}

/// An in-memory [`PersistentStore`] test double.
#[derive(Default)]
pub struct InMemoryStore {
    entries: std::sync::Mutex<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.lock().expect("in-memory store mutex poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.lock().expect("in-memory store mutex poisoned").insert(key.to_string(), value);
        Ok(())
    }
}
