// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{
    catalog::{InputModality, ModelCatalogEntry},
    chunk::GatewayChunk,
    types::ChatRequest,
};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<GatewayChunk>> + Send>>;

/// The host-provided model backend a [`ChatSession`](../agentlens_session)
/// drives a turn against.
///
/// The observability core never implements this trait itself against a real
/// model API; the host supplies one (talking to whatever upstream gateway it
/// already has a client for) and hands it to the session layer. Tests use
/// [`crate::mock::MockGatewayClient`].
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Identifier of the gateway/provider this client talks to, used only
    /// for diagnostics (e.g. `"openai"`, `"anthropic"`).
    fn name(&self) -> &str;

    /// Stream a chat completion for `request`.
    async fn stream_chat(&self, request: ChatRequest) -> anyhow::Result<ChunkStream>;

    /// List models this client can serve.
    ///
    /// The default implementation filters the bundled static catalog by
    /// `self.name()`; override to perform a live query.
    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let provider = self.name();
        Ok(crate::catalog::static_catalog().into_iter().filter(|e| e.provider == provider).collect())
    }

    /// Context window size for `model_id`, read from the static catalog.
    fn catalog_context_window(&self, model_id: &str) -> Option<u32> {
        crate::catalog::lookup(self.name(), model_id).map(|e| e.context_window)
    }

    /// Maximum output tokens for `model_id`, read from the static catalog.
    fn catalog_max_output_tokens(&self, model_id: &str) -> Option<u32> {
        crate::catalog::lookup(self.name(), model_id).map(|e| e.max_output_tokens)
    }

    /// Returns `true` if `model_id` supports image input, conservatively
    /// `false` when the model is not in the catalog.
    fn supports_images(&self, model_id: &str) -> bool {
        crate::catalog::lookup(self.name(), model_id)
            .map(|e| e.input_modalities.contains(&InputModality::Image))
            .unwrap_or(false)
    }
}
