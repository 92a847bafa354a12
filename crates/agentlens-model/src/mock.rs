// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! A scripted [`GatewayClient`] test double, standing in for a host's real
//! gateway integration in unit and integration tests.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    chunk::GatewayChunk,
    provider::{ChunkStream, GatewayClient},
    types::ChatRequest,
};

/// A [`GatewayClient`] that replays one pre-scripted chunk sequence per call,
/// cycling back to the first script once exhausted.
///
/// Each call to `stream_chat` pops the next script (or reuses the last one,
/// if only one was configured) and replays it verbatim over a channel, so
/// tests can assert on the exact sequence a [`ChatSession`](../agentlens_session)
/// observes without a real network round trip.
pub struct MockGatewayClient {
    name: String,
    scripts: Mutex<Vec<Vec<GatewayChunk>>>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl MockGatewayClient {
    /// A client that replays `script` for every call.
    pub fn scripted(script: Vec<GatewayChunk>) -> Self {
        Self {
            name: "mock".into(),
            scripts: Mutex::new(vec![script]),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client that replays a different script for each successive call,
    /// repeating the last one once all are consumed.
    pub fn with_scripts(scripts: Vec<Vec<GatewayChunk>>) -> Self {
        Self { name: "mock".into(), scripts: Mutex::new(scripts), calls: Mutex::new(Vec::new()) }
    }

    /// A client streaming a single final text response with no tool calls.
    pub fn replying(text: impl Into<String>) -> Self {
        Self::scripted(vec![
            GatewayChunk::TextDelta(text.into()),
            GatewayChunk::Finish {
                usage: crate::types::Usage { input_tokens: 0, output_tokens: 0 },
                applied_edits: vec![],
            },
        ])
    }

    /// Requests observed so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.calls.lock().expect("mock call log mutex poisoned").clone()
    }
}

#[async_trait]
impl GatewayClient for MockGatewayClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, request: ChatRequest) -> anyhow::Result<ChunkStream> {
        self.calls.lock().expect("mock call log mutex poisoned").push(request);

        let script = {
            let mut scripts = self.scripts.lock().expect("mock script mutex poisoned");
            if scripts.len() > 1 {
                scripts.remove(0)
            } else {
                scripts.first().cloned().unwrap_or_default()
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel(script.len().max(1));
        for chunk in script {
            tx.send(Ok(chunk)).await.ok();
        }
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
