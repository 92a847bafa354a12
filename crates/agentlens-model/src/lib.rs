// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-level message, chunk, and gateway-client types shared by the agent
//! observability core.
//!
//! This crate carries no network code of its own: hosts supply their own
//! [`GatewayClient`] implementation talking to whichever upstream gateway
//! they already integrate with, and the core only defines the shapes that
//! cross that boundary.

pub mod catalog;
pub mod chunk;
pub mod mock;
pub mod provider;
pub mod types;

pub use catalog::{parse_model_id, InputModality, ModelCatalogEntry, ParsedModelId};
pub use chunk::GatewayChunk;
pub use mock::MockGatewayClient;
pub use provider::{ChunkStream, GatewayClient};
pub use types::{ChatRequest, ContentPart, FunctionCall, Message, MessageContent, Role, ToolSchema, Usage};
