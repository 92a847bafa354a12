// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod tree;

pub use agent::{Agent, AgentStatus, ContextManagement};
pub use tree::{AgentTree, AgentTreeSubscription, ClaimSnapshot, DiagnosticDump, StartAgentRequest, TurnUsage};
