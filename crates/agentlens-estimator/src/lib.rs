// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod conversation_state;
mod estimator;
mod message_hash;
mod per_message_cache;

pub use conversation_state::{ConversationRecord, ConversationState, Lookup};
pub use estimator::{ConversationEstimate, EstimateSource, TokenEstimator};
pub use message_hash::{conversation_fingerprint, message_hash};
pub use per_message_cache::PerMessageTokenCache;
