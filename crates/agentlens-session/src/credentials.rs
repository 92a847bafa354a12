// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Credential acquisition is an external collaborator (spec.md §1
//! non-goals: "Authentication with the gateway, credential storage"). This
//! module only defines the hook point [`ChatSession::run`] calls before
//! opening a transport: the host supplies the real implementation.

use async_trait::async_trait;

/// An opaque bearer credential the host hands to its own [`agentlens_model::GatewayClient`]
/// implementation. The core never inspects the contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials(pub String);

/// Host-supplied credential source. Returns `None` when no credentials are
/// currently available, which fails the session with
/// [`crate::SessionError::AuthUnavailable`] before any transport call is made.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Option<Credentials>;
}

/// A provider that always returns the same credentials. Useful for tests
/// and for hosts with a single static token.
pub struct StaticCredentialProvider(pub Option<Credentials>);

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self) -> Option<Credentials> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_configured_value() {
        let present = StaticCredentialProvider(Some(Credentials("tok".into())));
        assert_eq!(present.credentials().await, Some(Credentials("tok".into())));

        let absent = StaticCredentialProvider(None);
        assert_eq!(absent.credentials().await, None);
    }
}
