// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Short-lived claims a parent agent records when it invokes a sub-agent
//! tool, later matched against the next incoming request that cannot be
//! resumed from an existing conversation.
//!
//! The registry itself does not own a timer: `sweep_expired` is driven by
//! whatever owns it (`AgentTree`, in turn driven by the facade's periodic
//! task), so the registry stays a plain, deterministically testable struct.

use std::time::{Duration, Instant};

use agentlens_hash::Sha16;

/// Claims older than this are never matched.
pub const CLAIM_EXPIRY: Duration = Duration::from_millis(90_000);

/// A pending expectation that the next unresumed request will be the named
/// sub-agent.
#[derive(Debug, Clone)]
pub struct ClaimRecord {
    /// The parent's conversation hash, or its agent-type hash when the
    /// conversation hash isn't known yet (provisional — see
    /// [`ClaimRegistry::create_claim`]).
    pub parent_identifier: Sha16,
    pub parent_agent_type_hash: Sha16,
    pub expected_child_name: String,
    pub expected_child_agent_type_hash: Option<Sha16>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl ClaimRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn matches(&self, candidate_name: &str, candidate_agent_type_hash: Sha16) -> bool {
        self.expected_child_name == candidate_name
            || self.expected_child_agent_type_hash == Some(candidate_agent_type_hash)
    }
}

/// The result of a successful [`ClaimRegistry::match_claim`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedClaim {
    pub parent_identifier: Sha16,
    pub expected_child_name: String,
}

/// FIFO registry of pending parent→child claims.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    claims: Vec<ClaimRecord>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new claim. `parent_identifier` is the parent's conversation
    /// hash if known, otherwise its agent-type hash (provisional — gets
    /// reconciled later by `AgentTree::complete_agent`).
    pub fn create_claim(
        &mut self,
        parent_identifier: Sha16,
        parent_agent_type_hash: Sha16,
        expected_child_name: impl Into<String>,
        expected_child_agent_type_hash: Option<Sha16>,
        created_at: Instant,
    ) {
        self.claims.push(ClaimRecord {
            parent_identifier,
            parent_agent_type_hash,
            expected_child_name: expected_child_name.into(),
            expected_child_agent_type_hash,
            created_at,
            expires_at: created_at + CLAIM_EXPIRY,
        });
    }

    /// Find and remove the oldest non-expired claim matching `candidate_name`
    /// (case-sensitive) or `candidate_agent_type_hash`.
    ///
    /// When a claim matches both, it still only counts once; among several
    /// matching claims the first created wins (FIFO).
    pub fn match_claim(
        &mut self,
        candidate_name: &str,
        candidate_agent_type_hash: Sha16,
        now: Instant,
    ) -> Option<MatchedClaim> {
        let idx = self
            .claims
            .iter()
            .position(|c| !c.is_expired(now) && c.matches(candidate_name, candidate_agent_type_hash))?;
        let claim = self.claims.remove(idx);
        Some(MatchedClaim {
            parent_identifier: claim.parent_identifier,
            expected_child_name: claim.expected_child_name,
        })
    }

    /// Number of claims currently held, expired or not.
    ///
    /// Callers that need "pending and still valid" should `sweep_expired`
    /// first; `AgentTree::start_agent` relies on this raw count only to
    /// decide whether attempting a match is worthwhile at all.
    pub fn pending_claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Read-only view of all held claims, in FIFO order.
    pub fn claims(&self) -> &[ClaimRecord] {
        &self.claims
    }

    /// Drop every claim.
    pub fn clear_all(&mut self) {
        self.claims.clear();
    }

    /// Remove every claim with `expires_at < now`. Returns the number removed.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.claims.len();
        self.claims.retain(|c| !c.is_expired(now));
        before - self.claims.len()
    }

    /// Release all held state. Idempotent; the registry has no background
    /// task of its own, so this is equivalent to `clear_all`.
    pub fn dispose(&mut self) {
        self.clear_all();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> Sha16 {
        Sha16::of(s)
    }

    #[test]
    fn match_by_name_removes_claim() {
        let now = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("parent-ch"), hash("parent-at"), "recon", None, now);
        assert_eq!(reg.pending_claim_count(), 1);

        let matched = reg.match_claim("recon", hash("child-at"), now).unwrap();
        assert_eq!(matched.expected_child_name, "recon");
        assert_eq!(matched.parent_identifier, hash("parent-ch"));
        assert_eq!(reg.pending_claim_count(), 0);
    }

    #[test]
    fn match_by_agent_type_hash_when_name_absent() {
        let now = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("parent"), hash("parent-at"), "sub", Some(hash("child-at")), now);

        let matched = reg.match_claim("totally-different-name", hash("child-at"), now).unwrap();
        assert_eq!(matched.expected_child_name, "sub");
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let now = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("p"), hash("pat"), "Recon", None, now);
        assert!(reg.match_claim("recon", hash("x"), now).is_none());
    }

    #[test]
    fn no_match_leaves_claims_untouched() {
        let now = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("p"), hash("pat"), "recon", None, now);
        assert!(reg.match_claim("other", hash("nope"), now).is_none());
        assert_eq!(reg.pending_claim_count(), 1);
    }

    /// Invariant 4: two claims with the same expected name are matched in
    /// creation order.
    #[test]
    fn fifo_claim_matching() {
        let t0 = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("p1"), hash("pat"), "recon", None, t0);
        reg.create_claim(hash("p2"), hash("pat"), "recon", None, t0 + Duration::from_millis(1));

        let first = reg.match_claim("recon", hash("x"), t0).unwrap();
        assert_eq!(first.parent_identifier, hash("p1"));

        let second = reg.match_claim("recon", hash("x"), t0).unwrap();
        assert_eq!(second.parent_identifier, hash("p2"));
    }

    /// Invariant 5: a claim older than 90,000ms never matches.
    #[test]
    fn claim_expiry() {
        let t0 = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("p"), hash("pat"), "recon", None, t0);

        let just_before = t0 + CLAIM_EXPIRY;
        assert!(reg.match_claim("recon", hash("x"), just_before).is_some());

        let mut reg2 = ClaimRegistry::new();
        reg2.create_claim(hash("p"), hash("pat"), "recon", None, t0);
        let just_after = t0 + CLAIM_EXPIRY + Duration::from_millis(1);
        assert!(reg2.match_claim("recon", hash("x"), just_after).is_none());
    }

    #[test]
    fn sweep_expired_removes_only_expired_claims() {
        let t0 = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("stale"), hash("pat"), "a", None, t0);
        reg.create_claim(hash("fresh"), hash("pat"), "b", None, t0 + Duration::from_millis(80_000));

        let removed = reg.sweep_expired(t0 + CLAIM_EXPIRY + Duration::from_millis(1));
        assert_eq!(removed, 1);
        assert_eq!(reg.pending_claim_count(), 1);
        assert_eq!(reg.claims()[0].expected_child_name, "b");
    }

    #[test]
    fn clear_all_drops_every_claim() {
        let now = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("p"), hash("pat"), "a", None, now);
        reg.create_claim(hash("p2"), hash("pat"), "b", None, now);
        reg.clear_all();
        assert_eq!(reg.pending_claim_count(), 0);
    }

    #[test]
    fn dispose_is_idempotent() {
        let now = Instant::now();
        let mut reg = ClaimRegistry::new();
        reg.create_claim(hash("p"), hash("pat"), "a", None, now);
        reg.dispose();
        reg.dispose();
        assert_eq!(reg.pending_claim_count(), 0);
    }
}
