// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! [`ChatSession`]: the per-request streaming controller described by
//! spec.md §4.6. One instance drives exactly one turn end-to-end: estimate,
//! start/resume an agent, open the gateway stream, translate chunks,
//! complete or error the agent, and resolve to exactly one
//! [`crate::SessionOutcome`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, Notify};

use agentlens_estimator::TokenEstimator;
use agentlens_hash::Sha16;
use agentlens_model::{ChatRequest, GatewayChunk, GatewayClient, Message, Role, ToolSchema, Usage};
use agentlens_tree::{AgentTree, ContextManagement, StartAgentRequest, TurnUsage};

use crate::credentials::CredentialProvider;
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionOutcome, UsageEvent};
use crate::too_long::parse_too_long;
use crate::tool_buffer::ToolCallBuffer;
use crate::translate::{flush_finish_buffer, translate};

/// A future the host supplies to trigger non-blocking background model
/// catalog enrichment (spec.md §4.6 step 6). The core spawns it and never
/// inspects its result; model catalog fetching itself stays a non-goal.
pub type EnrichmentFuture = BoxFuture<'static, ()>;

/// Cooperative cancellation signal. Cloning shares the same underlying
/// flag, matching the "host provides a cancellation token" language of
/// spec.md §5 — the host fires `cancel()` from wherever it handles the
/// user's stop action, and every clone observes it.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>, Arc<Notify>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
        self.1.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, otherwise waits for
    /// [`Self::cancel`].
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.1.notified().await;
    }
}

/// One turn's worth of input, independent of any particular gateway wire
/// format.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub request_id: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub model_id: String,
    pub max_tokens: Option<u64>,
    pub conversation_id: Option<String>,
    /// `true` if the host declared it can render thinking/reasoning parts.
    pub supports_thinking: bool,
    /// A host-supplied name hint (e.g. the tool name that invoked a
    /// sub-agent), forwarded to [`AgentTree::start_agent`] untouched.
    pub preliminary_name_hint: Option<String>,
    /// Hard timeout for the transport call. Defaults to
    /// [`agentlens_config::TIMEOUT_MS`] when unset.
    pub timeout_ms: Option<u64>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// First system-role message's text, if any.
fn extract_system_prompt(messages: &[Message]) -> Option<String> {
    messages.iter().find(|m| m.role == Role::System).and_then(|m| m.as_text()).map(str::to_string)
}

/// First user-role message's text, if any.
fn first_user_message_text(messages: &[Message]) -> Option<String> {
    messages.iter().find(|m| m.role == Role::User).and_then(|m| m.as_text()).map(str::to_string)
}

/// Per-request streaming chat controller.
///
/// Holds shared handles to the single [`AgentTree`] and [`TokenEstimator`]
/// instances the whole extension process owns (spec.md §5: both are
/// exclusively mutated through their own methods, serialized here by a
/// `tokio::sync::Mutex` around the whole structure, matching the teacher's
/// own single-owner-with-async-`Mutex` convention for shared agent state).
pub struct ChatSession {
    tree: Arc<Mutex<AgentTree>>,
    estimator: Arc<Mutex<TokenEstimator>>,
    gateway: Arc<dyn GatewayClient>,
    credentials: Arc<dyn CredentialProvider>,
    /// A second, deliberately global and untagged-by-model EMA correction
    /// factor (spec.md §9), independent of [`TokenEstimator`]'s per-family
    /// calibration map: kept because it measurably helps despite mixing
    /// models together, at the cost of being a weaker signal than the
    /// per-family one. A plain `std::sync::Mutex` is enough since every
    /// critical section here is a single float read-modify-write with no
    /// `.await` inside it.
    global_calibration: std::sync::Mutex<f64>,
}

impl ChatSession {
    pub fn new(
        tree: Arc<Mutex<AgentTree>>,
        estimator: Arc<Mutex<TokenEstimator>>,
        gateway: Arc<dyn GatewayClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self { tree, estimator, gateway, credentials, global_calibration: std::sync::Mutex::new(1.0) }
    }

    /// Current value of the global, untagged-by-model correction factor.
    pub fn global_calibration_factor(&self) -> f64 {
        *self.global_calibration.lock().expect("global calibration mutex poisoned")
    }

    fn update_global_calibration(&self, actual: u64, estimated: u64) {
        if estimated == 0 {
            return;
        }
        let sample = actual as f64 / estimated as f64;
        let mut factor = self.global_calibration.lock().expect("global calibration mutex poisoned");
        *factor = 0.7 * *factor + 0.3 * sample;
    }

    /// Create a claim for a sub-agent a parent agent's tool call just
    /// invoked (spec.md §4.5 `createChildClaim`). Exposed here because the
    /// host learns about the sub-agent invocation from the
    /// [`SessionEvent::ToolCall`] this same session just emitted — tool
    /// execution itself stays a non-goal, but recording the claim before
    /// dispatching the tool is this crate's business.
    pub async fn create_child_claim(&self, parent_request_id: &str, expected_child_name: impl Into<String>) -> anyhow::Result<()> {
        let mut tree = self.tree.lock().await;
        tree.create_child_claim(parent_request_id, expected_child_name, Instant::now())
    }

    /// Estimate total input tokens for `options` without starting an
    /// agent, used by hosts that want to warn before committing to a turn.
    pub async fn estimate_total_input_tokens(&self, options: &SessionOptions) -> u64 {
        let model_family = agentlens_model::parse_model_id(&options.model_id).family;
        let mut estimator = self.estimator.lock().await;
        let conversation = estimator.estimate_conversation(&options.messages, &model_family, options.conversation_id.as_deref());
        let tools_tokens = estimator.count_tools_tokens(&options.tools, &model_family);
        conversation.tokens + tools_tokens
    }

    /// Drive one full turn. Always resolves to a [`SessionOutcome`]; never
    /// propagates a Rust `Err` past this call (spec.md §7's propagation
    /// policy: at most one error text part, an agent status transition,
    /// nothing else reaches the host as an exception).
    pub async fn run(
        &self,
        options: SessionOptions,
        tx: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
        enrichment: Option<EnrichmentFuture>,
    ) -> SessionOutcome {
        let model_family = agentlens_model::parse_model_id(&options.model_id).family;
        let system_prompt_text = extract_system_prompt(&options.messages).unwrap_or_default();
        let system_prompt_hash = agentlens_hash::system_prompt_hash(&system_prompt_text);
        let tool_set_hash = agentlens_hash::tool_set_hash(options.tools.iter().map(|t| t.name.as_str()));
        let agent_type_hash = agentlens_hash::agent_type_hash(system_prompt_hash, tool_set_hash);
        let first_user_message_hash = first_user_message_text(&options.messages).map(|t| agentlens_hash::first_user_message_hash(&t));

        let estimated_total = {
            let mut estimator = self.estimator.lock().await;
            let conversation =
                estimator.estimate_conversation(&options.messages, &model_family, options.conversation_id.as_deref());
            let tools_tokens = estimator.count_tools_tokens(&options.tools, &model_family);
            let raw_total = conversation.tokens + tools_tokens;
            (raw_total as f64 * self.global_calibration_factor()).ceil() as u64
        };

        if let Some(max) = options.max_tokens {
            if max > 0 && estimated_total as f64 >= max as f64 * 0.9 {
                tracing::warn!(
                    request_id = %options.request_id,
                    estimated_total,
                    max,
                    "estimated input tokens are within 90% of the model's context window"
                );
            }
        }

        let now = Instant::now();
        let agent_id = {
            let mut tree = self.tree.lock().await;
            tree.start_agent(
                StartAgentRequest {
                    request_id: options.request_id.clone(),
                    estimated_tokens: Some(estimated_total),
                    max_tokens: options.max_tokens,
                    model_id: Some(options.model_id.clone()),
                    system_prompt_hash: Some(system_prompt_hash),
                    agent_type_hash: Some(agent_type_hash),
                    first_user_message_hash,
                    preliminary_name_hint: options.preliminary_name_hint.clone(),
                },
                now,
                now_ms(),
            )
        };

        if self.credentials.credentials().await.is_none() {
            self.error_agent(&agent_id).await;
            return SessionOutcome::Errored(SessionError::AuthUnavailable);
        }

        if let Some(fut) = enrichment {
            tokio::spawn(fut);
        }

        let chat_request = ChatRequest {
            messages: options.messages.clone(),
            tools: options.tools.clone(),
            model_id: options.model_id.clone(),
            conversation_id: options.conversation_id.clone(),
        };

        let timeout = Duration::from_millis(options.timeout_ms.unwrap_or(agentlens_config::TIMEOUT_MS));

        let stream_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(timeout, self.gateway.stream_chat(chat_request)) => Some(r),
        };

        let mut stream = match stream_result {
            None => {
                self.error_agent(&agent_id).await;
                return SessionOutcome::Cancelled;
            }
            Some(Err(_elapsed)) => {
                return self
                    .fail_transport(&agent_id, &options.messages, &model_family, "request timed out".to_string(), &tx, false)
                    .await;
            }
            Some(Ok(Err(e))) => {
                return self.fail_transport(&agent_id, &options.messages, &model_family, e.to_string(), &tx, false).await;
            }
            Some(Ok(Ok(s))) => s,
        };

        let mut buffer = ToolCallBuffer::new();
        let mut forwarded_any = false;
        let mut assistant_text = String::new();
        let mut final_usage: Option<Usage> = None;
        let mut applied_edits: Vec<String> = Vec::new();
        let mut cancelled = false;
        let mut finished = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    None
                }
                n = stream.next() => n,
            };
            if cancelled {
                buffer.clear();
                break;
            }
            let Some(item) = next else { break };

            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    return self
                        .fail_transport(&agent_id, &options.messages, &model_family, e.to_string(), &tx, forwarded_any)
                        .await;
                }
            };

            // An in-band error chunk ends the turn immediately rather than
            // being forwarded and left for the stream to (maybe) close on
            // its own — the provider does not promise a `finish`/`abort`
            // chunk after reporting an error.
            let chunk = match chunk {
                GatewayChunk::Error { message } => {
                    return self.fail_transport(&agent_id, &options.messages, &model_family, message, &tx, forwarded_any).await;
                }
                other => other,
            };

            match &chunk {
                GatewayChunk::TextDelta(text) => assistant_text.push_str(text),
                GatewayChunk::Finish { usage, applied_edits: edits } => {
                    final_usage = Some(*usage);
                    applied_edits = edits.clone();
                }
                _ => {}
            }

            let is_finish = matches!(chunk, GatewayChunk::Finish { .. });
            let is_abort = matches!(chunk, GatewayChunk::Abort);

            for event in translate(chunk, &mut buffer, options.supports_thinking) {
                forwarded_any = true;
                if tx.send(event).await.is_err() {
                    break;
                }
            }

            if is_finish {
                for event in flush_finish_buffer(&mut buffer) {
                    forwarded_any = true;
                    let _ = tx.send(event).await;
                }
                finished = true;
                break;
            }
            if is_abort {
                cancelled = true;
                break;
            }
        }

        if cancelled || !finished {
            self.error_agent(&agent_id).await;
            return SessionOutcome::Cancelled;
        }

        let usage = final_usage.unwrap_or_default();
        {
            let mut estimator = self.estimator.lock().await;
            // §4.7(c) gates caching of actuals on `totalUsage.inputTokens`
            // being present; a `finish` with no usage still clears the
            // "too long" bias per §4.7(b), just without recording a bogus
            // zero as ground truth.
            if usage.input_tokens > 0 {
                estimator.record_actual(
                    &options.messages,
                    &model_family,
                    usage.input_tokens,
                    options.conversation_id.as_deref(),
                    Instant::now(),
                );
                estimator.distribute_actual_tokens(&options.messages, &model_family, usage.input_tokens);
                estimator.update_calibration(&model_family, usage.input_tokens, estimated_total.max(1));
            } else {
                estimator.clear_bias();
            }
        }
        if usage.input_tokens > 0 {
            self.update_global_calibration(usage.input_tokens, estimated_total.max(1));
        }

        let context_management =
            if applied_edits.is_empty() { None } else { Some(ContextManagement { applied_edits: applied_edits.clone() }) };

        {
            let mut tree = self.tree.lock().await;
            tree.complete_agent(
                &agent_id,
                TurnUsage { input_tokens: usage.input_tokens, output_tokens: usage.output_tokens },
                Some(assistant_text.as_str()),
                context_management,
                Instant::now(),
                now_ms(),
            );
        }

        SessionOutcome::Completed(UsageEvent {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            max_input_tokens: options.max_tokens,
            model_id: Some(options.model_id.clone()),
            applied_edits,
        })
    }

    async fn error_agent(&self, agent_id: &str) {
        let mut tree = self.tree.lock().await;
        tree.error_agent(agent_id, Instant::now(), now_ms());
    }

    /// Handle a transport-level failure (network error, non-2xx, timeout).
    /// Recognizes a "too long" provider error and biases the estimator for
    /// the next attempt at the same conversation (spec.md §7).
    async fn fail_transport(
        &self,
        agent_id: &str,
        messages: &[Message],
        model_family: &str,
        message: String,
        tx: &mpsc::Sender<SessionEvent>,
        forwarded_any: bool,
    ) -> SessionOutcome {
        let error = match parse_too_long(&message) {
            Some(learned_total) => {
                let fingerprint = too_long_fingerprint(messages);
                let mut estimator = self.estimator.lock().await;
                estimator.mark_too_long(messages);
                SessionError::ModelTokenLimitExceeded { learned_total, fingerprint }
            }
            None => SessionError::Transport(message.clone()),
        };

        if !forwarded_any {
            let _ = tx.send(SessionEvent::Error(format!("\n\n**Error:** {message}\n\n"))).await;
        }

        self.error_agent(agent_id).await;
        SessionOutcome::Errored(error)
    }
}

fn too_long_fingerprint(messages: &[Message]) -> Sha16 {
    agentlens_estimator::conversation_fingerprint(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_model::{GatewayChunk, MockGatewayClient};

    use crate::credentials::{Credentials, StaticCredentialProvider};
    use crate::events::DataPayload;

    fn session(gateway: MockGatewayClient, credentials: Option<Credentials>) -> ChatSession {
        ChatSession::new(
            Arc::new(Mutex::new(AgentTree::new())),
            Arc::new(Mutex::new(TokenEstimator::new())),
            Arc::new(gateway),
            Arc::new(StaticCredentialProvider(credentials)),
        )
    }

    fn options(request_id: &str) -> SessionOptions {
        SessionOptions {
            request_id: request_id.to_string(),
            messages: vec![Message::system("you are helpful"), Message::user("hello")],
            tools: vec![],
            model_id: "mock:mock-model".into(),
            max_tokens: Some(200_000),
            conversation_id: None,
            supports_thinking: true,
            preliminary_name_hint: None,
            timeout_ms: Some(5_000),
        }
    }

    #[tokio::test]
    async fn successful_turn_completes_and_reports_usage() {
        let gateway = MockGatewayClient::scripted(vec![
            GatewayChunk::TextDelta("hi there".into()),
            GatewayChunk::Finish { usage: Usage { input_tokens: 42, output_tokens: 7 }, applied_edits: vec![] },
        ]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = session.run(options("r1"), tx, CancellationToken::new(), None).await;
        match outcome {
            SessionOutcome::Completed(usage) => {
                assert_eq!(usage.input_tokens, 42);
                assert_eq!(usage.output_tokens, 7);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(rx.recv().await, Some(SessionEvent::Text("hi there".into())));
    }

    /// A `finish` with no usage at all (`Usage::default()`) must not poison
    /// `ConversationState` with a bogus zero-token exact match — the next
    /// identical request should still fall back to a full estimate, not
    /// `Lookup::Exact { known_tokens: 0 }`.
    #[tokio::test]
    async fn finish_with_no_usage_does_not_record_a_zero_actual() {
        let gateway = MockGatewayClient::scripted(vec![
            GatewayChunk::TextDelta("hi".into()),
            GatewayChunk::Finish { usage: Usage::default(), applied_edits: vec![] },
        ]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, _rx) = mpsc::channel(16);

        let outcome = session.run(options("r1"), tx, CancellationToken::new(), None).await;
        assert!(matches!(outcome, SessionOutcome::Completed(_)));

        let mut estimator = session.estimator.lock().await;
        let messages = options("r1").messages;
        let result = estimator.estimate_conversation(&messages, "mock", None);
        assert_ne!(result.source, agentlens_estimator::EstimateSource::Exact, "zero-usage finish must not record ground truth");
        assert!(result.tokens > 0);
    }

    #[tokio::test]
    async fn missing_credentials_fails_before_transport() {
        let gateway = MockGatewayClient::replying("unused");
        let session = session(gateway, None);
        let (tx, _rx) = mpsc::channel(16);

        let outcome = session.run(options("r1"), tx, CancellationToken::new(), None).await;
        assert_eq!(outcome, SessionOutcome::Errored(SessionError::AuthUnavailable));
    }

    #[tokio::test]
    async fn cancellation_before_transport_reports_cancelled_not_error() {
        let gateway = MockGatewayClient::replying("unused");
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = session.run(options("r1"), tx, cancel, None).await;
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert!(rx.try_recv().is_err(), "no text should reach the host on cancellation");
    }

    #[tokio::test]
    async fn tool_call_streamed_in_deltas_emits_exactly_one_event() {
        let gateway = MockGatewayClient::scripted(vec![
            GatewayChunk::ToolCallStart { tool_call_id: "t".into(), name: "run".into() },
            GatewayChunk::ToolCallDelta { tool_call_id: "t".into(), arguments_delta: "{\"cmd\":\"".into() },
            GatewayChunk::ToolCallDelta { tool_call_id: "t".into(), arguments_delta: "ls\"}".into() },
            GatewayChunk::Finish { usage: Usage::default(), applied_edits: vec![] },
        ]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = session.run(options("r1"), tx, CancellationToken::new(), None).await;
        assert!(matches!(outcome, SessionOutcome::Completed(_)));

        let event = rx.recv().await.unwrap();
        match event {
            SessionEvent::ToolCall { name, args, .. } => {
                assert_eq!(name, "run");
                assert_eq!(args, serde_json::json!({"cmd": "ls"}));
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "exactly one tool-call event should be emitted");
    }

    #[tokio::test]
    async fn too_long_error_biases_next_estimate_for_same_conversation() {
        let gateway = MockGatewayClient::scripted(vec![GatewayChunk::Error {
            message: "prompt is too long: 210000 tokens > 200000 maximum".into(),
        }]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = session.run(options("r1"), tx.clone(), CancellationToken::new(), None).await;
        match outcome {
            SessionOutcome::Errored(SessionError::ModelTokenLimitExceeded { .. }) => {}
            other => panic!("expected ModelTokenLimitExceeded, got {other:?}"),
        }
        match rx.recv().await {
            Some(SessionEvent::Error(text)) => assert!(text.contains("too long")),
            other => panic!("expected a single error text part, got {other:?}"),
        }

        let is_biased = session.estimator.lock().await.is_biased(&options("r1").messages);
        assert!(is_biased);
    }

    #[tokio::test]
    async fn file_chunk_translates_through_the_full_run_loop() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let gateway = MockGatewayClient::scripted(vec![
            GatewayChunk::File { mime_type: "text/plain".into(), data: encoded },
            GatewayChunk::Finish { usage: Usage::default(), applied_edits: vec![] },
        ]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, mut rx) = mpsc::channel(16);

        session.run(options("r1"), tx, CancellationToken::new(), None).await;
        match rx.recv().await {
            Some(SessionEvent::Data { payload: DataPayload::Text(text), .. }) => assert_eq!(text, "hello"),
            other => panic!("expected a decoded text data part, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn applied_edits_surface_as_context_management_usage_event() {
        let gateway = MockGatewayClient::scripted(vec![GatewayChunk::Finish {
            usage: Usage { input_tokens: 10, output_tokens: 1 },
            applied_edits: vec!["dropped-tool-use-block".into()],
        }]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, _rx) = mpsc::channel(16);

        let outcome = session.run(options("r1"), tx, CancellationToken::new(), None).await;
        match outcome {
            SessionOutcome::Completed(usage) => assert_eq!(usage.applied_edits, vec!["dropped-tool-use-block".to_string()]),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn enrichment_future_is_spawned_without_blocking_the_turn() {
        let gateway = MockGatewayClient::replying("ok");
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, _rx) = mpsc::channel(16);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let enrichment: EnrichmentFuture = Box::pin(async move {
            fired2.store(true, Ordering::SeqCst);
        });

        session.run(options("r1"), tx, CancellationToken::new(), Some(enrichment)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn global_calibration_factor_drifts_toward_observed_ratio() {
        let gateway = MockGatewayClient::scripted(vec![
            GatewayChunk::TextDelta("hi".into()),
            GatewayChunk::Finish { usage: Usage { input_tokens: 1_000_000, output_tokens: 1 }, applied_edits: vec![] },
        ]);
        let session = session(gateway, Some(Credentials("tok".into())));
        let (tx, _rx) = mpsc::channel(16);

        assert_eq!(session.global_calibration_factor(), 1.0);
        session.run(options("r1"), tx, CancellationToken::new(), None).await;
        assert!(session.global_calibration_factor() > 1.0, "a far-larger-than-estimated actual should pull the factor up");
    }
}
