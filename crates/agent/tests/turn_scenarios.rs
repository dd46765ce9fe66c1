//! End-to-end tests of the turn loop and chat sessions.
//!
//! A scripted provider stands in for the model and records every request it
//! receives, so each test can assert both on the event stream and on what the
//! model was actually asked.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use triage_agent::compactor::SUMMARY_PREFIX;
use triage_agent::prompt::{SUMMARY_SYSTEM, SYNTHESIS_DIRECTIVE};
use triage_agent::publisher::{APOLOGY, STOPPED_SUFFIX};
use triage_agent::session::NO_RESPONSE;
use triage_agent::{ChatService, SendMessage, SessionError, TurnEvent, TurnRequest, TurnRunner, estimate_tokens};
use triage_config::{CompactionConfig, GuardrailConfig, ServicesConfig};
use triage_core::error::{ProviderError, StoreError, ToolError};
use triage_core::message::{Message, Role, ToolCallRequest};
use triage_core::organization::Organization;
use triage_core::provider::{ModelRequest, ModelResponse, Provider, StreamChunk, Usage};
use triage_core::service::{Service, TurnContext};
use triage_core::store::{CompactionRecord, ConversationRecord, ConversationStore, StoredMessage};
use triage_core::tool::{Tool, ToolRegistry};
use triage_store::InMemoryStore;
use triage_tools::TRUNCATION_MARKER;

// ── Scripted provider ────────────────────────────────────────────────────

/// Returns canned responses in order and records each request.
struct ScriptedProvider {
    responses: Mutex<Vec<Result<Message, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Message>) -> Arc<Self> {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    fn with_results(responses: Vec<Result<Message, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            panic!("ScriptedProvider exhausted after {} calls", self.requests.lock().unwrap().len());
        }
        let message = responses.remove(0)?;
        Ok(ModelResponse {
            message,
            stop_reason: Some("end_turn".into()),
            usage: Some(Usage { input_tokens: 10, output_tokens: 5 }),
            model: "scripted".into(),
        })
    }

    /// Text arrives in two deltas, tool calls on the closing chunk.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let response = self.complete(request).await?;
        let text = response.message.text();
        let mid = text.chars().count() / 2;
        let head: String = text.chars().take(mid).collect();
        let tail: String = text.chars().skip(mid).collect();

        let (tx, rx) = mpsc::channel(4);
        let _ = tx.send(Ok(StreamChunk { content: Some(head), ..Default::default() })).await;
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(tail),
                tool_calls: response.message.tool_calls,
                done: true,
                stop_reason: response.stop_reason,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

fn tool_call(id: &str, name: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, name, json!({"search": "checkout"}))
}

fn asks_for(text: &str, calls: Vec<ToolCallRequest>) -> Message {
    Message::assistant_with_tool_calls(text, calls)
}

// ── Test tools ───────────────────────────────────────────────────────────

/// Returns a fixed body of `len` characters.
struct FixedTool {
    name: &'static str,
    len: usize,
}

#[async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Returns a fixed body"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn invoke(&self, _ctx: &TurnContext, _args: serde_json::Value) -> Result<String, ToolError> {
        Ok("x".repeat(self.len))
    }
}

/// Blocks until released, so a test can act while the call is in flight.
struct GatedTool {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        "gated"
    }
    fn description(&self) -> &str {
        "Waits for the test to release it"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _ctx: &TurnContext, _args: serde_json::Value) -> Result<String, ToolError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok("{\"rows\": 3}".into())
    }
}

fn organization() -> Organization {
    Organization { id: "org-1".into(), name: "Acme".into(), ..Default::default() }
}

fn runner(provider: Arc<ScriptedProvider>, registry: ToolRegistry, guardrails: GuardrailConfig) -> TurnRunner {
    TurnRunner::new(provider, Arc::new(registry), guardrails, ServicesConfig::default())
        .with_context_builder(Arc::new(|_org| Ok(TurnContext::new())))
}

fn fixed_registry(len: usize) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(FixedTool { name: "logs_search", len }))
        .with(Arc::new(FixedTool { name: "metrics_query", len }))
}

async fn collect(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn terminal_count(events: &[TurnEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

fn final_stats(events: &[TurnEvent]) -> triage_agent::TurnStats {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            TurnEvent::Stats(s) if s.r#final => Some(s.clone()),
            _ => None,
        })
        .expect("final stats event")
}

fn done_content(events: &[TurnEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            TurnEvent::Done { content } => Some(content.clone()),
            _ => None,
        })
        .expect("done event")
}

fn tool_results(request: &ModelRequest) -> Vec<&Message> {
    request.messages.iter().filter(|m| m.role == Role::Tool).collect()
}

// ── Turn loop ────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_answer_streams_tokens_and_finishes() {
    let provider = ScriptedProvider::new(vec![Message::assistant("Checkout is healthy.")]);
    let runner = runner(provider.clone(), fixed_registry(10), GuardrailConfig::default());

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "is checkout ok?"))).await;

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Checkout is healthy.");
    assert_eq!(done_content(&events), "Checkout is healthy.");
    assert_eq!(terminal_count(&events), 1);
    assert!(events.last().unwrap().is_terminal());

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tools_bound());
}

#[tokio::test]
async fn two_call_budget_forces_synthesis_on_second_call() {
    let provider = ScriptedProvider::new(vec![
        asks_for("Looking at logs.", vec![tool_call("c1", "logs_search")]),
        Message::assistant("## Root cause\nA bad deploy."),
    ]);
    let guardrails = GuardrailConfig { max_ai_calls: 2, ..GuardrailConfig::default() };
    let runner = runner(provider.clone(), fixed_registry(10), guardrails);

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "why 500s?"))).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tools_bound());
    assert!(!requests[1].tools_bound());
    assert_eq!(requests[1].messages.last().unwrap().text(), SYNTHESIS_DIRECTIVE);

    assert_eq!(terminal_count(&events), 1);
    assert_eq!(done_content(&events), "## Root cause\nA bad deploy.");
    assert_eq!(final_stats(&events).ai_calls, 2);
    assert_eq!(final_stats(&events).tool_calls, 1);
}

#[tokio::test]
async fn reported_ai_calls_never_decrease_or_exceed_budget() {
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_search")]),
        asks_for("", vec![tool_call("c2", "logs_search")]),
        asks_for("", vec![tool_call("c3", "logs_search")]),
        Message::assistant("done"),
    ]);
    let guardrails = GuardrailConfig { max_ai_calls: 3, ..GuardrailConfig::default() };
    let runner = runner(provider.clone(), fixed_registry(10), guardrails);

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "q"))).await;

    let reported: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Stats(s) => Some(s.ai_calls),
            _ => None,
        })
        .collect();
    assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    assert!(reported.iter().all(|&n| n <= 3));
    // The third call has no tools bound, so its tool request is dropped.
    assert_eq!(provider.requests().len(), 3);
    assert_eq!(final_stats(&events).tool_calls, 2);
}

#[tokio::test]
async fn configuration_gap_is_fed_back_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_get_overview")]),
        Message::assistant("Logs Explorer is not set up; metrics look fine."),
    ]);
    let registry = triage_tools::default_registry(12_000);
    let runner = runner(provider.clone(), registry, GuardrailConfig::default());

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "check logs"))).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let results = tool_results(&requests[1]);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error);
    let payload: serde_json::Value = serde_json::from_str(&results[0].text()).unwrap();
    assert_eq!(payload["error"], "SERVICE_NOT_CONFIGURED");
    assert_eq!(payload["service"], Service::LogsExplorer.display_name());

    assert!(matches!(events.iter().find(|e| e.is_terminal()), Some(TurnEvent::Done { .. })));
    match events.iter().find(|e| matches!(e, TurnEvent::ToolEnd { .. })) {
        Some(TurnEvent::ToolEnd { is_error, .. }) => assert!(*is_error),
        other => panic!("expected tool_end, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_tool_result_is_truncated_exactly() {
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_search")]),
        Message::assistant("summary"),
    ]);
    let guardrails = GuardrailConfig { tool_response_max_chars: 100, ..GuardrailConfig::default() };
    let runner = runner(provider.clone(), fixed_registry(20_000), guardrails);

    collect(runner.run_turn(TurnRequest::new(organization(), "q"))).await;

    let requests = provider.requests();
    let result = tool_results(&requests[1])[0].text();
    assert_eq!(result, format!("{}{TRUNCATION_MARKER}", "x".repeat(100)));
}

#[tokio::test]
async fn token_budget_forces_synthesis_before_call_budget() {
    let request = TurnRequest::new(organization(), "q");
    let base = estimate_tokens(&request.initial_messages(), 4);
    let guardrails = GuardrailConfig {
        max_input_tokens: base + 100,
        ..GuardrailConfig::default()
    };
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_search")]),
        Message::assistant("report"),
    ]);
    let runner = runner(provider.clone(), fixed_registry(4_000), guardrails);

    let events = collect(runner.run_turn(request)).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tools_bound());
    assert!(!requests[1].tools_bound());
    assert_eq!(final_stats(&events).ai_calls, 2);
    assert!(final_stats(&events).estimated_tokens > base + 100);
}

#[tokio::test]
async fn tool_start_and_end_pair_up_in_order() {
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_search"), tool_call("c2", "metrics_query")]),
        Message::assistant("both checked"),
    ]);
    let runner = runner(provider, fixed_registry(10), GuardrailConfig::default());

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "q"))).await;

    let mut open: Option<String> = None;
    let mut numbers = Vec::new();
    for event in &events {
        match event {
            TurnEvent::ToolStart { id, tool_number, .. } => {
                assert!(open.is_none(), "tool_start before previous tool_end");
                open = Some(id.clone());
                numbers.push(*tool_number);
            }
            TurnEvent::ToolEnd { id, .. } => assert_eq!(open.take().as_deref(), Some(id.as_str())),
            _ => {}
        }
    }
    assert!(open.is_none());
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn cancel_during_tool_keeps_partial_text() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let registry = ToolRegistry::new().with(Arc::new(GatedTool {
        started: started.clone(),
        release: release.clone(),
    }));
    let provider = ScriptedProvider::new(vec![asks_for("Error rate doubled at 14:02.", vec![tool_call("c1", "gated")])]);
    let runner = runner(provider.clone(), registry, GuardrailConfig::default());

    let cancel = CancellationToken::new();
    let mut rx = runner.run_turn(TurnRequest::new(organization(), "q").with_cancel(cancel.clone()));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let is_start = matches!(event, TurnEvent::ToolStart { .. });
        events.push(event);
        if is_start {
            break;
        }
    }
    started.notified().await;
    cancel.cancel();
    release.notify_one();
    events.extend(collect(rx).await);

    assert!(events.iter().any(|e| matches!(e, TurnEvent::ToolEnd { .. })));
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(done_content(&events), format!("Error rate doubled at 14:02.{STOPPED_SUFFIX}"));
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn model_failure_is_a_single_error_event() {
    let provider = ScriptedProvider::with_results(vec![Err(ProviderError::RateLimited { retry_after_secs: 30 })]);
    let runner = runner(provider, fixed_registry(10), GuardrailConfig::default());

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "q"))).await;

    assert_eq!(terminal_count(&events), 1);
    let kinds: Vec<_> = events.iter().map(TurnEvent::event_type).collect();
    assert_eq!(kinds, vec!["stats", "stats", "error"]);
    match events.last().unwrap() {
        TurnEvent::Error { error } => assert!(error.starts_with("Agent error:")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_answer_falls_back_to_apology() {
    let provider = ScriptedProvider::new(vec![Message::assistant("")]);
    let runner = runner(provider, fixed_registry(10), GuardrailConfig::default());

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "q"))).await;
    assert_eq!(done_content(&events), APOLOGY);
}

#[tokio::test]
async fn trace_follows_the_terminal_event() {
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_search")]),
        Message::assistant("answer"),
    ]);
    let runner = runner(provider, fixed_registry(10), GuardrailConfig::default());

    let events = collect(runner.run_turn(TurnRequest::new(organization(), "q").with_trace(true))).await;

    let kinds: Vec<_> = events.iter().map(TurnEvent::event_type).collect();
    assert_eq!(kinds[kinds.len() - 2..], ["done", "trace"]);
    match events.last().unwrap() {
        TurnEvent::Trace(trace) => {
            assert_eq!(trace.final_response, "answer");
            assert_eq!(trace.tool_calls.len(), 1);
            assert_eq!(trace.tool_responses[0].output.as_deref(), Some("xxxxxxxxxx"));
            assert_eq!(trace.stats["ai_calls"], 2);
        }
        other => panic!("expected trace, got {other:?}"),
    }
}

// ── Chat sessions ────────────────────────────────────────────────────────

async fn session(provider: Arc<ScriptedProvider>) -> (ChatService, Arc<InMemoryStore>, String) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_organization(organization()).await;
    let conversation_id = store.create_conversation("org-1").await.unwrap();
    let service = ChatService::new(
        runner(provider, fixed_registry(10), GuardrailConfig::default()),
        store.clone(),
        CompactionConfig::default(),
    );
    (service, store, conversation_id)
}

/// Persistence runs after the stream closes; poll until the reply lands.
async fn wait_for_reply(store: &InMemoryStore, conversation_id: &str, expected: usize) -> Vec<StoredMessage> {
    for _ in 0..200 {
        let messages = store.list_messages(conversation_id).await.unwrap();
        if messages.len() >= expected {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("turn was not persisted");
}

#[tokio::test]
async fn first_message_is_titled_and_persisted() {
    let provider = ScriptedProvider::new(vec![
        asks_for("", vec![tool_call("c1", "logs_search")]),
        Message::assistant("Root cause: pool exhaustion."),
    ]);
    let (service, store, id) = session(provider).await;
    let question = format!("Why is checkout slow? {}", "detail ".repeat(20));

    let events = collect(service.send_message(&id, SendMessage::new(question.as_str())).await.unwrap()).await;
    assert_eq!(terminal_count(&events), 1);

    let messages = wait_for_reply(&store, &id, 4).await;
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "Calling tool: logs_search");
    assert_eq!(messages[2].role, Role::Tool);
    assert_eq!(messages[3].content, "Root cause: pool exhaustion.");

    let conversation = store.get_conversation(&id).await.unwrap();
    let title = conversation.title.unwrap();
    assert_eq!(title.chars().count(), 83);
    assert!(title.ends_with("..."));
    assert_eq!(conversation.last_agent_stats.unwrap()["ai_calls"], 2);
}

#[tokio::test]
async fn long_conversation_is_compacted_before_the_turn() {
    let provider = ScriptedProvider::new(vec![
        Message::assistant("Earlier the user chased checkout 500s."),
        Message::assistant("Still a bad deploy."),
    ]);
    let (service, store, id) = session(provider.clone()).await;
    let prior: Vec<StoredMessage> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                StoredMessage::user(format!("question {i}"))
            } else {
                StoredMessage::assistant(format!("answer {i}"))
            }
        })
        .collect();
    store.append_messages(&id, prior).await.unwrap();

    collect(service.send_message(&id, SendMessage::new("and now?")).await.unwrap()).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].system_prompt, SUMMARY_SYSTEM);
    assert!(!requests[0].tools_bound());

    let turn = &requests[1].messages;
    let summary = turn.iter().find(|m| m.text().starts_with(SUMMARY_PREFIX)).unwrap();
    assert_eq!(summary.role, Role::System);
    let history: Vec<_> = turn.iter().filter(|m| m.role != Role::System).map(Message::text).collect();
    assert_eq!(history, vec!["question 4", "answer 5", "question 6", "answer 7", "and now?"]);

    let compaction = store.get_conversation(&id).await.unwrap().compaction.unwrap();
    assert_eq!(
        compaction,
        CompactionRecord {
            summary_text: "Earlier the user chased checkout 500s.".into(),
            summary_coverage_count: 4,
        }
    );
}

#[tokio::test]
async fn invalid_content_is_rejected_before_any_write() {
    let provider = ScriptedProvider::new(vec![]);
    let (service, store, id) = session(provider).await;

    let err = service.send_message(&id, SendMessage::new("")).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidContent));
    assert!(store.list_messages(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_without_running_turn_reports_none() {
    let provider = ScriptedProvider::new(vec![]);
    let (service, _store, id) = session(provider).await;
    assert!(!service.stop(&id).await);
    assert!(!service.is_running(&id).await);
}

#[tokio::test]
async fn failed_turn_still_stores_a_reply() {
    let provider = ScriptedProvider::with_results(vec![Err(ProviderError::Timeout("60s".into()))]);
    let (service, store, id) = session(provider).await;

    let events = collect(service.send_message(&id, SendMessage::new("q")).await.unwrap()).await;
    assert!(matches!(events.iter().find(|e| e.is_terminal()), Some(TurnEvent::Error { .. })));

    let messages = wait_for_reply(&store, &id, 2).await;
    assert_eq!(messages[1].content, NO_RESPONSE);
}

/// Delays writes that carry an assistant reply.
struct SlowReplyStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

#[async_trait]
impl ConversationStore for SlowReplyStore {
    async fn get_organization(&self, id: &str) -> Result<Organization, StoreError> {
        self.inner.get_organization(id).await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationRecord, StoreError> {
        self.inner.get_conversation(id).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn append_messages(&self, conversation_id: &str, messages: Vec<StoredMessage>) -> Result<(), StoreError> {
        if messages.iter().any(|m| m.role == Role::Assistant) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.append_messages(conversation_id, messages).await
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<(), StoreError> {
        self.inner.set_title(conversation_id, title).await
    }

    async fn save_compaction(&self, conversation_id: &str, record: CompactionRecord) -> Result<(), StoreError> {
        self.inner.save_compaction(conversation_id, record).await
    }

    async fn save_agent_stats(&self, conversation_id: &str, stats: serde_json::Value) -> Result<(), StoreError> {
        self.inner.save_agent_stats(conversation_id, stats).await
    }
}

#[tokio::test]
async fn next_turn_sees_previous_reply_even_when_persistence_is_slow() {
    let provider = ScriptedProvider::new(vec![Message::assistant("reply one"), Message::assistant("reply two")]);
    let inner = Arc::new(InMemoryStore::new());
    inner.insert_organization(organization()).await;
    let id = inner.create_conversation("org-1").await.unwrap();
    let store = Arc::new(SlowReplyStore { inner: inner.clone(), delay: Duration::from_millis(100) });
    let service = ChatService::new(
        runner(provider.clone(), fixed_registry(10), GuardrailConfig::default()),
        store,
        CompactionConfig::default(),
    );

    let first = collect(service.send_message(&id, SendMessage::new("first")).await.unwrap()).await;
    assert_eq!(terminal_count(&first), 1);
    assert!(!service.is_running(&id).await);

    collect(service.send_message(&id, SendMessage::new("second")).await.unwrap()).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let history: Vec<_> = requests[1]
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(Message::text)
        .collect();
    assert_eq!(history, vec!["first", "reply one", "second"]);
}
