//! Chat sessions.
//!
//! [`ChatService`] wraps one turn with everything around it: loading the
//! conversation, storing the user message, titling, compaction, and, once
//! the event stream has finished, persisting what the turn produced.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use triage_config::CompactionConfig;
use triage_core::error::StoreError;
use triage_core::message::Message;
use triage_core::organization::Organization;
use triage_core::store::{ConversationRecord, ConversationStore, StoredMessage};

use crate::compactor::HistoryCompactor;
use crate::prompt::UserContext;
use crate::stream_event::{TurnEvent, TurnStats};
use crate::turn::{TurnRequest, TurnRunner};

/// Longest accepted user message, in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Characters of the first message used as the conversation title.
pub const TITLE_CHARS: usize = 80;

/// Stored when a turn finished without any text.
pub const NO_RESPONSE: &str = "No response generated.";

const EVENT_BUFFER: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Message content must be between 1 and {MAX_CONTENT_CHARS} characters")]
    InvalidContent,

    #[error("A turn is already running for conversation {0}")]
    Busy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A user message to send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessage {
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<UserContext>,

    #[serde(default)]
    pub capture_full_trace: bool,
}

impl SendMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let len = self.content.chars().count();
        if len == 0 || len > MAX_CONTENT_CHARS {
            return Err(SessionError::InvalidContent);
        }
        Ok(())
    }
}

/// What the forwarder collects for persistence.
#[derive(Default)]
struct TurnRecord {
    tool_calls: Vec<StoredMessage>,
    tool_responses: Vec<StoredMessage>,
    streamed: String,
    done: Option<String>,
    final_stats: Option<TurnStats>,
}

impl TurnRecord {
    fn observe(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::Token { content } => self.streamed.push_str(content),
            TurnEvent::ToolStart { tool, id, .. } => {
                self.tool_calls.push(StoredMessage::tool_call(tool.as_str(), Some(id.clone())));
            }
            TurnEvent::ToolEnd { tool, id, result_preview, .. } => {
                self.tool_responses.push(StoredMessage::tool_response(
                    tool.as_str(),
                    Some(id.clone()),
                    result_preview.as_str(),
                ));
            }
            TurnEvent::Stats(stats) if stats.r#final => self.final_stats = Some(stats.clone()),
            TurnEvent::Done { content } => self.done = Some(content.clone()),
            TurnEvent::Stats(_) | TurnEvent::Error { .. } | TurnEvent::Trace(_) => {}
        }
    }

    /// Tool calls, then tool responses, then the final reply.
    fn into_messages(self) -> (Vec<StoredMessage>, Option<TurnStats>) {
        let reply = self
            .done
            .filter(|d| !d.is_empty())
            .or_else(|| Some(self.streamed).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| NO_RESPONSE.to_string());

        let mut messages = self.tool_calls;
        messages.extend(self.tool_responses);
        messages.push(StoredMessage::assistant(reply));
        (messages, self.final_stats)
    }
}

/// Runs conversation turns on top of a [`ConversationStore`].
#[derive(Clone)]
pub struct ChatService {
    runner: TurnRunner,
    store: Arc<dyn ConversationStore>,
    compaction: CompactionConfig,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ChatService {
    pub fn new(runner: TurnRunner, store: Arc<dyn ConversationStore>, compaction: CompactionConfig) -> Self {
        Self {
            runner,
            store,
            compaction,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn runner(&self) -> &TurnRunner {
        &self.runner
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Send a user message and stream the turn's events.
    ///
    /// Everything up to and including compaction is written before the first
    /// event is sent. The turn's own output is written after the last one.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        message: SendMessage,
    ) -> Result<mpsc::Receiver<TurnEvent>, SessionError> {
        message.validate()?;

        let conversation = self.store.get_conversation(conversation_id).await?;
        let organization = self.store.get_organization(&conversation.organization_id).await?;

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            if active.contains_key(conversation_id) {
                return Err(SessionError::Busy(conversation_id.to_string()));
            }
            active.insert(conversation_id.to_string(), cancel.clone());
        }

        let prepared = self.prepare(conversation_id, &conversation, &organization, &message).await;
        let history = match prepared {
            Ok(history) => history,
            Err(e) => {
                self.active.lock().await.remove(conversation_id);
                return Err(e);
            }
        };

        let request = TurnRequest::new(organization, message.content)
            .with_history(history)
            .with_context(message.context)
            .with_trace(message.capture_full_trace)
            .with_cancel(cancel.clone());
        let events = self.runner.run_turn(request);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = self.clone();
        let id = conversation_id.to_string();
        let span = info_span!("conversation", conversation_id = %id);
        tokio::spawn(async move { service.forward(id, events, tx, cancel).await }.instrument(span));
        Ok(rx)
    }

    async fn prepare(
        &self,
        conversation_id: &str,
        conversation: &ConversationRecord,
        organization: &Organization,
        message: &SendMessage,
    ) -> Result<Vec<Message>, SessionError> {
        let prior: Vec<Message> = self
            .store
            .list_messages(conversation_id)
            .await?
            .iter()
            .filter(|m| m.is_history())
            .map(StoredMessage::to_message)
            .collect();

        self.store
            .append_messages(conversation_id, vec![StoredMessage::user(message.content.as_str())])
            .await?;

        if prior.is_empty() && conversation.title.is_none() {
            let title = title_from(&message.content);
            debug!(conversation_id, title = %title, "Auto-titling conversation");
            self.store.set_title(conversation_id, &title).await?;
        }

        let compactor = HistoryCompactor::new(self.runner.provider(), self.compaction.clone())
            .with_settings(organization.model.settings());
        let compacted = compactor.compact(&prior, conversation.compaction.as_ref()).await;
        if let Some(record) = compacted.updated {
            info!(
                conversation_id,
                coverage = record.summary_coverage_count,
                "Saving regenerated summary"
            );
            self.store.save_compaction(conversation_id, record).await?;
        }
        Ok(compacted.messages)
    }

    /// Forward events to the caller, then persist the turn.
    ///
    /// If the caller goes away the turn is cancelled; its partial output is
    /// still stored. The conversation stays busy, and the caller's stream
    /// open, until the turn is persisted.
    async fn forward(
        self,
        conversation_id: String,
        mut events: mpsc::Receiver<TurnEvent>,
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) {
        let mut record = TurnRecord::default();
        let mut caller_gone = false;

        while let Some(event) = events.recv().await {
            record.observe(&event);
            if !caller_gone && tx.send(event).await.is_err() {
                warn!(%conversation_id, "Caller disconnected, stopping turn");
                caller_gone = true;
                cancel.cancel();
            }
        }

        self.persist(&conversation_id, record).await;
        self.active.lock().await.remove(&conversation_id);
        drop(tx);
    }

    async fn persist(&self, conversation_id: &str, record: TurnRecord) {
        let (messages, stats) = record.into_messages();
        let count = messages.len();

        if let Err(e) = self.store.append_messages(conversation_id, messages).await {
            error!(conversation_id, error = %e, "Failed to persist turn messages");
            return;
        }
        if let Some(stats) = stats {
            match serde_json::to_value(&stats) {
                Ok(value) => {
                    if let Err(e) = self.store.save_agent_stats(conversation_id, value).await {
                        error!(conversation_id, error = %e, "Failed to persist agent stats");
                    }
                }
                Err(e) => error!(conversation_id, error = %e, "Failed to serialize agent stats"),
            }
        }
        info!(conversation_id, messages = count, "Turn persisted");
    }

    /// Cancel the running turn of a conversation. Returns `false` if none runs.
    pub async fn stop(&self, conversation_id: &str) -> bool {
        match self.active.lock().await.get(conversation_id) {
            Some(cancel) => {
                info!(conversation_id, "Stop requested");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, conversation_id: &str) -> bool {
        self.active.lock().await.contains_key(conversation_id)
    }
}

fn title_from(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
