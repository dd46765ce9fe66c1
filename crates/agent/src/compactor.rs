//! History compaction.
//!
//! Long conversations are passed to the model as one summary message plus the
//! most recent messages. The summary is regenerated only when it no longer
//! covers every older message.

use std::sync::Arc;

use tracing::{debug, error, info};
use triage_config::CompactionConfig;
use triage_core::message::{Message, Role};
use triage_core::provider::{ModelRequest, ModelSettings, Provider};
use triage_core::store::CompactionRecord;
use triage_tools::format::truncate_chars;

use crate::prompt::{SUMMARY_SYSTEM, summary_prompt};

/// Prefix of the synthetic system message carrying the summary.
pub const SUMMARY_PREFIX: &str = "Previous conversation summary:\n";

/// The history handed to a turn.
#[derive(Debug, Clone)]
pub struct CompactedHistory {
    pub messages: Vec<Message>,
    /// A newly generated record the caller must persist
    pub updated: Option<CompactionRecord>,
}

pub struct HistoryCompactor {
    provider: Arc<dyn Provider>,
    config: CompactionConfig,
    settings: ModelSettings,
}

impl HistoryCompactor {
    pub fn new(provider: Arc<dyn Provider>, config: CompactionConfig) -> Self {
        Self { provider, config, settings: ModelSettings::default() }
    }

    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the bounded history from a conversation's prior user and
    /// assistant messages and its stored compaction record.
    pub async fn compact(&self, existing: &[Message], stored: Option<&CompactionRecord>) -> CompactedHistory {
        if existing.len() < self.config.min_messages_for_summary {
            return CompactedHistory { messages: existing.to_vec(), updated: None };
        }

        let split = existing.len().saturating_sub(self.config.recent_message_count);
        let (older, recent) = existing.split_at(split);
        if older.is_empty() {
            return CompactedHistory { messages: recent.to_vec(), updated: None };
        }

        let (summary_text, updated) = match stored.filter(|r| r.summary_coverage_count >= older.len()) {
            Some(record) => {
                debug!(coverage = record.summary_coverage_count, older = older.len(), "Reusing stored summary");
                (record.summary_text.clone(), None)
            }
            None => {
                let record = CompactionRecord {
                    summary_text: self.summarize(older).await,
                    summary_coverage_count: older.len(),
                };
                (record.summary_text.clone(), Some(record))
            }
        };

        let mut messages = Vec::with_capacity(recent.len() + 1);
        messages.push(Message::system(format!("{SUMMARY_PREFIX}{summary_text}")));
        messages.extend_from_slice(recent);
        CompactedHistory { messages, updated }
    }

    /// Summarize `messages` with a tool-free model call.
    ///
    /// On failure the summary degrades to the head of the transcript.
    pub async fn summarize(&self, messages: &[Message]) -> String {
        let text = transcript(messages);
        if text.trim().is_empty() {
            return String::new();
        }

        let request = ModelRequest::new(SUMMARY_SYSTEM, vec![Message::user(summary_prompt(&text))])
            .with_settings(self.settings.clone());
        match self.provider.complete(request).await {
            Ok(response) => {
                let summary = response.message.text().trim().to_string();
                info!(
                    message_count = messages.len(),
                    summary_len = summary.chars().count(),
                    "Conversation summarized"
                );
                summary
            }
            Err(e) => {
                error!(error = %e, message_count = messages.len(), "Summarization failed");
                let limit = self.config.fallback_summary_chars;
                if text.chars().count() > limit {
                    format!("{}...", truncate_chars(&text, limit))
                } else {
                    text
                }
            }
        }
    }
}

/// Plain-text rendering of user and assistant turns.
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let content = m.text();
            let content = content.trim();
            if content.is_empty() {
                return None;
            }
            match m.role {
                Role::User => Some(format!("User: {content}")),
                Role::Assistant => Some(format!("Assistant: {content}")),
                Role::System | Role::Tool => None,
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
