//! In-memory store: useful for testing, the CLI, and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use triage_core::error::StoreError;
use triage_core::organization::Organization;
use triage_core::store::{CompactionRecord, ConversationRecord, ConversationStore, StoredMessage};
use uuid::Uuid;

#[derive(Default)]
struct State {
    organizations: HashMap<String, Organization>,
    conversations: HashMap<String, ConversationRecord>,
    messages: HashMap<String, Vec<StoredMessage>>,
}

/// A store that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an organization.
    pub async fn insert_organization(&self, org: Organization) {
        self.state.write().await.organizations.insert(org.id.clone(), org);
    }

    /// Open a new conversation for an organization and return its ID.
    pub async fn create_conversation(&self, organization_id: &str) -> Result<String, StoreError> {
        let mut state = self.state.write().await;
        if !state.organizations.contains_key(organization_id) {
            return Err(StoreError::NotFound {
                kind: "organization",
                id: organization_id.to_string(),
            });
        }
        let id = Uuid::new_v4().to_string();
        state
            .conversations
            .insert(id.clone(), ConversationRecord::new(id.clone(), organization_id));
        state.messages.insert(id.clone(), Vec::new());
        debug!(conversation_id = %id, organization_id, "Conversation created");
        Ok(id)
    }

    /// Open a conversation under a caller-chosen ID, if it does not exist yet.
    pub async fn ensure_conversation(&self, id: &str, organization_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.organizations.contains_key(organization_id) {
            return Err(StoreError::NotFound {
                kind: "organization",
                id: organization_id.to_string(),
            });
        }
        if !state.conversations.contains_key(id) {
            state
                .conversations
                .insert(id.to_string(), ConversationRecord::new(id, organization_id));
            state.messages.insert(id.to_string(), Vec::new());
        }
        Ok(())
    }

    fn conversation_mut<'a>(state: &'a mut State, id: &str) -> Result<&'a mut ConversationRecord, StoreError> {
        state.conversations.get_mut(id).ok_or_else(|| StoreError::NotFound {
            kind: "conversation",
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_organization(&self, id: &str) -> Result<Organization, StoreError> {
        self.state
            .read()
            .await
            .organizations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "organization",
                id: id.to_string(),
            })
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationRecord, StoreError> {
        self.state
            .read()
            .await
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "conversation",
                id: id.to_string(),
            })
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.state.read().await;
        let mut messages = state.messages.get(conversation_id).cloned().ok_or_else(|| StoreError::NotFound {
            kind: "conversation",
            id: conversation_id.to_string(),
        })?;
        // Appends are in order, but keep the contract explicit.
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn append_messages(&self, conversation_id: &str, messages: Vec<StoredMessage>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        Self::conversation_mut(&mut state, conversation_id)?.updated_at = Utc::now();
        let count = messages.len();
        state.messages.entry(conversation_id.to_string()).or_default().extend(messages);
        debug!(conversation_id, count, "Messages appended");
        Ok(())
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conv = Self::conversation_mut(&mut state, conversation_id)?;
        conv.title = Some(title.to_string());
        conv.updated_at = Utc::now();
        Ok(())
    }

    async fn save_compaction(&self, conversation_id: &str, record: CompactionRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conv = Self::conversation_mut(&mut state, conversation_id)?;
        if let Some(existing) = &conv.compaction {
            if record.summary_coverage_count < existing.summary_coverage_count {
                return Err(StoreError::Storage(format!(
                    "summary coverage cannot shrink ({} < {})",
                    record.summary_coverage_count, existing.summary_coverage_count
                )));
            }
        }
        conv.compaction = Some(record);
        conv.updated_at = Utc::now();
        Ok(())
    }

    async fn save_agent_stats(&self, conversation_id: &str, stats: serde_json::Value) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conv = Self::conversation_mut(&mut state, conversation_id)?;
        conv.last_agent_stats = Some(stats);
        conv.updated_at = Utc::now();
        Ok(())
    }
}
