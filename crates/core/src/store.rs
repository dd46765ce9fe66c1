//! ConversationStore trait: persistence of conversations across turns.
//!
//! Only user messages, plain assistant replies, and the audit records of tool
//! activity are stored. The History Compactor reads the first two kinds back;
//! tool records are kept for display and never re-enter a prompt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{Message, Role};
use crate::organization::Organization;

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,

    /// Set on tool-call and tool-response records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Audit record of a dispatched tool call.
    pub fn tool_call(tool_name: impl Into<String>, call_id: Option<String>) -> Self {
        let tool_name = tool_name.into();
        let mut msg = Self::new(Role::Assistant, format!("Calling tool: {tool_name}"));
        msg.tool_name = Some(tool_name);
        msg.tool_call_id = call_id;
        msg
    }

    /// Audit record of a tool's (previewed) response.
    pub fn tool_response(tool_name: impl Into<String>, call_id: Option<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_name = Some(tool_name.into());
        msg.tool_call_id = call_id;
        msg
    }

    /// Whether this message belongs to long-term conversation history.
    pub fn is_history(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant) && self.tool_name.is_none()
    }

    pub fn to_message(&self) -> Message {
        let mut msg = match self.role {
            Role::User => Message::user(self.content.as_str()),
            Role::System => Message::system(self.content.as_str()),
            Role::Assistant | Role::Tool => Message::assistant(self.content.as_str()),
        };
        msg.id = self.id.clone();
        msg.timestamp = self.created_at;
        msg
    }
}

/// The rolling summary of a conversation's older messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub summary_text: String,

    /// How many older messages the summary accounts for
    pub summary_coverage_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub organization_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionRecord>,

    /// Final stats payload of the most recent turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_stats: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            title: None,
            compaction: None,
            last_agent_stats: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The core ConversationStore trait.
///
/// Implementations: in-memory (`triage-store`). Every method is its own unit
/// of work, so a failure in one never rolls back another.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_organization(&self, id: &str) -> std::result::Result<Organization, StoreError>;

    async fn get_conversation(&self, id: &str) -> std::result::Result<ConversationRecord, StoreError>;

    /// All messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> std::result::Result<Vec<StoredMessage>, StoreError>;

    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<StoredMessage>,
    ) -> std::result::Result<(), StoreError>;

    async fn set_title(&self, conversation_id: &str, title: &str) -> std::result::Result<(), StoreError>;

    async fn save_compaction(
        &self,
        conversation_id: &str,
        record: CompactionRecord,
    ) -> std::result::Result<(), StoreError>;

    async fn save_agent_stats(
        &self,
        conversation_id: &str,
        stats: serde_json::Value,
    ) -> std::result::Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_records_are_not_history() {
        assert!(StoredMessage::user("why is checkout slow?").is_history());
        assert!(StoredMessage::assistant("Root cause: ...").is_history());

        let call = StoredMessage::tool_call("logs_search", Some("t1".into()));
        assert_eq!(call.content, "Calling tool: logs_search");
        assert_eq!(call.role, Role::Assistant);
        assert!(!call.is_history());

        let response = StoredMessage::tool_response("logs_search", Some("t1".into()), "{}");
        assert!(!response.is_history());
    }

    #[test]
    fn to_message_keeps_identity() {
        let stored = StoredMessage::user("hello");
        let msg = stored.to_message();
        assert_eq!(msg.id, stored.id);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "hello");
    }
}
