use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::workflow::{
    Clarification, ConversationStatus, EventPayload, RetrievalOutput, Run,
};

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub summary: Option<String>,
    pub preferences: Map<String, Value>,
    pub active_run_id: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub message_id: String,
    pub conversation_id: String,
    pub run_id: String,
    pub user_input: String,
    pub clarifications: Vec<Clarification>,
    pub subqueries: Vec<String>,
    pub retrieval: RetrievalOutput,
    pub agent_answer: Option<String>,
    pub agent_reasoning: Option<String>,
    pub agent_tool_calls: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub cursor: i64,
    pub conversation_id: String,
    pub run_id: Option<String>,
    pub message_id: Option<String>,
    pub payload: EventPayload,
    pub is_final: bool,
    pub is_error: bool,
    pub ends_stream: bool,
    pub created_at: String,
}

/// Published after every committed append so live readers can re-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotice {
    pub conversation_id: String,
    pub cursor: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RequestIntake {
    pub conversation_id: Option<String>,
    pub user_input: String,
    pub allow_clarification: bool,
    pub preferences: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    NewConversation,
    NewTurn,
    ClarificationAnswer(Clarification),
}

/// Outcome of the atomic classify-and-admit step.
#[derive(Debug, Clone)]
pub struct RequestStart {
    pub admission: Admission,
    pub conversation: Conversation,
    pub run: Run,
    /// Highest cursor in the conversation before this request emitted anything.
    pub stream_cursor: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AgentAnswer {
    pub response: String,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PruneReport {
    pub events_deleted: usize,
    pub runs_deleted: usize,
    pub dry_run: bool,
}
