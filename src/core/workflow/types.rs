use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    WaitingForInput,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 5] = [
        RunStatus::Running,
        RunStatus::WaitingForInput,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::WaitingForInput => "waiting_for_input",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "waiting_for_input" => Some(RunStatus::WaitingForInput),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
    Error,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
            ConversationStatus::Error => "error",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ConversationStatus::Active),
            "archived" => Some(ConversationStatus::Archived),
            "error" => Some(ConversationStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub answer: String,
}

/// Memories and reasoning hits returned by the retrieval collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutput {
    #[serde(default)]
    pub memories: Vec<Value>,
    #[serde(default, alias = "reasoningbank_hits")]
    pub reasoning_hits: Vec<Value>,
}

impl RetrievalOutput {
    pub fn merge(&mut self, other: RetrievalOutput) {
        self.memories.extend(other.memories);
        self.reasoning_hits.extend(other.reasoning_hits);
    }
}

/// Intermediate pipeline state persisted with the run.
///
/// `pending_question` is `Some` exactly while the run is `waiting_for_input`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    #[serde(default)]
    pub clarifications: Vec<Clarification>,
    #[serde(default)]
    pub subqueries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalOutput>,
}

/// Partial checkpoint update applied between pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointUpdate {
    Subqueries(Vec<String>),
    Retrieval(RetrievalOutput),
}

impl Checkpoint {
    pub fn apply(&mut self, update: CheckpointUpdate) {
        match update {
            CheckpointUpdate::Subqueries(subqueries) => self.subqueries = subqueries,
            CheckpointUpdate::Retrieval(output) => self.retrieval = Some(output),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub status: RunStatus,
    pub user_input: String,
    pub allow_clarification: bool,
    pub checkpoint: Checkpoint,
    pub final_output: Option<RetrievalOutput>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Tagged payload carried by every event log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Progress {
        message: String,
        #[serde(default)]
        data: Value,
    },
    Status {
        status: RunStatus,
        message: String,
    },
    Result(RetrievalOutput),
    Error {
        message: String,
        code: String,
    },
}

impl EventPayload {
    pub fn progress(message: impl Into<String>) -> Self {
        EventPayload::Progress {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn progress_with(message: impl Into<String>, data: Value) -> Self {
        EventPayload::Progress {
            message: message.into(),
            data,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Progress { .. } => "progress",
            EventPayload::Status { .. } => "status",
            EventPayload::Result(_) => "result",
            EventPayload::Error { .. } => "error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            EventPayload::Progress { message, .. }
            | EventPayload::Status { message, .. }
            | EventPayload::Error { message, .. } => message.clone(),
            EventPayload::Result(_) => "Final memories retrieved".to_string(),
        }
    }

    /// Structured data as exposed to stream subscribers.
    pub fn data(&self) -> Value {
        match self {
            EventPayload::Progress { data, .. } => data.clone(),
            EventPayload::Status { status, .. } => serde_json::json!({ "status": status }),
            EventPayload::Result(output) => serde_json::json!({
                "memories": output.memories,
                "reasoning_hits": output.reasoning_hits,
            }),
            EventPayload::Error { code, .. } => serde_json::json!({ "code": code }),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, EventPayload::Result(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EventPayload::Error { .. })
    }

    /// True for the last event a run can emit: its result, its error, or a
    /// terminal status change such as cancellation.
    pub fn ends_stream(&self) -> bool {
        match self {
            EventPayload::Result(_) | EventPayload::Error { .. } => true,
            EventPayload::Status { status, .. } => status.is_terminal(),
            EventPayload::Progress { .. } => false,
        }
    }
}
