use thiserror::Error;

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conversation '{conversation_id}' is busy: {reason}")]
    Conflict {
        conversation_id: String,
        reason: String,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("collaborator failure: {0}")]
    Collaborator(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn busy(conversation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkflowError::Conflict {
            conversation_id: conversation_id.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, shared by HTTP bodies and error events.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "NOT_FOUND",
            WorkflowError::Conflict { .. } => "BUSY",
            WorkflowError::InvalidState(_) => "INVALID_STATE",
            WorkflowError::Collaborator(_) => "COLLABORATOR_FAILURE",
            WorkflowError::Validation(_) => "VALIDATION_ERROR",
            WorkflowError::Storage(_) => "STORAGE_ERROR",
            WorkflowError::Serialization(_) => "INTERNAL_ERROR",
        }
    }
}
