use super::types::RunStatus;

/// What the store knows about a conversation when a request arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub active_run: Option<ActiveRun>,
}

/// The run an active-run pointer resolves to. `status` is `None` when the
/// pointer references a run that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub run_id: String,
    pub status: Option<RunStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    NewConversation,
    ClarificationAnswer { run_id: String },
    /// `stale_pointer` is set when the pointer still names a finished or
    /// missing run and must be repaired before the new run is linked.
    NewTurn { stale_pointer: Option<String> },
    Busy { run_id: String },
    NotFound { conversation_id: String },
}

pub fn classify(requested: Option<&str>, snapshot: Option<&ConversationSnapshot>) -> Scenario {
    let Some(conversation_id) = requested else {
        return Scenario::NewConversation;
    };
    let Some(snapshot) = snapshot else {
        return Scenario::NotFound {
            conversation_id: conversation_id.to_string(),
        };
    };

    match &snapshot.active_run {
        None => Scenario::NewTurn {
            stale_pointer: None,
        },
        Some(active) => match active.status {
            Some(RunStatus::WaitingForInput) => Scenario::ClarificationAnswer {
                run_id: active.run_id.clone(),
            },
            Some(RunStatus::Running) => Scenario::Busy {
                run_id: active.run_id.clone(),
            },
            Some(_) | None => Scenario::NewTurn {
                stale_pointer: Some(active.run_id.clone()),
            },
        },
    }
}
