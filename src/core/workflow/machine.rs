use uuid::Uuid;

use super::timestamp;
use super::types::{Checkpoint, CheckpointUpdate, Clarification, RetrievalOutput, Run, RunStatus};
use crate::core::error::{WorkflowError, WorkflowResult};

pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    match from {
        RunStatus::Running => matches!(
            to,
            RunStatus::WaitingForInput
                | RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
        ),
        RunStatus::WaitingForInput => matches!(
            to,
            RunStatus::Running | RunStatus::Failed | RunStatus::Cancelled
        ),
        RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => false,
    }
}

impl Run {
    /// New run in `running` with an empty checkpoint. The single-active-run
    /// check belongs to the conversation store, which owns the pointer.
    pub fn start(conversation_id: &str, user_input: &str, allow_clarification: bool) -> Self {
        let now = timestamp();
        Self {
            run_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            status: RunStatus::Running,
            user_input: user_input.to_string(),
            allow_clarification,
            checkpoint: Checkpoint::default(),
            final_output: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    fn require(&self, expected: RunStatus, operation: &str) -> WorkflowResult<()> {
        if self.status != expected {
            return Err(WorkflowError::InvalidState(format!(
                "cannot {} run '{}' while it is {} (expected {})",
                operation, self.run_id, self.status, expected
            )));
        }
        Ok(())
    }

    fn transition(&mut self, to: RunStatus) -> WorkflowResult<()> {
        if !can_transition(self.status, to) {
            return Err(WorkflowError::InvalidState(format!(
                "run '{}' cannot move from {} to {}",
                self.run_id, self.status, to
            )));
        }
        self.status = to;
        self.updated_at = timestamp();
        Ok(())
    }

    /// Answers the pending question and resumes the run. The answered pair is
    /// appended to the history and the pending question cleared in the same step.
    pub fn submit_clarification(&mut self, answer: &str) -> WorkflowResult<Clarification> {
        self.require(RunStatus::WaitingForInput, "answer a clarification for")?;
        let Some(question) = self.checkpoint.pending_question.clone() else {
            return Err(WorkflowError::InvalidState(format!(
                "run '{}' has no pending clarification question",
                self.run_id
            )));
        };
        self.transition(RunStatus::Running)?;
        let pair = Clarification {
            question,
            answer: answer.to_string(),
        };
        self.checkpoint.pending_question = None;
        self.checkpoint.clarifications.push(pair.clone());
        Ok(pair)
    }

    pub fn apply_checkpoint(&mut self, update: CheckpointUpdate) -> WorkflowResult<()> {
        self.require(RunStatus::Running, "checkpoint")?;
        self.checkpoint.apply(update);
        self.updated_at = timestamp();
        Ok(())
    }

    pub fn pause(&mut self, question: &str) -> WorkflowResult<()> {
        self.require(RunStatus::Running, "pause")?;
        self.transition(RunStatus::WaitingForInput)?;
        self.checkpoint.pending_question = Some(question.to_string());
        Ok(())
    }

    pub fn complete(&mut self, output: RetrievalOutput) -> WorkflowResult<()> {
        self.require(RunStatus::Running, "complete")?;
        self.transition(RunStatus::Completed)?;
        self.final_output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, detail: &str) -> WorkflowResult<()> {
        self.transition(RunStatus::Failed)?;
        self.checkpoint.pending_question = None;
        self.error = Some(detail.to_string());
        Ok(())
    }

    pub fn cancel(&mut self) -> WorkflowResult<()> {
        self.transition(RunStatus::Cancelled)?;
        self.checkpoint.pending_question = None;
        Ok(())
    }
}
