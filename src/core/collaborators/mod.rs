pub mod openai;
pub mod retrieval;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::workflow::{Clarification, RetrievalOutput};

pub use openai::OpenAiSubqueryGenerator;
pub use retrieval::HttpMemoryRetriever;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub user_input: String,
    pub agent_answer: Option<String>,
}

/// Everything the subquery model sees for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptContext {
    pub summary: Option<String>,
    pub history: Vec<HistoryTurn>,
    pub user_input: String,
    pub clarifications: Vec<Clarification>,
    pub preferences: Map<String, Value>,
}

impl PromptContext {
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str("Conversation summary:\n");
            out.push_str(summary.trim());
            out.push_str("\n\n");
        }
        if !self.history.is_empty() {
            out.push_str("Recent turns:\n");
            for turn in &self.history {
                out.push_str(&format!("- user: {}\n", turn.user_input));
                if let Some(answer) = &turn.agent_answer {
                    out.push_str(&format!("  assistant: {}\n", answer));
                }
            }
            out.push('\n');
        }
        if !self.preferences.is_empty() {
            out.push_str(&format!(
                "Preferences: {}\n\n",
                Value::Object(self.preferences.clone())
            ));
        }
        out.push_str("Current request:\n");
        out.push_str(&self.user_input);
        out.push('\n');
        if !self.clarifications.is_empty() {
            out.push_str("\nClarifications:\n");
            for pair in &self.clarifications {
                out.push_str(&format!("Q: {}\nA: {}\n", pair.question, pair.answer));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubqueryOutcome {
    Subqueries(Vec<String>),
    Clarify(String),
}

#[async_trait]
pub trait SubqueryGenerator: Send + Sync {
    async fn generate(
        &self,
        context: &PromptContext,
        allow_clarification: bool,
    ) -> Result<SubqueryOutcome>;
}

#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    async fn retrieve(&self, subquery: &str) -> Result<RetrievalOutput>;
}

/// Scripted collaborators for tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct ScriptedSubqueries {
        outcomes: Mutex<VecDeque<Result<SubqueryOutcome, String>>>,
        pub seen: Mutex<Vec<(PromptContext, bool)>>,
    }

    impl ScriptedSubqueries {
        pub fn new(outcomes: Vec<Result<SubqueryOutcome, String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(PromptContext, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubqueryGenerator for ScriptedSubqueries {
        async fn generate(
            &self,
            context: &PromptContext,
            allow_clarification: bool,
        ) -> Result<SubqueryOutcome> {
            self.seen
                .lock()
                .unwrap()
                .push((context.clone(), allow_clarification));
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Ok(SubqueryOutcome::Subqueries(vec![context.user_input.clone()])),
            }
        }
    }

    /// Echoes each subquery back as a memory, optionally after a delay.
    #[derive(Default)]
    pub struct EchoRetriever {
        pub delay: Option<Duration>,
        pub fail_on: Option<String>,
    }

    #[async_trait]
    impl MemoryRetriever for EchoRetriever {
        async fn retrieve(&self, subquery: &str) -> Result<RetrievalOutput> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on.as_deref() == Some(subquery) {
                return Err(anyhow!("retrieval backend timed out"));
            }
            Ok(RetrievalOutput {
                memories: vec![serde_json::json!({ "query": subquery })],
                reasoning_hits: vec![serde_json::json!({ "hit": subquery })],
            })
        }
    }
}
