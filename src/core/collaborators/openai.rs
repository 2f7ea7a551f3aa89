use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{PromptContext, SubqueryGenerator, SubqueryOutcome};

const SYSTEM_PROMPT: &str = "You break a user's request into search subqueries for a personal memory store.
Reply with a single JSON object and nothing else:
{\"clarification_question\": string or null, \"subqueries\": [string, ...]}
Ask a clarification question only when the request cannot be searched without one.";

const NO_CLARIFICATION: &str =
    "Clarification is not available for this request. Always return subqueries and set clarification_question to null.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct SubqueryReply {
    #[serde(default)]
    clarification_question: Option<String>,
    #[serde(default)]
    subqueries: Vec<String>,
}

/// Subquery generation over an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiSubqueryGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiSubqueryGenerator {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl SubqueryGenerator for OpenAiSubqueryGenerator {
    async fn generate(
        &self,
        context: &PromptContext,
        allow_clarification: bool,
    ) -> Result<SubqueryOutcome> {
        let user_prompt = context.render();
        let mut messages = vec![ChatMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        }];
        if !allow_clarification {
            messages.push(ChatMessage {
                role: "system",
                content: NO_CLARIFICATION,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &user_prompt,
        });

        let req = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
        };
        let mut builder = self.client.post(&self.endpoint).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let res = builder.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "Subquery model error ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: ChatResponse = res.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Subquery model returned no content"))?;
        debug!("Subquery model replied: {}", content);

        let outcome = parse_subquery_reply(&content)?;
        Ok(match outcome {
            SubqueryOutcome::Clarify(_) if !allow_clarification => {
                SubqueryOutcome::Subqueries(vec![context.user_input.clone()])
            }
            other => other,
        })
    }
}

pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    None
}

/// Interprets the model's JSON reply. A non-empty question wins over
/// subqueries; blank subqueries are dropped.
pub(crate) fn parse_subquery_reply(text: &str) -> Result<SubqueryOutcome> {
    let json = extract_json_block(text)
        .ok_or_else(|| anyhow!("Subquery model reply is not JSON: {}", text.trim()))?;
    let reply: SubqueryReply = serde_json::from_str(json)
        .map_err(|e| anyhow!("Subquery model reply has unexpected shape: {}", e))?;

    if let Some(question) = reply
        .clarification_question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
    {
        return Ok(SubqueryOutcome::Clarify(question));
    }
    Ok(SubqueryOutcome::Subqueries(
        reply
            .subqueries
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    ))
}
