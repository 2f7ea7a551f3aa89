use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::MemoryRetriever;
use crate::core::workflow::RetrievalOutput;

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: usize,
}

/// Memory retrieval over a JSON HTTP endpoint returning
/// `{"memories": [...], "reasoning_hits": [...]}`.
pub struct HttpMemoryRetriever {
    client: Client,
    endpoint: String,
    top_k: usize,
}

impl HttpMemoryRetriever {
    pub fn new(endpoint: String, top_k: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            top_k,
        })
    }
}

#[async_trait]
impl MemoryRetriever for HttpMemoryRetriever {
    async fn retrieve(&self, subquery: &str) -> Result<RetrievalOutput> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&RetrieveRequest {
                query: subquery,
                top_k: self.top_k,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "Retrieval error ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let output: RetrievalOutput = res
            .json()
            .await
            .map_err(|e| anyhow!("Retrieval response has unexpected shape: {}", e))?;
        Ok(output)
    }
}
