use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::collaborators::MemoryRetriever;
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::store::WorkflowStore;
use crate::core::workflow::{EventPayload, RetrievalOutput};

/// Retrieves every subquery with at most `concurrency` calls in flight and
/// merges the results in subquery order. The first failing subquery fails
/// the whole set; remaining tasks are aborted when the set drops.
pub(super) async fn retrieve_all(
    store: &WorkflowStore,
    retriever: Arc<dyn MemoryRetriever>,
    run_id: &str,
    subqueries: &[String],
    concurrency: usize,
) -> WorkflowResult<RetrievalOutput> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    for (index, subquery) in subqueries.iter().enumerate() {
        let permits = permits.clone();
        let retriever = retriever.clone();
        let subquery = subquery.clone();
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = retriever.retrieve(&subquery).await;
            (index, subquery, result)
        });
    }

    let total = subqueries.len();
    let mut done = 0;
    let mut slots: Vec<Option<RetrievalOutput>> = vec![None; total];
    while let Some(joined) = set.join_next().await {
        let (index, subquery, result) = joined.map_err(|e| {
            WorkflowError::Collaborator(format!("retrieval task aborted: {}", e))
        })?;
        let output = result.map_err(|e| {
            WorkflowError::Collaborator(format!("retrieval for '{}' failed: {}", subquery, e))
        })?;
        done += 1;
        store
            .emit_progress(
                run_id,
                EventPayload::progress_with(
                    format!("Retrieved memories for subquery {}/{}", done, total),
                    serde_json::json!({
                        "subquery": subquery,
                        "memories": output.memories.len(),
                    }),
                ),
            )
            .await?;
        slots[index] = Some(output);
    }

    let mut merged = RetrievalOutput::default();
    for output in slots.into_iter().flatten() {
        merged.merge(output);
    }
    Ok(merged)
}
