use rusqlite::{TransactionBehavior, params};
use tracing::info;

use super::WorkflowStore;
use super::types::PruneReport;
use crate::core::error::WorkflowResult;
use crate::core::workflow::timestamp_before;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub event_ttl: chrono::Duration,
    pub run_retention: chrono::Duration,
}

impl RetentionPolicy {
    pub fn new(event_ttl_hours: u64, run_retention_days: u64) -> Self {
        Self {
            event_ttl: chrono::Duration::hours(event_ttl_hours as i64),
            run_retention: chrono::Duration::days(run_retention_days as i64),
        }
    }
}

impl WorkflowStore {
    /// Deletes expired events of finished runs and expired finished runs.
    /// Turns are permanent history and are never touched. With `dry_run`
    /// the deletions are counted and rolled back.
    pub async fn prune(&self, policy: RetentionPolicy, dry_run: bool) -> WorkflowResult<PruneReport> {
        let event_cutoff = timestamp_before(policy.event_ttl);
        let run_cutoff = timestamp_before(policy.run_retention);

        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let events_deleted = tx.execute(
            "DELETE FROM workflow_events
             WHERE created_at < ?1
               AND (run_id IS NULL
                    OR run_id NOT IN (
                        SELECT run_id FROM workflow_runs
                        WHERE status IN ('running', 'waiting_for_input')))",
            params![event_cutoff],
        )?;
        let runs_deleted = tx.execute(
            "DELETE FROM workflow_runs
             WHERE updated_at < ?1
               AND status IN ('completed', 'failed', 'cancelled')
               AND run_id NOT IN (
                   SELECT active_run_id FROM conversations WHERE active_run_id IS NOT NULL)",
            params![run_cutoff],
        )?;
        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }

        info!(
            events_deleted,
            runs_deleted, dry_run, "Retention pass finished"
        );
        Ok(PruneReport {
            events_deleted,
            runs_deleted,
            dry_run,
        })
    }
}
