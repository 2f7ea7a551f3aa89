use anyhow::Result;
use tokio_cron_scheduler::Job;
use tracing::{error, info};

use crate::core::config::RetentionConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::store::{RetentionPolicy, WorkflowStore};

pub fn policy_from(config: &RetentionConfig) -> RetentionPolicy {
    RetentionPolicy::new(config.event_ttl_hours, config.run_retention_days)
}

/// Registers the periodic prune job when retention is enabled.
/// Returns whether a job was added.
pub async fn register_retention_job(
    lifecycle: &LifecycleManager,
    store: WorkflowStore,
    config: &RetentionConfig,
) -> Result<bool> {
    if !config.enabled {
        info!("Retention job disabled");
        return Ok(false);
    }
    let policy = policy_from(config);
    let job = Job::new_async(config.cron.as_str(), move |_uuid, mut _l| {
        let store = store.clone();
        Box::pin(async move {
            match store.prune(policy, false).await {
                Ok(report) => info!(
                    events = report.events_deleted,
                    runs = report.runs_deleted,
                    "Retention pass finished"
                ),
                Err(e) => error!("Retention pass failed: {}", e),
            }
        })
    })?;
    lifecycle.schedule(job).await?;
    info!("Retention job scheduled ({})", config.cron);
    Ok(true)
}
