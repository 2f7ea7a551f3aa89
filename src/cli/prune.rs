use anyhow::Result;

use crate::core::config::EngineConfig;
use crate::core::maintenance::policy_from;
use crate::core::store::WorkflowStore;
use crate::core::terminal::{GuideSection, print_info, print_success};
use crate::logging::init_logging;

pub async fn run_prune(config: &EngineConfig, dry_run: bool) -> Result<()> {
    init_logging(&config.logging.level, false);
    let store = WorkflowStore::open(config.database_path()).await?;
    let report = store.prune(policy_from(&config.retention), dry_run).await?;

    GuideSection::new(if dry_run { "Prune (dry run)" } else { "Prune" })
        .status("Events", &report.events_deleted.to_string())
        .status("Runs", &report.runs_deleted.to_string())
        .status(
            "Policy",
            &format!(
                "events > {}h, runs > {}d",
                config.retention.event_ttl_hours, config.retention.run_retention_days
            ),
        )
        .print();
    println!();
    if dry_run {
        print_info("Dry run: nothing was deleted.");
    } else {
        print_success("Retention pass finished.");
    }
    Ok(())
}
