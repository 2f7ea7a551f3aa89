use anyhow::Result;
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::collaborators::{HttpMemoryRetriever, OpenAiSubqueryGenerator};
use crate::core::config::EngineConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::maintenance;
use crate::core::orchestrator::Orchestrator;
use crate::core::store::WorkflowStore;
use crate::core::stream::StreamDispatcher;
use crate::core::terminal::{GuideSection, print_link, print_warn};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::init_logging;

pub async fn run_serve(config: EngineConfig) -> Result<()> {
    let log_tx = init_logging(&config.logging.level, false);
    info!("Starting memoria workflow engine...");

    let db_path = config.database_path();
    let store = WorkflowStore::open(&db_path).await?;
    store.fail_interrupted_runs().await?;

    let api_key = config.subquery_api_key();
    if api_key.is_none() {
        print_warn(&format!(
            "{} is not set; subquery requests go out without credentials.",
            config.subquery.api_key_env
        ));
    }
    let subqueries = OpenAiSubqueryGenerator::new(
        config.subquery.base_url.clone(),
        config.subquery.model.clone(),
        api_key,
        Duration::from_secs(config.subquery.timeout_secs),
    )?;
    let retriever = HttpMemoryRetriever::new(
        config.retrieval.base_url.clone(),
        config.retrieval.top_k,
        Duration::from_secs(config.retrieval.timeout_secs),
    )?;

    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(subqueries),
        Arc::new(retriever),
        config.pipeline.clone(),
    );
    let dispatcher = StreamDispatcher::new(store.clone());

    let mut lifecycle = LifecycleManager::new().await?;
    let api = Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        orchestrator,
        dispatcher,
        log_tx,
        api_host: config.server.host.clone(),
        api_port: config.server.port,
    })));
    lifecycle.attach(api.clone());
    let retention = maintenance::register_retention_job(&lifecycle, store, &config.retention).await?;
    lifecycle.start().await?;

    let base = match api.lock().await.local_addr() {
        Some(addr) => addr.to_string(),
        None => format!("{}:{}", config.server.host, config.server.port),
    };
    GuideSection::new("memoria")
        .status("Database", &db_path.display().to_string())
        .status(
            "Retention",
            if retention {
                config.retention.cron.as_str()
            } else {
                "disabled"
            },
        )
        .print();
    print_link("API", &format!("http://{}", base));
    print_link("Stream", &format!("ws://{}/workflow/ws/<conversation_id>", base));
    print_link("Logs", &format!("http://{}/api/logs", base));
    println!("\n  Press {} to stop.\n", style("Ctrl+C").bold().yellow());

    tokio::signal::ctrl_c().await?;
    info!(state = ?lifecycle.state(), "Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(())
}
