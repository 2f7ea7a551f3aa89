mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use router::build_api_router;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::orchestrator::Orchestrator;
use crate::core::stream::StreamDispatcher;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ApiServerConfig {
    pub orchestrator: Orchestrator,
    pub dispatcher: StreamDispatcher,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) dispatcher: StreamDispatcher,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

/// HTTP + WebSocket surface of the workflow engine.
pub struct ApiServer {
    state: AppState,
    bind: String,
    running: Option<Running>,
}

struct Running {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            bind: format!("{}:{}", config.api_host, config.api_port),
            state: AppState {
                orchestrator: config.orchestrator,
                dispatcher: config.dispatcher,
                log_tx: config.log_tx,
                api_port: config.api_port,
            },
            running: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn on_start(&mut self) -> Result<()> {
        // Bound here rather than in the task so a taken port fails startup.
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("binding API server to {}", self.bind))?;
        let addr = listener.local_addr()?;
        let app = router::build_api_router(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                error!("API Server crashed: {}", e);
            }
        });
        info!("API Server running at http://{}", addr);
        self.running = Some(Running {
            addr,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!(addr = %running.addr, "API Server draining connections");
        let _ = running.shutdown_tx.send(());
        if tokio::time::timeout(DRAIN_TIMEOUT, running.task)
            .await
            .is_err()
        {
            warn!("API Server did not drain within {:?}", DRAIN_TIMEOUT);
        }
        Ok(())
    }
}
