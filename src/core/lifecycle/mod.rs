use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Starting,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    /// Label used in lifecycle logs.
    fn name(&self) -> &'static str;

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

type SharedComponent = Arc<Mutex<dyn LifecycleComponent + Send + Sync>>;

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<SharedComponent>,
    started: usize,
    scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            started: 0,
            scheduler,
        })
    }

    pub fn attach(&mut self, component: SharedComponent) {
        self.components.push(component);
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Adds a cron job; it fires once `start` has launched the scheduler.
    pub async fn schedule(&self, job: Job) -> Result<Uuid> {
        Ok(self.scheduler.add(job).await?)
    }

    /// Initializes then starts every component in attach order. If one fails
    /// to start, the ones already started are stopped again before the error
    /// is returned.
    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            let mut comp = comp.lock().await;
            let name = comp.name();
            comp.on_init()
                .await
                .with_context(|| format!("initializing {}", name))?;
        }

        info!("Lifecycle Phase: Starting");
        self.state = LifecycleState::Starting;
        for idx in 0..self.components.len() {
            let outcome = {
                let mut comp = self.components[idx].lock().await;
                let name = comp.name();
                comp.on_start()
                    .await
                    .with_context(|| format!("starting {}", name))
            };
            if let Err(e) = outcome {
                error!("Startup aborted: {:#}", e);
                self.stop_started().await;
                self.state = LifecycleState::Shutdown;
                return Err(e);
            }
            self.started = idx + 1;
        }

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;

        Ok(())
    }

    /// Stops started components in reverse order and halts the scheduler.
    /// Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == LifecycleState::Shutdown {
            return Ok(());
        }
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;
        self.stop_started().await;
        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Scheduler shutdown error: {}", e);
        }

        Ok(())
    }

    async fn stop_started(&mut self) {
        for comp in self.components[..self.started].iter().rev() {
            let mut comp = comp.lock().await;
            if let Err(e) = comp.on_shutdown().await {
                warn!("{} shutdown error: {}", comp.name(), e);
            }
        }
        self.started = 0;
    }
}
