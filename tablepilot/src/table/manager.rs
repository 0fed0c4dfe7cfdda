//! Orchestrator for spawning and coordinating table pipelines.

use super::{
    actor::{PipelineContext, TableHandle, TablePipeline},
    config::TableConfig,
    messages::{TableCommand, TableResponse},
};
use crate::{
    MAX_TABLES, TableId,
    collab::{Collaborators, SurfaceState, SurfaceWatch},
    config::GlobalSettings,
    control::Coordination,
    gate::CaptureGate,
    monitor::ResourceMonitor,
    pattern::RuleSet,
    round::{RoundStateMachine, TableStatus},
    status::{StatusEvent, StatusFeed, TableSnapshot},
    store::{PersistenceCache, StoreError},
    supervisor::{Supervisor, timeouts::SURFACE_READY_TIMEOUT},
};
use chrono::Utc;
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, RwLock, broadcast, oneshot},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

/// How long a reload waits for every pipeline to finish its tick
pub const RELOAD_HOLD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("At most {max} tables can run at once")]
    TableLimit { max: usize },

    #[error("Table {0} already exists")]
    DuplicateTable(TableId),

    #[error("Table {0} not found")]
    UnknownTable(TableId),

    #[error("Invalid configuration for table {table_id}: {reason}")]
    InvalidTable { table_id: TableId, reason: String },

    #[error("Table {table_id}: {reason}")]
    Rejected { table_id: TableId, reason: String },

    #[error("Table {0} is closed")]
    Closed(TableId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

struct TableEntry {
    handle: TableHandle,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Pause, flush and resume every table around a surface reload
struct ReloadControl {
    control: Arc<Coordination>,
    cache: Arc<PersistenceCache>,
    feed: StatusFeed,
    watch: Arc<dyn SurfaceWatch>,
    hold_timeout: Duration,
    ready_timeout: Duration,
    cancel: CancellationToken,
    running: Mutex<()>,
}

impl ReloadControl {
    async fn run(&self) -> Result<usize, OrchestratorError> {
        let _one_at_a_time = self.running.lock().await;

        log::warn!("Surface reloaded, pausing every table");
        self.control.set_global_pause(true);
        self.feed
            .publish(StatusEvent::SurfaceReloaded { at: Utc::now() });

        if !self.control.wait_until_held(self.hold_timeout).await {
            log::warn!(
                "Not every table held within {:?}, flushing anyway",
                self.hold_timeout
            );
        }

        let flushed = self.cache.flush_all().await;
        if let Ok(count) = &flushed {
            log::info!("Flushed {} tables before waiting for the surface", count);
        }

        loop {
            tokio::select! {
                ready = self.watch.wait_ready(self.ready_timeout) => {
                    if ready {
                        break;
                    }
                    log::warn!(
                        "Surface not ready after {:?}, still waiting",
                        self.ready_timeout
                    );
                }
                _ = self.cancel.cancelled() => return Err(OrchestratorError::ShuttingDown),
            }
        }

        self.control.set_global_pause(false);
        self.feed
            .publish(StatusEvent::SurfaceRestored { at: Utc::now() });
        log::info!("Surface ready, tables resuming");

        Ok(flushed?)
    }
}

/// Orchestrator for up to [`MAX_TABLES`] table pipelines sharing one surface
pub struct Orchestrator {
    settings: GlobalSettings,

    /// Shared with every pipeline
    ctx: Arc<PipelineContext>,

    reload: Arc<ReloadControl>,

    /// Active table pipelines
    tables: Arc<RwLock<HashMap<TableId, TableEntry>>>,

    /// Parent of every pipeline and background task token
    cancel: CancellationToken,

    /// Resource monitor and surface watcher
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// # Arguments
    ///
    /// * `settings` - Validated global settings
    /// * `collaborators` - Capture, recognition, click and surface-watch implementations
    /// * `session_dir` - Folder receiving every table's files
    ///
    /// # Returns
    ///
    /// * `Orchestrator` - Orchestrator with an empty roster
    pub fn new(
        settings: GlobalSettings,
        collaborators: Collaborators,
        session_dir: impl Into<PathBuf>,
    ) -> Self {
        let feed = StatusFeed::new(settings.status_capacity);
        let control = Arc::new(Coordination::new());
        let cache = Arc::new(PersistenceCache::new(session_dir));
        let cancel = CancellationToken::new();

        let ctx = Arc::new(PipelineContext {
            gate: Arc::new(CaptureGate::new(
                collaborators.surface.clone(),
                settings.op_timeout(),
            )),
            primary: collaborators.primary.clone(),
            fallback: collaborators.fallback.clone(),
            clicker: collaborators.clicker.clone(),
            cache: cache.clone(),
            control: control.clone(),
            feed: feed.clone(),
            cadence: settings.cadence(),
            drift_tolerance_px: settings.drift_tolerance_px,
            confirm_delay_ms: settings.confirm_delay_range(),
        });

        let reload = Arc::new(ReloadControl {
            control,
            cache,
            feed,
            watch: collaborators.watch.clone(),
            hold_timeout: RELOAD_HOLD_TIMEOUT,
            ready_timeout: SURFACE_READY_TIMEOUT,
            cancel: cancel.clone(),
            running: Mutex::new(()),
        });

        Self {
            settings,
            ctx,
            reload,
            tables: Arc::new(RwLock::new(HashMap::new())),
            cancel,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn feed(&self) -> StatusFeed {
        self.ctx.feed.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.ctx.feed.subscribe()
    }

    pub fn control(&self) -> Arc<Coordination> {
        self.ctx.control.clone()
    }

    pub fn cache(&self) -> Arc<PersistenceCache> {
        self.ctx.cache.clone()
    }

    /// Start the CPU monitor and the surface watcher
    pub async fn start(&self) {
        let monitor = ResourceMonitor::new().spawn(
            self.settings.cpu_sample_interval(),
            self.settings.cpu_threshold,
            self.ctx.control.clone(),
            self.ctx.feed.clone(),
            self.cancel.child_token(),
        );
        let watcher = spawn_watcher(self.reload.clone(), self.settings.cadence().slow);

        self.background.lock().await.extend([monitor, watcher]);
        log::info!("Orchestrator started");
    }

    /// Add a table and spawn its pipeline. It stays idle until activated.
    ///
    /// Rounds already in the session folder for this id are recovered so
    /// numbering continues where it stopped.
    ///
    /// # Arguments
    ///
    /// * `config` - Table configuration
    ///
    /// # Returns
    ///
    /// * `Result<(), OrchestratorError>` - Success or error
    pub async fn add_table(&self, config: TableConfig) -> Result<(), OrchestratorError> {
        let table_id = config.id;
        config
            .validate()
            .map_err(|reason| OrchestratorError::InvalidTable { table_id, reason })?;

        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let mut tables = self.tables.write().await;
        if tables.contains_key(&table_id) {
            return Err(OrchestratorError::DuplicateTable(table_id));
        }
        if tables.len() >= MAX_TABLES {
            return Err(OrchestratorError::TableLimit { max: MAX_TABLES });
        }

        let recovered = self.ctx.cache.open_table(table_id).await?;
        let mut machine = RoundStateMachine::new(
            table_id,
            self.settings.machine_config(),
            config.rules.clone(),
        );
        machine.restore(&recovered.rounds);
        if !recovered.rounds.is_empty() {
            log::info!(
                "Table {}: Continuing at round {}",
                table_id,
                machine.next_round_number()
            );
        }

        let cancel = self.cancel.child_token();
        let supervisor = Supervisor::new(table_id, self.settings.recovery_policy(), cancel.clone());
        self.ctx.control.set_status(table_id, TableStatus::Idle);

        let (pipeline, handle) =
            TablePipeline::new(config, machine, supervisor, self.ctx.clone(), cancel.clone());
        let task = tokio::spawn(pipeline.run());

        tables.insert(
            table_id,
            TableEntry {
                handle,
                task,
                cancel,
            },
        );
        drop(tables);

        log::info!("Created and spawned table {}", table_id);
        Ok(())
    }

    /// Stop a table's pipeline, flush its record and drop it from the roster
    pub async fn remove_table(&self, table_id: TableId) -> Result<(), OrchestratorError> {
        let entry = self
            .tables
            .write()
            .await
            .remove(&table_id)
            .ok_or(OrchestratorError::UnknownTable(table_id))?;

        let (tx, rx) = oneshot::channel();
        if entry
            .handle
            .send(TableCommand::Close { response: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        } else {
            entry.cancel.cancel();
        }
        if let Err(e) = entry.task.await {
            log::error!("Table {}: Pipeline task failed: {}", table_id, e);
        }

        self.ctx.control.remove(table_id);
        self.ctx.cache.close_table(table_id).await?;

        log::info!("Closed table {}", table_id);
        Ok(())
    }

    pub async fn activate(&self, table_id: TableId) -> Result<(), OrchestratorError> {
        self.request(table_id, |response| TableCommand::Activate { response })
            .await
    }

    pub async fn pause(&self, table_id: TableId) -> Result<(), OrchestratorError> {
        self.request(table_id, |response| TableCommand::Pause { response })
            .await
    }

    /// Resume a paused table, or recover a table in error
    pub async fn resume(&self, table_id: TableId) -> Result<(), OrchestratorError> {
        self.request(table_id, |response| TableCommand::Resume { response })
            .await
    }

    pub async fn set_rules(
        &self,
        table_id: TableId,
        rules: RuleSet,
    ) -> Result<(), OrchestratorError> {
        self.request(table_id, |response| TableCommand::SetRules { rules, response })
            .await
    }

    /// Pause every table; returns the ids that were paused
    pub async fn pause_all(&self) -> Vec<TableId> {
        let mut paused = Vec::new();
        for table_id in self.roster().await {
            match self.pause(table_id).await {
                Ok(()) => paused.push(table_id),
                Err(e) => log::debug!("Table {}: Not paused: {}", table_id, e),
            }
        }
        paused
    }

    /// Resume every paused or failed table; returns the ids that resumed
    pub async fn resume_all(&self) -> Vec<TableId> {
        let mut resumed = Vec::new();
        for table_id in self.roster().await {
            match self.resume(table_id).await {
                Ok(()) => resumed.push(table_id),
                Err(e) => log::debug!("Table {}: Not resumed: {}", table_id, e),
            }
        }
        resumed
    }

    pub async fn snapshot(&self, table_id: TableId) -> Result<TableSnapshot, OrchestratorError> {
        let handle = self.handle(table_id).await?;

        let (tx, rx) = oneshot::channel();
        handle
            .send(TableCommand::GetSnapshot { response: tx })
            .await
            .map_err(|_| OrchestratorError::Closed(table_id))?;

        rx.await.map_err(|_| OrchestratorError::Closed(table_id))
    }

    pub async fn snapshots(&self) -> Vec<TableSnapshot> {
        let mut snapshots = Vec::new();
        for table_id in self.roster().await {
            if let Ok(snapshot) = self.snapshot(table_id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Table ids in ascending order
    pub async fn roster(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Pause every table, flush, wait for the surface, then resume.
    ///
    /// Called by the surface watcher; exposed for hosts that detect reloads
    /// themselves.
    ///
    /// # Returns
    ///
    /// * `Result<usize, OrchestratorError>` - Number of tables flushed
    pub async fn handle_reload(&self) -> Result<usize, OrchestratorError> {
        self.reload.run().await
    }

    /// Ordered shutdown: cancel pending ticks, wait for in-flight ticks, flush
    /// every table, then release the capture surface.
    ///
    /// # Returns
    ///
    /// * `Result<usize, OrchestratorError>` - Number of tables flushed
    pub async fn shutdown(&self) -> Result<usize, OrchestratorError> {
        log::info!("Orchestrator shutting down");
        self.cancel.cancel();

        let entries: Vec<(TableId, TableEntry)> = self.tables.write().await.drain().collect();
        for (table_id, entry) in entries {
            if let Err(e) = entry.task.await {
                log::error!("Table {}: Pipeline task failed: {}", table_id, e);
            }
        }

        let background: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for task in background {
            if let Err(e) = task.await {
                log::error!("Background task failed: {}", e);
            }
        }

        let flushed = self.ctx.cache.flush_all().await;
        self.ctx.gate.release().await;
        log::info!("Capture surface released");

        Ok(flushed?)
    }

    async fn handle(&self, table_id: TableId) -> Result<TableHandle, OrchestratorError> {
        self.tables
            .read()
            .await
            .get(&table_id)
            .map(|entry| entry.handle.clone())
            .ok_or(OrchestratorError::UnknownTable(table_id))
    }

    async fn request<F>(&self, table_id: TableId, make: F) -> Result<(), OrchestratorError>
    where
        F: FnOnce(oneshot::Sender<TableResponse>) -> TableCommand,
    {
        let handle = self.handle(table_id).await?;

        let (tx, rx) = oneshot::channel();
        handle
            .send(make(tx))
            .await
            .map_err(|_| OrchestratorError::Closed(table_id))?;

        match rx.await.map_err(|_| OrchestratorError::Closed(table_id))? {
            TableResponse::Success => Ok(()),
            TableResponse::InvalidState(reason) => {
                Err(OrchestratorError::Rejected { table_id, reason })
            }
        }
    }
}

fn spawn_watcher(reload: Arc<ReloadControl>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if reload.watch.poll().await == SurfaceState::Reloaded {
                        if let Err(e) = reload.run().await {
                            log::error!("Surface reload handling failed: {}", e);
                        }
                    }
                }
                _ = reload.cancel.cancelled() => {
                    log::debug!("Surface watcher shutting down");
                    break;
                }
            }
        }
    })
}
