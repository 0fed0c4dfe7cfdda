//! Table pipeline: one task per table, driven by ticks and commands.

use super::{
    config::TableConfig,
    messages::{TableCommand, TableResponse},
};
use crate::{
    TableId,
    collab::{Clicker, Reading, ReadingKind, Recognizer},
    control::Coordination,
    gate::CaptureGate,
    geometry::{Button, Point, TableGeometry},
    pattern::Team,
    round::{ActionRequest, RoundOutcome, RoundStateMachine, Sample},
    schedule::Cadence,
    status::{Alert, StatusEvent, StatusFeed, TableSnapshot},
    store::{PersistenceCache, StoreError, TableRecord},
    supervisor::{
        FailureClass, GuardError, OperationError, RecognitionError, Supervisor, with_timeout,
    },
};
use chrono::Utc;
use rand::Rng;
use std::{collections::VecDeque, ops::RangeInclusive, sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

/// Pipeline handle for sending commands
#[derive(Clone)]
pub struct TableHandle {
    sender: mpsc::Sender<TableCommand>,
    table_id: TableId,
}

impl TableHandle {
    pub fn new(sender: mpsc::Sender<TableCommand>, table_id: TableId) -> Self {
        Self { sender, table_id }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Send a command to the table
    pub async fn send(&self, command: TableCommand) -> Result<(), String> {
        self.sender
            .send(command)
            .await
            .map_err(|_| "Table is closed".to_string())
    }
}

/// Everything the pipelines share
pub struct PipelineContext {
    pub gate: Arc<CaptureGate>,
    pub primary: Arc<dyn Recognizer>,
    pub fallback: Arc<dyn Recognizer>,
    pub clicker: Arc<dyn Clicker>,
    pub cache: Arc<PersistenceCache>,
    pub control: Arc<Coordination>,
    pub feed: StatusFeed,
    pub cadence: Cadence,
    pub drift_tolerance_px: u32,
    pub confirm_delay_ms: RangeInclusive<u64>,
}

/// Pipeline owning one table's round state and recovery state
pub struct TablePipeline {
    id: TableId,
    config: TableConfig,
    machine: RoundStateMachine,
    supervisor: Supervisor,
    ctx: Arc<PipelineContext>,
    inbox: mpsc::Receiver<TableCommand>,
    cancel: CancellationToken,

    /// Canvas origin, cached until the next surface reload
    canvas: Option<Point>,

    /// Completed rounds not yet on disk, oldest first
    unsaved: VecDeque<RoundOutcome>,

    /// Acknowledged the global pause
    reload_hold: bool,

    /// The global pause (not the user) paused this table
    paused_for_reload: bool,

    /// Phase name in the last published snapshot
    published: Option<&'static str>,
}

impl TablePipeline {
    /// Create a new table pipeline
    ///
    /// # Arguments
    ///
    /// * `config` - Table configuration
    /// * `machine` - Round state, already restored from persisted rounds
    /// * `supervisor` - Recovery supervisor for this table
    /// * `ctx` - Shared collaborators and channels
    /// * `cancel` - Stops the pipeline between ticks
    ///
    /// # Returns
    ///
    /// * `(TablePipeline, TableHandle)` - Pipeline and handle for sending commands
    pub fn new(
        config: TableConfig,
        machine: RoundStateMachine,
        supervisor: Supervisor,
        ctx: Arc<PipelineContext>,
        cancel: CancellationToken,
    ) -> (Self, TableHandle) {
        let (sender, inbox) = mpsc::channel(100);
        let id = config.id;

        let pipeline = Self {
            id,
            config,
            machine,
            supervisor,
            ctx,
            inbox,
            cancel,
            canvas: None,
            unsaved: VecDeque::new(),
            reload_hold: false,
            paused_for_reload: false,
            published: None,
        };

        (pipeline, TableHandle::new(sender, id))
    }

    /// Run the pipeline event loop
    pub async fn run(mut self) {
        log::info!("Table {} '{}' starting", self.id, self.config.name);

        let mut control = self.ctx.control.subscribe();
        let paused = control.borrow_and_update().global_pause;
        self.on_global_pause(paused).await;
        self.publish_status(true).await;

        let mut next_tick = Instant::now();
        loop {
            let ticking = self.ticks();
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = self.inbox.recv() => {
                    let Some(command) = command else { break };
                    if self.handle_command(command, &mut next_tick).await {
                        break;
                    }
                }

                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let paused = control.borrow_and_update().global_pause;
                    if self.on_global_pause(paused).await {
                        next_tick = Instant::now();
                    }
                }

                _ = tokio::time::sleep_until(next_tick), if ticking => {
                    self.tick().await;
                    self.publish_status(false).await;
                    next_tick = Instant::now() + self.next_interval();
                }
            }
        }

        self.persist_pending().await;
        if !self.unsaved.is_empty() {
            log::error!(
                "Table {}: Closing with {} rounds not persisted",
                self.id,
                self.unsaved.len()
            );
        }
        log::info!("Table {} '{}' closed", self.id, self.config.name);
    }

    /// Returns `true` when the pipeline should stop
    async fn handle_command(&mut self, command: TableCommand, next_tick: &mut Instant) -> bool {
        match command {
            TableCommand::Activate { response } => {
                let result = match self.machine.activate() {
                    Ok(()) => {
                        log::info!("Table {}: Activated, learning", self.id);
                        *next_tick = Instant::now();
                        TableResponse::Success
                    }
                    Err(e) => TableResponse::InvalidState(e.to_string()),
                };
                self.publish_status(false).await;
                let _ = response.send(result);
            }

            TableCommand::Pause { response } => {
                let result = self.pause();
                self.publish_status(false).await;
                let _ = response.send(result);
            }

            TableCommand::Resume { response } => {
                let result = self.resume();
                if result == TableResponse::Success {
                    *next_tick = Instant::now();
                }
                self.publish_status(true).await;
                let _ = response.send(result);
            }

            TableCommand::SetRules { rules, response } => {
                log::info!("Table {}: Rules set to {}", self.id, rules);
                self.config.rules = rules.clone();
                self.machine.set_rules(rules);
                self.publish_status(true).await;
                let _ = response.send(TableResponse::Success);
            }

            TableCommand::GetSnapshot { response } => {
                let _ = response.send(self.snapshot());
            }

            TableCommand::Close { response } => {
                let _ = response.send(TableResponse::Success);
                return true;
            }
        }
        false
    }

    fn pause(&mut self) -> TableResponse {
        if self.reload_hold {
            // Stay paused once the reload is over
            return if std::mem::take(&mut self.paused_for_reload) {
                TableResponse::Success
            } else {
                TableResponse::InvalidState(format!("Cannot pause while {}", self.machine.phase()))
            };
        }

        if self.machine.pause() {
            log::info!("Table {}: Paused", self.id);
            TableResponse::Success
        } else {
            TableResponse::InvalidState(format!("Cannot pause while {}", self.machine.phase()))
        }
    }

    fn resume(&mut self) -> TableResponse {
        if self.reload_hold {
            return TableResponse::InvalidState("Surface reload in progress".to_string());
        }

        if self.machine.resume() {
            log::info!("Table {}: Resumed ({})", self.id, self.machine.phase());
        } else if self.machine.recover().is_ok() {
            log::info!("Table {}: Recovered from error, deciding", self.id);
            self.canvas = None;
        } else {
            return TableResponse::InvalidState(format!(
                "Cannot resume while {}",
                self.machine.phase()
            ));
        }

        self.supervisor.reset();
        TableResponse::Success
    }

    /// Returns `true` if the table should tick right away
    async fn on_global_pause(&mut self, paused: bool) -> bool {
        if paused && !self.reload_hold {
            self.reload_hold = true;
            self.paused_for_reload = self.machine.pause();
            log::info!("Table {}: Holding for surface reload", self.id);
            self.publish_status(false).await;
            self.ctx.control.set_held(self.id, true);
            false
        } else if !paused && self.reload_hold {
            self.reload_hold = false;
            self.canvas = None;
            if std::mem::take(&mut self.paused_for_reload) {
                self.machine.resume();
            }
            log::info!(
                "Table {}: Surface restored, continuing ({})",
                self.id,
                self.machine.phase()
            );
            self.publish_status(false).await;
            true
        } else {
            false
        }
    }

    fn ticks(&self) -> bool {
        !self.reload_hold && self.machine.phase().observes()
    }

    fn next_interval(&self) -> Duration {
        self.ctx.cadence.interval(
            self.machine.last_sample().map(|s| s.timer),
            self.ctx.control.throttle(),
        )
    }

    async fn tick(&mut self) {
        self.persist_pending().await;

        let sample = match self.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.on_guard_error(e);
                return;
            }
        };

        let step = match self.machine.observe(sample) {
            Ok(step) => {
                self.supervisor.record_success(FailureClass::Recognition);
                step
            }
            Err(e) => {
                log::warn!(
                    "Table {}: Implausible sample (timer {}, blue {}, red {}): {}",
                    self.id,
                    sample.timer,
                    sample.blue_score,
                    sample.red_score,
                    e
                );
                let err = OperationError::from(RecognitionError::Implausible(e.to_string()));
                if let Err(e) = self.supervisor.note_failure(err) {
                    self.on_guard_error(e);
                }
                return;
            }
        };

        if let Some(outcome) = step.completed {
            log::info!(
                "Table {}: Round {} finished {}-{} (blue-red), winner {:?}, decision {:?}",
                self.id,
                outcome.round_number,
                outcome.blue_score,
                outcome.red_score,
                outcome.winner,
                outcome.decision
            );
            self.unsaved.push_back(outcome);
            self.persist_pending().await;
            self.publish_status(true).await;
        }

        if step.drift_check_due {
            self.check_drift().await;
        }

        if let Some(action) = step.action {
            self.execute(action).await;
        }
    }

    /// Capture the table and read timer and scores
    async fn sample(&mut self) -> Result<Sample, GuardError> {
        let ctx = self.ctx.clone();
        let geometry = self.config.geometry.clone();
        let timeout = self.supervisor.policy().op_timeout;

        self.supervisor
            .guard("sample", &[FailureClass::Capture], move |attempt| {
                let ctx = ctx.clone();
                let geometry = geometry.clone();
                async move {
                    let recognizer = if attempt.fallback {
                        &ctx.fallback
                    } else {
                        &ctx.primary
                    };
                    read_sample(&ctx.gate, recognizer.as_ref(), &geometry, timeout).await
                }
            })
            .await
    }

    async fn canvas(&mut self) -> Result<Point, GuardError> {
        if let Some(origin) = self.canvas {
            return Ok(origin);
        }

        let gate = self.ctx.gate.clone();
        let origin = self
            .supervisor
            .guard("canvas origin", &[FailureClass::Capture], move |_| {
                let gate = gate.clone();
                async move { gate.canvas_origin().await }
            })
            .await?;
        self.canvas = Some(origin);
        Ok(origin)
    }

    async fn click(&mut self, operation: &str, at: Point) -> Result<(), GuardError> {
        let clicker = self.ctx.clicker.clone();
        let timeout = self.supervisor.policy().op_timeout;

        self.supervisor
            .guard(operation, &[FailureClass::Action], move |_| {
                let clicker = clicker.clone();
                async move { with_timeout(timeout, FailureClass::Action, clicker.click(at)).await }
            })
            .await
    }

    /// Two-phase action: team button, short random pause, confirm
    async fn execute(&mut self, action: ActionRequest) {
        log::info!(
            "Table {}: Round {} matched {}, backing {}",
            self.id,
            action.round_number,
            action.pattern,
            action.team
        );

        let canvas = match self.canvas().await {
            Ok(origin) => origin,
            Err(e) => {
                self.abandon_action();
                self.on_guard_error(e);
                return;
            }
        };

        let button = match action.team {
            Team::Blue => Button::Blue,
            Team::Red => Button::Red,
        };
        let team_point = self.config.geometry.click_point(canvas, button);
        if let Err(e) = self.click("team click", team_point).await {
            self.abandon_action();
            self.on_guard_error(e);
            return;
        }
        if let Err(e) = self.machine.team_clicked() {
            log::error!("Table {}: {}", self.id, e);
            return;
        }

        let delay = rand::rng().random_range(self.ctx.confirm_delay_ms.clone());
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let confirm_point = self.config.geometry.click_point(canvas, Button::Confirm);
        match self.click("confirm click", confirm_point).await {
            Ok(()) => match self.machine.confirmed() {
                Ok(()) => log::info!(
                    "Table {}: Round {} backed {} at {}",
                    self.id,
                    action.round_number,
                    action.team,
                    team_point
                ),
                Err(e) => log::error!("Table {}: {}", self.id, e),
            },
            Err(e) => {
                let cancel_point = self.config.geometry.click_point(canvas, Button::Cancel);
                let timeout = self.supervisor.policy().op_timeout;
                if let Err(cancel_err) = with_timeout(
                    timeout,
                    FailureClass::Action,
                    self.ctx.clicker.click(cancel_point),
                )
                .await
                {
                    log::warn!(
                        "Table {}: Cancel click at {} failed: {}",
                        self.id,
                        cancel_point,
                        cancel_err
                    );
                }
                self.abandon_action();
                self.on_guard_error(e);
            }
        }
    }

    fn abandon_action(&mut self) {
        match self.machine.action_failed() {
            Ok(()) => log::warn!(
                "Table {}: Action abandoned, round {} recorded as skip",
                self.id,
                self.machine.next_round_number()
            ),
            Err(e) => log::debug!("Table {}: {}", self.id, e),
        }
    }

    async fn check_drift(&mut self) {
        let gate = self.ctx.gate.clone();
        let expected = self.config.geometry.capture_region();
        let observed = self
            .supervisor
            .guard("anchor check", &[FailureClass::Capture], move |_| {
                let gate = gate.clone();
                async move { gate.locate_anchor(expected).await }
            })
            .await;

        match observed {
            Ok(anchor) => {
                let tolerance = self.ctx.drift_tolerance_px;
                if let Some((dx, dy)) = self.config.geometry.drift(anchor, tolerance) {
                    log::warn!(
                        "Table {}: Table moved by ({}, {}) to {}, translating regions",
                        self.id,
                        dx,
                        dy,
                        anchor
                    );
                    self.config.geometry.translate(dx, dy);
                    self.ctx.feed.publish(StatusEvent::GeometryDrift {
                        table_id: self.id,
                        dx,
                        dy,
                    });
                }
            }
            Err(e) => self.on_guard_error(e),
        }
    }

    fn on_guard_error(&mut self, err: GuardError) {
        match err {
            GuardError::Skipped(e) => log::debug!("Table {}: Skipping after {}", self.id, e),
            GuardError::Escalated(stuck) => {
                log::error!("Table {}: Alert raised: {}", self.id, stuck);
                self.ctx.feed.publish(StatusEvent::Alert(Alert {
                    table_id: self.id,
                    at: stuck.at,
                    class: stuck.class,
                    consecutive: stuck.consecutive,
                    context: stuck.last_error,
                }));
                self.machine.fail();
            }
            GuardError::Cancelled => {}
        }
    }

    /// Write completed rounds in order, stopping at the first failure
    async fn persist_pending(&mut self) {
        while let Some(outcome) = self.unsaved.front().cloned() {
            let round_number = outcome.round_number;
            match self
                .ctx
                .cache
                .record_round(self.id, outcome.clone(), self.record())
                .await
            {
                Ok(()) => {
                    self.unsaved.pop_front();
                    self.ctx.feed.publish(StatusEvent::RoundCompleted {
                        table_id: self.id,
                        outcome,
                    });
                }
                Err(StoreError::OutOfOrder { expected, got, .. }) if got < expected => {
                    log::warn!("Table {}: Round {} already persisted", self.id, got);
                    self.unsaved.pop_front();
                }
                Err(e) => {
                    log::error!(
                        "Table {}: Round {} not persisted yet: {}",
                        self.id,
                        round_number,
                        e
                    );
                    break;
                }
            }
        }
    }

    async fn publish_status(&mut self, force: bool) {
        let phase = self.machine.phase().name();
        self.ctx.control.set_status(self.id, self.machine.status());

        if force || self.published != Some(phase) {
            self.published = Some(phase);
            self.ctx.feed.publish(StatusEvent::TableUpdate(self.snapshot()));
            if let Err(e) = self.ctx.cache.update(self.id, self.record()).await {
                log::warn!("Table {}: Cannot update cached record: {}", self.id, e);
            }
        }
    }

    fn snapshot(&self) -> TableSnapshot {
        let sample = self.machine.last_sample();
        TableSnapshot {
            table_id: self.id,
            state: self.machine.phase().name().to_string(),
            status: self.machine.status(),
            last_outcomes: self
                .machine
                .recent_outcomes()
                .map(|o| o.winner.team())
                .collect(),
            last_decision: self.machine.last_decision(),
            rounds_watched: self.machine.rounds_watched(),
            next_round_number: self.machine.next_round_number(),
            timer: sample.map(|s| s.timer),
            blue_score: sample.map(|s| s.blue_score),
            red_score: sample.map(|s| s.red_score),
            rules: self.machine.rules().to_string(),
            counts: self.machine.counts(),
            errors: self.supervisor.summary(),
        }
    }

    fn record(&self) -> TableRecord {
        let last = self.machine.next_round_number() - 1;
        TableRecord {
            table_id: self.id,
            status: self.machine.status(),
            state: self.machine.phase().name().to_string(),
            rules: self.machine.rules().to_string(),
            rounds_watched: self.machine.rounds_watched(),
            last_round_number: (last > 0).then_some(last),
            last_outcomes: self.machine.recent_outcomes().cloned().collect(),
            counts: self.machine.counts(),
            errors: self.supervisor.summary(),
            updated_at: Utc::now(),
        }
    }
}

/// One capture and two recognitions (timer, then both scores)
async fn read_sample(
    gate: &CaptureGate,
    recognizer: &dyn Recognizer,
    geometry: &TableGeometry,
    timeout: Duration,
) -> Result<Sample, OperationError> {
    let frame = gate.capture(geometry.capture_region()).await?;

    let timer = match with_timeout(
        timeout,
        FailureClass::Recognition,
        recognizer.recognize(&frame, ReadingKind::Timer(geometry.timer)),
    )
    .await?
    {
        Reading::Timer(timer) => timer,
        other => {
            return Err(RecognitionError::Unreadable {
                what: format!("timer (got {other:?})"),
            }
            .into());
        }
    };

    let kind = ReadingKind::Scores {
        blue: geometry.blue_score,
        red: geometry.red_score,
    };
    let (blue, red) = match with_timeout(
        timeout,
        FailureClass::Recognition,
        recognizer.recognize(&frame, kind),
    )
    .await?
    {
        Reading::Scores { blue, red } => (blue, red),
        other => {
            return Err(RecognitionError::Unreadable {
                what: format!("scores (got {other:?})"),
            }
            .into());
        }
    };

    Ok(Sample::new(timer, blue, red))
}
