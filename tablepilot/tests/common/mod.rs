//! Scripted collaborators shared by the integration tests.
//!
//! Every table sits at its own horizontal slot on one canvas. Captures are
//! mapped back to the table by region, and each capture pops the next
//! scripted `(timer, blue, red)` sample for that table. Once a script runs
//! out the last sample repeats.
#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tablepilot::{
    GlobalSettings, Orchestrator, RoundOutcome, TableConfig, TableId, TableStatus, Team,
    collab::{
        CaptureSurface, Clicker, Collaborators, Frame, Reading, ReadingKind, Recognizer,
        SurfaceState, SurfaceWatch,
    },
    geometry::{Point, Region, TableGeometry},
    status::{StatusEvent, TableSnapshot},
    store::TableStore,
    supervisor::{ActionError, CaptureError, RecognitionError},
};
use tokio::sync::broadcast;

pub type Sample = (u8, u32, u32);

pub const CANVAS: Point = Point::new(100, 50);
pub const TABLE_SPACING: i32 = 500;

pub fn geometry(id: TableId) -> TableGeometry {
    TableGeometry {
        table: Region::new((i32::from(id) - 1) * TABLE_SPACING, 0, 400, 300),
        blue_button: Point::new(50, 250),
        red_button: Point::new(350, 250),
        confirm_button: Point::new(200, 280),
        cancel_button: Point::new(260, 280),
        timer: Region::new(180, 10, 40, 30),
        blue_score: Region::new(20, 10, 60, 30),
        red_score: Region::new(320, 10, 60, 30),
    }
}

/// Nearest table slot, so small drift still maps to the same table
pub fn table_of(region: Region) -> TableId {
    ((region.x + TABLE_SPACING / 2) / TABLE_SPACING + 1) as TableId
}

pub fn table(id: TableId, rules: &str) -> TableConfig {
    TableConfig::new(id, geometry(id), rules.parse().unwrap())
}

pub fn settings(dir: &Path) -> GlobalSettings {
    GlobalSettings {
        data_dir: dir.to_path_buf(),
        interval_normal_ms: 5,
        interval_fast_ms: 5,
        interval_slow_ms: 10,
        op_timeout_ms: 1000,
        ..GlobalSettings::default()
    }
}

/// Samples for a run of rounds with the given winners.
///
/// Each round counts down from 25 to 0; the winner's score moves at the next
/// round's opening sample. The script ends inside an extra round whose timer
/// is already low, so no further decision is possible.
pub fn script(winners: &[Team]) -> Vec<Sample> {
    let (mut blue, mut red) = (0, 0);
    let mut samples = Vec::new();
    for winner in winners {
        for timer in [25, 20, 15, 10, 7, 5, 2, 0] {
            samples.push((timer, blue, red));
        }
        match winner {
            Team::Blue => blue += 1,
            Team::Red => red += 1,
        }
    }
    samples.push((25, blue, red));
    samples.push((3, blue, red));
    samples
}

#[derive(Default)]
pub struct World {
    scripts: Mutex<HashMap<TableId, VecDeque<Sample>>>,
    last: Mutex<HashMap<TableId, Sample>>,
    failing_captures: Mutex<HashSet<TableId>>,
    failing_primary: Mutex<HashSet<TableId>>,
    anchor_offsets: Mutex<HashMap<TableId, (i32, i32)>>,
    clicks: Mutex<Vec<Point>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    released: AtomicBool,
    reload_pending: AtomicBool,
    ready_probe: Mutex<Option<(PathBuf, Vec<TableId>)>>,
    state_files_at_ready: Mutex<Option<bool>>,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_script(&self, id: TableId, samples: Vec<Sample>) {
        self.scripts.lock().unwrap().insert(id, samples.into());
    }

    pub fn fail_captures(&self, id: TableId, failing: bool) {
        let mut set = self.failing_captures.lock().unwrap();
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    pub fn fail_primary(&self, id: TableId) {
        self.failing_primary.lock().unwrap().insert(id);
    }

    pub fn move_table(&self, id: TableId, dx: i32, dy: i32) {
        self.anchor_offsets.lock().unwrap().insert(id, (dx, dy));
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn trigger_reload(&self) {
        self.reload_pending.store(true, Ordering::SeqCst);
    }

    /// When the surface is next awaited, record whether every listed table's
    /// state file is already on disk.
    pub fn probe_state_files(&self, dir: &Path, ids: &[TableId]) {
        *self.ready_probe.lock().unwrap() = Some((dir.to_path_buf(), ids.to_vec()));
    }

    pub fn state_files_at_ready(&self) -> Option<bool> {
        *self.state_files_at_ready.lock().unwrap()
    }

    fn next_sample(&self, id: TableId) -> Sample {
        let popped = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|samples| samples.pop_front());
        let mut last = self.last.lock().unwrap();
        match popped {
            Some(sample) => {
                last.insert(id, sample);
                sample
            }
            None => last.get(&id).copied().unwrap_or((0, 0, 0)),
        }
    }
}

#[async_trait]
impl CaptureSurface for World {
    async fn capture(&self, region: Region) -> Result<Frame, CaptureError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let id = table_of(region);
        if self.failing_captures.lock().unwrap().contains(&id) {
            return Err(CaptureError::Failed("scripted capture failure".to_string()));
        }
        let sample = self.next_sample(id);
        Ok(Frame::new(region, serde_json::to_vec(&sample).unwrap()))
    }

    async fn locate_anchor(&self, expected: Region) -> Result<Point, CaptureError> {
        let id = table_of(expected);
        let (dx, dy) = self
            .anchor_offsets
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or((0, 0));
        Ok(geometry(id).table.origin().offset(dx, dy))
    }

    async fn canvas_origin(&self) -> Result<Point, CaptureError> {
        Ok(CANVAS)
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clicker for World {
    async fn click(&self, at: Point) -> Result<(), ActionError> {
        self.clicks.lock().unwrap().push(at);
        Ok(())
    }
}

#[async_trait]
impl SurfaceWatch for World {
    async fn poll(&self) -> SurfaceState {
        if self.reload_pending.swap(false, Ordering::SeqCst) {
            SurfaceState::Reloaded
        } else {
            SurfaceState::Ready
        }
    }

    async fn wait_ready(&self, _timeout: Duration) -> bool {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let probe = self.ready_probe.lock().unwrap().clone();
        if let Some((dir, ids)) = probe {
            let present = ids
                .iter()
                .all(|id| dir.join(TableStore::state_file_name(*id)).exists());
            *self.state_files_at_ready.lock().unwrap() = Some(present);
        }
        true
    }
}

/// Reads the sample encoded in the frame; optionally broken for some tables
pub struct Reader {
    world: Arc<World>,
    fallback: bool,
}

#[async_trait]
impl Recognizer for Reader {
    fn name(&self) -> &str {
        if self.fallback { "fallback" } else { "primary" }
    }

    async fn recognize(&self, frame: &Frame, kind: ReadingKind) -> Result<Reading, RecognitionError> {
        let id = table_of(frame.region);
        if !self.fallback && self.world.failing_primary.lock().unwrap().contains(&id) {
            return Err(RecognitionError::Unreadable {
                what: "digits".to_string(),
            });
        }

        let (timer, blue, red): Sample = serde_json::from_slice(&frame.data)
            .map_err(|e| RecognitionError::Backend(e.to_string()))?;
        Ok(match kind {
            ReadingKind::Timer(_) => Reading::Timer(timer),
            ReadingKind::Scores { .. } => Reading::Scores { blue, red },
        })
    }
}

pub fn collaborators(world: &Arc<World>) -> Collaborators {
    Collaborators {
        surface: world.clone(),
        primary: Arc::new(Reader {
            world: world.clone(),
            fallback: false,
        }),
        fallback: Arc::new(Reader {
            world: world.clone(),
            fallback: true,
        }),
        clicker: world.clone(),
        watch: world.clone(),
    }
}

pub fn orchestrator(world: &Arc<World>, dir: &Path) -> Orchestrator {
    Orchestrator::new(settings(dir), collaborators(world), dir)
}

/// Wait until `rounds` rounds of a table are complete
pub async fn wait_for_rounds(orch: &Orchestrator, id: TableId, rounds: u64) -> TableSnapshot {
    for _ in 0..20_000 {
        let snapshot = orch.snapshot(id).await.unwrap();
        if snapshot.next_round_number > rounds {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("table {id} never completed {rounds} rounds");
}

pub async fn wait_for_status(orch: &Orchestrator, id: TableId, status: TableStatus) -> TableSnapshot {
    for _ in 0..20_000 {
        let snapshot = orch.snapshot(id).await.unwrap();
        if snapshot.status == status {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("table {id} never reached {status:?}");
}

/// Next event matching `pred`, skipping everything else
pub async fn next_event<F>(rx: &mut broadcast::Receiver<StatusEvent>, mut pred: F) -> StatusEvent
where
    F: FnMut(&StatusEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("status feed closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(300), wait)
        .await
        .expect("event never arrived")
}

/// Everything currently buffered in the receiver
pub fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

pub fn persisted_rounds(dir: &Path, id: TableId) -> Vec<RoundOutcome> {
    TableStore::open(dir, id).unwrap().1.rounds
}
