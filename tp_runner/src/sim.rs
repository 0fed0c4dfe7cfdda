//! Simulated tables behind the collaborator traits.
//!
//! Each table runs its own round clock: the timer counts down from 25, sits
//! at 0 while the round settles, then a random side scores and the timer
//! jumps back up. Failures are injected at the configured rate.

use crate::config::SimConfig;
use async_trait::async_trait;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tablepilot::{
    MAX_TABLES, PatternRule, RuleSet, TableId, Team,
    collab::{
        CaptureSurface, Clicker, Collaborators, Frame, Reading, ReadingKind, Recognizer,
        SurfaceState, SurfaceWatch,
    },
    geometry::{Point, Region, TableGeometry},
    round::MAX_TIMER,
    supervisor::{ActionError, CaptureError, RecognitionError},
    table::{RosterConfig, RosterTable},
};
use tokio::time::Instant;

const TABLE_WIDTH: u32 = 400;
const TABLE_HEIGHT: u32 = 300;
const GAP: i32 = 20;
const COLUMNS: i32 = 3;

/// Where generated tables sit on the canvas
pub fn slot(id: TableId) -> Region {
    let index = i32::from(id) - 1;
    let x = (index % COLUMNS) * (TABLE_WIDTH as i32 + GAP);
    let y = (index / COLUMNS) * (TABLE_HEIGHT as i32 + GAP);
    Region::new(x, y, TABLE_WIDTH, TABLE_HEIGHT)
}

pub fn generated_geometry(id: TableId) -> TableGeometry {
    TableGeometry {
        table: slot(id),
        blue_button: Point::new(80, 250),
        red_button: Point::new(320, 250),
        confirm_button: Point::new(200, 280),
        cancel_button: Point::new(260, 280),
        timer: Region::new(180, 10, 40, 30),
        blue_score: Region::new(20, 10, 60, 30),
        red_score: Region::new(320, 10, 60, 30),
    }
}

/// Roster of `tables` tables laid out in a grid
pub fn generated_roster(tables: usize) -> RosterConfig {
    // BBP-P;PPB-B
    let default_rules = RuleSet::new(vec![
        PatternRule::new([Team::Red, Team::Red, Team::Blue], Team::Blue),
        PatternRule::new([Team::Blue, Team::Blue, Team::Red], Team::Red),
    ]);

    RosterConfig {
        default_rules,
        tables: (1..=tables.min(MAX_TABLES))
            .map(|i| RosterTable {
                id: i as TableId,
                name: None,
                geometry: generated_geometry(i as TableId),
                rules: None,
            })
            .collect(),
    }
}

/// Countdown and scores of one simulated table
#[derive(Debug, Clone)]
struct TableClock {
    started: Instant,
    rounds_scored: u64,
    blue: u32,
    red: u32,
}

impl TableClock {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            rounds_scored: 0,
            blue: 0,
            red: 0,
        }
    }

    /// Advance to `now`, scoring every round that finished, and read the timer.
    ///
    /// The last sixth of a round is the settle period with the timer at 0.
    fn read(&mut self, now: Instant, round_length: Duration) -> (u8, u32, u32) {
        let length = round_length.as_millis().max(6);
        let elapsed = now.saturating_duration_since(self.started).as_millis();
        let finished = (elapsed / length) as u64;

        let mut rng = rand::rng();
        while self.rounds_scored < finished {
            if rng.random_bool(0.5) {
                self.blue += 1;
            } else {
                self.red += 1;
            }
            self.rounds_scored += 1;
        }

        let countdown = length - length / 6;
        let into_round = elapsed % length;
        let timer = if into_round >= countdown {
            0
        } else {
            ((countdown - into_round) * u128::from(MAX_TIMER)).div_ceil(countdown) as u8
        };
        (timer, self.blue, self.red)
    }
}

/// Simulated canvas holding every table
pub struct SimSurface {
    config: SimConfig,
    tables: Mutex<HashMap<TableId, TableClock>>,
    geometry: HashMap<TableId, Region>,
    last_reload: Mutex<Instant>,
}

impl SimSurface {
    pub fn new(config: SimConfig, roster: &RosterConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            tables: Mutex::new(HashMap::new()),
            geometry: roster
                .tables
                .iter()
                .map(|t| (t.id, t.geometry.table))
                .collect(),
            last_reload: Mutex::new(now),
        }
    }

    fn table_at(&self, region: Region) -> Option<TableId> {
        self.geometry
            .iter()
            .find(|(_, table)| table.contains(region.origin()))
            .map(|(id, _)| *id)
    }

    fn glitch(&self) -> bool {
        self.config.fail_rate > 0.0 && rand::rng().random_bool(self.config.fail_rate)
    }

    fn sample(&self, id: TableId) -> Result<(u8, u32, u32), CaptureError> {
        let now = Instant::now();
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| CaptureError::Failed("simulation state poisoned".to_string()))?;
        let clock = tables.entry(id).or_insert_with(|| TableClock::new(now));
        Ok(clock.read(now, self.config.round_length))
    }
}

#[async_trait]
impl CaptureSurface for SimSurface {
    async fn capture(&self, region: Region) -> Result<Frame, CaptureError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.glitch() {
            return Err(CaptureError::Failed("simulated capture glitch".to_string()));
        }

        let id = self
            .table_at(region)
            .ok_or_else(|| CaptureError::Failed(format!("no table at {}", region.origin())))?;
        let sample = self.sample(id)?;
        let data =
            serde_json::to_vec(&sample).map_err(|e| CaptureError::Failed(e.to_string()))?;
        Ok(Frame::new(region, data))
    }

    async fn locate_anchor(&self, expected: Region) -> Result<Point, CaptureError> {
        Ok(expected.origin())
    }

    async fn canvas_origin(&self) -> Result<Point, CaptureError> {
        Ok(Point::new(0, 0))
    }

    async fn release(&self) {
        log::info!("Simulated surface released");
    }
}

#[async_trait]
impl SurfaceWatch for SimSurface {
    async fn poll(&self) -> SurfaceState {
        let Some(every) = self.config.reload_every else {
            return SurfaceState::Ready;
        };
        let Ok(mut last) = self.last_reload.lock() else {
            return SurfaceState::Ready;
        };
        if last.elapsed() >= every {
            *last = Instant::now();
            SurfaceState::Reloaded
        } else {
            SurfaceState::Ready
        }
    }

    async fn wait_ready(&self, timeout: Duration) -> bool {
        let pause = Duration::from_secs(1);
        tokio::time::sleep(pause.min(timeout)).await;
        pause <= timeout
    }
}

/// Decodes simulated frames; the primary reader fails at the configured rate
pub struct SimRecognizer {
    name: &'static str,
    fail_rate: f64,
}

impl SimRecognizer {
    pub fn primary(fail_rate: f64) -> Self {
        Self {
            name: "sim-primary",
            fail_rate,
        }
    }

    pub fn fallback() -> Self {
        Self {
            name: "sim-fallback",
            fail_rate: 0.0,
        }
    }
}

#[async_trait]
impl Recognizer for SimRecognizer {
    fn name(&self) -> &str {
        self.name
    }

    async fn recognize(&self, frame: &Frame, kind: ReadingKind) -> Result<Reading, RecognitionError> {
        if self.fail_rate > 0.0 && rand::rng().random_bool(self.fail_rate) {
            return Err(RecognitionError::Unreadable {
                what: "digits".to_string(),
            });
        }

        let (timer, blue, red): (u8, u32, u32) = serde_json::from_slice(&frame.data)
            .map_err(|e| RecognitionError::Backend(e.to_string()))?;
        Ok(match kind {
            ReadingKind::Timer(_) => Reading::Timer(timer),
            ReadingKind::Scores { .. } => Reading::Scores { blue, red },
        })
    }
}

/// Logs clicks; rejects some at half the failure rate
pub struct SimClicker {
    fail_rate: f64,
}

#[async_trait]
impl Clicker for SimClicker {
    async fn click(&self, at: Point) -> Result<(), ActionError> {
        let reject = self.fail_rate > 0.0 && rand::rng().random_bool(self.fail_rate / 2.0);
        if reject {
            return Err(ActionError::Rejected {
                x: at.x,
                y: at.y,
                reason: "simulated miss".to_string(),
            });
        }
        log::debug!("Simulated click at {}", at);
        Ok(())
    }
}

/// Collaborators backed by one simulated surface
pub fn collaborators(config: &SimConfig, roster: &RosterConfig) -> Collaborators {
    let surface = Arc::new(SimSurface::new(config.clone(), roster));
    Collaborators {
        surface: surface.clone(),
        primary: Arc::new(SimRecognizer::primary(config.fail_rate)),
        fallback: Arc::new(SimRecognizer::fallback()),
        clicker: Arc::new(SimClicker {
            fail_rate: config.fail_rate,
        }),
        watch: surface,
    }
}
