//! Interfaces to the external collaborators.
//!
//! Pixel capture, digit recognition and click delivery live outside this crate.
//! The pipeline talks to them only through these traits.

use crate::{
    geometry::{Point, Region},
    supervisor::{ActionError, CaptureError, RecognitionError},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

/// Captured pixels of one region. The payload is opaque to the core.
#[derive(Debug, Clone)]
pub struct Frame {
    pub region: Region,
    pub captured_at: DateTime<Utc>,
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    pub fn new(region: Region, data: Vec<u8>) -> Self {
        Self {
            region,
            captured_at: Utc::now(),
            data: Arc::new(data),
        }
    }
}

/// What to read from a frame. Regions are relative to the frame origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Timer(Region),
    Scores { blue: Region, red: Region },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Timer(u8),
    Scores { blue: u32, red: u32 },
}

/// Shared capture surface. Reached only through [`CaptureGate`](crate::gate::CaptureGate).
#[async_trait]
pub trait CaptureSurface: Send + Sync {
    async fn capture(&self, region: Region) -> Result<Frame, CaptureError>;

    /// Current position of the table anchor expected near `expected`
    async fn locate_anchor(&self, expected: Region) -> Result<Point, CaptureError>;

    /// Canvas origin on the page, added to every click
    async fn canvas_origin(&self) -> Result<Point, CaptureError>;

    /// Release the surface at shutdown
    async fn release(&self) {}
}

/// Turns a frame into a timer or score reading
#[async_trait]
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, frame: &Frame, kind: ReadingKind)
    -> Result<Reading, RecognitionError>;
}

/// Delivers a click at an absolute page position
#[async_trait]
pub trait Clicker: Send + Sync {
    async fn click(&self, at: Point) -> Result<(), ActionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Ready,

    /// The surface reloaded or navigated away; every table must pause
    Reloaded,
}

/// Watches the shared surface for reloads
#[async_trait]
pub trait SurfaceWatch: Send + Sync {
    async fn poll(&self) -> SurfaceState;

    /// Wait until the surface renders again. Returns `false` on timeout.
    async fn wait_ready(&self, timeout: Duration) -> bool;
}

/// Everything a set of pipelines needs from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub surface: Arc<dyn CaptureSurface>,
    pub primary: Arc<dyn Recognizer>,
    pub fallback: Arc<dyn Recognizer>,
    pub clicker: Arc<dyn Clicker>,
    pub watch: Arc<dyn SurfaceWatch>,
}
