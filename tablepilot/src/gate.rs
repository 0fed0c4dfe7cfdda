//! Single-capture gate around the shared surface.

use crate::{
    collab::{CaptureSurface, Frame},
    geometry::{Point, Region},
    supervisor::{FailureClass, OperationError, with_timeout},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// Serializes access to the capture surface: at most one capture is in flight
/// at any instant, across every table.
///
/// Waiting for the gate does not count against the call timeout.
pub struct CaptureGate {
    surface: Arc<dyn CaptureSurface>,
    lock: Mutex<()>,
    timeout: Duration,
}

impl CaptureGate {
    pub fn new(surface: Arc<dyn CaptureSurface>, timeout: Duration) -> Self {
        Self {
            surface,
            lock: Mutex::new(()),
            timeout,
        }
    }

    pub async fn capture(&self, region: Region) -> Result<Frame, OperationError> {
        let _guard = self.lock.lock().await;
        with_timeout(self.timeout, FailureClass::Capture, self.surface.capture(region)).await
    }

    pub async fn locate_anchor(&self, expected: Region) -> Result<Point, OperationError> {
        let _guard = self.lock.lock().await;
        with_timeout(
            self.timeout,
            FailureClass::Capture,
            self.surface.locate_anchor(expected),
        )
        .await
    }

    pub async fn canvas_origin(&self) -> Result<Point, OperationError> {
        let _guard = self.lock.lock().await;
        with_timeout(
            self.timeout,
            FailureClass::Capture,
            self.surface.canvas_origin(),
        )
        .await
    }

    /// Release the underlying surface once no capture is in flight
    pub async fn release(&self) {
        let _guard = self.lock.lock().await;
        self.surface.release().await;
    }
}
