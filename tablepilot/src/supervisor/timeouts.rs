//! Timeout helpers for collaborator calls.
//!
//! Every capture, recognition and click carries a fixed timeout so a hung
//! collaborator turns into an ordinary failure instead of stalling a pipeline.

use super::errors::{FailureClass, OperationError};
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for a single collaborator call (5 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for the surface after a reload (60 seconds)
pub const SURFACE_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a collaborator call with a timeout
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `class` - Failure class reported on expiry
/// * `future` - The call
///
/// # Returns
///
/// * `Result<T, OperationError>` - Call result, or a timeout failure of `class`
pub async fn with_timeout<F, T, E>(
    duration: Duration,
    class: FailureClass,
    future: F,
) -> Result<T, OperationError>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: Into<OperationError>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(OperationError::Timeout {
            class,
            after: duration,
        }),
    }
}
