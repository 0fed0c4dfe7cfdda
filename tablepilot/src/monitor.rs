//! Process CPU monitor driving the cadence throttle.

use crate::{
    control::Coordination,
    status::{StatusEvent, StatusFeed},
};
use std::{sync::Arc, time::Duration};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Multiplier applied above the threshold
pub const THROTTLE_MODERATE: f64 = 1.5;

/// Multiplier applied above [`HEAVY_LOAD_PERCENT`]
pub const THROTTLE_HEAVY: f64 = 2.0;

pub const HEAVY_LOAD_PERCENT: f32 = 90.0;

/// Interval multiplier for a CPU reading
pub fn throttle_factor(cpu_percent: f32, threshold: f32) -> f64 {
    if cpu_percent <= threshold {
        1.0
    } else if cpu_percent > HEAVY_LOAD_PERCENT {
        THROTTLE_HEAVY
    } else {
        THROTTLE_MODERATE
    }
}

/// Samples this process's CPU usage
pub struct ResourceMonitor {
    system: System,
    pid: Pid,
    cores: f32,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // First refresh sets the baseline for the CPU delta
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f32)
            .unwrap_or(1.0);

        Self { system, pid, cores }
    }

    /// CPU usage since the previous sample, as a percentage of total capacity
    pub fn sample(&mut self) -> f32 {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));
        self.system
            .process(self.pid)
            .map(|p| p.cpu_usage() / self.cores)
            .unwrap_or(0.0)
    }

    /// Sample every `every` until cancelled, updating the shared throttle.
    ///
    /// A [`StatusEvent::Throttle`] is published whenever the factor changes.
    pub fn spawn(
        mut self,
        every: Duration,
        threshold: f32,
        control: Arc<Coordination>,
        feed: StatusFeed,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cpu = self.sample();
                        let factor = throttle_factor(cpu, threshold);
                        let current = control.throttle();
                        if (current - factor).abs() > f64::EPSILON {
                            log::info!(
                                "CPU at {:.1}% (threshold {:.0}%), cadence x{}",
                                cpu,
                                threshold,
                                factor
                            );
                            control.set_throttle(factor);
                            feed.publish(StatusEvent::Throttle {
                                cpu_percent: cpu,
                                factor,
                            });
                        }
                    }
                    _ = cancel.cancelled() => {
                        log::debug!("Resource monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_bands() {
        assert_eq!(throttle_factor(10.0, 80.0), 1.0);
        assert_eq!(throttle_factor(80.0, 80.0), 1.0);
        assert_eq!(throttle_factor(80.5, 80.0), 1.5);
        assert_eq!(throttle_factor(90.0, 80.0), 1.5);
        assert_eq!(throttle_factor(95.0, 80.0), 2.0);
    }

    #[test]
    fn test_threshold_above_heavy_band() {
        assert_eq!(throttle_factor(93.0, 95.0), 1.0);
        assert_eq!(throttle_factor(96.0, 95.0), 2.0);
        assert_eq!(throttle_factor(60.0, 50.0), 1.5);
    }

    #[test]
    fn test_sample_is_a_percentage() {
        let mut monitor = ResourceMonitor::new();
        let cpu = monitor.sample();
        assert!(cpu >= 0.0);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_cancel() {
        let control = Arc::new(Coordination::new());
        let cancel = CancellationToken::new();
        let handle = ResourceMonitor::new().spawn(
            Duration::from_millis(10),
            80.0,
            control,
            StatusFeed::default(),
            cancel.clone(),
        );
        cancel.cancel();
        handle.await.unwrap();
    }
}
