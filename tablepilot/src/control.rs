//! Shared coordination state: roster statuses, the global pause flag and the
//! cadence throttle, all behind one `watch` channel.
//!
//! Producers update in place and never wait on readers; readers either clone a
//! snapshot or await a change.

use crate::{TableId, round::TableStatus};
use std::{collections::BTreeMap, time::Duration};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub status: TableStatus,

    /// The pipeline has acknowledged the current global pause
    pub held: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub roster: BTreeMap<TableId, RosterEntry>,
    pub global_pause: bool,
    pub throttle: f64,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            roster: BTreeMap::new(),
            global_pause: false,
            throttle: 1.0,
        }
    }
}

impl ControlState {
    /// Every table that can tick has acknowledged the global pause
    pub fn all_held(&self) -> bool {
        self.roster
            .values()
            .all(|e| e.held || matches!(e.status, TableStatus::Idle | TableStatus::Error))
    }
}

#[derive(Debug)]
pub struct Coordination {
    tx: watch::Sender<ControlState>,
}

impl Default for Coordination {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordination {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ControlState {
        self.tx.borrow().clone()
    }

    pub fn global_pause(&self) -> bool {
        self.tx.borrow().global_pause
    }

    pub fn throttle(&self) -> f64 {
        self.tx.borrow().throttle
    }

    pub fn set_status(&self, id: TableId, status: TableStatus) {
        self.tx.send_if_modified(|state| {
            let entry = state.roster.entry(id).or_insert(RosterEntry {
                status,
                held: false,
            });
            let changed = entry.status != status;
            entry.status = status;
            changed
        });
    }

    pub fn set_held(&self, id: TableId, held: bool) {
        self.tx.send_if_modified(|state| match state.roster.get_mut(&id) {
            Some(entry) if entry.held != held => {
                entry.held = held;
                true
            }
            _ => false,
        });
    }

    pub fn remove(&self, id: TableId) {
        self.tx
            .send_if_modified(|state| state.roster.remove(&id).is_some());
    }

    /// Returns `true` if the flag changed
    pub fn set_global_pause(&self, paused: bool) -> bool {
        self.tx.send_if_modified(|state| {
            if state.global_pause == paused {
                return false;
            }
            state.global_pause = paused;
            if !paused {
                for entry in state.roster.values_mut() {
                    entry.held = false;
                }
            }
            true
        })
    }

    pub fn set_throttle(&self, factor: f64) {
        self.tx.send_if_modified(|state| {
            if (state.throttle - factor).abs() < f64::EPSILON {
                return false;
            }
            state.throttle = factor;
            true
        });
    }

    /// Wait until every tickable table has acknowledged the global pause.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_until_held(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(ControlState::all_held))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_status_updates_visible_in_snapshot() {
        let c = Coordination::new();
        c.set_status(1, TableStatus::Learning);
        c.set_status(2, TableStatus::Active);
        c.set_throttle(1.5);
        let snap = c.snapshot();
        assert_eq!(snap.roster[&1].status, TableStatus::Learning);
        assert_eq!(snap.roster[&2].status, TableStatus::Active);
        assert_eq!(snap.throttle, 1.5);
    }

    #[test]
    fn test_all_held_ignores_idle_and_error() {
        let c = Coordination::new();
        c.set_status(1, TableStatus::Active);
        c.set_status(2, TableStatus::Error);
        c.set_status(3, TableStatus::Idle);
        assert!(!c.snapshot().all_held());
        c.set_held(1, true);
        assert!(c.snapshot().all_held());
    }

    #[test]
    fn test_release_clears_held() {
        let c = Coordination::new();
        c.set_status(1, TableStatus::Active);
        assert!(c.set_global_pause(true));
        assert!(!c.set_global_pause(true));
        c.set_held(1, true);
        assert!(c.set_global_pause(false));
        assert!(!c.snapshot().roster[&1].held);
    }

    #[tokio::test]
    async fn test_wait_until_held() {
        let c = Arc::new(Coordination::new());
        c.set_status(1, TableStatus::Active);
        c.set_status(2, TableStatus::Learning);
        c.set_global_pause(true);

        let acker = c.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            acker.set_held(1, true);
            acker.set_held(2, true);
        });
        assert!(c.wait_until_held(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_wait_until_held_times_out() {
        let c = Coordination::new();
        c.set_status(1, TableStatus::Active);
        assert!(!c.wait_until_held(Duration::from_millis(20)).await);
    }
}
