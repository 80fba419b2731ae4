//! Read-only chamber snapshots for other execution contexts.
//!
//! The control cycle owns all controller state. After each cycle it publishes a
//! copy over a bounded(1) channel; a slow reader only ever sees the newest one.

use crossbeam_channel as xch;

use crate::thermal::{FridgeState, TransitionReason};

#[derive(Debug, Clone, PartialEq)]
pub struct ChamberSnapshot {
    pub at_ms: u64,
    pub state: FridgeState,
    pub last_reason: Option<TransitionReason>,
    pub setpoint_c: f64,
    pub beer_c: f64,
    pub beer_filtered_c: f64,
    pub fridge_c: f64,
    pub fridge_filtered_c: f64,
    /// Primary loop output: fridge air target.
    pub fridge_target_c: f64,
    /// Secondary loop output: heater on-time per window.
    pub heat_duty_ms: f64,
    pub compressor: bool,
    pub heater: bool,
    pub peak_estimator: f64,
    pub conversion_offset_ms: u64,
    pub fault: bool,
    pub hold: bool,
}

/// Sending half; keeps a receiver to evict the stale entry.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    tx: xch::Sender<ChamberSnapshot>,
    drain: xch::Receiver<ChamberSnapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> (Self, xch::Receiver<ChamberSnapshot>) {
        let (tx, rx) = xch::bounded(1);
        (
            Self {
                tx,
                drain: rx.clone(),
            },
            rx,
        )
    }

    /// Publish, replacing an unread snapshot. Never blocks.
    pub fn publish(&self, snap: ChamberSnapshot) {
        let mut snap = snap;
        for _ in 0..2 {
            match self.tx.try_send(snap) {
                Ok(()) => return,
                Err(xch::TrySendError::Full(s)) => {
                    let _ = self.drain.try_recv();
                    snap = s;
                }
                Err(xch::TrySendError::Disconnected(_)) => return,
            }
        }
        tracing::trace!("snapshot dropped under contention");
    }

    /// Another receiver on the same channel.
    pub fn subscribe(&self) -> xch::Receiver<ChamberSnapshot> {
        self.drain.clone()
    }
}
