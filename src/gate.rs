//! Hand-presence signal derived from the latest detection frame.
//!
//! No hysteresis here: a single empty frame flips the signal. The session
//! countdown reset absorbs flicker.

use tokio::sync::watch;
use tracing::trace;

use crate::hand::DetectionFrame;

pub struct DetectionGate {
    tx: watch::Sender<bool>,
}

impl DetectionGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Update from one detector callback; returns the new presence value
    pub fn observe(&self, frame: &DetectionFrame) -> bool {
        let present = frame.has_hands();
        self.tx.send_if_modified(|current| {
            if *current != present {
                trace!(present, "hand presence changed");
                *current = present;
                true
            } else {
                false
            }
        });
        present
    }

    pub fn hand_present(&self) -> bool {
        *self.tx.borrow()
    }

    /// Change notifications for consumers outside the session loop
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for DetectionGate {
    fn default() -> Self {
        Self::new()
    }
}
