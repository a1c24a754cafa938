//! Rotation watcher.
//!
//! Orientation sensors fire constantly, for every small tilt. Only a
//! change of the display's rotation class (portrait <-> landscape and the
//! flipped variants) needs a new mirrored surface, so the watcher keeps
//! the last rotation it acted on and reports only real changes.

use super::session::CaptureSessionManager;
use crate::host::{OrientationListener, Rotation};
use crate::worker::WorkerHandle;

#[derive(Debug, Default)]
pub struct RotationWatcher {
    last: Rotation,
    enabled: bool,
}

impl RotationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching from `current`.
    pub fn enable(&mut self, current: Rotation) {
        self.last = current;
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_rotation(&self) -> Rotation {
        self.last
    }

    /// Records `current` and returns `true` when the surface must be rebuilt.
    pub fn observe(&mut self, current: Rotation) -> bool {
        if !self.enabled || current == self.last {
            return false;
        }
        log::info!(
            "[ROTATION] Display rotation changed: {:?} -> {:?}",
            self.last,
            current
        );
        self.last = current;
        true
    }
}

/// Sensor callback; hands each event to the worker loop.
pub struct OrientationHandler {
    worker: WorkerHandle<CaptureSessionManager>,
}

impl OrientationHandler {
    pub fn new(worker: WorkerHandle<CaptureSessionManager>) -> Self {
        Self { worker }
    }
}

impl OrientationListener for OrientationHandler {
    fn on_orientation_changed(&self, _degrees: i32) {
        // The raw sensor angle is noisy; the display rotation is read on the worker.
        self.worker.post(|manager: &mut CaptureSessionManager| {
            manager.on_orientation_changed();
        });
    }
}
