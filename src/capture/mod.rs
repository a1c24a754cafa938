//! Screen capture domain — public API.
//!
//! [`ScreenCapture`] is what the host UI drives. It owns the permission
//! gate and the worker loop on which the [`CaptureSessionManager`] lives;
//! every session mutation is posted to that loop.

mod frame;
mod rotation;
mod session;
mod sink;
mod store;

pub use frame::{decode_rgba, padded_width, row_padding, FrameError};
pub use rotation::{OrientationHandler, RotationWatcher};
pub use session::{
    CaptureSessionManager, CaptureStatus, HostStopHandler, SessionError, SessionInfo, StopReason,
    SURFACE_FLAGS,
};
pub use sink::{FrameOutcome, FrameReadyHandler, FrameSink, SinkStats};
pub use store::{ImageStore, PersistedImage, StoreError};

use crate::config::CaptureConfig;
use crate::host::{CaptureHost, ConsentHandle, PermissionHost};
use crate::permission::{PermissionError, PermissionGate};
use crate::worker::{Worker, WorkerHandle};
use std::sync::{Arc, Mutex, MutexGuard};

const WORKER_NAME: &str = "screencap-worker";

pub struct ScreenCapture {
    gate: Mutex<PermissionGate>,
    permissions: Arc<dyn PermissionHost>,
    worker: Worker<CaptureSessionManager>,
}

impl ScreenCapture {
    /// Builds the facade and starts the worker loop.
    pub fn new(
        config: &CaptureConfig,
        permissions: Arc<dyn PermissionHost>,
        capture_host: Arc<dyn CaptureHost>,
    ) -> std::io::Result<Self> {
        let store = ImageStore::new(config.storage_root.clone(), config.output_format());
        let crop = config.crop_row_padding;
        let surface_name = config.surface_name.clone();

        let worker = Worker::spawn(WORKER_NAME, move |handle| {
            CaptureSessionManager::new(capture_host, handle, FrameSink::new(store, crop), surface_name)
        })?;

        log::info!(
            "[CAPTURE] Ready; images go to {}",
            config.storage_root.display()
        );
        Ok(Self {
            gate: Mutex::new(PermissionGate::new()),
            permissions,
            worker,
        })
    }

    fn gate(&self) -> MutexGuard<'_, PermissionGate> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self) -> WorkerHandle<CaptureSessionManager> {
        self.worker.handle()
    }

    /// Host surface became visible: make sure storage access is in place.
    pub fn on_resume(&self) {
        self.gate().on_resume(self.permissions.as_ref());
    }

    /// "Start capture": asks the user for screen capture consent.
    pub fn start_capture(&self) -> Result<(), PermissionError> {
        self.gate().request_consent(self.permissions.as_ref())
    }

    /// "Stop capture". Runs after any frame already being processed.
    pub fn stop_capture(&self) {
        self.handle().post(|manager: &mut CaptureSessionManager| {
            manager.stop(StopReason::User);
        });
    }

    pub fn on_permission_result(&self, request_code: i32, granted: bool) {
        self.gate()
            .on_permission_result(self.permissions.as_ref(), request_code, granted);
    }

    /// Consent prompt answered. A granted handle starts a session on the worker.
    pub fn on_consent_result(&self, request_code: i32, consent: Option<ConsentHandle>) {
        let Some(consent) = self.gate().on_consent_result(request_code, consent) else {
            return;
        };
        self.handle().post(move |manager: &mut CaptureSessionManager| {
            manager.handle_start(Some(consent));
        });
    }

    /// The platform ended the projection on its own.
    pub fn on_host_stop_signal(&self) {
        self.handle().post(|manager: &mut CaptureSessionManager| {
            manager.stop(StopReason::Host);
        });
    }

    /// Snapshot of the session, taken after every task queued so far.
    pub fn status(&self) -> Option<CaptureStatus> {
        self.handle().call(|manager: &mut CaptureSessionManager| manager.status())
    }

    /// Stops any live session and joins the worker.
    pub fn shutdown(self) -> Option<CaptureStatus> {
        self.stop_capture();
        self.worker.shutdown().map(|manager| manager.status())
    }
}
