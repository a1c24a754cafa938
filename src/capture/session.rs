//! Capture session manager.
//!
//! Owns the projection granted by the user, the one live mirrored surface
//! and its frame buffer, the frame sink and the rotation watcher. Lives on
//! the worker loop; every method here runs on that thread.
//!
//! Recreation fails closed: if a rebuilt surface cannot be bound, the
//! whole session is torn down and the error is reported. Nothing retries
//! automatically; capture resumes only after a new start.

use super::rotation::{OrientationHandler, RotationWatcher};
use super::sink::{FrameOutcome, FrameReadyHandler, FrameSink};
use super::store::StoreError;
use crate::host::{
    CaptureHost, ConsentHandle, DisplayMetrics, FrameBuffer, FrameBufferSpec, HostError,
    MirrorSurface, PixelFormat, Projection, StopListener, SurfaceFlags, SurfaceSpec,
    MAX_OUTSTANDING_FRAMES,
};
use crate::worker::WorkerHandle;
use std::sync::Arc;

/// Flags for the mirrored surface: show only our own content, publicly.
pub const SURFACE_FLAGS: SurfaceFlags = SurfaceFlags::OWN_CONTENT_ONLY.union(SurfaceFlags::PUBLIC);

/// Geometry of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub max_frames: usize,
}

/// Who asked for the session to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    Host,
}

/// Snapshot of the manager for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStatus {
    pub session: Option<SessionInfo>,
    pub images_saved: u64,
    pub frames_dropped: u64,
    pub next_image_id: u64,
    pub last_error: Option<String>,
}

impl CaptureStatus {
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }
}

/// One bound mirrored surface and the buffer it renders into.
struct CaptureSession {
    info: SessionInfo,
    surface: Box<dyn MirrorSurface>,
    buffer: Box<dyn FrameBuffer>,
}

impl CaptureSession {
    /// Releases the surface first, then detaches the consumer and frees the buffer.
    fn release(self) {
        let CaptureSession {
            info,
            surface,
            mut buffer,
        } = self;
        drop(surface);
        buffer.set_frame_listener(None);
        drop(buffer);
        log::debug!(
            "[SESSION] Released {}x{} surface and buffer",
            info.width,
            info.height
        );
    }
}

pub struct CaptureSessionManager {
    host: Arc<dyn CaptureHost>,
    worker: WorkerHandle<CaptureSessionManager>,
    surface_name: String,
    projection: Option<Box<dyn Projection>>,
    session: Option<CaptureSession>,
    sink: FrameSink,
    rotation: RotationWatcher,
    orientation_events: bool,
    last_error: Option<String>,
}

impl CaptureSessionManager {
    pub fn new(
        host: Arc<dyn CaptureHost>,
        worker: WorkerHandle<CaptureSessionManager>,
        sink: FrameSink,
        surface_name: impl Into<String>,
    ) -> Self {
        Self {
            host,
            worker,
            surface_name: surface_name.into(),
            projection: None,
            session: None,
            sink,
            rotation: RotationWatcher::new(),
            orientation_events: false,
            last_error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.as_ref().map(|s| s.info)
    }

    pub fn status(&self) -> CaptureStatus {
        let stats = self.sink.stats();
        CaptureStatus {
            session: self.session_info(),
            images_saved: stats.frames_saved,
            frames_dropped: stats.frames_dropped,
            next_image_id: self.sink.store().next_id(),
            last_error: self.last_error.clone(),
        }
    }

    /// Starts mirroring with a granted consent handle.
    pub fn start(&mut self, consent: Option<ConsentHandle>) -> Result<SessionInfo, SessionError> {
        let consent = consent.ok_or(SessionError::InvalidConsent)?;
        // A rejected handle leaves any running session alone.
        let projection = self
            .host
            .open_projection(&consent)
            .ok_or(SessionError::InvalidConsent)?;

        if self.projection.is_some() || self.session.is_some() {
            log::info!("[SESSION] Start requested while active; releasing previous session");
            self.stop(StopReason::User);
        }
        self.projection = Some(projection);

        if let Err(e) = self.sink.store().prepare() {
            self.end_projection(StopReason::User);
            return Err(e.into());
        }

        let info = match self.create_session() {
            Ok(info) => info,
            Err(e) => {
                self.end_projection(StopReason::User);
                return Err(e);
            }
        };

        self.rotation.enable(self.host.display_rotation());
        if self.host.can_detect_orientation() {
            self.host
                .enable_orientation_events(Arc::new(OrientationHandler::new(self.worker.clone())));
            self.orientation_events = true;
        } else {
            log::warn!("[SESSION] Host cannot detect orientation; rotation changes are not tracked");
        }

        if let Some(projection) = self.projection.as_mut() {
            projection.register_stop_listener(Arc::new(HostStopHandler::new(self.worker.clone())));
        }

        self.last_error = None;
        log::info!(
            "[SESSION] Started {}x{} @ {}dpi (depth {})",
            info.width,
            info.height,
            info.density_dpi,
            info.max_frames
        );
        Ok(info)
    }

    /// Rebuilds the surface and buffer against the current display geometry.
    pub fn recreate(&mut self) -> Result<SessionInfo, SessionError> {
        if self.projection.is_none() {
            return Err(SessionError::NotActive);
        }

        if let Some(session) = self.session.take() {
            session.release();
        }

        match self.create_session() {
            Ok(info) => {
                log::info!(
                    "[SESSION] Recreated surface at {}x{} @ {}dpi",
                    info.width,
                    info.height,
                    info.density_dpi
                );
                Ok(info)
            }
            Err(e) => {
                log::error!("[SESSION] Recreation failed, ending capture: {}", e);
                self.stop(StopReason::User);
                Err(e)
            }
        }
    }

    /// Tears the session down. Returns `false` if nothing was active.
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if self.projection.is_none() && self.session.is_none() {
            log::debug!("[SESSION] Stop ({:?}) with no active session", reason);
            return false;
        }

        if let Some(session) = self.session.take() {
            session.release();
        }

        self.rotation.disable();
        if self.orientation_events {
            self.host.disable_orientation_events();
            self.orientation_events = false;
        }

        self.end_projection(reason);
        log::info!("[SESSION] Capture stopped ({:?})", reason);
        true
    }

    /// Saves the newest frame of the live session, if any.
    pub fn on_frame(&mut self) -> FrameOutcome {
        match self.session.as_mut() {
            Some(session) => {
                let (width, height) = (session.info.width, session.info.height);
                self.sink.on_frame(session.buffer.as_mut(), width, height)
            }
            None => FrameOutcome::Empty,
        }
    }

    /// Rebuilds the session when the display rotation class changed.
    /// Returns `true` if a recreation was attempted.
    pub fn on_orientation_changed(&mut self) -> bool {
        if !self.rotation.is_enabled() || self.session.is_none() {
            return false;
        }
        let current = self.host.display_rotation();
        if !self.rotation.observe(current) {
            return false;
        }
        if let Err(e) = self.recreate() {
            self.record_error(&e);
        }
        true
    }

    /// Runs `start` and records the outcome for status queries.
    pub fn handle_start(&mut self, consent: Option<ConsentHandle>) {
        if let Err(e) = self.start(consent) {
            log::error!("[SESSION] Could not start capture: {}", e);
            self.record_error(&e);
        }
    }

    fn record_error(&mut self, error: &SessionError) {
        self.last_error = Some(error.to_string());
    }

    fn end_projection(&mut self, reason: StopReason) {
        if let Some(mut projection) = self.projection.take() {
            projection.unregister_stop_listener();
            if reason == StopReason::User {
                projection.stop();
            }
        }
    }

    /// Allocates a buffer for the current geometry and binds a surface to it.
    fn create_session(&mut self) -> Result<SessionInfo, SessionError> {
        debug_assert!(self.session.is_none());
        let projection = self.projection.as_mut().ok_or(SessionError::NotActive)?;

        let DisplayMetrics {
            width,
            height,
            density_dpi,
        } = self.host.display_metrics();
        if width == 0 || height == 0 || density_dpi == 0 {
            return Err(SessionError::InvalidGeometry {
                width,
                height,
                density_dpi,
            });
        }

        let mut buffer = self
            .host
            .create_frame_buffer(FrameBufferSpec {
                width,
                height,
                format: PixelFormat::Rgba8888,
                max_frames: MAX_OUTSTANDING_FRAMES,
            })
            .map_err(|source| SessionError::Host {
                operation: "create frame buffer",
                source,
            })?;

        let spec = SurfaceSpec {
            name: self.surface_name.clone(),
            width,
            height,
            density_dpi,
            flags: SURFACE_FLAGS,
        };
        let surface = projection
            .create_mirror_surface(&spec, buffer.drawing_target())
            .map_err(|source| SessionError::Host {
                operation: "bind mirrored surface",
                source,
            })?;

        buffer.set_frame_listener(Some(Arc::new(FrameReadyHandler::new(self.worker.clone()))));

        let info = SessionInfo {
            width,
            height,
            density_dpi,
            max_frames: buffer.spec().max_frames,
        };
        self.session = Some(CaptureSession {
            info,
            surface,
            buffer,
        });
        Ok(info)
    }
}

/// Projection-stop callback; hands the signal to the worker loop.
pub struct HostStopHandler {
    worker: WorkerHandle<CaptureSessionManager>,
}

impl HostStopHandler {
    pub fn new(worker: WorkerHandle<CaptureSessionManager>) -> Self {
        Self { worker }
    }
}

impl StopListener for HostStopHandler {
    fn on_stop(&self) {
        log::info!("[SESSION] Host ended the projection");
        self.worker.post(|manager: &mut CaptureSessionManager| {
            manager.stop(StopReason::Host);
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Capture consent is missing or no longer valid")]
    InvalidConsent,

    #[error("No capture session is active")]
    NotActive,

    #[error("Display geometry {width}x{height} @ {density_dpi}dpi cannot be mirrored")]
    InvalidGeometry {
        width: u32,
        height: u32,
        density_dpi: u32,
    },

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),

    #[error("Host failed to {operation}: {source}")]
    Host {
        operation: &'static str,
        #[source]
        source: HostError,
    },
}
