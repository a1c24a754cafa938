//! Host platform boundary.
//!
//! Everything the capture core needs from the operating system is reached
//! through the traits in this module: permission prompts, display metrics,
//! the orientation sensor, the mirroring service and its frame buffers.
//! The core never talks to a UI framework directly.
//!
//! Two hosts ship with the crate:
//! - [`memory::MemoryHost`]: scripted, in-process; frames are pushed by hand.
//! - [`desktop::DesktopHost`]: mirrors the primary monitor via `xcap`.

pub mod desktop;
pub mod memory;
mod queue;

pub use queue::{FrameProducer, FrameQueue, SubmitOutcome};

use std::sync::Arc;

/// Request code used when asking for storage write access.
pub const STORAGE_PERMISSION_REQUEST: i32 = 1;

/// Request code used when asking for screen capture consent.
pub const CAPTURE_CONSENT_REQUEST: i32 = 100;

/// Maximum number of frames the producer may have outstanding.
pub const MAX_OUTSTANDING_FRAMES: usize = 2;

/// Opaque token for the user's one-time grant to capture the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsentHandle(u64);

impl ConsentHandle {
    pub fn new(token: u64) -> Self {
        Self(token)
    }

    pub fn token(&self) -> u64 {
        self.0
    }
}

/// Logical display geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

/// Display rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Maps a host rotation code (0..=3) to a rotation. Codes wrap.
    pub fn from_code(code: i32) -> Self {
        match code.rem_euclid(4) {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    /// Snaps an angle in degrees to the nearest quarter turn.
    pub fn from_degrees(degrees: f32) -> Self {
        let quarter = (degrees / 90.0).round() as i32;
        Self::from_code(quarter)
    }

    pub fn code(&self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }
}

/// Pixel layout produced by a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
}

/// Parameters for a frame-producing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub max_frames: usize,
}

/// Flags passed to the mirroring service when binding a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFlags(u32);

impl SurfaceFlags {
    pub const PUBLIC: SurfaceFlags = SurfaceFlags(1 << 0);
    pub const OWN_CONTENT_ONLY: SurfaceFlags = SurfaceFlags(1 << 3);

    pub const fn union(self, other: SurfaceFlags) -> SurfaceFlags {
        SurfaceFlags(self.0 | other.0)
    }

    pub fn contains(&self, other: SurfaceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Parameters for a mirrored surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub flags: SurfaceFlags,
}

impl SurfaceSpec {
    /// Checks the constraints the mirroring service places on its arguments.
    pub fn validate(&self) -> Result<(), HostError> {
        if self.name.trim().is_empty() {
            return Err(HostError::InvalidSurface("name must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(HostError::InvalidSurface(format!(
                "size {}x{} must be positive",
                self.width, self.height
            )));
        }
        if self.density_dpi == 0 {
            return Err(HostError::InvalidSurface("density must be positive".into()));
        }
        Ok(())
    }
}

/// Identifies the drawing target of a frame buffer for the mirroring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawingTarget(pub u64);

/// One plane of pixel data inside a frame.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub pixel_stride: usize,
    pub row_stride: usize,
}

/// A rendered frame held by the consumer.
///
/// Dropping the frame hands its storage back to the producer.
pub trait Frame: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn plane(&self) -> Plane<'_>;
}

/// Bounded producer/consumer buffer the mirrored surface renders into.
pub trait FrameBuffer: Send {
    /// Returns the newest frame, discarding older ones. Never blocks.
    fn acquire_latest_frame(&mut self) -> Result<Option<Box<dyn Frame>>, HostError>;

    /// Installs or clears the callback fired when a frame is ready.
    fn set_frame_listener(&mut self, listener: Option<Arc<dyn FrameListener>>);

    fn drawing_target(&self) -> DrawingTarget;

    fn spec(&self) -> FrameBufferSpec;
}

/// A live mirrored surface. Dropping it releases the surface.
pub trait MirrorSurface: Send {
    fn spec(&self) -> &SurfaceSpec;
}

/// A granted screen projection.
pub trait Projection: Send {
    fn create_mirror_surface(
        &mut self,
        spec: &SurfaceSpec,
        target: DrawingTarget,
    ) -> Result<Box<dyn MirrorSurface>, HostError>;

    fn register_stop_listener(&mut self, listener: Arc<dyn StopListener>);

    fn unregister_stop_listener(&mut self);

    /// Ends the projection. The consent handle is unusable afterwards.
    fn stop(&mut self);
}

/// Handles "a frame is ready".
pub trait FrameListener: Send + Sync {
    fn on_frame_available(&self);
}

/// Handles orientation sensor events.
pub trait OrientationListener: Send + Sync {
    fn on_orientation_changed(&self, degrees: i32);
}

/// Handles "the platform ended the projection".
pub trait StopListener: Send + Sync {
    fn on_stop(&self);
}

/// Permission prompts owned by the host UI.
pub trait PermissionHost: Send + Sync {
    fn has_storage_permission(&self) -> bool;

    /// Asks the user for storage access. The answer arrives later through
    /// `ScreenCapture::on_permission_result` with the same request code.
    fn request_storage_permission(&self, request_code: i32);

    /// Shows the capture consent prompt. The answer arrives later through
    /// `ScreenCapture::on_consent_result` with the same request code.
    fn request_capture_consent(&self, request_code: i32);

    /// Closes the host surface after a terminal permission failure.
    fn close_surface(&self);
}

/// Display and mirroring services.
pub trait CaptureHost: Send + Sync {
    fn display_metrics(&self) -> DisplayMetrics;

    fn display_rotation(&self) -> Rotation;

    fn can_detect_orientation(&self) -> bool;

    fn enable_orientation_events(&self, listener: Arc<dyn OrientationListener>);

    fn disable_orientation_events(&self);

    fn create_frame_buffer(&self, spec: FrameBufferSpec) -> Result<Box<dyn FrameBuffer>, HostError>;

    /// Turns a consent handle into a projection; `None` if the handle is invalid.
    fn open_projection(&self, consent: &ConsentHandle) -> Option<Box<dyn Projection>>;
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Invalid surface parameters: {0}")]
    InvalidSurface(String),

    #[error("Unknown drawing target {0:?}")]
    UnknownTarget(DrawingTarget),

    #[error("Host service unavailable: {0}")]
    Unavailable(String),

    #[error("Display capture failed: {0}")]
    CaptureFailed(String),
}
