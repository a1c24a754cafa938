//! In-process scripted host.
//!
//! Nothing here touches the OS. Display geometry, rotation, permission
//! answers and frames are all driven by hand, and every resource the
//! capture core acquires is counted so its release can be checked.

use super::{
    CaptureHost, ConsentHandle, DisplayMetrics, DrawingTarget, Frame, FrameBuffer,
    FrameBufferSpec, FrameListener, FrameProducer, FrameQueue, HostError, MirrorSurface,
    OrientationListener, PermissionHost, Plane, Projection, Rotation, StopListener,
    SubmitOutcome, SurfaceSpec,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A frame pushed through [`MemoryHost`]. Counts its own release.
pub struct MemoryFrame {
    width: u32,
    height: u32,
    row_stride: usize,
    data: Vec<u8>,
    released: Arc<AtomicUsize>,
}

impl Frame for MemoryFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn plane(&self) -> Plane<'_> {
        Plane {
            data: &self.data,
            pixel_stride: 4,
            row_stride: self.row_stride,
        }
    }
}

impl Drop for MemoryFrame {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct State {
    metrics: Option<DisplayMetrics>,
    rotation: Rotation,
    orientation_supported: bool,
    orientation_listener: Option<Arc<dyn OrientationListener>>,
    orientation_disables: usize,

    storage_permission: bool,
    permission_requests: Vec<i32>,
    consent_requests: Vec<i32>,
    surface_closes: usize,

    next_token: u64,
    granted: HashSet<u64>,
    stop_listener: Option<Arc<dyn StopListener>>,
    projection_stops: usize,

    next_target: u64,
    producers: HashMap<DrawingTarget, FrameProducer<MemoryFrame>>,
    live_buffers: usize,
    last_buffer_spec: Option<FrameBufferSpec>,

    bound: Option<(DrawingTarget, u32, u32)>,
    live_surfaces: usize,
    max_live_surfaces: usize,
    surfaces_created: usize,
    surfaces_released: usize,
    last_surface_spec: Option<SurfaceSpec>,
    fail_next_surface: bool,
}

struct Shared {
    state: Mutex<State>,
    frames_released: Arc<AtomicUsize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scripted host. Clones share the same state.
#[derive(Clone)]
pub struct MemoryHost {
    shared: Arc<Shared>,
}

impl MemoryHost {
    pub fn new(metrics: DisplayMetrics) -> Self {
        let state = State {
            metrics: Some(metrics),
            orientation_supported: true,
            next_token: 1,
            next_target: 1,
            ..State::default()
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                frames_released: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock()
    }

    // ── Scripting ────────────────────────────────────────────────────

    pub fn set_display(&self, metrics: DisplayMetrics) {
        self.lock().metrics = Some(metrics);
    }

    /// Changes the reported rotation without firing the sensor.
    pub fn set_rotation(&self, rotation: Rotation) {
        self.lock().rotation = rotation;
    }

    /// Changes the rotation and fires the orientation listener, if enabled.
    pub fn rotate(&self, rotation: Rotation) {
        let listener = {
            let mut state = self.lock();
            state.rotation = rotation;
            state.orientation_listener.clone()
        };
        if let Some(listener) = listener {
            listener.on_orientation_changed(rotation.code() * 90);
        }
    }

    /// Fires the orientation listener without changing the rotation.
    pub fn jiggle(&self) {
        let listener = self.lock().orientation_listener.clone();
        if let Some(listener) = listener {
            listener.on_orientation_changed(3);
        }
    }

    pub fn set_orientation_supported(&self, supported: bool) {
        self.lock().orientation_supported = supported;
    }

    pub fn set_storage_permission(&self, granted: bool) {
        self.lock().storage_permission = granted;
    }

    /// Issues a consent handle that `open_projection` accepts.
    pub fn grant_consent(&self) -> ConsentHandle {
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.granted.insert(token);
        ConsentHandle::new(token)
    }

    /// Makes the next surface creation fail.
    pub fn fail_next_surface(&self) {
        self.lock().fail_next_surface = true;
    }

    /// Simulates the platform ending the projection on its own.
    pub fn fire_host_stop(&self) {
        let listener = self.lock().stop_listener.clone();
        if let Some(listener) = listener {
            listener.on_stop();
        }
    }

    /// Renders raw pixels into the buffer bound to the live surface.
    pub fn push_frame(&self, data: Vec<u8>, row_stride: usize) -> SubmitOutcome {
        let (producer, width, height) = {
            let state = self.lock();
            let Some((target, width, height)) = state.bound else {
                return SubmitOutcome::Closed;
            };
            match state.producers.get(&target) {
                Some(producer) => (producer.clone(), width, height),
                None => return SubmitOutcome::Closed,
            }
        };
        producer.submit(MemoryFrame {
            width,
            height,
            row_stride,
            data,
            released: self.shared.frames_released.clone(),
        })
    }

    /// Renders a solid-colour frame with `row_padding` extra bytes per row.
    pub fn push_solid(&self, rgba: [u8; 4], row_padding: usize) -> SubmitOutcome {
        let Some((_, width, height)) = self.lock().bound else {
            return SubmitOutcome::Closed;
        };
        let row_stride = width as usize * 4 + row_padding;
        let mut data = vec![0u8; row_stride * height as usize];
        for row in data.chunks_mut(row_stride) {
            for pixel in row[..width as usize * 4].chunks_mut(4) {
                pixel.copy_from_slice(&rgba);
            }
        }
        self.push_frame(data, row_stride)
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn live_surfaces(&self) -> usize {
        self.lock().live_surfaces
    }

    pub fn max_live_surfaces(&self) -> usize {
        self.lock().max_live_surfaces
    }

    pub fn surfaces_created(&self) -> usize {
        self.lock().surfaces_created
    }

    pub fn surfaces_released(&self) -> usize {
        self.lock().surfaces_released
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().live_buffers
    }

    pub fn frames_released(&self) -> usize {
        self.shared.frames_released.load(Ordering::SeqCst)
    }

    pub fn last_surface_spec(&self) -> Option<SurfaceSpec> {
        self.lock().last_surface_spec.clone()
    }

    pub fn last_buffer_spec(&self) -> Option<FrameBufferSpec> {
        self.lock().last_buffer_spec
    }

    pub fn orientation_events_enabled(&self) -> bool {
        self.lock().orientation_listener.is_some()
    }

    pub fn orientation_disables(&self) -> usize {
        self.lock().orientation_disables
    }

    pub fn has_stop_listener(&self) -> bool {
        self.lock().stop_listener.is_some()
    }

    pub fn projection_stops(&self) -> usize {
        self.lock().projection_stops
    }

    pub fn permission_requests(&self) -> Vec<i32> {
        self.lock().permission_requests.clone()
    }

    pub fn consent_requests(&self) -> Vec<i32> {
        self.lock().consent_requests.clone()
    }

    pub fn surface_closes(&self) -> usize {
        self.lock().surface_closes
    }
}

impl PermissionHost for MemoryHost {
    fn has_storage_permission(&self) -> bool {
        self.lock().storage_permission
    }

    fn request_storage_permission(&self, request_code: i32) {
        self.lock().permission_requests.push(request_code);
    }

    fn request_capture_consent(&self, request_code: i32) {
        self.lock().consent_requests.push(request_code);
    }

    fn close_surface(&self) {
        self.lock().surface_closes += 1;
    }
}

impl CaptureHost for MemoryHost {
    fn display_metrics(&self) -> DisplayMetrics {
        self.lock().metrics.unwrap_or(DisplayMetrics {
            width: 0,
            height: 0,
            density_dpi: 0,
        })
    }

    fn display_rotation(&self) -> Rotation {
        self.lock().rotation
    }

    fn can_detect_orientation(&self) -> bool {
        self.lock().orientation_supported
    }

    fn enable_orientation_events(&self, listener: Arc<dyn OrientationListener>) {
        self.lock().orientation_listener = Some(listener);
    }

    fn disable_orientation_events(&self) {
        let mut state = self.lock();
        state.orientation_listener = None;
        state.orientation_disables += 1;
    }

    fn create_frame_buffer(&self, spec: FrameBufferSpec) -> Result<Box<dyn FrameBuffer>, HostError> {
        if spec.width == 0 || spec.height == 0 || spec.max_frames == 0 {
            return Err(HostError::Unavailable(format!(
                "cannot allocate {}x{} buffer with depth {}",
                spec.width, spec.height, spec.max_frames
            )));
        }
        let mut state = self.lock();
        let target = DrawingTarget(state.next_target);
        state.next_target += 1;

        let queue = FrameQueue::new(spec, target);
        state.producers.insert(target, queue.producer());
        state.live_buffers += 1;
        state.last_buffer_spec = Some(spec);

        Ok(Box::new(MemoryBuffer {
            queue,
            shared: self.shared.clone(),
        }))
    }

    fn open_projection(&self, consent: &ConsentHandle) -> Option<Box<dyn Projection>> {
        if !self.lock().granted.contains(&consent.token()) {
            return None;
        }
        Some(Box::new(MemoryProjection {
            token: consent.token(),
            shared: self.shared.clone(),
        }))
    }
}

struct MemoryBuffer {
    queue: FrameQueue<MemoryFrame>,
    shared: Arc<Shared>,
}

impl FrameBuffer for MemoryBuffer {
    fn acquire_latest_frame(&mut self) -> Result<Option<Box<dyn Frame>>, HostError> {
        self.queue.acquire_latest_frame()
    }

    fn set_frame_listener(&mut self, listener: Option<Arc<dyn FrameListener>>) {
        self.queue.set_frame_listener(listener);
    }

    fn drawing_target(&self) -> DrawingTarget {
        self.queue.drawing_target()
    }

    fn spec(&self) -> FrameBufferSpec {
        self.queue.spec()
    }
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.producers.remove(&self.queue.drawing_target());
        state.live_buffers = state.live_buffers.saturating_sub(1);
    }
}

struct MemoryProjection {
    token: u64,
    shared: Arc<Shared>,
}

impl Projection for MemoryProjection {
    fn create_mirror_surface(
        &mut self,
        spec: &SurfaceSpec,
        target: DrawingTarget,
    ) -> Result<Box<dyn MirrorSurface>, HostError> {
        spec.validate()?;
        let mut state = self.shared.lock();
        if !state.granted.contains(&self.token) {
            return Err(HostError::Unavailable("projection was stopped".into()));
        }
        if std::mem::take(&mut state.fail_next_surface) {
            return Err(HostError::Unavailable("display service refused the surface".into()));
        }
        if !state.producers.contains_key(&target) {
            return Err(HostError::UnknownTarget(target));
        }

        state.live_surfaces += 1;
        state.max_live_surfaces = state.max_live_surfaces.max(state.live_surfaces);
        state.surfaces_created += 1;
        state.last_surface_spec = Some(spec.clone());
        state.bound = Some((target, spec.width, spec.height));

        Ok(Box::new(MemorySurface {
            spec: spec.clone(),
            target,
            shared: self.shared.clone(),
        }))
    }

    fn register_stop_listener(&mut self, listener: Arc<dyn StopListener>) {
        self.shared.lock().stop_listener = Some(listener);
    }

    fn unregister_stop_listener(&mut self) {
        self.shared.lock().stop_listener = None;
    }

    fn stop(&mut self) {
        let mut state = self.shared.lock();
        state.granted.remove(&self.token);
        state.projection_stops += 1;
    }
}

struct MemorySurface {
    spec: SurfaceSpec,
    target: DrawingTarget,
    shared: Arc<Shared>,
}

impl MirrorSurface for MemorySurface {
    fn spec(&self) -> &SurfaceSpec {
        &self.spec
    }
}

impl Drop for MemorySurface {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.live_surfaces = state.live_surfaces.saturating_sub(1);
        state.surfaces_released += 1;
        if matches!(state.bound, Some((target, _, _)) if target == self.target) {
            state.bound = None;
        }
    }
}
