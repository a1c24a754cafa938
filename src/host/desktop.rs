//! Desktop host using the `xcap` crate.
//!
//! This is the infrastructure layer; it talks to the OS. The primary
//! monitor stands in for the device display: a mirrored surface is a
//! thread that grabs the monitor and renders into the bound frame queue,
//! and orientation events come from polling the monitor's rotation.
//!
//! Desktop platforms have no permission dialogs for this flow, so the
//! prompts are answered immediately through [`HostEvent`]s that the
//! shell feeds back into the capture facade.

use super::{
    CaptureHost, ConsentHandle, DisplayMetrics, DrawingTarget, Frame, FrameBuffer,
    FrameBufferSpec, FrameListener, FrameProducer, FrameQueue, HostError, MirrorSurface,
    OrientationListener, PermissionHost, Plane, Projection, Rotation, StopListener,
    SubmitOutcome, SurfaceSpec,
};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use xcap::Monitor;

/// Baseline density; a scale factor of 1.0 maps to this many dpi.
const BASELINE_DPI: f32 = 160.0;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const ROTATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Consecutive grab failures after which the projection is ended.
const MAX_CAPTURE_FAILURES: u32 = 30;

/// Commands typed into the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Command> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Some(Command::Start),
            "stop" | "x" => Some(Command::Stop),
            "status" | "?" => Some(Command::Status),
            "quit" | "exit" | "q" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Everything the shell loop reacts to.
#[derive(Debug)]
pub enum HostEvent {
    Command(Command),
    PermissionResult { request_code: i32, granted: bool },
    ConsentResult { request_code: i32, consent: Option<ConsentHandle> },
    /// The host surface was closed after a terminal failure.
    Closed,
}

type StopSlot = Arc<Mutex<Option<Arc<dyn StopListener>>>>;

struct Poller {
    running: Arc<AtomicBool>,
    _thread: JoinHandle<()>,
}

struct Shared {
    storage_root: PathBuf,
    events: mpsc::UnboundedSender<HostEvent>,
    next_token: AtomicU64,
    next_target: AtomicU64,
    granted: Mutex<HashSet<u64>>,
    producers: Mutex<HashMap<DrawingTarget, FrameProducer<DesktopFrame>>>,
    poller: Mutex<Option<Poller>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct DesktopHost {
    shared: Arc<Shared>,
}

impl DesktopHost {
    /// Creates the host and the receiving end of its event stream.
    pub fn new(storage_root: PathBuf) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let host = Self {
            shared: Arc::new(Shared {
                storage_root,
                events,
                next_token: AtomicU64::new(1),
                next_target: AtomicU64::new(1),
                granted: Mutex::new(HashSet::new()),
                producers: Mutex::new(HashMap::new()),
                poller: Mutex::new(None),
            }),
        };
        (host, rx)
    }

    /// Sender for feeding shell commands into the event stream.
    pub fn events(&self) -> mpsc::UnboundedSender<HostEvent> {
        self.shared.events.clone()
    }

    fn emit(&self, event: HostEvent) {
        if self.shared.events.send(event).is_err() {
            log::debug!("[DESKTOP] Event loop gone; dropping event");
        }
    }

    fn storage_writable(&self) -> bool {
        match std::fs::create_dir_all(&self.shared.storage_root) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "[DESKTOP] Storage root {} is not writable: {}",
                    self.shared.storage_root.display(),
                    e
                );
                false
            }
        }
    }

    fn stop_poller(&self) {
        if let Some(poller) = lock(&self.shared.poller).take() {
            poller.running.store(false, Ordering::SeqCst);
        }
    }
}

impl PermissionHost for DesktopHost {
    fn has_storage_permission(&self) -> bool {
        self.storage_writable()
    }

    fn request_storage_permission(&self, request_code: i32) {
        let granted = self.storage_writable();
        self.emit(HostEvent::PermissionResult {
            request_code,
            granted,
        });
    }

    fn request_capture_consent(&self, request_code: i32) {
        // Typing `start` is the user's consent on the desktop.
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.granted).insert(token);
        log::info!("[DESKTOP] Screen capture consent granted (token {})", token);
        self.emit(HostEvent::ConsentResult {
            request_code,
            consent: Some(ConsentHandle::new(token)),
        });
    }

    fn close_surface(&self) {
        self.emit(HostEvent::Closed);
    }
}

impl CaptureHost for DesktopHost {
    fn display_metrics(&self) -> DisplayMetrics {
        match primary_monitor().and_then(|m| monitor_metrics(&m)) {
            Ok(metrics) => metrics,
            Err(e) => {
                log::warn!("[DESKTOP] Could not read display metrics: {}", e);
                DisplayMetrics {
                    width: 0,
                    height: 0,
                    density_dpi: 0,
                }
            }
        }
    }

    fn display_rotation(&self) -> Rotation {
        primary_monitor()
            .and_then(|m| {
                m.rotation()
                    .map_err(|e| HostError::CaptureFailed(e.to_string()))
            })
            .map(Rotation::from_degrees)
            .unwrap_or_default()
    }

    fn can_detect_orientation(&self) -> bool {
        true
    }

    fn enable_orientation_events(&self, listener: Arc<dyn OrientationListener>) {
        self.stop_poller();

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let spawned = std::thread::Builder::new()
            .name("screencap-rotation".into())
            .spawn(move || poll_rotation(flag, listener));

        match spawned {
            Ok(thread) => {
                *lock(&self.shared.poller) = Some(Poller {
                    running,
                    _thread: thread,
                });
            }
            Err(e) => log::warn!("[DESKTOP] Could not start rotation poller: {}", e),
        }
    }

    fn disable_orientation_events(&self) {
        self.stop_poller();
    }

    fn create_frame_buffer(&self, spec: FrameBufferSpec) -> Result<Box<dyn FrameBuffer>, HostError> {
        let target = DrawingTarget(self.shared.next_target.fetch_add(1, Ordering::SeqCst));
        let queue = FrameQueue::new(spec, target);
        lock(&self.shared.producers).insert(target, queue.producer());
        Ok(Box::new(DesktopBuffer {
            queue,
            shared: self.shared.clone(),
        }))
    }

    fn open_projection(&self, consent: &ConsentHandle) -> Option<Box<dyn Projection>> {
        if !lock(&self.shared.granted).contains(&consent.token()) {
            return None;
        }
        Some(Box::new(DesktopProjection {
            token: consent.token(),
            shared: self.shared.clone(),
            stop_listener: Arc::new(Mutex::new(None)),
        }))
    }
}

fn primary_monitor() -> Result<Monitor, HostError> {
    let monitors = Monitor::all().map_err(|e| HostError::Unavailable(e.to_string()))?;
    let mut fallback = None;
    for monitor in monitors {
        if monitor.is_primary().unwrap_or(false) {
            return Ok(monitor);
        }
        if fallback.is_none() {
            fallback = Some(monitor);
        }
    }
    fallback.ok_or_else(|| HostError::Unavailable("no monitor found".into()))
}

fn monitor_metrics(monitor: &Monitor) -> Result<DisplayMetrics, HostError> {
    let read = |e: xcap::XCapError| HostError::CaptureFailed(e.to_string());
    Ok(DisplayMetrics {
        width: monitor.width().map_err(read)?,
        height: monitor.height().map_err(read)?,
        density_dpi: density_for_scale(monitor.scale_factor().map_err(read)?),
    })
}

fn density_for_scale(scale: f32) -> u32 {
    if !scale.is_finite() || scale <= 0.0 {
        return BASELINE_DPI as u32;
    }
    (BASELINE_DPI * scale).round() as u32
}

fn poll_rotation(running: Arc<AtomicBool>, listener: Arc<dyn OrientationListener>) {
    let mut last: Option<f32> = None;
    while running.load(Ordering::SeqCst) {
        if let Ok(degrees) = primary_monitor().and_then(|m| {
            m.rotation()
                .map_err(|e| HostError::CaptureFailed(e.to_string()))
        }) {
            if last.is_some_and(|prev| prev != degrees) {
                listener.on_orientation_changed(degrees.round() as i32);
            }
            last = Some(degrees);
        }
        std::thread::sleep(ROTATION_POLL_INTERVAL);
    }
    log::debug!("[DESKTOP] Rotation poller stopped");
}

/// One grabbed monitor image, tightly packed.
pub struct DesktopFrame {
    image: RgbaImage,
}

impl Frame for DesktopFrame {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn plane(&self) -> Plane<'_> {
        Plane {
            data: self.image.as_raw(),
            pixel_stride: 4,
            row_stride: self.image.width() as usize * 4,
        }
    }
}

struct DesktopBuffer {
    queue: FrameQueue<DesktopFrame>,
    shared: Arc<Shared>,
}

impl FrameBuffer for DesktopBuffer {
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

impl Drop for DesktopBuffer {
    fn drop(&mut self) {
        lock(&self.shared.producers).remove(&self.queue.drawing_target());
    }
}

struct DesktopProjection {
    token: u64,
    shared: Arc<Shared>,
    stop_listener: StopSlot,
}

impl Projection for DesktopProjection {
    fn create_mirror_surface(
        &mut self,
        spec: &SurfaceSpec,
        target: DrawingTarget,
    ) -> Result<Box<dyn MirrorSurface>, HostError> {
        spec.validate()?;
        if !lock(&self.shared.granted).contains(&self.token) {
            return Err(HostError::Unavailable("projection was stopped".into()));
        }
        let producer = lock(&self.shared.producers)
            .get(&target)
            .cloned()
            .ok_or(HostError::UnknownTarget(target))?;

        let running = Arc::new(AtomicBool::new(true));
        let mirror = Mirror {
            width: spec.width,
            height: spec.height,
            running: running.clone(),
            producer,
            stop_listener: self.stop_listener.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("screencap-mirror-{}", target.0))
            .spawn(move || mirror.run())
            .map_err(|e| HostError::Unavailable(e.to_string()))?;

        log::info!(
            "[DESKTOP] Mirroring primary monitor into {}x{} surface '{}'",
            spec.width,
            spec.height,
            spec.name
        );
        Ok(Box::new(DesktopSurface {
            spec: spec.clone(),
            running,
            thread: Some(thread),
        }))
    }

    fn register_stop_listener(&mut self, listener: Arc<dyn StopListener>) {
        *lock(&self.stop_listener) = Some(listener);
    }

    fn unregister_stop_listener(&mut self) {
        *lock(&self.stop_listener) = None;
    }

    fn stop(&mut self) {
        lock(&self.shared.granted).remove(&self.token);
        log::info!("[DESKTOP] Projection {} ended", self.token);
    }
}

/// Render loop behind a mirrored surface.
struct Mirror {
    width: u32,
    height: u32,
    running: Arc<AtomicBool>,
    producer: FrameProducer<DesktopFrame>,
    stop_listener: StopSlot,
}

impl Mirror {
    fn run(self) {
        let mut failures = 0u32;
        while self.running.load(Ordering::SeqCst) {
            match self.grab() {
                Ok(image) => {
                    failures = 0;
                    if self.producer.submit(DesktopFrame { image }) == SubmitOutcome::Closed {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    log::warn!("[DESKTOP] Grab failed ({}/{}): {}", failures, MAX_CAPTURE_FAILURES, e);
                    if failures >= MAX_CAPTURE_FAILURES {
                        let listener = lock(&self.stop_listener).clone();
                        if let Some(listener) = listener {
                            listener.on_stop();
                        }
                        break;
                    }
                }
            }
            std::thread::sleep(FRAME_INTERVAL);
        }
        log::debug!("[DESKTOP] Mirror thread exiting");
    }

    fn grab(&self) -> Result<RgbaImage, HostError> {
        let image = primary_monitor()?
            .capture_image()
            .map_err(|e| HostError::CaptureFailed(e.to_string()))?;
        if image.width() == self.width && image.height() == self.height {
            return Ok(image);
        }
        // Physical pixels differ from the logical size on scaled displays.
        Ok(imageops::resize(&image, self.width, self.height, FilterType::Triangle))
    }
}

struct DesktopSurface {
    spec: SurfaceSpec,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MirrorSurface for DesktopSurface {
    fn spec(&self) -> &SurfaceSpec {
        &self.spec
    }
}

impl Drop for DesktopSurface {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[DESKTOP] Mirror thread panicked");
            }
        }
    }
}
