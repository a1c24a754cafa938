//! Frame sink: turns produced frames into numbered image files.
//!
//! Best effort: a frame that fails to decode or write is logged and
//! dropped, and the next one is processed normally. Nothing propagates
//! past [`FrameSink::on_frame`].

use super::frame::{self, FrameError};
use super::session::CaptureSessionManager;
use super::store::{ImageStore, PersistedImage, StoreError};
use crate::host::{Frame, FrameBuffer, FrameListener};
use crate::worker::WorkerHandle;

/// What happened to one frame-ready notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No frame was waiting.
    Empty,
    Saved(PersistedImage),
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub frames_saved: u64,
    pub frames_dropped: u64,
}

pub struct FrameSink {
    store: ImageStore,
    crop_row_padding: bool,
    stats: SinkStats,
}

impl FrameSink {
    pub fn new(store: ImageStore, crop_row_padding: bool) -> Self {
        Self {
            store,
            crop_row_padding,
            stats: SinkStats::default(),
        }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Handles one frame-ready notification for a `width` x `height` session.
    ///
    /// Resources are released in reverse order of acquisition: the file
    /// handle closes inside `persist`, the decoded image is freed when
    /// `persist` returns, and the frame is handed back last.
    pub fn on_frame(&mut self, buffer: &mut dyn FrameBuffer, width: u32, height: u32) -> FrameOutcome {
        let frame = match buffer.acquire_latest_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return FrameOutcome::Empty,
            Err(e) => {
                log::warn!("[SINK] Could not acquire frame: {}", e);
                self.stats.frames_dropped += 1;
                return FrameOutcome::Dropped;
            }
        };

        match self.persist(frame.as_ref(), width, height) {
            Ok(saved) => {
                self.stats.frames_saved += 1;
                log::info!("[SINK] Captured image {} -> {}", saved.id, saved.path.display());
                FrameOutcome::Saved(saved)
            }
            Err(e) => {
                self.stats.frames_dropped += 1;
                log::warn!("[SINK] Dropped frame: {}", e);
                FrameOutcome::Dropped
            }
        }
    }

    fn persist(&mut self, frame: &dyn Frame, width: u32, height: u32) -> Result<PersistedImage, SinkError> {
        // Frames rendered for a previous surface geometry are stale.
        if (frame.width(), frame.height()) != (width, height) {
            return Err(FrameError::GeometryMismatch {
                width,
                height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            }
            .into());
        }
        let decoded = frame::decode_rgba(&frame.plane(), width, height)?;
        let image = if self.crop_row_padding {
            frame::crop_to_width(decoded, width)
        } else {
            image::DynamicImage::ImageRgba8(decoded)
        };
        Ok(self.store.save(&image)?)
    }
}

/// Frame-ready callback; hands each notification to the worker loop.
pub struct FrameReadyHandler {
    worker: WorkerHandle<CaptureSessionManager>,
}

impl FrameReadyHandler {
    pub fn new(worker: WorkerHandle<CaptureSessionManager>) -> Self {
        Self { worker }
    }
}

impl FrameListener for FrameReadyHandler {
    fn on_frame_available(&self) {
        self.worker.post(|manager: &mut CaptureSessionManager| {
            manager.on_frame();
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::host::{DrawingTarget, FrameBufferSpec, FrameQueue, PixelFormat, Plane};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct TestFrame {
        width: u32,
        height: u32,
        row_stride: usize,
        data: Vec<u8>,
        released: Arc<AtomicUsize>,
    }

    impl Frame for TestFrame {
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

    impl Drop for TestFrame {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("screencap-sink-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn queue(width: u32, height: u32) -> FrameQueue<TestFrame> {
        FrameQueue::new(
            FrameBufferSpec {
                width,
                height,
                format: PixelFormat::Rgba8888,
                max_frames: 2,
            },
            DrawingTarget(7),
        )
    }

    fn padded_frame(width: u32, height: u32, pad: usize, released: &Arc<AtomicUsize>) -> TestFrame {
        let row_stride = width as usize * 4 + pad;
        TestFrame {
            width,
            height,
            row_stride,
            data: vec![200; row_stride * height as usize],
            released: released.clone(),
        }
    }

    fn sink(dir: &PathBuf) -> FrameSink {
        let store = ImageStore::new(dir, OutputFormat::Png);
        store.prepare().unwrap();
        FrameSink::new(store, true)
    }

    #[test]
    fn empty_buffer_is_a_noop() {
        let dir = scratch_dir("empty");
        let mut sink = sink(&dir);
        let mut buffer = queue(4, 4);
        assert_eq!(sink.on_frame(&mut buffer, 4, 4), FrameOutcome::Empty);
        assert_eq!(sink.stats(), SinkStats::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn padded_frame_is_saved_at_logical_width() {
        let dir = scratch_dir("padded");
        let released = Arc::new(AtomicUsize::new(0));
        let mut sink = sink(&dir);
        let mut buffer = queue(6, 3);
        buffer.producer().submit(padded_frame(6, 3, 8, &released));

        let saved = match sink.on_frame(&mut buffer, 6, 3) {
            FrameOutcome::Saved(saved) => saved,
            other => panic!("expected a saved frame, got {:?}", other),
        };
        assert_eq!(saved.id, 0);
        let written = image::open(&saved.path).unwrap();
        assert_eq!((written.width(), written.height()), (6, 3));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_frame_is_released_and_next_frame_succeeds() {
        let dir = scratch_dir("failure");
        let released = Arc::new(AtomicUsize::new(0));
        let mut sink = sink(&dir);
        let mut buffer = queue(4, 4);
        let producer = buffer.producer();

        let mut broken = padded_frame(4, 4, 0, &released);
        broken.data.truncate(10);
        producer.submit(broken);
        assert_eq!(sink.on_frame(&mut buffer, 4, 4), FrameOutcome::Dropped);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        producer.submit(padded_frame(4, 4, 0, &released));
        let FrameOutcome::Saved(saved) = sink.on_frame(&mut buffer, 4, 4) else {
            panic!("second frame should be saved");
        };
        assert_eq!(saved.id, 0);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(
            sink.stats(),
            SinkStats {
                frames_saved: 1,
                frames_dropped: 1
            }
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn frame_with_stale_geometry_is_dropped() {
        let dir = scratch_dir("geometry");
        let released = Arc::new(AtomicUsize::new(0));
        let mut sink = sink(&dir);
        let mut buffer = queue(4, 8);
        buffer.producer().submit(padded_frame(8, 4, 0, &released));

        assert_eq!(sink.on_frame(&mut buffer, 4, 8), FrameOutcome::Dropped);
        assert_eq!(sink.stats().frames_dropped, 1);
        assert_eq!(sink.store().next_id(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_failure_is_dropped_without_advancing_ids() {
        let dir = scratch_dir("io");
        let released = Arc::new(AtomicUsize::new(0));
        // Storage root is never created, so every write fails.
        let mut sink = FrameSink::new(ImageStore::new(&dir, OutputFormat::Png), true);
        let mut buffer = queue(2, 2);
        buffer.producer().submit(padded_frame(2, 2, 0, &released));

        assert_eq!(sink.on_frame(&mut buffer, 2, 2), FrameOutcome::Dropped);
        assert_eq!(sink.store().next_id(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
