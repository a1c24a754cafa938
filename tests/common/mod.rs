//! Shared fixture: a `ScreenCapture` wired to a `MemoryHost` and a
//! scratch storage directory.

#![allow(dead_code)]

use screencap_lib::capture::{CaptureStatus, ScreenCapture};
use screencap_lib::config::CaptureConfig;
use screencap_lib::host::memory::MemoryHost;
use screencap_lib::host::{DisplayMetrics, CAPTURE_CONSENT_REQUEST};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Fixture {
    pub host: MemoryHost,
    pub capture: ScreenCapture,
    pub dir: PathBuf,
}

pub fn metrics(width: u32, height: u32, density_dpi: u32) -> DisplayMetrics {
    DisplayMetrics {
        width,
        height,
        density_dpi,
    }
}

pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("screencap-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

impl Fixture {
    /// Storage already granted; `on_resume` has run.
    pub fn new(name: &str, display: DisplayMetrics) -> Self {
        Self::with_storage(name, display, true)
    }

    pub fn with_storage(name: &str, display: DisplayMetrics, storage: bool) -> Self {
        let dir = scratch_dir(name);
        let config = CaptureConfig {
            storage_root: dir.clone(),
            ..CaptureConfig::default()
        };
        Self::with_config(config, display, storage)
    }

    pub fn with_config(config: CaptureConfig, display: DisplayMetrics, storage: bool) -> Self {
        let host = MemoryHost::new(display);
        host.set_storage_permission(storage);
        let shared = Arc::new(host.clone());
        let capture = ScreenCapture::new(&config, shared.clone(), shared).expect("worker starts");
        capture.on_resume();
        Self {
            host,
            capture,
            dir: config.storage_root,
        }
    }

    /// Presses "start capture" and grants consent, then waits for the worker.
    pub fn start(&self) -> CaptureStatus {
        self.capture.start_capture().expect("consent prompt shown");
        let consent = self.host.grant_consent();
        self.capture
            .on_consent_result(CAPTURE_CONSENT_REQUEST, Some(consent));
        self.status()
    }

    pub fn status(&self) -> CaptureStatus {
        self.capture.status().expect("worker alive")
    }

    /// Pushes one frame and waits until the worker has handled it.
    pub fn frame(&self, rgba: [u8; 4], row_padding: usize) -> CaptureStatus {
        self.host.push_solid(rgba, row_padding);
        self.status()
    }

    pub fn image_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.png", id))
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
