//! screencap: capture the device screen as a numbered series of images.
//!
//! This crate wires together:
//! - Permission gate (permission.rs)
//! - Screen capture domain (capture/)
//! - Host platform boundary and the bundled hosts (host/)
//! - Background worker loop (worker.rs)
//! - Configuration (config.rs)
//!
//! `run()` is the desktop shell: it mirrors the primary monitor and reads
//! `start` / `stop` / `status` / `quit` from stdin.

pub mod capture;
pub mod config;
pub mod host;
pub mod permission;
pub mod worker;

use capture::ScreenCapture;
use config::CaptureConfig;
use host::desktop::{Command, DesktopHost, HostEvent};
use std::io::BufRead;
use std::sync::Arc;

/// Entry point of the `screencap` binary.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CaptureConfig::load()?;
    log::info!("screencap starting up");

    let (host, mut events) = DesktopHost::new(config.storage_root.clone());
    let shared = Arc::new(host.clone());
    let capture = ScreenCapture::new(&config, shared.clone(), shared)?;
    capture.on_resume();

    spawn_stdin_reader(host.events())?;
    println!("Commands: start | stop | status | quit");

    while let Some(event) = events.blocking_recv() {
        match event {
            HostEvent::Command(Command::Start) => {
                if let Err(e) = capture.start_capture() {
                    log::warn!("Cannot start capture: {}", e);
                }
            }
            HostEvent::Command(Command::Stop) => capture.stop_capture(),
            HostEvent::Command(Command::Status) => print_status(&capture),
            HostEvent::Command(Command::Quit) => break,
            HostEvent::PermissionResult {
                request_code,
                granted,
            } => capture.on_permission_result(request_code, granted),
            HostEvent::ConsentResult {
                request_code,
                consent,
            } => capture.on_consent_result(request_code, consent),
            HostEvent::Closed => {
                log::error!("Capture is unavailable; exiting");
                break;
            }
        }
    }

    if let Some(status) = capture.shutdown() {
        log::info!(
            "screencap exiting: {} images saved, {} frames dropped",
            status.images_saved,
            status.frames_dropped
        );
    }
    Ok(())
}

fn spawn_stdin_reader(
    events: tokio::sync::mpsc::UnboundedSender<HostEvent>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("screencap-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(command) => {
                        if events.send(HostEvent::Command(command)).is_err() {
                            break;
                        }
                    }
                    None => println!("Unknown command '{}'", line.trim()),
                }
            }
            // EOF behaves like `quit`.
            let _ = events.send(HostEvent::Command(Command::Quit));
        })?;
    Ok(())
}

fn print_status(capture: &ScreenCapture) {
    let Some(status) = capture.status() else {
        println!("Capture worker is not running");
        return;
    };
    match status.session {
        Some(info) => println!(
            "capturing {}x{} @ {}dpi, {} saved, {} dropped, next id {}",
            info.width,
            info.height,
            info.density_dpi,
            status.images_saved,
            status.frames_dropped,
            status.next_image_id
        ),
        None => println!(
            "idle, {} saved, {} dropped, next id {}",
            status.images_saved, status.frames_dropped, status.next_image_id
        ),
    }
    if let Some(error) = status.last_error {
        println!("last error: {}", error);
    }
}
