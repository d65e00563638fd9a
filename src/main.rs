//! Framepace - Main Entry Point
//!
//! Usage: framepace [video_file]
//!
//! With no file argument a picker opens; cancelling it falls back to the
//! last opened file.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use framepace::app::{App, FfmpegOpener};
use framepace::picker::RfdPicker;
use framepace::playback::{FilePicker, MediaOpener};
use framepace::settings::PlayerPreferences;
use framepace::telemetry::{init_logging, LogConfig};
use winit::event_loop::{ControlFlow, EventLoop};

fn initial_path(preferences: &PlayerPreferences) -> Option<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Some(PathBuf::from(arg));
    }

    let last = preferences.last_opened();
    let start_dir = last.as_ref().and_then(|p| p.parent()).map(|p| p.to_path_buf());
    RfdPicker::new(start_dir).pick().or_else(|| {
        if let Some(path) = &last {
            tracing::info!("No file picked, reopening {}", path.display());
        }
        last
    })
}

fn main() -> anyhow::Result<()> {
    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&LogConfig::from_env()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Framepace v{}", env!("CARGO_PKG_VERSION"));

    let mut preferences = PlayerPreferences::load();
    let path = initial_path(&preferences).ok_or_else(|| anyhow!("No video file selected"))?;

    let media = FfmpegOpener::from_preferences(&preferences)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    preferences.set_last_opened(&path);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(preferences, media);
    event_loop.run_app(&mut app).context("Event loop error")?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
