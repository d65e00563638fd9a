//! Window and event loop
//!
//! Owns the winit window and forwards input, resizes and redraws to the
//! playback transport.

use std::path::Path;
use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use crate::audio::{AudioManager, FeederConfig};
use crate::media::{open_video, MediaError, VideoDecodeUnit};
use crate::picker::RfdPicker;
use crate::playback::{
    CommandOutcome, MediaOpener, OpenedMedia, StepOutcome, SystemClock, Transport, TransportCommand,
};
use crate::render::Presenter;
use crate::settings::PlayerPreferences;

/// Opens both decode sides of a file with FFmpeg
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    pub prefer_software: bool,
    pub feeder: FeederConfig,
    pub volume: f32,
}

impl FfmpegOpener {
    pub fn from_preferences(prefs: &PlayerPreferences) -> Self {
        Self {
            prefer_software: prefs.prefer_software_decode,
            feeder: prefs.feeder_config(),
            volume: prefs.volume,
        }
    }
}

impl MediaOpener for FfmpegOpener {
    type Video = VideoDecodeUnit;
    type Audio = AudioManager;

    fn open(&mut self, path: &Path) -> Result<OpenedMedia<VideoDecodeUnit, AudioManager>, MediaError> {
        let video = open_video(path, self.prefer_software)?;
        let audio = AudioManager::open(path, self.feeder.clone(), self.volume)?;
        Ok(OpenedMedia {
            video,
            audio,
            path: path.to_path_buf(),
        })
    }
}

pub type PlayerTransport = Transport<FfmpegOpener, Presenter, SystemClock, RfdPicker>;

/// Keyboard shortcuts
pub fn command_for_key(key: KeyCode) -> Option<TransportCommand> {
    match key {
        KeyCode::Escape | KeyCode::KeyQ => Some(TransportCommand::Quit),
        KeyCode::KeyF => Some(TransportCommand::ToggleFullscreen),
        KeyCode::Space => Some(TransportCommand::TogglePause),
        KeyCode::KeyM => Some(TransportCommand::ToggleMute),
        KeyCode::KeyO => Some(TransportCommand::Reload),
        _ => None,
    }
}

pub struct App {
    preferences: PlayerPreferences,
    /// Media opened before the window exists; consumed on first resume
    pending: Option<OpenedMedia<VideoDecodeUnit, AudioManager>>,
    window: Option<Arc<Window>>,
    transport: Option<PlayerTransport>,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(preferences: PlayerPreferences, media: OpenedMedia<VideoDecodeUnit, AudioManager>) -> Self {
        Self {
            preferences,
            pending: Some(media),
            window: None,
            transport: None,
            error: None,
        }
    }

    /// Error that ended the event loop, if any
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let Some(media) = self.pending.take() else {
            return Ok(());
        };

        let title = format!(
            "Framepace - {}",
            media.path.file_name().unwrap_or_default().to_string_lossy()
        );
        let window_attributes = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(LogicalSize::new(
                self.preferences.window_width,
                self.preferences.window_height,
            ));
        let window = Arc::new(event_loop.create_window(window_attributes)?);

        let presenter = pollster::block_on(Presenter::new(
            window.clone(),
            self.preferences.gpu_upload_timing,
        ))?;

        let picker = RfdPicker::new(media.path.parent().map(Path::to_path_buf));
        let size = window.inner_size();
        let transport = Transport::new(
            media,
            presenter,
            FfmpegOpener::from_preferences(&self.preferences),
            picker,
            SystemClock::new(),
            self.preferences.transport_config(),
            (size.width, size.height),
        )?;

        tracing::info!("Controls: SPACE pause, M mute, F fullscreen, O open, ESC quit");
        window.request_redraw();
        self.window = Some(window);
        self.transport = Some(transport);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        event_loop.exit();
    }

    fn apply_outcome(&mut self, event_loop: &ActiveEventLoop, outcome: CommandOutcome) {
        match outcome {
            CommandOutcome::Continue => {}
            CommandOutcome::Exit => self.shutdown(event_loop),
            CommandOutcome::FullscreenChanged(fullscreen) => {
                if let Some(window) = &self.window {
                    window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
                }
            }
            CommandOutcome::Reloaded(path) => {
                if let (Some(window), Some(transport)) = (&self.window, &self.transport) {
                    window.set_title(&transport.title());
                    window.request_redraw();
                }
                self.preferences.set_last_opened(&path);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.transport.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            tracing::error!("Failed to start playback: {:#}", e);
            self.error = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(transport) = &mut self.transport else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                if let Some(command) = command_for_key(code) {
                    let outcome = transport.handle_command(command);
                    self.apply_outcome(event_loop, outcome);
                }
            }
            WindowEvent::Resized(size) => {
                transport.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if transport.step() == StepOutcome::Stopped {
                    tracing::debug!("Playback stopped; waiting for a new file");
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let (Some(window), Some(transport)) = (&self.window, &self.transport) {
            if !transport.is_stopped() {
                window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(command_for_key(KeyCode::Escape), Some(TransportCommand::Quit));
        assert_eq!(command_for_key(KeyCode::KeyQ), Some(TransportCommand::Quit));
        assert_eq!(command_for_key(KeyCode::KeyF), Some(TransportCommand::ToggleFullscreen));
        assert_eq!(command_for_key(KeyCode::Space), Some(TransportCommand::TogglePause));
        assert_eq!(command_for_key(KeyCode::KeyM), Some(TransportCommand::ToggleMute));
        assert_eq!(command_for_key(KeyCode::KeyO), Some(TransportCommand::Reload));
        assert_eq!(command_for_key(KeyCode::KeyR), None);
    }

    #[test]
    fn test_opener_follows_preferences() {
        let prefs = PlayerPreferences {
            prefer_software_decode: true,
            volume: 0.4,
            buffer_threshold_bytes: 4096,
            ..PlayerPreferences::default()
        };
        let opener = FfmpegOpener::from_preferences(&prefs);
        assert!(opener.prefer_software);
        assert_eq!(opener.volume, 0.4);
        assert_eq!(opener.feeder.buffer_threshold, 4096);
    }
}
