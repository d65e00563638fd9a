//! Playback transport
//!
//! Drives one iteration of playback per `step`: pull a video frame, wait
//! until it is due, present it. Pause, mute, looping at end of stream and
//! hot-reloading a new file are coordinated here across the video source,
//! the audio side and the presenter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::clock::Clock;
use super::timeline::{presentation_wait, Timeline};
use crate::audio::DeviceError;
use crate::media::{DecodeError, MediaError, VideoDecodeUnit, VideoFrame};
use crate::render::PresenterError;

/// Pull side of the video stream
pub trait VideoSource {
    fn dimensions(&self) -> (u32, u32);

    /// Next frame, `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<&VideoFrame>, DecodeError>;

    fn seek_to_start(&mut self) -> Result<(), DecodeError>;
}

impl VideoSource for VideoDecodeUnit {
    fn dimensions(&self) -> (u32, u32) {
        let info = self.info();
        (info.width, info.height)
    }

    fn next_frame(&mut self) -> Result<Option<&VideoFrame>, DecodeError> {
        self.pull_frame()
    }

    fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        crate::media::DecodeContext::seek_to_start(self)
    }
}

/// What the transport needs from the audio side
pub trait AudioControl {
    /// Begin feeding the device
    fn start(&mut self) -> Result<(), DeviceError>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn set_muted(&mut self, muted: bool);

    /// Restart from the beginning of the stream
    fn rewind(&mut self);

    /// Audible position in seconds, if known
    fn position(&self) -> Option<f64>;

    /// Stop feeding and release the device
    fn shutdown(&mut self);
}

/// Frame upload and drawing
pub trait FramePresenter {
    fn initialize(&mut self, width: u32, height: u32) -> Result<(), PresenterError>;

    /// Upload and draw a new frame
    fn present_frame(&mut self, frame: &VideoFrame) -> Result<(), PresenterError>;

    /// Redraw the last uploaded frame
    fn present_last_frame(&mut self) -> Result<(), PresenterError>;

    fn update_transform(&mut self, window_width: u32, window_height: u32, video_width: u32, video_height: u32);

    fn resize_surface(&mut self, width: u32, height: u32);

    /// Release frame resources; `initialize` must be called before the next present
    fn teardown(&mut self);
}

/// Both decode sides of one file
pub struct OpenedMedia<V, A> {
    pub video: V,
    pub audio: A,
    pub path: PathBuf,
}

pub trait MediaOpener {
    type Video: VideoSource;
    type Audio: AudioControl;

    fn open(&mut self, path: &Path) -> Result<OpenedMedia<Self::Video, Self::Audio>, MediaError>;
}

/// Blocking file selection; `None` when cancelled
pub trait FilePicker {
    fn pick(&mut self) -> Option<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Sleep between redraws while paused
    pub pause_poll: Duration,
    /// Waits at or below this are skipped
    pub present_tolerance: Duration,
    /// How far the audio clock may pull a wait in, 0.0 to 1.0
    pub audio_sync_correction: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pause_poll: Duration::from_millis(200),
            present_tolerance: Duration::from_millis(2),
            audio_sync_correction: 0.5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Presenter(#[from] PresenterError),
}

/// Input mapped by the window layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Quit,
    ToggleFullscreen,
    TogglePause,
    ToggleMute,
    Reload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Continue,
    Exit,
    FullscreenChanged(bool),
    Reloaded(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Presented,
    Paused,
    /// End of stream reached; playback restarted from zero
    Looped,
    /// Nothing playable; the transport will not present again until a reload
    Stopped,
}

pub struct Transport<O, P, C, K>
where
    O: MediaOpener,
    P: FramePresenter,
    C: Clock,
    K: FilePicker,
{
    video: O::Video,
    audio: O::Audio,
    path: PathBuf,
    presenter: P,
    opener: O,
    picker: K,
    clock: C,
    timeline: Timeline,
    config: TransportConfig,
    muted: bool,
    fullscreen: bool,
    video_size: (u32, u32),
    window_size: (u32, u32),
    transform_dirty: bool,
    frames_this_pass: u64,
    stopped: bool,
}

impl<O, P, C, K> Transport<O, P, C, K>
where
    O: MediaOpener,
    P: FramePresenter,
    C: Clock,
    K: FilePicker,
{
    /// Initialize the presenter for `media` and start audio
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        media: OpenedMedia<O::Video, O::Audio>,
        mut presenter: P,
        opener: O,
        picker: K,
        clock: C,
        config: TransportConfig,
        window_size: (u32, u32),
    ) -> Result<Self, TransportError> {
        let OpenedMedia {
            video,
            mut audio,
            path,
        } = media;

        let video_size = video.dimensions();
        presenter.initialize(video_size.0, video_size.1)?;
        if let Err(e) = audio.start() {
            tracing::error!("Audio failed to start: {}", e);
        }

        let timeline = Timeline::new(clock.now());
        tracing::info!("Playing {}", path.display());

        Ok(Self {
            video,
            audio,
            path,
            presenter,
            opener,
            picker,
            clock,
            timeline,
            config,
            muted: false,
            fullscreen: false,
            video_size,
            window_size,
            transform_dirty: true,
            frames_this_pass: 0,
            stopped: false,
        })
    }

    /// Run one playback iteration
    pub fn step(&mut self) -> StepOutcome {
        if self.transform_dirty {
            self.apply_transform();
        }

        if self.stopped {
            return StepOutcome::Stopped;
        }

        if self.timeline.is_paused() {
            if let Err(e) = self.presenter.present_last_frame() {
                tracing::debug!("Redraw while paused failed: {}", e);
            }
            self.clock.sleep(self.config.pause_poll);
            return StepOutcome::Paused;
        }

        match self.video.next_frame() {
            Ok(Some(frame)) => {
                let elapsed = self.timeline.elapsed(self.clock.now());
                let wait = presentation_wait(
                    frame.pts,
                    elapsed,
                    self.audio.position(),
                    self.config.audio_sync_correction,
                );
                if wait > self.config.present_tolerance.as_secs_f64() {
                    self.clock.sleep(Duration::from_secs_f64(wait));
                }

                if let Err(e) = self.presenter.present_frame(frame) {
                    tracing::warn!("Failed to present frame at {:.3}s: {}", frame.pts, e);
                }
                self.frames_this_pass += 1;
                StepOutcome::Presented
            }
            Ok(None) if self.frames_this_pass == 0 => {
                tracing::error!("{} has no playable video frames", self.path.display());
                self.stopped = true;
                StepOutcome::Stopped
            }
            Ok(None) => {
                tracing::debug!(frames = self.frames_this_pass, "End of stream, looping");
                self.loop_to_start();
                StepOutcome::Looped
            }
            Err(e) if self.frames_this_pass == 0 => {
                tracing::error!("Stopping playback, no frame could be decoded: {}", e);
                self.stopped = true;
                StepOutcome::Stopped
            }
            Err(e) => {
                tracing::warn!("Decode error after {} frames, looping: {}", self.frames_this_pass, e);
                self.loop_to_start();
                StepOutcome::Looped
            }
        }
    }

    fn loop_to_start(&mut self) {
        if let Err(e) = self.video.seek_to_start() {
            tracing::warn!("Video rewind failed: {}", e);
        }
        self.audio.rewind();
        self.timeline.reset(self.clock.now());
        self.frames_this_pass = 0;
    }

    fn apply_transform(&mut self) {
        let (window_width, window_height) = self.window_size;
        let (video_width, video_height) = self.video_size;
        self.presenter.resize_surface(window_width, window_height);
        self.presenter
            .update_transform(window_width, window_height, video_width, video_height);
        self.transform_dirty = false;
    }

    /// Record a new window size; applied at the start of the next step
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.window_size {
            return;
        }
        self.window_size = (width, height);
        self.transform_dirty = true;
    }

    pub fn handle_command(&mut self, command: TransportCommand) -> CommandOutcome {
        match command {
            TransportCommand::Quit => CommandOutcome::Exit,
            TransportCommand::ToggleFullscreen => {
                self.fullscreen = !self.fullscreen;
                CommandOutcome::FullscreenChanged(self.fullscreen)
            }
            TransportCommand::TogglePause => {
                if self.timeline.is_paused() {
                    self.resume();
                } else {
                    self.pause();
                }
                CommandOutcome::Continue
            }
            TransportCommand::ToggleMute => {
                self.muted = !self.muted;
                self.audio.set_muted(self.muted);
                tracing::info!("Audio {}", if self.muted { "muted" } else { "unmuted" });
                CommandOutcome::Continue
            }
            TransportCommand::Reload => match self.reload() {
                Ok(Some(path)) => CommandOutcome::Reloaded(path),
                Ok(None) => CommandOutcome::Continue,
                Err(e) => {
                    tracing::error!("Reload failed: {}", e);
                    CommandOutcome::Continue
                }
            },
        }
    }

    pub fn pause(&mut self) {
        if self.timeline.is_paused() {
            return;
        }
        self.timeline.pause(self.clock.now());
        self.audio.pause();
        tracing::info!("Playback paused");
    }

    pub fn resume(&mut self) {
        if !self.timeline.is_paused() {
            return;
        }
        let gap = self.timeline.resume(self.clock.now());
        self.audio.resume();
        tracing::info!("Playback resumed after {:.2}s", gap.as_secs_f64());
    }

    /// Let the user pick a new file and switch playback to it.
    ///
    /// Returns `Ok(None)` if the picker was cancelled. If the new file cannot
    /// be opened the current playback continues untouched.
    pub fn reload(&mut self) -> Result<Option<PathBuf>, TransportError> {
        let was_paused = self.timeline.is_paused();
        self.pause();

        let Some(path) = self.picker.pick() else {
            tracing::info!("Reload cancelled");
            if !was_paused {
                self.resume();
            }
            return Ok(None);
        };

        let media = match self.opener.open(&path) {
            Ok(media) => media,
            Err(e) => {
                if !was_paused {
                    self.resume();
                }
                return Err(e.into());
            }
        };

        self.audio.shutdown();
        // Old decode units and audio drop here
        self.video = media.video;
        self.audio = media.audio;
        self.path = media.path;

        let video_size = self.video.dimensions();
        if video_size != self.video_size {
            tracing::info!(
                "Video size changed {}x{} -> {}x{}, reinitializing presenter",
                self.video_size.0,
                self.video_size.1,
                video_size.0,
                video_size.1
            );
            self.presenter.teardown();
            self.video_size = video_size;
            self.transform_dirty = true;
            if let Err(e) = self.presenter.initialize(video_size.0, video_size.1) {
                self.stopped = true;
                return Err(e.into());
            }
        }

        self.timeline = Timeline::new(self.clock.now());
        self.frames_this_pass = 0;
        self.stopped = false;
        self.audio.set_muted(self.muted);
        if let Err(e) = self.audio.start() {
            tracing::error!("Audio failed to start: {}", e);
        }

        tracing::info!("Reloaded {}", self.path.display());
        Ok(Some(path))
    }

    /// Stop audio and release presenter resources
    pub fn shutdown(&mut self) {
        self.audio.shutdown();
        self.presenter.teardown();
    }

    /// Window title for the current file
    pub fn title(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        format!("Framepace - {}", name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_paused(&self) -> bool {
        self.timeline.is_paused()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// Whether playback gave up on the current file
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn audio(&self) -> &O::Audio {
        &self.audio
    }
}
