//! Framepace
//!
//! Plays a container file holding one video and one audio stream, decoding both
//! in real time and keeping the picture paced against the audio device.

pub mod app;
pub mod audio;
pub mod media;
pub mod picker;
pub mod playback;
pub mod render;
pub mod settings;
pub mod telemetry;

pub use app::App;
pub use audio::{AudioDevice, AudioManager};
pub use media::{AudioDecodeUnit, DecodeContext, DecodeError, MediaError, SampleBuffer, VideoDecodeUnit, VideoFrame, VideoInfo};
pub use playback::{Transport, TransportCommand};
pub use render::Presenter;
pub use settings::PlayerPreferences;
