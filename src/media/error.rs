//! Error types for the decode units

use std::path::PathBuf;

use crate::audio::DeviceError;

/// Which elementary stream a decode unit is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Construction failures. Anything acquired before the failure has already
/// been released when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("FFmpeg initialization failed: {0}")]
    Init(ffmpeg_next::Error),

    #[error("Failed to open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        source: ffmpeg_next::Error,
    },

    #[error("No {0} stream found in file")]
    NoStream(MediaKind),

    #[error("No decoder available for codec {0}")]
    DecoderUnavailable(String),

    #[error("Failed to create {kind} decoder: {message}")]
    DecoderInit { kind: MediaKind, message: String },

    #[error("Failed to create resampler: {0}")]
    ResamplerInit(ffmpeg_next::Error),

    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),
}

/// Errors surfaced by `DecodeContext::pull_frame` and `seek_to_start`.
///
/// Transient decoder states (`EAGAIN`) never appear here; they are retried
/// inside the pull loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The decoder reported a failure it cannot recover from
    #[error("Unrecoverable decode error: {0}")]
    Corrupt(String),

    /// Scaling, hardware transfer or resampling of a decoded frame failed
    #[error("Frame conversion failed: {0}")]
    Conversion(String),

    #[error("Seek failed: {0}")]
    Seek(String),
}
