//! Decode units
//!
//! One FFmpeg container/codec pair per elementary stream, each driven through
//! the generic `DecodeContext` pull loop and converting frames to the formats
//! the presenter and the audio device consume.

mod audio;
mod decode;
mod error;
mod hwaccel;
mod video;

pub use audio::{open_audio, output_capacity, AudioDecodeUnit, FfmpegAudioBackend, SampleBuffer, OUTPUT_CHANNELS};
pub use decode::{BackendStatus, DecodeBackend, DecodeContext, PacketRead};
pub use error::{DecodeError, MediaError, MediaKind};
pub use hwaccel::{HwAccelMethod, HwDevice};
pub use video::{open_video, FfmpegVideoBackend, VideoDecodeUnit, VideoFrame, VideoInfo};

#[cfg(test)]
pub(crate) use decode::mock;

#[cfg(test)]
pub(crate) mod fixtures;

/// Consecutive unreadable packets tolerated before the container is treated
/// as exhausted
const MAX_READ_ERRORS: u32 = 64;

/// Map an FFmpeg decoder error onto the backend status codes
pub(crate) fn status_from(error: ffmpeg_next::Error) -> BackendStatus {
    match error {
        ffmpeg_next::Error::Other {
            errno: ffmpeg_next::error::EAGAIN,
        } => BackendStatus::Again,
        ffmpeg_next::Error::Eof => BackendStatus::Eof,
        other => BackendStatus::Fatal(other.to_string()),
    }
}

/// Read the next packet of any stream from `input`
pub(crate) fn read_next_packet(input: &mut ffmpeg_next::format::context::Input) -> PacketRead<ffmpeg_next::Packet> {
    let mut errors = 0;
    loop {
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(input) {
            Ok(()) => {
                return PacketRead::Packet {
                    stream: packet.stream(),
                    packet,
                }
            }
            Err(ffmpeg_next::Error::Eof) => return PacketRead::End,
            Err(e) => {
                errors += 1;
                if errors >= MAX_READ_ERRORS {
                    tracing::warn!("Giving up on container after {} read errors: {}", errors, e);
                    return PacketRead::End;
                }
                tracing::trace!("Skipping unreadable packet: {}", e);
            }
        }
    }
}

/// First timestamp of a stream in its own ticks; streams without a start
/// time begin at zero
pub(crate) fn stream_origin(start_time: i64) -> i64 {
    // AV_NOPTS_VALUE
    if start_time == i64::MIN {
        0
    } else {
        start_time
    }
}

/// Seconds from the start of the stream for a frame timestamp
pub(crate) fn ticks_to_seconds(ticks: i64, origin: i64, time_base: f64) -> f64 {
    ticks.saturating_sub(origin) as f64 * time_base
}

/// Stream time base as seconds per tick
pub(crate) fn time_base_seconds(time_base: ffmpeg_next::Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    time_base.numerator() as f64 / time_base.denominator() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let again = ffmpeg_next::Error::Other {
            errno: ffmpeg_next::error::EAGAIN,
        };
        assert_eq!(status_from(again), BackendStatus::Again);
        assert_eq!(status_from(ffmpeg_next::Error::Eof), BackendStatus::Eof);
        assert!(matches!(
            status_from(ffmpeg_next::Error::InvalidData),
            BackendStatus::Fatal(_)
        ));
    }

    #[test]
    fn test_timestamps_are_relative_to_stream_start() {
        // MPEG-TS style stream starting at 1.4s on a 90kHz clock
        let origin = stream_origin(126_000);
        assert_eq!(ticks_to_seconds(126_000, origin, 1.0 / 90_000.0), 0.0);
        assert!((ticks_to_seconds(129_000, origin, 1.0 / 90_000.0) - 0.0333).abs() < 1e-3);

        assert_eq!(stream_origin(i64::MIN), 0);
        assert_eq!(ticks_to_seconds(25, stream_origin(i64::MIN), 0.04), 1.0);
    }

    #[test]
    fn test_time_base_seconds() {
        assert_eq!(time_base_seconds(ffmpeg_next::Rational::new(1, 1000)), 0.001);
        assert_eq!(time_base_seconds(ffmpeg_next::Rational::new(1, 0)), 0.0);
    }
}
