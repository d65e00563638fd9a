//! Audio decode unit
//!
//! Decodes the best audio stream and resamples it to packed stereo f32.
//! Every successful pull hands out a freshly allocated sample buffer sized
//! for the resampler's buffered delay plus the new input.

use std::path::Path;

use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::resampling;
use ffmpeg_next::ChannelLayout;

use super::decode::{BackendStatus, DecodeBackend, DecodeContext, PacketRead};
use super::error::{DecodeError, MediaError, MediaKind};
use super::{read_next_packet, status_from, stream_origin, ticks_to_seconds, time_base_seconds};

/// Channels delivered to the audio device
pub const OUTPUT_CHANNELS: u16 = 2;

const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// Interleaved stereo f32 samples, as raw bytes
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub data: Vec<u8>,
    /// Presentation timestamp of the first sample, in seconds
    pub pts: f64,
    /// Samples per channel
    pub frames: usize,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Timestamp just past the last sample
    pub fn end_pts(&self) -> f64 {
        self.pts + self.duration()
    }
}

/// Output samples needed to hold `delay` buffered plus `samples` new input
/// samples after rate conversion, rounded up
pub fn output_capacity(delay: i64, samples: usize, in_rate: u32, out_rate: u32) -> usize {
    if in_rate == 0 {
        return 0;
    }
    let total = delay.max(0) as u128 + samples as u128;
    let out_rate = out_rate as u128;
    let in_rate = in_rate as u128;
    ((total * out_rate + in_rate - 1) / in_rate) as usize
}

/// FFmpeg-backed audio decoding.
///
/// Fields drop in declaration order: resampler, codec, container.
pub struct FfmpegAudioBackend {
    resampler: resampling::Context,
    decoded: ffmpeg_next::frame::Audio,
    decoder: ffmpeg_next::decoder::Audio,
    input: ffmpeg_next::format::context::Input,
    stream_index: usize,
    time_base: f64,
    /// Timestamp of the stream's first sample, in stream ticks
    origin: i64,
    source_layout: ChannelLayout,
    output_rate: u32,
}

// Owned by exactly one thread at a time; the feeder thread takes it over
// while it runs and hands it back when joined.
unsafe impl Send for FfmpegAudioBackend {}

pub type AudioDecodeUnit = DecodeContext<FfmpegAudioBackend>;

/// Open the audio stream of `path` as a decode unit
pub fn open_audio(path: &Path) -> Result<AudioDecodeUnit, MediaError> {
    FfmpegAudioBackend::open(path).map(DecodeContext::new)
}

impl FfmpegAudioBackend {
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        ffmpeg_next::init().map_err(MediaError::Init)?;

        let input = ffmpeg_next::format::input(&path).map_err(|source| MediaError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Audio)
            .ok_or(MediaError::NoStream(MediaKind::Audio))?;
        let stream_index = stream.index();
        let time_base = time_base_seconds(stream.time_base());
        let origin = stream_origin(stream.start_time());

        let parameters = stream.parameters();
        let codec_id = parameters.id();
        if ffmpeg_next::decoder::find(codec_id).is_none() {
            return Err(MediaError::DecoderUnavailable(codec_id.name().to_string()));
        }

        let init_error = |e: ffmpeg_next::Error| MediaError::DecoderInit {
            kind: MediaKind::Audio,
            message: e.to_string(),
        };
        let context = ffmpeg_next::codec::context::Context::from_parameters(parameters).map_err(init_error)?;
        let decoder = context.decoder().audio().map_err(init_error)?;

        let source_layout = if decoder.channel_layout().is_empty() {
            ChannelLayout::default(decoder.channels() as i32)
        } else {
            decoder.channel_layout()
        };
        let output_rate = decoder.rate();
        let resampler = Self::build_resampler(&decoder, source_layout, output_rate)?;

        tracing::info!(
            "Opened audio: {}Hz, {} channels, format {:?}, codec: {}",
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            codec_id.name()
        );

        Ok(Self {
            resampler,
            decoded: ffmpeg_next::frame::Audio::empty(),
            decoder,
            input,
            stream_index,
            time_base,
            origin,
            source_layout,
            output_rate,
        })
    }

    fn build_resampler(
        decoder: &ffmpeg_next::decoder::Audio,
        source_layout: ChannelLayout,
        output_rate: u32,
    ) -> Result<resampling::Context, MediaError> {
        resampling::Context::get(
            decoder.format(),
            source_layout,
            decoder.rate(),
            Sample::F32(SampleType::Packed),
            ChannelLayout::STEREO,
            output_rate,
        )
        .map_err(MediaError::ResamplerInit)
    }

    /// Source sample rate of the stream
    pub fn source_rate(&self) -> u32 {
        self.decoder.rate()
    }

    /// Sample rate of the delivered buffers
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Deliver samples at `rate` instead of the source rate. Used when the
    /// output device cannot run at the source rate.
    pub fn set_output_rate(&mut self, rate: u32) -> Result<(), MediaError> {
        if rate == self.output_rate {
            return Ok(());
        }
        self.resampler = Self::build_resampler(&self.decoder, self.source_layout, rate)?;
        tracing::info!("Resampling audio from {}Hz to {}Hz", self.decoder.rate(), rate);
        self.output_rate = rate;
        Ok(())
    }
}

impl DecodeBackend for FfmpegAudioBackend {
    type Packet = ffmpeg_next::Packet;
    type Output = SampleBuffer;

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn read_packet(&mut self) -> PacketRead<Self::Packet> {
        read_next_packet(&mut self.input)
    }

    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), BackendStatus> {
        self.decoder.send_packet(packet).map_err(status_from)
    }

    fn send_eof(&mut self) -> Result<(), BackendStatus> {
        self.decoder.send_eof().map_err(status_from)
    }

    fn receive_frame(&mut self) -> Result<(), BackendStatus> {
        self.decoder.receive_frame(&mut self.decoded).map_err(status_from)
    }

    fn convert(&mut self, slot: &mut Option<SampleBuffer>) -> Result<(), DecodeError> {
        // The previous buffer is released before the next one is allocated
        slot.take();

        let ticks = self.decoded.timestamp().or_else(|| self.decoded.pts()).unwrap_or(0);
        let pts = ticks_to_seconds(ticks, self.origin, self.time_base);

        // Formats without a channel mask decode to frames with an unspecified
        // layout, which the resampler rejects as a layout change
        if self.decoded.channel_layout().is_empty() {
            self.decoded.set_channel_layout(self.source_layout);
        }

        let delay = self.resampler.delay().map(|d| d.input).unwrap_or(0);
        let capacity = output_capacity(delay, self.decoded.samples(), self.decoder.rate(), self.output_rate);

        let mut converted = ffmpeg_next::frame::Audio::new(Sample::F32(SampleType::Packed), capacity, ChannelLayout::STEREO);
        converted.set_rate(self.output_rate);
        self.resampler
            .run(&self.decoded, &mut converted)
            .map_err(|e| DecodeError::Conversion(format!("resampling failed: {}", e)))?;

        let frames = converted.samples();
        let byte_len = frames * OUTPUT_CHANNELS as usize * BYTES_PER_SAMPLE;
        let plane = converted.data(0);
        let data = plane[..byte_len.min(plane.len())].to_vec();

        *slot = Some(SampleBuffer {
            data,
            pts,
            frames,
            sample_rate: self.output_rate,
        });
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        self.input
            .seek(0, ..)
            .map_err(|e| DecodeError::Seek(e.to_string()))?;
        self.decoder.flush();
        Ok(())
    }
}
