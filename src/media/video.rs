//! Video decode unit
//!
//! Decodes the best video stream of a file to tightly packed RGBA frames.
//! Hardware-resident frames are transferred to system memory and converted
//! through their own lazily built scaler.

use std::path::Path;

use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use super::decode::{BackendStatus, DecodeBackend, DecodeContext, PacketRead};
use super::error::{DecodeError, MediaError, MediaKind};
use super::hwaccel::{HwAccelMethod, HwDevice};
use super::{read_next_packet, status_from, stream_origin, ticks_to_seconds, time_base_seconds};

/// Bytes per delivered pixel
const BYTES_PER_PIXEL: usize = 4;

/// A decoded video frame in RGBA8, rows tightly packed.
///
/// The pixel buffer keeps its capacity across pulls.
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: f64) -> Self {
        Self { data, width, height, pts }
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn expected_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }
}

/// Video stream metadata
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration: f64,
    /// Seconds per timestamp tick
    pub time_base: f64,
    pub hwaccel: HwAccelMethod,
    pub codec_name: String,
}

struct Scaler {
    context: scaling::Context,
    key: (Pixel, u32, u32),
}

/// FFmpeg-backed video decoding.
///
/// Fields drop in declaration order: conversion state, hardware device,
/// codec, then the container.
pub struct FfmpegVideoBackend {
    sw_scaler: Option<Scaler>,
    hw_scaler: Option<Scaler>,
    rgba: ffmpeg_next::frame::Video,
    transferred: ffmpeg_next::frame::Video,
    decoded: ffmpeg_next::frame::Video,
    hw_device: Option<HwDevice>,
    decoder: ffmpeg_next::decoder::Video,
    /// Read by the codec's format callback; must outlive `decoder`
    hw_format: Option<Box<ffi::AVPixelFormat>>,
    input: ffmpeg_next::format::context::Input,
    stream_index: usize,
    /// Timestamp of the stream's first frame, in stream ticks
    origin: i64,
    /// Set once the first frame has shown which path decode took
    format_checked: bool,
    info: VideoInfo,
}

pub type VideoDecodeUnit = DecodeContext<FfmpegVideoBackend>;

/// Open the video stream of `path` as a decode unit
pub fn open_video(path: &Path, prefer_software: bool) -> Result<VideoDecodeUnit, MediaError> {
    FfmpegVideoBackend::open(path, prefer_software).map(DecodeContext::new)
}

impl FfmpegVideoBackend {
    /// Open a file and its best video stream, trying hardware decode unless
    /// `prefer_software` is set
    pub fn open(path: &Path, prefer_software: bool) -> Result<Self, MediaError> {
        ffmpeg_next::init().map_err(MediaError::Init)?;

        let input = ffmpeg_next::format::input(&path).map_err(|source| MediaError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(MediaError::NoStream(MediaKind::Video))?;

        let stream_index = stream.index();
        let time_base = time_base_seconds(stream.time_base());
        let origin = stream_origin(stream.start_time());

        let frame_rate = stream.avg_frame_rate();
        let frame_rate = if frame_rate.denominator() > 0 && frame_rate.numerator() > 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            30.0
        };

        let duration = if stream.duration() > 0 {
            stream.duration() as f64 * time_base
        } else if input.duration() > 0 {
            input.duration() as f64 / ffi::AV_TIME_BASE as f64
        } else {
            0.0
        };

        let parameters = stream.parameters();
        let codec_id = parameters.id();
        let codec_name = codec_id.name().to_string();
        if ffmpeg_next::decoder::find(codec_id).is_none() {
            return Err(MediaError::DecoderUnavailable(codec_name));
        }

        let (decoder, hw_device, hw_format) = if prefer_software {
            (Self::open_decoder(parameters, None)?, None, None)
        } else {
            Self::open_accelerated(parameters)?
        };

        let hwaccel = hw_device
            .as_ref()
            .map(HwDevice::method)
            .unwrap_or(HwAccelMethod::None);

        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            frame_rate,
            duration,
            time_base,
            hwaccel,
            codec_name,
        };

        tracing::info!(
            "Opened video: {}x{} @ {:.2}fps, duration: {:.2}s, codec: {}, hwaccel: {}",
            info.width,
            info.height,
            info.frame_rate,
            info.duration,
            info.codec_name,
            info.hwaccel
        );

        Ok(Self {
            sw_scaler: None,
            hw_scaler: None,
            rgba: ffmpeg_next::frame::Video::empty(),
            transferred: ffmpeg_next::frame::Video::empty(),
            decoded: ffmpeg_next::frame::Video::empty(),
            hw_device,
            decoder,
            hw_format,
            input,
            stream_index,
            origin,
            format_checked: false,
            info,
        })
    }

    /// Try each accelerator in preference order, falling back to software
    /// when none can be created or the accelerated decoder fails to open
    #[allow(clippy::type_complexity)]
    fn open_accelerated(
        parameters: ffmpeg_next::codec::Parameters,
    ) -> Result<(ffmpeg_next::decoder::Video, Option<HwDevice>, Option<Box<ffi::AVPixelFormat>>), MediaError> {
        let Some(device) = HwDevice::create_preferred() else {
            tracing::info!("No hardware decoder available, using software decode");
            return Ok((Self::open_decoder(parameters, None)?, None, None));
        };
        let Some(pixel_format) = device.method().pixel_format() else {
            return Ok((Self::open_decoder(parameters, None)?, None, None));
        };

        let mut wanted = Box::new(pixel_format);
        match Self::open_decoder(parameters.clone(), Some((&device, &mut wanted))) {
            Ok(decoder) => {
                tracing::info!("Hardware acceleration enabled: {}", device.method());
                Ok((decoder, Some(device), Some(wanted)))
            }
            Err(e) => {
                tracing::warn!(
                    "Hardware decoder ({}) failed to open: {}. Falling back to software decode.",
                    device.method(),
                    e
                );
                Ok((Self::open_decoder(parameters, None)?, None, None))
            }
        }
    }

    fn open_decoder(
        parameters: ffmpeg_next::codec::Parameters,
        hardware: Option<(&HwDevice, &mut Box<ffi::AVPixelFormat>)>,
    ) -> Result<ffmpeg_next::decoder::Video, MediaError> {
        let init_error = |e: ffmpeg_next::Error| MediaError::DecoderInit {
            kind: MediaKind::Video,
            message: e.to_string(),
        };

        let mut context = ffmpeg_next::codec::context::Context::from_parameters(parameters).map_err(init_error)?;
        if let Some((device, wanted)) = hardware {
            unsafe { device.attach(context.as_mut_ptr(), wanted.as_mut()) };
        }
        context.decoder().video().map_err(init_error)
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn is_hardware_frame(&self) -> bool {
        match self.hw_format.as_deref() {
            Some(format) => self.decoded.format() == Pixel::from(*format),
            None => false,
        }
    }

    /// Copy a hardware surface into system memory
    fn transfer_hardware_frame(&mut self) -> Result<(), DecodeError> {
        let ret = unsafe {
            ffi::av_frame_unref(self.transferred.as_mut_ptr());
            ffi::av_hwframe_transfer_data(self.transferred.as_mut_ptr(), self.decoded.as_ptr(), 0)
        };
        if ret < 0 {
            return Err(DecodeError::Conversion(format!(
                "hardware frame transfer failed ({})",
                ffmpeg_next::Error::from(ret)
            )));
        }
        Ok(())
    }
}

/// Accelerator actually in use once a frame has been decoded. The format
/// callback may settle on a software format even with a device attached.
fn negotiated_method(opened: HwAccelMethod, hardware_frame: bool) -> HwAccelMethod {
    if hardware_frame {
        opened
    } else {
        HwAccelMethod::None
    }
}

/// Get a scaler matching the source frame, rebuilding it (and resetting the
/// output frame) when the source format or size changes
fn scaler_for<'a>(
    slot: &'a mut Option<Scaler>,
    output: &mut ffmpeg_next::frame::Video,
    format: Pixel,
    width: u32,
    height: u32,
) -> Result<&'a mut scaling::Context, DecodeError> {
    let key = (format, width, height);
    if !matches!(slot, Some(scaler) if scaler.key == key) {
        let context = scaling::Context::get(format, width, height, Pixel::RGBA, width, height, scaling::Flags::BILINEAR)
            .map_err(|e| DecodeError::Conversion(format!("failed to create scaler: {}", e)))?;
        tracing::debug!(?format, width, height, "Created RGBA scaler");
        *slot = Some(Scaler { context, key });
        *output = ffmpeg_next::frame::Video::empty();
    }
    match slot {
        Some(scaler) => Ok(&mut scaler.context),
        None => Err(DecodeError::Conversion("scaler unavailable".to_string())),
    }
}

/// Copy `rows` rows of `row_bytes` from a strided plane into `dst`
fn pack_rows(src: &[u8], stride: usize, row_bytes: usize, rows: usize, dst: &mut Vec<u8>) {
    dst.clear();
    if stride == row_bytes {
        dst.extend_from_slice(&src[..row_bytes * rows]);
        return;
    }
    dst.reserve(row_bytes * rows);
    for row in src.chunks(stride).take(rows) {
        dst.extend_from_slice(&row[..row_bytes]);
    }
}

impl DecodeBackend for FfmpegVideoBackend {
    type Packet = ffmpeg_next::Packet;
    type Output = VideoFrame;

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

    fn convert(&mut self, slot: &mut Option<VideoFrame>) -> Result<(), DecodeError> {
        let ticks = self.decoded.timestamp().or_else(|| self.decoded.pts()).unwrap_or(0);
        let pts = ticks_to_seconds(ticks, self.origin, self.info.time_base);

        let hardware = self.is_hardware_frame();
        if !self.format_checked {
            self.format_checked = true;
            let method = negotiated_method(self.info.hwaccel, hardware);
            if method != self.info.hwaccel {
                tracing::warn!(
                    "{} decoder negotiated software frames ({:?}), decoding on the CPU",
                    self.info.hwaccel,
                    self.decoded.format()
                );
                self.info.hwaccel = method;
            }
        }
        if hardware {
            self.transfer_hardware_frame()?;
        }

        let (source, scaler_slot) = if hardware {
            (&self.transferred, &mut self.hw_scaler)
        } else {
            (&self.decoded, &mut self.sw_scaler)
        };

        let scaler = scaler_for(scaler_slot, &mut self.rgba, source.format(), source.width(), source.height())?;
        scaler
            .run(source, &mut self.rgba)
            .map_err(|e| DecodeError::Conversion(e.to_string()))?;

        let frame = slot.get_or_insert_with(VideoFrame::default);
        let width = self.rgba.width();
        let height = self.rgba.height();
        pack_rows(
            self.rgba.data(0),
            self.rgba.stride(0),
            width as usize * BYTES_PER_PIXEL,
            height as usize,
            &mut frame.data,
        );
        frame.width = width;
        frame.height = height;
        frame.pts = pts;
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

impl DecodeContext<FfmpegVideoBackend> {
    pub fn info(&self) -> &VideoInfo {
        self.backend().info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fixtures;

    #[test]
    fn test_pack_rows_strips_padding() {
        // 2x2 RGBA with 4 bytes of row padding
        let src: Vec<u8> = (0..24).collect();
        let mut dst = Vec::new();
        pack_rows(&src, 12, 8, 2, &mut dst);
        assert_eq!(dst, vec![0, 1, 2, 3, 4, 5, 6, 7, 12, 13, 14, 15, 16, 17, 18, 19]);
    }

    #[test]
    fn test_pack_rows_reuses_capacity() {
        let src = vec![7u8; 64];
        let mut dst = Vec::with_capacity(64);
        let capacity = dst.capacity();
        pack_rows(&src, 16, 16, 4, &mut dst);
        assert_eq!(dst.len(), 64);
        pack_rows(&src, 16, 16, 4, &mut dst);
        assert_eq!(dst.capacity(), capacity);
    }

    #[test]
    fn test_negotiated_method() {
        assert_eq!(negotiated_method(HwAccelMethod::Vaapi, true), HwAccelMethod::Vaapi);
        assert_eq!(negotiated_method(HwAccelMethod::Cuda, false), HwAccelMethod::None);
        assert_eq!(negotiated_method(HwAccelMethod::None, false), HwAccelMethod::None);
    }

    #[test]
    fn test_decodes_y4m_to_packed_rgba() {
        let path = fixtures::scratch_file("video_decode", "clip.y4m");
        fixtures::write_y4m(&path, 32, 16, 3).unwrap();

        let mut unit = open_video(&path, true).unwrap();
        assert_eq!((unit.info().width, unit.info().height), (32, 16));
        assert_eq!(unit.info().hwaccel, HwAccelMethod::None);
        assert!((unit.info().frame_rate - 25.0).abs() < 1e-9);

        let mut timestamps = Vec::new();
        while let Some(frame) = unit.pull_frame().unwrap() {
            assert_eq!(frame.data.len(), VideoFrame::expected_size(32, 16));
            assert_eq!((frame.width, frame.height), (32, 16));
            // Opaque alpha
            assert_eq!(frame.data[3], 255);
            timestamps.push(frame.pts);
        }
        assert_eq!(timestamps.len(), 3);
        assert_eq!(timestamps[0], 0.0);
        assert!((timestamps[1] - 0.04).abs() < 1e-9);
        assert!((timestamps[2] - 0.08).abs() < 1e-9);

        unit.seek_to_start().unwrap();
        let first = unit.pull_frame().unwrap().map(|frame| frame.pts);
        assert_eq!(first, Some(0.0));
        assert_eq!(unit.frames_pulled(), 4);
        unit.close();
    }

    #[test]
    fn test_file_without_video_is_rejected() {
        let path = fixtures::scratch_file("video_missing", "tone.wav");
        fixtures::write_wav(&path, 48000, 2, 480, 0).unwrap();
        assert!(matches!(
            open_video(&path, true),
            Err(MediaError::NoStream(MediaKind::Video))
        ));
    }

    #[test]
    fn test_frame_geometry() {
        let frame = VideoFrame::new(vec![0; VideoFrame::expected_size(4, 2)], 4, 2, 0.5);
        assert_eq!(frame.stride(), 16);
        assert_eq!(frame.data.len(), 32);
    }
}
