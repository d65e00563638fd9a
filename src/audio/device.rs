//! Audio output via cpal
//!
//! The device callback drains a shared sample queue that the feeder thread
//! fills. Mute and volume are applied in the callback so the queue keeps
//! draining (and the audio clock keeps moving) while muted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Audio output failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("No default output device")]
    NoOutputDevice,

    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("Failed to control output stream: {0}")]
    StreamControl(String),

    #[error("Output stream failed: {0}")]
    StreamFailed(String),

    #[error("Failed to spawn audio feeder: {0}")]
    FeederSpawn(String),
}

/// Feeder-side view of an output device
pub trait AudioSink: Send {
    /// Bytes queued but not yet played
    fn queued_bytes(&self) -> usize;

    /// Queue interleaved f32 samples given as raw bytes
    fn push(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Drop everything queued
    fn clear(&mut self);
}

/// Samples shared between the feeder thread and the device callback
pub struct SampleQueue {
    samples: Mutex<VecDeque<f32>>,
    volume_bits: AtomicU32,
    muted: AtomicBool,
    paused: AtomicBool,
    failure: Mutex<Option<String>>,
    underruns: AtomicU64,
}

impl SampleQueue {
    pub fn new(volume: f32) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            volume_bits: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            failure: Mutex::new(None),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn queued_samples(&self) -> usize {
        self.samples.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_samples() * std::mem::size_of::<f32>()
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Append little-endian f32 bytes; a trailing partial sample is ignored
    pub fn push_bytes(&self, bytes: &[u8]) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.extend(
                bytes
                    .chunks_exact(4)
                    .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.clear();
        }
    }

    /// Fill a device buffer. Silence while paused; short queues are padded
    /// with silence and counted as an underrun.
    pub fn drain_into(&self, out: &mut [f32]) {
        if self.is_paused() {
            out.fill(0.0);
            return;
        }

        let gain = if self.is_muted() { 0.0 } else { self.volume() };
        let Ok(mut queue) = self.samples.lock() else {
            out.fill(0.0);
            return;
        };

        let available = queue.len().min(out.len());
        for (dst, sample) in out.iter_mut().zip(queue.drain(..available)) {
            *dst = sample * gain;
        }
        if available < out.len() {
            out[available..].fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_failure(&self, message: String) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(message);
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }
}

/// Feeder handle onto a device's sample queue
#[derive(Clone)]
pub struct QueueSink {
    queue: Arc<SampleQueue>,
}

impl QueueSink {
    pub fn new(queue: Arc<SampleQueue>) -> Self {
        Self { queue }
    }
}

impl AudioSink for QueueSink {
    fn queued_bytes(&self) -> usize {
        self.queue.queued_bytes()
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        if let Some(message) = self.queue.failure() {
            return Err(DeviceError::StreamFailed(message));
        }
        self.queue.push_bytes(bytes);
        Ok(())
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Wrapper for cpal::Stream that implements Send
/// Safety: the stream is only touched from the thread that owns the device
struct StreamWrapper(cpal::Stream);

unsafe impl Send for StreamWrapper {}

/// An open output stream: stereo f32 at a fixed rate
pub struct AudioDevice {
    stream: Option<StreamWrapper>,
    queue: Arc<SampleQueue>,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl AudioDevice {
    /// Pick the rate to open the default device at: `preferred` when the
    /// device supports it for f32 output, else the device's default rate
    pub fn negotiate_rate(preferred: u32, channels: u16) -> Result<u32, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoOutputDevice)?;

        let supported = device
            .supported_output_configs()
            .map(|configs| {
                configs.into_iter().any(|range| {
                    range.channels() == channels
                        && range.sample_format() == cpal::SampleFormat::F32
                        && range.min_sample_rate().0 <= preferred
                        && preferred <= range.max_sample_rate().0
                })
            })
            .unwrap_or(false);

        if supported {
            return Ok(preferred);
        }

        let fallback = device
            .default_output_config()
            .map(|config| config.sample_rate().0)
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;
        tracing::warn!(
            "Output device does not support {}Hz f32 output, using {}Hz",
            preferred,
            fallback
        );
        Ok(fallback)
    }

    /// Open the default output device. The stream starts paused.
    pub fn open(sample_rate: u32, channels: u16, volume: f32) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoOutputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::new(SampleQueue::new(volume));
        let callback_queue = Arc::clone(&queue);
        let error_queue = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_queue.drain_into(data);
                },
                move |err| {
                    tracing::error!("Audio output error: {}", err);
                    error_queue.record_failure(err.to_string());
                },
                None,
            )
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

        tracing::info!("AudioDevice: {} @ {}Hz, {} channels", device_name, sample_rate, channels);

        Ok(Self {
            stream: Some(StreamWrapper(stream)),
            queue,
            sample_rate,
            channels,
            device_name,
        })
    }

    /// A sink the feeder thread can push into
    pub fn sink(&self) -> QueueSink {
        QueueSink::new(Arc::clone(&self.queue))
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn resume(&self) -> Result<(), DeviceError> {
        self.queue.set_paused(false);
        if let Some(ref wrapper) = self.stream {
            wrapper
                .0
                .play()
                .map_err(|e| DeviceError::StreamControl(e.to_string()))?;
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), DeviceError> {
        self.queue.set_paused(true);
        if let Some(ref wrapper) = self.stream {
            wrapper
                .0
                .pause()
                .map_err(|e| DeviceError::StreamControl(e.to_string()))?;
        }
        Ok(())
    }

    pub fn set_muted(&self, muted: bool) {
        self.queue.set_muted(muted);
    }

    pub fn set_volume(&self, volume: f32) {
        self.queue.set_volume(volume);
    }

    pub fn clear(&self) {
        self.queue.clear();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes of audio per second of playback
    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64 * std::mem::size_of::<f32>() as f64
    }

    /// Stop and release the output stream
    pub fn close(&mut self) {
        if let Some(wrapper) = self.stream.take() {
            self.queue.set_paused(true);
            let _ = wrapper.0.pause();
            let underruns = self.queue.underruns();
            tracing::debug!(underruns, "Closed audio device {}", self.device_name);
        }
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_push_and_drain() {
        let queue = SampleQueue::new(1.0);
        queue.set_paused(false);
        queue.push_bytes(&bytes(&[0.1, 0.2, 0.3, 0.4]));
        assert_eq!(queue.queued_bytes(), 16);

        let mut out = [0.0f32; 2];
        queue.drain_into(&mut out);
        assert_eq!(out, [0.1, 0.2]);
        assert_eq!(queue.queued_samples(), 2);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let queue = SampleQueue::new(1.0);
        queue.set_paused(false);
        queue.push_bytes(&bytes(&[0.5]));

        let mut out = [1.0f32; 4];
        queue.drain_into(&mut out);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(queue.underruns(), 1);
    }

    #[test]
    fn test_paused_queue_is_not_drained() {
        let queue = SampleQueue::new(1.0);
        queue.push_bytes(&bytes(&[0.5, 0.5]));

        let mut out = [1.0f32; 2];
        queue.drain_into(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(queue.queued_samples(), 2);
    }

    #[test]
    fn test_mute_drains_silently() {
        let queue = SampleQueue::new(0.8);
        queue.set_paused(false);
        queue.set_muted(true);
        queue.push_bytes(&bytes(&[0.5, 0.5]));

        let mut out = [1.0f32; 2];
        queue.drain_into(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(queue.queued_samples(), 0);
    }

    #[test]
    fn test_volume_is_clamped_and_applied() {
        let queue = SampleQueue::new(2.0);
        assert_eq!(queue.volume(), 1.0);
        queue.set_volume(0.5);
        queue.set_paused(false);
        queue.push_bytes(&bytes(&[0.8]));

        let mut out = [0.0f32; 1];
        queue.drain_into(&mut out);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_sink_reports_stream_failure() {
        let queue = Arc::new(SampleQueue::new(1.0));
        let mut sink = QueueSink::new(Arc::clone(&queue));
        assert!(sink.push(&bytes(&[0.1])).is_ok());

        queue.record_failure("device unplugged".to_string());
        assert!(matches!(sink.push(&bytes(&[0.1])), Err(DeviceError::StreamFailed(_))));
        sink.clear();
        assert_eq!(sink.queued_bytes(), 0);
    }

    #[test]
    fn test_partial_trailing_sample_is_ignored() {
        let queue = SampleQueue::new(1.0);
        let mut data = bytes(&[0.25]);
        data.push(0xff);
        queue.push_bytes(&data);
        assert_eq!(queue.queued_samples(), 1);
    }
}
