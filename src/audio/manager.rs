//! Audio playback for one file
//!
//! Owns the audio decode unit, the output device and the feeder thread.
//! While the feeder runs it owns the decode unit; `stop` joins the thread and
//! takes the decode unit back.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use super::clock::AudioClock;
use super::device::{AudioDevice, DeviceError};
use super::feeder::{AudioFeeder, FeederCommand, FeederConfig, FeederExit, FeederExitReason};
use crate::media::{open_audio, AudioDecodeUnit, FfmpegAudioBackend, MediaError, OUTPUT_CHANNELS};
use crate::playback::AudioControl;

pub struct AudioManager {
    feeder: Option<JoinHandle<FeederExit<FfmpegAudioBackend>>>,
    commands: Option<Sender<FeederCommand>>,
    /// Parked here while no feeder is running
    decoder: Option<AudioDecodeUnit>,
    running: Arc<AtomicBool>,
    clock: Arc<AudioClock>,
    config: FeederConfig,
    muted: bool,
    paused: bool,
    device: AudioDevice,
}

impl AudioManager {
    /// Open the audio stream of `path` and an output device for it. The
    /// device is resumed; call `start` to begin feeding it.
    pub fn open(path: &Path, config: FeederConfig, volume: f32) -> Result<Self, MediaError> {
        let mut decoder = open_audio(path)?;

        let source_rate = decoder.backend().source_rate();
        let rate = AudioDevice::negotiate_rate(source_rate, OUTPUT_CHANNELS)?;
        if rate != source_rate {
            decoder.backend_mut().set_output_rate(rate)?;
        }

        let device = AudioDevice::open(rate, OUTPUT_CHANNELS, volume)?;
        device.resume()?;
        let clock = Arc::new(AudioClock::new(device.bytes_per_second()));

        Ok(Self {
            feeder: None,
            commands: None,
            decoder: Some(decoder),
            running: Arc::new(AtomicBool::new(false)),
            clock,
            config,
            muted: false,
            paused: false,
            device,
        })
    }

    /// Spawn the feeder thread. No-op if it is already running.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.feeder.is_some() {
            return Ok(());
        }
        let Some(decoder) = self.decoder.take() else {
            tracing::warn!("Audio decoder unavailable; feeder not started");
            return Ok(());
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        self.running.store(true, Ordering::Release);

        let feeder = AudioFeeder::new(
            decoder,
            self.device.sink(),
            Arc::clone(&self.clock),
            Arc::clone(&self.running),
            rx,
            self.config.clone(),
        )
        .paused(self.paused);

        let handle = thread::Builder::new()
            .name("audio-feeder".into())
            .spawn(move || feeder.run())
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                DeviceError::FeederSpawn(e.to_string())
            })?;

        self.feeder = Some(handle);
        self.commands = Some(tx);
        Ok(())
    }

    /// Signal the feeder to stop, join it and reclaim the decode unit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(FeederCommand::Stop);
        }

        let Some(handle) = self.feeder.take() else {
            return;
        };
        match handle.join() {
            Ok(exit) => {
                if let FeederExitReason::DeviceLost(ref e) = exit.reason {
                    tracing::warn!("Audio feeder had stopped: {}", e);
                }
                self.decoder = Some(exit.context);
            }
            Err(_) => tracing::error!("Audio feeder thread panicked"),
        }
    }

    /// Restart audio from the beginning of the stream
    pub fn rewind(&mut self) {
        self.stop();
        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.seek_to_start() {
                tracing::warn!("Audio rewind failed: {}", e);
            }
        }
        self.device.clear();
        self.clock.reset();
        if let Err(e) = self.start() {
            tracing::error!("Failed to restart audio after rewind: {}", e);
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
        if let Err(e) = self.device.pause() {
            tracing::warn!("Failed to pause audio device: {}", e);
        }
        self.send(FeederCommand::Pause);
    }

    pub fn resume(&mut self) {
        self.paused = false;
        if let Err(e) = self.device.resume() {
            tracing::warn!("Failed to resume audio device: {}", e);
        }
        self.send(FeederCommand::Resume);
    }

    fn send(&self, command: FeederCommand) {
        if let Some(ref tx) = self.commands {
            // A closed channel means the feeder already exited
            let _ = tx.send(command);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.device.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Seconds of media currently audible
    pub fn position(&self) -> Option<f64> {
        self.clock.position(self.device.queue().queued_bytes())
    }

    /// Stop feeding and release the output stream now rather than on drop
    pub fn close_device(&mut self) {
        self.stop();
        self.device.close();
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AudioControl for AudioManager {
    fn start(&mut self) -> Result<(), DeviceError> {
        AudioManager::start(self)
    }

    fn pause(&mut self) {
        AudioManager::pause(self);
    }

    fn resume(&mut self) {
        AudioManager::resume(self);
    }

    fn set_muted(&mut self, muted: bool) {
        AudioManager::set_muted(self, muted);
    }

    fn rewind(&mut self) {
        AudioManager::rewind(self);
    }

    fn position(&self) -> Option<f64> {
        AudioManager::position(self)
    }

    fn shutdown(&mut self) {
        self.close_device();
    }
}
