//! Background thread that keeps the audio device fed
//!
//! Pulls decoded sample buffers whenever the device queue drops below the
//! byte threshold and pushes them into the device. Exits on stop, end of
//! stream, decode failure or device failure, handing the decode unit back
//! to whoever joins it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::clock::AudioClock;
use super::device::{AudioSink, DeviceError};
use crate::media::{DecodeBackend, DecodeContext, DecodeError, SampleBuffer};

/// Commands from the main thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone)]
pub struct FeederConfig {
    /// Pull only while fewer than this many bytes are queued
    pub buffer_threshold: usize,
    /// Wait before re-checking a saturated queue
    pub idle_wait: Duration,
    /// Wake-up interval while paused
    pub pause_poll: Duration,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            buffer_threshold: 16384,
            idle_wait: Duration::from_millis(5),
            pause_poll: Duration::from_millis(10),
        }
    }
}

/// Result of one feeding attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    /// One buffer was pulled and queued
    Pulled,
    /// The device already holds enough audio
    Saturated,
    /// The stream has ended
    Exhausted,
    Failed(DecodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeederExitReason {
    Stopped,
    EndOfStream,
    DecodeFailed(DecodeError),
    DeviceLost(DeviceError),
}

/// What a finished feeder thread hands back
pub struct FeederExit<B: DecodeBackend> {
    pub context: DecodeContext<B>,
    pub reason: FeederExitReason,
}

pub struct AudioFeeder<B, S>
where
    B: DecodeBackend<Output = SampleBuffer>,
    S: AudioSink,
{
    context: DecodeContext<B>,
    sink: S,
    clock: Arc<AudioClock>,
    running: Arc<AtomicBool>,
    commands: Receiver<FeederCommand>,
    config: FeederConfig,
    paused: bool,
}

impl<B, S> AudioFeeder<B, S>
where
    B: DecodeBackend<Output = SampleBuffer>,
    S: AudioSink,
{
    pub fn new(
        context: DecodeContext<B>,
        sink: S,
        clock: Arc<AudioClock>,
        running: Arc<AtomicBool>,
        commands: Receiver<FeederCommand>,
        config: FeederConfig,
    ) -> Self {
        Self {
            context,
            sink,
            clock,
            running,
            commands,
            config,
            paused: false,
        }
    }

    /// Start in the paused state
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Pull and queue at most one buffer
    pub fn feed_once(&mut self) -> Result<FeedOutcome, DeviceError> {
        if self.sink.queued_bytes() >= self.config.buffer_threshold {
            return Ok(FeedOutcome::Saturated);
        }

        match self.context.pull_frame() {
            Ok(Some(buffer)) => {
                self.sink.push(&buffer.data)?;
                self.clock.mark_pushed(buffer.end_pts());
                Ok(FeedOutcome::Pulled)
            }
            Ok(None) => Ok(FeedOutcome::Exhausted),
            Err(e) => Ok(FeedOutcome::Failed(e)),
        }
    }

    /// Apply a command; false means stop
    fn apply(&mut self, command: FeederCommand) -> bool {
        match command {
            FeederCommand::Pause => self.paused = true,
            FeederCommand::Resume => self.paused = false,
            FeederCommand::Stop => return false,
        }
        true
    }

    /// Drain queued commands without blocking; false means stop
    fn process_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            if !self.apply(command) {
                return false;
            }
        }
        true
    }

    /// Block for up to `timeout` waiting for a command; false means stop
    fn wait_for_command(&mut self, timeout: Duration) -> bool {
        match self.commands.recv_timeout(timeout) {
            Ok(command) => self.apply(command),
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Feed until told to stop or the stream ends
    pub fn run(mut self) -> FeederExit<B> {
        tracing::debug!(threshold = self.config.buffer_threshold, "Audio feeder started");

        let reason = loop {
            if !self.running.load(Ordering::Acquire) || !self.process_commands() {
                break FeederExitReason::Stopped;
            }

            if self.paused {
                if !self.wait_for_command(self.config.pause_poll) {
                    break FeederExitReason::Stopped;
                }
                continue;
            }

            match self.feed_once() {
                Ok(FeedOutcome::Pulled) => {}
                Ok(FeedOutcome::Saturated) => {
                    if !self.wait_for_command(self.config.idle_wait) {
                        break FeederExitReason::Stopped;
                    }
                }
                Ok(FeedOutcome::Exhausted) => break FeederExitReason::EndOfStream,
                Ok(FeedOutcome::Failed(e)) => break FeederExitReason::DecodeFailed(e),
                Err(e) => break FeederExitReason::DeviceLost(e),
            }
        };

        self.running.store(false, Ordering::Release);
        match &reason {
            FeederExitReason::DecodeFailed(e) => tracing::warn!("Audio feeder stopped on decode error: {}", e),
            FeederExitReason::DeviceLost(e) => tracing::error!("Audio feeder lost its device: {}", e),
            other => tracing::debug!(reason = ?other, "Audio feeder exited"),
        }

        FeederExit {
            context: self.context,
            reason,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;
    use crate::media::mock::{Accounting, MockBackend, Step};

    /// Records pushes; `queued` is controlled by the test
    #[derive(Clone, Default)]
    pub struct MockSink {
        pub queued: Arc<AtomicUsize>,
        pub pushes: Arc<Mutex<Vec<usize>>>,
        pub fail: bool,
    }

    impl AudioSink for MockSink {
        fn queued_bytes(&self) -> usize {
            self.queued.load(Ordering::SeqCst)
        }

        fn push(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
            if self.fail {
                return Err(DeviceError::StreamFailed("unplugged".to_string()));
            }
            self.pushes.lock().unwrap().push(bytes.len());
            Ok(())
        }

        fn clear(&mut self) {
            self.queued.store(0, Ordering::SeqCst);
        }
    }

    /// 10ms of 48kHz stereo f32 per buffer
    pub fn sample_buffer(pts: f64, accounting: &Arc<Accounting>, previous: Option<SampleBuffer>) -> SampleBuffer {
        drop(previous);
        accounting.allocations.fetch_add(1, Ordering::SeqCst);
        SampleBuffer {
            data: vec![0; 480 * 2 * 4],
            pts,
            frames: 480,
            sample_rate: 48000,
        }
    }

    fn feeder(
        script: Vec<Step>,
        sink: MockSink,
    ) -> (
        AudioFeeder<MockBackend<SampleBuffer>, MockSink>,
        Arc<Accounting>,
        Arc<AudioClock>,
        crossbeam_channel::Sender<FeederCommand>,
    ) {
        let accounting = Arc::new(Accounting::default());
        let backend = MockBackend::open(script, &accounting, sample_buffer, None).unwrap();
        let clock = Arc::new(AudioClock::new(384_000.0));
        let (tx, rx) = crossbeam_channel::unbounded();
        let feeder = AudioFeeder::new(
            DecodeContext::new(backend),
            sink,
            Arc::clone(&clock),
            Arc::new(AtomicBool::new(true)),
            rx,
            FeederConfig::default(),
        );
        (feeder, accounting, clock, tx)
    }

    #[test]
    fn test_saturated_queue_pulls_nothing() {
        let sink = MockSink::default();
        sink.queued.store(16384, Ordering::SeqCst);
        let (mut feeder, accounting, _clock, _tx) = feeder(vec![Step::frame(0.0)], sink.clone());

        assert_eq!(feeder.feed_once().unwrap(), FeedOutcome::Saturated);
        assert_eq!(accounting.allocations(), 0);
        assert!(sink.pushes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_below_threshold_pulls_exactly_one() {
        let sink = MockSink::default();
        sink.queued.store(16383, Ordering::SeqCst);
        let (mut feeder, accounting, clock, _tx) = feeder(vec![Step::frame(0.0), Step::frame(0.01)], sink.clone());

        assert_eq!(feeder.feed_once().unwrap(), FeedOutcome::Pulled);
        assert_eq!(accounting.allocations(), 1);
        assert_eq!(*sink.pushes.lock().unwrap(), vec![3840]);
        let position = clock.position(0).unwrap();
        assert!((position - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_run_exits_at_end_of_stream() {
        let sink = MockSink::default();
        let script = vec![Step::frame(0.0), Step::frame(0.01), Step::frame(0.02)];
        let (feeder, _accounting, _clock, _tx) = feeder(script, sink.clone());
        let running = Arc::clone(&feeder.running);

        let exit = std::thread::spawn(move || feeder.run()).join().unwrap();
        assert_eq!(exit.reason, FeederExitReason::EndOfStream);
        assert_eq!(exit.context.frames_pulled(), 3);
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(sink.pushes.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_stop_while_paused() {
        let (feeder, accounting, _clock, tx) = feeder(vec![Step::frame(0.0)], MockSink::default());
        let handle = std::thread::spawn(move || feeder.paused(true).run());

        tx.send(FeederCommand::Stop).unwrap();
        let exit = handle.join().unwrap();
        assert_eq!(exit.reason, FeederExitReason::Stopped);
        assert_eq!(accounting.allocations(), 0);
    }

    #[test]
    fn test_cleared_running_flag_stops_feeder() {
        let (feeder, _accounting, _clock, _tx) = feeder(vec![Step::frame(0.0)], MockSink::default());
        feeder.running.store(false, Ordering::SeqCst);
        let exit = feeder.run();
        assert_eq!(exit.reason, FeederExitReason::Stopped);
        assert_eq!(exit.context.frames_pulled(), 0);
    }

    #[test]
    fn test_device_failure_ends_feeder() {
        let sink = MockSink {
            fail: true,
            ..MockSink::default()
        };
        let (feeder, _accounting, _clock, _tx) = feeder(vec![Step::frame(0.0)], sink);
        let exit = feeder.run();
        assert!(matches!(exit.reason, FeederExitReason::DeviceLost(_)));
    }

    #[test]
    fn test_decode_failure_ends_feeder() {
        let (feeder, _accounting, _clock, _tx) = feeder(vec![Step::Corrupt], MockSink::default());
        let exit = feeder.run();
        assert!(matches!(exit.reason, FeederExitReason::DecodeFailed(DecodeError::Corrupt(_))));
    }
}
