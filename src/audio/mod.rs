//! Audio output
//!
//! Device stream, feeder thread and the clock the transport paces video by.

mod clock;
mod device;
mod feeder;
mod manager;

pub use clock::AudioClock;
pub use device::{AudioDevice, AudioSink, DeviceError, QueueSink, SampleQueue};
pub use feeder::{AudioFeeder, FeedOutcome, FeederCommand, FeederConfig, FeederExit, FeederExitReason};
pub use manager::AudioManager;
