//! Playback clock and transport
//!
//! Paces video presentation against the wall clock (refined by the audio
//! clock) and coordinates pause, looping and reload.

mod clock;
mod timeline;
mod transport;

pub use clock::{Clock, SystemClock};
pub use timeline::{presentation_wait, Timeline};
pub use transport::{
    AudioControl, CommandOutcome, FilePicker, FramePresenter, MediaOpener, OpenedMedia, StepOutcome, Transport,
    TransportCommand, TransportConfig, TransportError, VideoSource,
};
