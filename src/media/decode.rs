//! Generic pull-based decode loop
//!
//! `DecodeContext` drives any `DecodeBackend` through the
//! read → send → receive → convert cycle and holds the single converted
//! frame that is valid between calls. The FFmpeg video and audio backends
//! plug into it, as do the mock backends used by the tests.

use super::error::DecodeError;

/// Decoder status codes, normalized from the native library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Decoder needs more input (or must be drained) before it can continue
    Again,
    /// Decoder is fully drained
    Eof,
    /// Any other failure
    Fatal(String),
}

/// Result of reading one compressed packet from the container
pub enum PacketRead<P> {
    Packet { stream: usize, packet: P },
    /// The container has no more packets
    End,
}

/// Native decode operations for one elementary stream.
///
/// Implementations own their container, codec and conversion state; all of it
/// is released when the backend is dropped.
pub trait DecodeBackend {
    type Packet;
    type Output;

    /// Index of the stream this backend decodes
    fn stream_index(&self) -> usize;

    fn read_packet(&mut self) -> PacketRead<Self::Packet>;

    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), BackendStatus>;

    /// Enter draining mode once the container is exhausted
    fn send_eof(&mut self) -> Result<(), BackendStatus>;

    /// Decode into the backend's native frame
    fn receive_frame(&mut self) -> Result<(), BackendStatus>;

    /// Convert the last received native frame into the delivery format,
    /// storing it in `slot`. Backends may reuse the previous output's storage
    /// or replace it with a fresh allocation.
    fn convert(&mut self, slot: &mut Option<Self::Output>) -> Result<(), DecodeError>;

    /// Seek the container to time zero and flush decoder state
    fn seek_to_start(&mut self) -> Result<(), DecodeError>;
}

/// One open decode unit: a backend plus the current converted frame.
///
/// Field order is drop order: the converted frame goes before the backend.
pub struct DecodeContext<B: DecodeBackend> {
    current: Option<B::Output>,
    backend: B,
    input_exhausted: bool,
    frames_pulled: u64,
}

impl<B: DecodeBackend> DecodeContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            current: None,
            backend,
            input_exhausted: false,
            frames_pulled: 0,
        }
    }

    /// Pull the next presentable frame.
    ///
    /// Returns `Ok(None)` at end of stream. The returned borrow must be
    /// released before the next pull, which replaces the frame.
    pub fn pull_frame(&mut self) -> Result<Option<&B::Output>, DecodeError> {
        loop {
            match self.backend.receive_frame() {
                Ok(()) => {
                    self.backend.convert(&mut self.current)?;
                    self.frames_pulled += 1;
                    return self
                        .current
                        .as_ref()
                        .map(Some)
                        .ok_or_else(|| DecodeError::Conversion("backend produced no frame".to_string()));
                }
                Err(BackendStatus::Again) => {
                    if self.input_exhausted {
                        return Ok(None);
                    }
                }
                Err(BackendStatus::Eof) => return Ok(None),
                Err(BackendStatus::Fatal(message)) => return Err(DecodeError::Corrupt(message)),
            }

            self.feed_decoder();
        }
    }

    /// Send the next packet of our stream to the decoder, or signal end of
    /// input once the container runs dry.
    fn feed_decoder(&mut self) {
        let stream_index = self.backend.stream_index();
        loop {
            match self.backend.read_packet() {
                PacketRead::Packet { stream, packet } if stream == stream_index => {
                    match self.backend.send_packet(&packet) {
                        Ok(()) => return,
                        Err(status) => {
                            tracing::debug!(?status, "Discarding packet rejected by decoder");
                        }
                    }
                }
                PacketRead::Packet { .. } => {}
                PacketRead::End => {
                    if let Err(status) = self.backend.send_eof() {
                        tracing::debug!(?status, "Decoder refused end-of-stream signal");
                    }
                    self.input_exhausted = true;
                    return;
                }
            }
        }
    }

    /// Rewind to the first frame. The converted frame from before the seek
    /// stays readable until the next pull.
    pub fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        self.backend.seek_to_start()?;
        self.input_exhausted = false;
        Ok(())
    }

    /// Frames successfully pulled since open
    pub fn frames_pulled(&self) -> u64 {
        self.frames_pulled
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release the converted frame, then the backend.
    pub fn close(self) {
        tracing::debug!(frames = self.frames_pulled, "Closing decode context");
        drop(self);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted backend with resource accounting

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::media::error::MediaError;

    /// Counters shared between a mock backend and the test
    #[derive(Default)]
    pub struct Accounting {
        /// Native handles currently held (container, codec, outputs)
        pub live: AtomicUsize,
        /// Converted outputs ever allocated
        pub allocations: AtomicUsize,
        /// Outputs alive right now
        pub live_outputs: AtomicUsize,
        /// Highest number of outputs alive at once
        pub peak_outputs: AtomicUsize,
        pub seeks: AtomicUsize,
    }

    impl Accounting {
        pub fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        pub fn allocations(&self) -> usize {
            self.allocations.load(Ordering::SeqCst)
        }

        pub fn peak_outputs(&self) -> usize {
            self.peak_outputs.load(Ordering::SeqCst)
        }
    }

    /// A native handle; released on drop
    pub struct Handle(Arc<Accounting>);

    impl Handle {
        pub fn acquire(accounting: &Arc<Accounting>) -> Self {
            accounting.live.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(accounting))
        }
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            self.0.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// A converted output buffer
    pub struct OutputHandle {
        _handle: Handle,
        accounting: Arc<Accounting>,
    }

    impl OutputHandle {
        pub fn allocate(accounting: &Arc<Accounting>) -> Self {
            accounting.allocations.fetch_add(1, Ordering::SeqCst);
            let live = accounting.live_outputs.fetch_add(1, Ordering::SeqCst) + 1;
            accounting.peak_outputs.fetch_max(live, Ordering::SeqCst);
            Self {
                _handle: Handle::acquire(accounting),
                accounting: Arc::clone(accounting),
            }
        }
    }

    impl Drop for OutputHandle {
        fn drop(&mut self) {
            self.accounting.live_outputs.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// One scripted packet
    #[derive(Debug, Clone)]
    pub enum Step {
        /// Decodes to frames with these timestamps
        Frames(Vec<f64>),
        /// Packet of another stream
        Foreign,
        /// Decoder rejects the packet on send
        Rejected,
        /// Accepted on send, fails on receive
        Corrupt,
    }

    impl Step {
        pub fn frame(pts: f64) -> Self {
            Step::Frames(vec![pts])
        }
    }

    enum Pending {
        Frame(f64),
        Corrupt,
    }

    /// Where a mock open should fail
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailAt {
        Codec,
        Converter,
    }

    pub struct MockBackend<O> {
        script: Vec<Step>,
        cursor: usize,
        pending: VecDeque<Pending>,
        eof_sent: bool,
        decoded_pts: f64,
        make_output: fn(f64, &Arc<Accounting>, Option<O>) -> O,
        accounting: Arc<Accounting>,
        _converter: Handle,
        _codec: Handle,
        _container: Handle,
    }

    impl<O> MockBackend<O> {
        pub fn open(
            script: Vec<Step>,
            accounting: &Arc<Accounting>,
            make_output: fn(f64, &Arc<Accounting>, Option<O>) -> O,
            fail_at: Option<FailAt>,
        ) -> Result<Self, MediaError> {
            let container = Handle::acquire(accounting);
            if fail_at == Some(FailAt::Codec) {
                return Err(MediaError::DecoderUnavailable("mock".to_string()));
            }
            let codec = Handle::acquire(accounting);
            if fail_at == Some(FailAt::Converter) {
                return Err(MediaError::DecoderInit {
                    kind: crate::media::MediaKind::Audio,
                    message: "mock converter".to_string(),
                });
            }
            let converter = Handle::acquire(accounting);

            Ok(Self {
                script,
                cursor: 0,
                pending: VecDeque::new(),
                eof_sent: false,
                decoded_pts: 0.0,
                make_output,
                accounting: Arc::clone(accounting),
                _converter: converter,
                _codec: codec,
                _container: container,
            })
        }
    }

    impl<O> DecodeBackend for MockBackend<O> {
        type Packet = Step;
        type Output = O;

        fn stream_index(&self) -> usize {
            0
        }

        fn read_packet(&mut self) -> PacketRead<Step> {
            let Some(step) = self.script.get(self.cursor).cloned() else {
                return PacketRead::End;
            };
            self.cursor += 1;
            let stream = if matches!(step, Step::Foreign) { 1 } else { 0 };
            PacketRead::Packet { stream, packet: step }
        }

        fn send_packet(&mut self, packet: &Step) -> Result<(), BackendStatus> {
            match packet {
                Step::Frames(timestamps) => {
                    self.pending.extend(timestamps.iter().copied().map(Pending::Frame));
                    Ok(())
                }
                Step::Corrupt => {
                    self.pending.push_back(Pending::Corrupt);
                    Ok(())
                }
                Step::Rejected => Err(BackendStatus::Fatal("invalid data".to_string())),
                Step::Foreign => Err(BackendStatus::Fatal("wrong stream".to_string())),
            }
        }

        fn send_eof(&mut self) -> Result<(), BackendStatus> {
            self.eof_sent = true;
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<(), BackendStatus> {
            match self.pending.pop_front() {
                Some(Pending::Frame(pts)) => {
                    self.decoded_pts = pts;
                    Ok(())
                }
                Some(Pending::Corrupt) => Err(BackendStatus::Fatal("corrupt frame".to_string())),
                None if self.eof_sent => Err(BackendStatus::Eof),
                None => Err(BackendStatus::Again),
            }
        }

        fn convert(&mut self, slot: &mut Option<O>) -> Result<(), DecodeError> {
            let previous = slot.take();
            *slot = Some((self.make_output)(self.decoded_pts, &self.accounting, previous));
            Ok(())
        }

        fn seek_to_start(&mut self) -> Result<(), DecodeError> {
            self.cursor = 0;
            self.pending.clear();
            self.eof_sent = false;
            self.accounting.seeks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Output used by the decode-loop tests
    pub struct TestFrame {
        pub pts: f64,
        _buffer: OutputHandle,
    }

    /// Drops the previous output before allocating the next one
    pub fn fresh_frame(pts: f64, accounting: &Arc<Accounting>, previous: Option<TestFrame>) -> TestFrame {
        drop(previous);
        TestFrame {
            pts,
            _buffer: OutputHandle::allocate(accounting),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::mock::*;
    use super::*;

    fn open(script: Vec<Step>) -> (DecodeContext<MockBackend<TestFrame>>, Arc<Accounting>) {
        let accounting = Arc::new(Accounting::default());
        let backend = MockBackend::open(script, &accounting, fresh_frame, None).expect("mock open");
        (DecodeContext::new(backend), accounting)
    }

    fn drain(ctx: &mut DecodeContext<MockBackend<TestFrame>>) -> Vec<f64> {
        let mut timestamps = Vec::new();
        while let Some(frame) = ctx.pull_frame().expect("pull") {
            timestamps.push(frame.pts);
        }
        timestamps
    }

    #[test]
    fn test_open_close_releases_everything() {
        let (ctx, accounting) = open(vec![Step::frame(0.0)]);
        assert_eq!(accounting.live(), 3);
        ctx.close();
        assert_eq!(accounting.live(), 0);
    }

    #[test]
    fn test_close_after_pulls_releases_output() {
        let (mut ctx, accounting) = open(vec![Step::frame(0.0), Step::frame(0.04)]);
        assert!(ctx.pull_frame().unwrap().is_some());
        assert_eq!(accounting.live(), 4);
        ctx.close();
        assert_eq!(accounting.live(), 0);
    }

    #[test]
    fn test_partial_construction_unwinds() {
        for stage in [FailAt::Codec, FailAt::Converter] {
            let accounting = Arc::new(Accounting::default());
            let result = MockBackend::<TestFrame>::open(vec![], &accounting, fresh_frame, Some(stage));
            assert!(result.is_err());
            assert_eq!(accounting.live(), 0, "leak after failure at {:?}", stage);
        }
    }

    #[test]
    fn test_one_allocation_per_successful_pull() {
        let (mut ctx, accounting) = open(vec![
            Step::frame(0.0),
            Step::Foreign,
            Step::Frames(vec![0.02, 0.04]),
            Step::frame(0.06),
        ]);

        let timestamps = drain(&mut ctx);
        assert_eq!(timestamps, vec![0.0, 0.02, 0.04, 0.06]);
        assert_eq!(accounting.allocations(), 4);
        assert_eq!(ctx.frames_pulled(), 4);
        assert_eq!(accounting.peak_outputs(), 1);
    }

    #[test]
    fn test_foreign_and_rejected_packets_are_skipped() {
        let (mut ctx, _accounting) = open(vec![
            Step::Foreign,
            Step::Rejected,
            Step::frame(0.5),
            Step::Rejected,
            Step::frame(0.6),
        ]);
        assert_eq!(drain(&mut ctx), vec![0.5, 0.6]);
    }

    #[test]
    fn test_end_of_stream_is_sticky() {
        let (mut ctx, _accounting) = open(vec![Step::frame(0.0)]);
        assert!(ctx.pull_frame().unwrap().is_some());
        assert!(ctx.pull_frame().unwrap().is_none());
        assert!(ctx.pull_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_stream_reports_end() {
        let (mut ctx, accounting) = open(vec![Step::Foreign, Step::Foreign]);
        assert!(ctx.pull_frame().unwrap().is_none());
        assert_eq!(accounting.allocations(), 0);
    }

    #[test]
    fn test_corrupt_frame_is_distinguished_from_eof() {
        let (mut ctx, _accounting) = open(vec![Step::frame(0.0), Step::Corrupt, Step::frame(0.1)]);
        assert!(ctx.pull_frame().unwrap().is_some());
        assert!(matches!(ctx.pull_frame(), Err(DecodeError::Corrupt(_))));
        // Decoding resumes with the next packet
        assert_eq!(ctx.pull_frame().unwrap().map(|f| f.pts), Some(0.1));
    }

    #[test]
    fn test_seek_to_start_yields_timestamp_zero() {
        let (mut ctx, accounting) = open(vec![Step::frame(0.0), Step::frame(0.033), Step::frame(0.066)]);
        drain(&mut ctx);

        ctx.seek_to_start().unwrap();
        assert_eq!(accounting.seeks.load(std::sync::atomic::Ordering::SeqCst), 1);
        let first = ctx.pull_frame().unwrap().map(|f| f.pts);
        assert_eq!(first, Some(0.0));
    }

    #[test]
    fn test_seek_mid_stream_discards_pending_frames() {
        let (mut ctx, _accounting) = open(vec![Step::Frames(vec![0.0, 0.01, 0.02])]);
        assert_eq!(ctx.pull_frame().unwrap().map(|f| f.pts), Some(0.0));
        ctx.seek_to_start().unwrap();
        assert_eq!(drain(&mut ctx), vec![0.0, 0.01, 0.02]);
    }
}
