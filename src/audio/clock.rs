//! Audio playback position estimate
//!
//! The feeder records the timestamp just past the last pushed buffer; the
//! audible position is that timestamp minus whatever is still queued in the
//! device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct AudioClock {
    pushed_end_bits: AtomicU64,
    primed: AtomicBool,
    bytes_per_second: f64,
}

impl AudioClock {
    pub fn new(bytes_per_second: f64) -> Self {
        Self {
            pushed_end_bits: AtomicU64::new(0f64.to_bits()),
            primed: AtomicBool::new(false),
            bytes_per_second,
        }
    }

    /// Record that audio up to `end_pts` seconds has been queued
    pub fn mark_pushed(&self, end_pts: f64) {
        self.pushed_end_bits.store(end_pts.to_bits(), Ordering::Release);
        self.primed.store(true, Ordering::Release);
    }

    /// Forget the pushed position (after a seek)
    pub fn reset(&self) {
        self.primed.store(false, Ordering::Release);
        self.pushed_end_bits.store(0f64.to_bits(), Ordering::Release);
    }

    /// Seconds of media currently audible, given the device's queue depth.
    /// `None` until the first buffer has been pushed.
    pub fn position(&self, queued_bytes: usize) -> Option<f64> {
        if !self.primed.load(Ordering::Acquire) || self.bytes_per_second <= 0.0 {
            return None;
        }
        let pushed_end = f64::from_bits(self.pushed_end_bits.load(Ordering::Acquire));
        let queued = queued_bytes as f64 / self.bytes_per_second;
        Some((pushed_end - queued).max(0.0))
    }
}
