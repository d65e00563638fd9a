//! GPU timing of the staging-to-texture upload
//!
//! Brackets the copy with timestamp queries and reads the result back
//! without blocking. While a readback is in flight, frames are not timed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Features the timer needs from the device
pub const REQUIRED_FEATURES: wgpu::Features =
    wgpu::Features::TIMESTAMP_QUERY.union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS);

const QUERY_COUNT: u32 = 2;
const QUERY_BYTES: u64 = QUERY_COUNT as u64 * std::mem::size_of::<u64>() as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadbackState {
    Idle,
    /// Queries written into the current encoder
    Recorded,
    /// Waiting for the readback buffer to map
    Mapping,
}

pub struct UploadTimer {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    period_ns: f32,
    state: ReadbackState,
    mapped: Arc<AtomicBool>,
}

impl UploadTimer {
    /// `None` if the device lacks timestamp queries inside encoders
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Option<Self> {
        if !device.features().contains(REQUIRED_FEATURES) {
            tracing::warn!("GPU timestamp queries not supported; upload timing disabled");
            return None;
        }

        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Upload Timer Queries"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERY_COUNT,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Upload Timer Resolve"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Upload Timer Readback"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Some(Self {
            query_set,
            resolve_buffer,
            readback_buffer,
            period_ns: queue.get_timestamp_period(),
            state: ReadbackState::Idle,
            mapped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Mark the start of the upload. Returns false if this frame is not timed.
    pub fn begin(&mut self, encoder: &mut wgpu::CommandEncoder) -> bool {
        if self.state != ReadbackState::Idle {
            return false;
        }
        encoder.write_timestamp(&self.query_set, 0);
        true
    }

    /// Mark the end of the upload and queue the resolve
    pub fn end(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.write_timestamp(&self.query_set, 1);
        encoder.resolve_query_set(&self.query_set, 0..QUERY_COUNT, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, &self.readback_buffer, 0, QUERY_BYTES);
        self.state = ReadbackState::Recorded;
    }

    /// Request the readback; call after the encoder was submitted
    pub fn after_submit(&mut self) {
        if self.state != ReadbackState::Recorded {
            return;
        }
        self.mapped.store(false, Ordering::Release);
        let mapped = Arc::clone(&self.mapped);
        self.readback_buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if result.is_ok() {
                    mapped.store(true, Ordering::Release);
                }
            });
        self.state = ReadbackState::Mapping;
    }

    /// Collect a finished measurement, in milliseconds
    pub fn poll(&mut self, device: &wgpu::Device) -> Option<f64> {
        if self.state != ReadbackState::Mapping {
            return None;
        }
        device.poll(wgpu::Maintain::Poll);
        if !self.mapped.load(Ordering::Acquire) {
            return None;
        }

        let elapsed = {
            let data = self.readback_buffer.slice(..).get_mapped_range();
            let ticks: &[u64] = bytemuck::cast_slice(&data);
            ticks_to_ms(ticks[0], ticks[1], self.period_ns)
        };
        self.readback_buffer.unmap();
        self.state = ReadbackState::Idle;
        elapsed
    }
}

/// Convert a timestamp pair to milliseconds; `None` if the counter went
/// backwards
pub fn ticks_to_ms(start: u64, end: u64, period_ns: f32) -> Option<f64> {
    if end < start {
        return None;
    }
    Some((end - start) as f64 * period_ns as f64 / 1_000_000.0)
}
