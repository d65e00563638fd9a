//! Staging buffer bookkeeping for frame uploads
//!
//! Two staging buffers alternate: the CPU writes frame N+1 into one while
//! the GPU copies frame N out of the other.

/// Write/read roles of a staging buffer pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingPong {
    write: usize,
}

impl PingPong {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer the CPU fills this frame
    pub fn write_index(&self) -> usize {
        self.write
    }

    /// Buffer the GPU copies from this frame
    pub fn read_index(&self) -> usize {
        self.write ^ 1
    }

    /// Exchange roles; once per presented frame
    pub fn swap(&mut self) {
        self.write ^= 1;
    }
}

/// Row pitch for a buffer-to-texture copy of `width` RGBA pixels
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Staging buffer size for a `width` x `height` RGBA frame
pub fn staging_size(width: u32, height: u32) -> u64 {
    padded_bytes_per_row(width) as u64 * height as u64
}

/// Lay out tightly packed rows at `padded_row` pitch.
///
/// Returns `data` untouched when the pitch already matches, otherwise
/// repacks into `scratch` (capacity is kept between frames).
pub fn pad_rows<'a>(data: &'a [u8], row_bytes: usize, padded_row: usize, rows: usize, scratch: &'a mut Vec<u8>) -> &'a [u8] {
    if row_bytes == padded_row {
        return &data[..(row_bytes * rows).min(data.len())];
    }

    scratch.clear();
    scratch.resize(padded_row * rows, 0);
    for (dst, src) in scratch.chunks_exact_mut(padded_row).zip(data.chunks_exact(row_bytes)) {
        dst[..row_bytes].copy_from_slice(src);
    }
    scratch
}
