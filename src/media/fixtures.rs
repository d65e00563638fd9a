//! Tiny media files written on the fly for decoder tests

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Path to `file` inside a fresh per-test directory under the system temp dir
pub fn scratch_file(test: &str, file: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("framepace_media_{}_{}", test, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    let _ = fs::create_dir_all(&dir);
    dir.join(file)
}

/// 16-bit PCM WAV with a plain `fmt ` chunk (no channel mask), every sample
/// set to `value`
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize, value: i16) -> io::Result<()> {
    let block_align = channels * 2;
    let data_len = (frames * block_align as usize) as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for _ in 0..frames * channels as usize {
        out.extend_from_slice(&value.to_le_bytes());
    }
    fs::write(path, out)
}

/// Uncompressed 4:2:0 YUV4MPEG2 stream at 25 fps, mid-grey
pub fn write_y4m(path: &Path, width: u32, height: u32, frames: usize) -> io::Result<()> {
    let luma = (width * height) as usize;
    let chroma = ((width / 2) * (height / 2)) as usize;

    let mut out = format!("YUV4MPEG2 W{} H{} F25:1 Ip A1:1 C420jpeg\n", width, height).into_bytes();
    for _ in 0..frames {
        out.extend_from_slice(b"FRAME\n");
        out.resize(out.len() + luma + 2 * chroma, 128);
    }
    fs::write(path, out)
}
