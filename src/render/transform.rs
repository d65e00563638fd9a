//! Aspect-preserving quad transform

use glam::{Mat4, Vec3};

/// Matches the `Transform` uniform in video_quad.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformUniform {
    pub matrix: [[f32; 4]; 4],
}

impl TransformUniform {
    pub fn new(matrix: Mat4) -> Self {
        Self {
            matrix: matrix.to_cols_array_2d(),
        }
    }
}

impl Default for TransformUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

/// Quad scale that fits the video inside the window, letterboxing or
/// pillarboxing as needed
pub fn fit_scale(window_width: u32, window_height: u32, video_width: u32, video_height: u32) -> (f32, f32) {
    if window_width == 0 || window_height == 0 || video_width == 0 || video_height == 0 {
        return (1.0, 1.0);
    }

    let video_aspect = video_width as f32 / video_height as f32;
    let window_aspect = window_width as f32 / window_height as f32;

    if video_aspect > window_aspect {
        // Wider than the window: bars top and bottom
        (1.0, window_aspect / video_aspect)
    } else {
        (video_aspect / window_aspect, 1.0)
    }
}

pub fn fit_matrix(window_width: u32, window_height: u32, video_width: u32, video_height: u32) -> Mat4 {
    let (x, y) = fit_scale(window_width, window_height, video_width, video_height);
    Mat4::from_scale(Vec3::new(x, y, 1.0))
}
