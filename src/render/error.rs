//! Presenter error types

#[derive(Debug, thiserror::Error)]
pub enum PresenterError {
    #[error("Failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("No suitable GPU adapter")]
    NoAdapter,

    #[error("Failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("Surface has no supported formats")]
    NoSurfaceFormat,

    #[error("Presenter used before initialize")]
    NotInitialized,

    #[error("Frame is {actual:?}, presenter was initialized for {expected:?}")]
    FrameSize { expected: (u32, u32), actual: (u32, u32) },

    #[error("Frame holds {actual} bytes, expected at least {expected}")]
    FrameData { expected: usize, actual: usize },

    #[error("Surface unavailable: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}
