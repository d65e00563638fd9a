//! Video presentation with wgpu

mod error;
mod gpu_context;
mod presenter;
mod staging;
mod timer;
mod transform;

pub use error::PresenterError;
pub use gpu_context::{GpuContext, WindowSurface};
pub use presenter::Presenter;
pub use staging::{pad_rows, padded_bytes_per_row, staging_size, PingPong};
pub use timer::{ticks_to_ms, UploadTimer};
pub use transform::{fit_matrix, fit_scale, TransformUniform};
