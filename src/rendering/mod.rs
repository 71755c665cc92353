pub mod anatomy;
pub mod capture;
pub mod cells;
pub mod instances;
pub mod oit;
pub mod shades;

pub use anatomy::{AnatomyMesh, AnatomyRenderer};
pub use cells::CellRenderer;
pub use instances::{InstanceBufferManager, InstancePlan, InstanceSet, SetGroup, SetKey};
pub use oit::OitCompositor;
pub use shades::ShadeTables;

/// GPU setup and frame errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface creation failed: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("surface reports no usable format")]
    NoSurfaceFormat,
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("{label} failed validation: {message}")]
    Validation { label: String, message: String },
    #[error("frame readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("frame readback channel closed")]
    ReadbackLost,
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PNG encode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Run GPU object creation inside a validation error scope. Shader and
/// pipeline errors are logged and returned right away.
pub fn validated<T>(
    device: &wgpu::Device,
    label: &str,
    build: impl FnOnce() -> T,
) -> Result<T, RenderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(value),
        Some(error) => {
            log::error!("{} failed validation: {}", label, error);
            Err(RenderError::Validation {
                label: label.to_string(),
                message: error.to_string(),
            })
        }
    }
}
