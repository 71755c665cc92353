//! Scene trait definition.

use crate::rendering::RenderError;
use crate::view::ViewTransform;
use std::time::{Duration, Instant};

/// Common interface between the window host and a scene.
///
/// The host forwards input to the view, calls `tick` when the timer
/// interval elapses and renders into the acquired surface texture.
pub trait Scene {
    /// Advance animations. Returns true when a redraw is needed.
    fn tick(&mut self, now: Instant) -> bool;

    /// Render into `target`, which must have `RENDER_ATTACHMENT | COPY_SRC` usage.
    fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::Texture,
    ) -> Result<(), RenderError>;

    /// Handle window resize.
    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32);

    fn view(&self) -> &ViewTransform;

    fn view_mut(&mut self) -> &mut ViewTransform;

    /// Time until the next animation tick, if any timer is running.
    fn next_tick(&self) -> Option<Duration>;

    /// Number of records currently loaded.
    fn record_count(&self) -> usize;
}
