//! # Brainstem Viz: Cell Cluster Viewer with Order-Independent Transparency
//!
//! Brainstem Viz draws recorded brainstem cells as spheres at their atlas
//! coordinates, coloured by cluster, inside a translucent anatomy mesh.
//! Per-bin shades animate activity over time; control, stimulus and
//! difference data can be shown alone, side by side or as a stereo pair.
//!
//! ## Architecture Overview
//!
//! ### 1. Data ([`data`])
//!
//! - [`data::RecordSet`] - cell records grouped by category and cluster colour
//! - [`data::csv`] and [`data::dx`] - the two record file readers
//! - [`data::jitter`] - offsets that separate cells sharing an atlas location
//!
//! ### 2. Rendering ([`rendering`])
//!
//! Two-pass order-independent transparency on wgpu:
//! - [`rendering::oit`] - per-pixel fragment lists and the sorting resolve pass
//! - [`rendering::shades`] - brightness ramps and the delta table
//! - [`rendering::instances`] - GPU instance buffers per cluster, bin and category
//! - [`rendering::cells`] and [`rendering::anatomy`] - pass-1 renderers
//! - [`rendering::capture`] - frame readback for screenshots and movies
//!
//! ### 3. View and animation ([`view`], [`animation`])
//!
//! - [`view::ViewTransform`] - orbit rotation, pan, zoom and projection
//! - [`view::DisplayMode`] - single, stereo and paired viewports
//! - [`animation::TimerCoordinator`] - one tick drives spin, twinkle and movie frames
//!
//! ### 4. Settings and export ([`settings`], [`movie`])
//!
//! - [`settings::ViewerConfig`] - RON config in control units
//! - [`settings::SettingsBlob`] and [`settings::FigureSettings`] - pose snapshots
//! - [`movie::MovieRecorder`] - PNG frames assembled by ffmpeg
//!
//! ## Application Entry Points
//!
//! - [`app::run`] - window, GPU setup and the event loop
//! - [`scene::ViewerState`] - every viewer command, no GPU required
//! - [`scene::BrainstemScene`] - owns the renderers and draws frames
//!
//! ## Data Flow
//!
//! ```text
//! Record file → RecordSet → InstanceBufferManager ─┐
//! Input → ViewerState → ViewTransform → ViewUniform ┼→ OIT pass 1 → resolve → surface
//! Timer tick → spin angle / current bin ────────────┘
//! ```
//!
//! ## Dependencies
//!
//! - **Graphics**: `wgpu` (GPU abstraction), `winit` (windowing)
//! - **Math**: `glam` (SIMD math types), `bytemuck` (safe transmutation)
//! - **Concurrency**: `rayon` (parallel instance planning)
//! - **Serialization**: `serde` + `ron` (config and mesh files)
//! - **Export**: `image` (PNG frames)

pub mod animation;
pub mod app;
pub mod data;
pub mod movie;
pub mod rendering;
pub mod scene;
pub mod settings;
pub mod view;
