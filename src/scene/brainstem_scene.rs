//! GPU scene: records, anatomy and both OIT passes for every viewport.

use super::state::ViewerState;
use super::traits::Scene;
use crate::data::LoadError;
use crate::rendering::anatomy::AnatomyMesh;
use crate::rendering::capture::{PendingCapture, RgbaFrame};
use crate::rendering::cells::{CellStyle, ViewBindings, ViewUniform};
use crate::rendering::{
    AnatomyRenderer, CellRenderer, InstanceBufferManager, OitCompositor, RenderError, ShadeTables,
};
use crate::view::ViewTransform;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub struct BrainstemScene {
    pub state: ViewerState,
    views: ViewBindings,
    oit: OitCompositor,
    cells: CellRenderer,
    anatomy: AnatomyRenderer,
    instances: InstanceBufferManager,
    width: u32,
    height: u32,
    pending_still: Option<PathBuf>,
    movie_frame_due: bool,
}

impl BrainstemScene {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        state: ViewerState,
    ) -> Result<Self, RenderError> {
        let views = ViewBindings::new(device);
        let oit = OitCompositor::new(
            device,
            surface_format,
            width,
            height,
            state.config.nodes_per_pixel,
        )?;
        let cells = CellRenderer::new(device, surface_format, &views, &oit)?;
        let anatomy = AnatomyRenderer::new(device, surface_format, &views, &oit)?;

        Ok(Self {
            state,
            views,
            oit,
            cells,
            anatomy,
            instances: InstanceBufferManager::new(),
            width: width.max(1),
            height: height.max(1),
            pending_still: None,
            movie_frame_due: false,
        })
    }

    /// Load an anatomy mesh and refit the view to it.
    pub fn load_mesh(&mut self, device: &wgpu::Device, path: &Path) -> Result<(), LoadError> {
        let mesh = AnatomyMesh::load(path)?;
        self.state.set_mesh_bounds(mesh.bounds());
        self.anatomy.set_mesh(device, mesh);
        Ok(())
    }

    /// Show every anatomical region, or hide them all if any is shown.
    pub fn toggle_regions(&mut self) -> bool {
        let regions = &mut self.anatomy.style_mut().regions;
        let on = !regions.iter().any(|r| *r);
        regions.fill(on);
        on
    }

    /// Save the next rendered frame as a PNG.
    pub fn request_screenshot(&mut self, path: PathBuf) {
        self.pending_still = Some(path);
    }

    /// Bring GPU resources in line with the viewer state.
    fn sync(&mut self, device: &wgpu::Device) {
        if self.state.take_instances_dirty() {
            self.state.take_visibility_dirty();
            match self.state.records() {
                Some(records) => {
                    self.instances.rebuild(
                        device,
                        records,
                        self.state.cluster_visibility(),
                        self.state.experiments(),
                    );
                    let tables = ShadeTables::build(records.clusters().colors(), records.has_delta());
                    self.cells.set_tables(device, &tables);
                }
                None => {
                    self.instances.release_all();
                    self.cells.release_tables();
                }
            }
        } else if self.state.take_visibility_dirty() {
            for (cluster, on) in self.state.cluster_visibility().iter().enumerate() {
                self.instances.set_visibility(cluster, *on);
            }
        }
    }

    fn apply_styles(&mut self) {
        let config = &self.state.config;
        self.oit.set_background(config.background_grey());
        self.cells.set_style(CellStyle {
            radius: config.cell_radius(),
            alpha: config.cell_alpha(),
            lit: true,
            single_twinkle: self.state.single_twinkle(),
        });

        let style = self.anatomy.style_mut();
        style.skin_color = config.skin_color;
        style.skin_alpha = config.skin_alpha();
        style.region_alpha = config.region_alpha();
        style.outline_grey = config.outline_grey();
        style.show_skin = config.show_skin;
        style.show_axes = config.show_axes;
        style.show_outlines = config.show_outlines;
    }

    fn store_capture(&mut self, frame: RgbaFrame, still: Option<PathBuf>, movie: bool) {
        if let Some(path) = still {
            match frame.save_png(&path) {
                Ok(()) => log::info!("Saved screenshot {}", path.display()),
                Err(e) => log::error!("Failed to save screenshot {}: {}", path.display(), e),
            }
        }
        if movie {
            if let Some(recorder) = self.state.movie_mut() {
                if let Err(e) = recorder.save_frame(&frame) {
                    log::error!("Failed to save movie frame: {}", e);
                }
            }
        }
    }
}

impl Scene for BrainstemScene {
    fn tick(&mut self, now: Instant) -> bool {
        let events = self.state.tick(now);
        if events.capture_frame {
            self.movie_frame_due = true;
        }
        events.spin || events.twinkle || events.capture_frame
    }

    fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::Texture,
    ) -> Result<(), RenderError> {
        self.sync(device);
        self.apply_styles();

        let mode = self.state.mode();
        let categories = mode.categories();
        let matrices = self.state.view.matrices(mode, self.width, self.height);
        let config = &self.state.config;
        for (i, m) in matrices.iter().enumerate() {
            let uniform = ViewUniform::new(
                m.projection,
                m.model_view,
                config.light_position(),
                config.ambient_level(),
                config.diffuse_level(),
            );
            self.views.write(queue, i, &uniform);
        }
        self.cells.prepare(queue);
        self.anatomy.prepare(queue);

        let bin = self.state.current_bin();
        let draw_cells = !config.hide_cells;
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Brainstem Scene Encoder"),
        });

        self.oit.begin_frame(queue, &mut encoder);
        {
            let mut pass = self.oit.begin_collect_pass(&mut encoder, &target_view);
            for (i, m) in matrices.iter().enumerate() {
                let vp = m.viewport;
                if vp.width < 1.0 || vp.height < 1.0 {
                    continue;
                }
                pass.set_viewport(vp.x, vp.y, vp.width, vp.height, 0.0, 1.0);
                pass.set_bind_group(0, self.views.bind_group(i), &[]);
                self.anatomy.draw(&mut pass);
                if draw_cells {
                    self.cells.draw(&mut pass, &self.instances, bin, categories[i]);
                }
            }
        }
        self.oit.resolve(&mut encoder, &target_view);

        let still = self.pending_still.take();
        let movie = std::mem::take(&mut self.movie_frame_due);
        let wants_capture = still.is_some() || movie;
        let can_copy = target.usage().contains(wgpu::TextureUsages::COPY_SRC);
        if wants_capture && !can_copy {
            log::warn!("Surface texture cannot be copied, frame not captured");
        }
        let capture = (wants_capture && can_copy)
            .then(|| PendingCapture::record(device, &mut encoder, target));

        queue.submit(Some(encoder.finish()));

        if let Some(capture) = capture {
            let frame = capture.read(device)?;
            self.store_capture(frame, still, movie);
        }
        Ok(())
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        self.oit.resize(device, width, height);
    }

    fn view(&self) -> &ViewTransform {
        &self.state.view
    }

    fn view_mut(&mut self) -> &mut ViewTransform {
        &mut self.state.view
    }

    fn next_tick(&self) -> Option<Duration> {
        self.state.timer.interval()
    }

    fn record_count(&self) -> usize {
        self.state.records().map_or(0, |r| r.total_count())
    }
}
