use crate::animation::{MovieState, MAX_SPIN_FPS, SPIN_SLIDER_MAX, SPIN_SLIDER_MIN};
use crate::data::DisplayCategory;
use crate::rendering::RenderError;
use crate::scene::{BrainstemScene, Scene, ViewerState};
use crate::settings::ViewerConfig;
use crate::view::{DisplayMode, RotationAxis};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

const SPIN_SLIDER_STEP: i32 = 10;

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(name = "brainstem-viz")]
#[command(about = "Order-independent transparency viewer for brainstem cell clusters")]
pub struct AppArgs {
    /// Record file to open (.csv or .dx)
    pub data: Option<PathBuf>,

    /// Anatomy mesh (RON)
    #[arg(short, long)]
    pub mesh: Option<PathBuf>,

    /// Viewer config file
    #[arg(short, long, default_value = crate::settings::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Figure settings file to apply at startup
    #[arg(short, long)]
    pub figure: Option<PathBuf>,

    /// Directory for screenshots, figure files and movies
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("window creation failed: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    scene: BrainstemScene,
    args: AppArgs,
    next_tick_at: Option<Instant>,
    screenshots: u32,
}

impl App {
    fn new(event_loop: &ActiveEventLoop, args: AppArgs, state: ViewerState) -> Result<Self, AppError> {
        let (width, height) = state.config.window_size;
        let window_attributes = Window::default_attributes()
            .with_title("Brainstem Viz")
            .with_inner_size(winit::dpi::PhysicalSize::new(width, height));
        let window = Arc::new(event_loop.create_window(window_attributes)?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone()).map_err(RenderError::from)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(RenderError::from)?;
        log::info!("Using adapter {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Brainstem Viz Device"),
            required_limits: adapter.limits(),
            ..Default::default()
        }))
        .map_err(RenderError::from)?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        // Shade tables are gamma corrected already.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or(RenderError::NoSurfaceFormat)?;
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if surface_caps.usages.contains(wgpu::TextureUsages::COPY_SRC) {
            usage |= wgpu::TextureUsages::COPY_SRC;
        } else {
            log::warn!("Surface does not support copies; screenshots and movies are disabled");
        }

        let config = wgpu::SurfaceConfiguration {
            usage,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let mut scene = BrainstemScene::new(&device, surface_format, config.width, config.height, state)?;
        if let Some(mesh) = &args.mesh {
            if let Err(e) = scene.load_mesh(&device, mesh) {
                log::error!("Failed to load anatomy mesh {}: {}", mesh.display(), e);
            }
        }

        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            scene,
            args,
            next_tick_at: None,
            screenshots: 0,
        };
        app.update_title();
        Ok(app)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn update_title(&self) {
        let name = self
            .scene
            .state
            .source()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "no data".to_string());
        self.window.set_title(&format!(
            "Brainstem Viz - {} ({} records, {:?})",
            name,
            self.scene.record_count(),
            self.scene.state.mode()
        ));
    }

    fn save_config(&mut self) {
        let config = &mut self.scene.state.config;
        config.window_size = (self.config.width, self.config.height);
        if let Err(e) = config.save(&self.args.config) {
            log::error!("Failed to save viewer config: {}", e);
        }
    }

    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                if self.scene.state.movie_state() != MovieState::Off {
                    self.stop_movie();
                }
                self.save_config();
                return false;
            }
            WindowEvent::Resized(physical_size) => {
                if physical_size.width > 0 && physical_size.height > 0 {
                    self.config.width = physical_size.width;
                    self.config.height = physical_size.height;
                    self.surface.configure(&self.device, &self.config);
                    self.scene.resize(&self.device, physical_size.width, physical_size.height);
                    self.window.request_redraw();
                }
            }
            WindowEvent::MouseInput { button, state, .. } => {
                self.scene.view_mut().handle_mouse_button(*button, *state);
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.scene.view_mut().handle_mouse_move(*position) {
                    self.window.request_redraw();
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.scene.view_mut().handle_scroll(*delta);
                self.window.request_redraw();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_key(event);
            }
            WindowEvent::RedrawRequested => {
                self.render();
            }
            _ => {}
        }
        true
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let state = &mut self.scene.state;
        match event.logical_key.as_ref() {
            Key::Named(NamedKey::Space) => state.toggle_spin(),
            Key::Named(NamedKey::ArrowLeft) => {
                let value = (state.config.spin_slider - SPIN_SLIDER_STEP).max(SPIN_SLIDER_MIN);
                state.set_spin_slider(value);
            }
            Key::Named(NamedKey::ArrowRight) => {
                let value = (state.config.spin_slider + SPIN_SLIDER_STEP).min(SPIN_SLIDER_MAX);
                state.set_spin_slider(value);
            }
            Key::Named(NamedKey::ArrowUp) => {
                let fps = (state.config.twinkle_fps.abs() + 1).min(MAX_SPIN_FPS as i32);
                state.set_twinkle_fps(fps);
            }
            Key::Named(NamedKey::ArrowDown) => {
                let fps = (state.config.twinkle_fps.abs() - 1).max(1);
                state.set_twinkle_fps(fps);
            }
            Key::Named(NamedKey::F12) => self.screenshot(),
            Key::Character(c) => self.handle_char(&c.to_lowercase()),
            _ => return,
        }
        self.next_tick_at = None;
        self.update_title();
        self.window.request_redraw();
    }

    fn handle_char(&mut self, c: &str) {
        let state = &mut self.scene.state;
        match c {
            "1" => state.set_display_category(DisplayCategory::Control),
            "2" => state.set_display_category(DisplayCategory::Stim),
            "3" => state.set_display_category(DisplayCategory::Delta),
            "4" => state.set_display_mode(DisplayMode::CtlStimPair),
            "s" => state.toggle_stereo(),
            "c" => state.toggle_color_cycling(),
            "n" => {
                let bin = state.single_step();
                log::info!("Showing bin {}", bin);
            }
            "t" => {
                let on = !state.single_twinkle();
                state.set_single_twinkle(on);
            }
            "x" => state.rotate(RotationAxis::X),
            "y" => state.rotate(RotationAxis::Y),
            "z" => state.rotate(RotationAxis::Z),
            "r" => state.reset_view(),
            "o" => {
                let on = !state.config.orthographic;
                state.set_orthographic(on);
            }
            "[" => {
                let fov = state.config.fov.saturating_sub(5);
                state.set_fov(fov);
            }
            "]" => {
                let fov = (state.config.fov + 5).min(120);
                state.set_fov(fov);
            }
            "a" => state.config.show_axes = !state.config.show_axes,
            "l" => state.config.show_outlines = !state.config.show_outlines,
            "k" => state.config.show_skin = !state.config.show_skin,
            "h" => state.config.hide_cells = !state.config.hide_cells,
            "u" => {
                let on = state.cluster_visibility().iter().any(|v| !v);
                state.set_all_clusters_visible(on);
            }
            "g" => {
                let on = self.scene.toggle_regions();
                log::info!("Anatomical regions {}", if on { "shown" } else { "hidden" });
            }
            "f" => self.save_figure(),
            "i" => self.load_figure(),
            "p" => self.screenshot(),
            "v" => {
                if self.scene.state.movie_state() == MovieState::Off {
                    self.start_movie();
                } else {
                    self.stop_movie();
                }
            }
            "b" => match self.scene.state.pause_movie() {
                Ok(state) => log::info!("Movie {:?}", state),
                Err(e) => log::warn!("{}", e),
            },
            _ => {}
        }
    }

    fn figure_path(&self) -> PathBuf {
        self.args
            .figure
            .clone()
            .unwrap_or_else(|| self.args.output_dir.join("brainstem.set"))
    }

    fn save_figure(&mut self) {
        let path = self.figure_path();
        self.scene.state.pause_timers();
        if let Err(e) = self.scene.state.save_figure(&path) {
            log::error!("Failed to save figure settings {}: {}", path.display(), e);
        }
        self.scene.state.resume_timers();
    }

    fn load_figure(&mut self) {
        let path = self.figure_path();
        self.scene.state.pause_timers();
        if let Err(e) = self.scene.state.load_figure(&path) {
            log::error!("Failed to load figure settings {}: {}", path.display(), e);
        }
        self.scene.state.resume_timers();
    }

    fn screenshot(&mut self) {
        let path = self
            .args
            .output_dir
            .join(format!("brainstem_{:03}.png", self.screenshots));
        self.screenshots += 1;
        self.scene.request_screenshot(path);
    }

    fn start_movie(&mut self) {
        let base = self.args.output_dir.join("brainstem_movie");
        let frames = std::env::temp_dir().join(format!("brainstem_frames_{}", std::process::id()));
        if let Err(e) = self.scene.state.start_movie(&base, &frames) {
            log::error!("Failed to start movie: {}", e);
        }
    }

    fn stop_movie(&mut self) {
        match self.scene.state.stop_movie() {
            Ok(files) => {
                for file in files {
                    log::info!("Wrote {}", file.display());
                }
            }
            Err(e) => log::error!("Movie export failed: {}", e),
        }
    }

    /// Run the animation timer if it is due and return the next wake-up.
    fn advance_timers(&mut self) -> Option<Instant> {
        let now = Instant::now();
        let Some(interval) = self.scene.next_tick() else {
            self.next_tick_at = None;
            return None;
        };
        let due = *self.next_tick_at.get_or_insert(now + interval);
        if now < due {
            return Some(due);
        }
        if self.scene.tick(now) {
            self.window.request_redraw();
        }
        let next = now + self.scene.next_tick().unwrap_or(interval);
        self.next_tick_at = Some(next);
        Some(next)
    }

    fn render(&mut self) {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                self.window.request_redraw();
                return;
            }
            Err(e) => {
                log::error!("Failed to acquire surface texture: {}", e);
                return;
            }
        };

        if let Err(e) = self.scene.render(&self.device, &self.queue, &output.texture) {
            log::error!("Render failed: {}", e);
        }
        self.window.pre_present_notify();
        output.present();
    }
}

struct AppState {
    app: Option<App>,
    pending: Option<(AppArgs, ViewerState)>,
    error: Option<AppError>,
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }
        let Some((args, state)) = self.pending.take() else {
            return;
        };
        match App::new(event_loop, args, state) {
            Ok(app) => self.app = Some(app),
            Err(e) => {
                log::error!("Startup failed: {}", e);
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(app) = &mut self.app else { return };

        if window_id != app.window().id() {
            return;
        }

        if !app.handle_event(&event) {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(app) = &mut self.app else { return };
        match app.advance_timers() {
            Some(next) => event_loop.set_control_flow(ControlFlow::WaitUntil(next)),
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}

/// Load config and data, then run the viewer until the window closes.
pub fn run(args: AppArgs) -> Result<(), AppError> {
    env_logger::init();

    let config = ViewerConfig::load(&args.config);
    let mut state = ViewerState::new(config);
    if let Some(path) = &args.data {
        match state.load_records(path) {
            Ok(()) => {
                if let Some(records) = state.records() {
                    records.log_summary(&path.display().to_string());
                }
            }
            Err(e) => log::error!("Failed to load {}: {}", path.display(), e),
        }
    }
    if let Some(path) = &args.figure {
        if let Err(e) = state.load_figure(path) {
            log::warn!("Figure settings {} not applied: {}", path.display(), e);
        }
    }

    let event_loop = EventLoop::new()?;
    let mut app_state = AppState {
        app: None,
        pending: Some((args, state)),
        error: None,
    };
    event_loop.run_app(&mut app_state)?;

    match app_state.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
