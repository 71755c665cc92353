//! GPU-free viewer state and the commands that change it.
//!
//! Every control the viewer offers is a method here. The GPU scene reads
//! the dirty flags each frame and rebuilds only what changed.

use crate::animation::{AnimationState, MovieState, TickEvents, TimerCoordinator};
use crate::data::{self, DisplayCategory, ExperimentMask, LoadError, RecordSet};
use crate::movie::{MovieError, MovieRecorder};
use crate::settings::{CameraPose, FigureSettings, SettingsBlob, SettingsError, ViewerConfig};
use crate::view::{DisplayMode, RotationAxis, ViewTransform};
use glam::Vec3;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct ViewerState {
    pub config: ViewerConfig,
    pub view: ViewTransform,
    pub animation: AnimationState,
    pub timer: TimerCoordinator,
    records: Option<RecordSet>,
    source: Option<PathBuf>,
    mode: DisplayMode,
    experiments: ExperimentMask,
    cluster_on: Vec<bool>,
    single_twinkle: bool,
    mesh_bounds: Option<(Vec3, Vec3)>,
    movie: Option<MovieRecorder>,
    instances_dirty: bool,
    visibility_dirty: bool,
}

impl ViewerState {
    pub fn new(config: ViewerConfig) -> Self {
        let (spin_ms, direction) = config.spin();
        let timer = TimerCoordinator::new(spin_ms, config.twinkle_period_ms());
        let mut view = ViewTransform::new();
        view.fov = config.fov as f32;
        view.orthographic = config.orthographic;
        let animation = AnimationState {
            spin_direction: direction,
            ..AnimationState::default()
        };
        Self {
            config,
            view,
            animation,
            timer,
            records: None,
            source: None,
            mode: DisplayMode::default(),
            experiments: ExperimentMask::all(),
            cluster_on: Vec::new(),
            single_twinkle: false,
            mesh_bounds: None,
            movie: None,
            instances_dirty: false,
            visibility_dirty: false,
        }
    }

    pub fn records(&self) -> Option<&RecordSet> {
        self.records.as_ref()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn experiments(&self) -> &ExperimentMask {
        &self.experiments
    }

    pub fn cluster_visibility(&self) -> &[bool] {
        &self.cluster_on
    }

    pub fn single_twinkle(&self) -> bool {
        self.single_twinkle
    }

    /// Bin shown this frame.
    pub fn current_bin(&self) -> usize {
        self.animation.current_bin
    }

    /// Load a record file. On failure the current records stay in place.
    pub fn load_records(&mut self, path: &Path) -> Result<(), LoadError> {
        let records = data::load_file(path)?;
        self.source = Some(path.to_path_buf());
        self.set_records(records);
        Ok(())
    }

    pub fn set_records(&mut self, records: RecordSet) {
        self.cluster_on = vec![true; records.cluster_count()];
        self.experiments = ExperimentMask::all();
        self.animation.num_bins = records.num_bins();
        self.animation.reset_cycle();
        if self.mesh_bounds.is_none() {
            if let Some(bounds) = records.bounds() {
                self.view.fit(bounds);
            }
        }
        self.mode = if records.has_category(DisplayCategory::Control)
            && records.has_category(DisplayCategory::Stim)
        {
            DisplayMode::CtlStimPair
        } else {
            DisplayCategory::ALL
                .into_iter()
                .find(|c| records.has_category(*c))
                .map_or(DisplayMode::default(), DisplayMode::single)
        };
        log::info!("Display mode {:?}", self.mode);
        self.records = Some(records);
        self.instances_dirty = true;
    }

    /// Fit the view to the anatomy mesh, which takes precedence over the records.
    pub fn set_mesh_bounds(&mut self, bounds: Option<(Vec3, Vec3)>) {
        self.mesh_bounds = bounds;
        let fit = bounds.or_else(|| self.records.as_ref().and_then(|r| r.bounds()));
        if let Some(fit) = fit {
            self.view.fit(fit);
        }
    }

    /// Take the pending rebuild request.
    pub fn take_instances_dirty(&mut self) -> bool {
        std::mem::take(&mut self.instances_dirty)
    }

    pub fn take_visibility_dirty(&mut self) -> bool {
        std::mem::take(&mut self.visibility_dirty)
    }

    pub fn set_cluster_visible(&mut self, cluster: usize, on: bool) {
        if let Some(flag) = self.cluster_on.get_mut(cluster) {
            *flag = on;
            self.visibility_dirty = true;
        }
    }

    pub fn set_all_clusters_visible(&mut self, on: bool) {
        self.cluster_on.iter_mut().for_each(|flag| *flag = on);
        self.visibility_dirty = true;
    }

    /// Enable or disable an experiment's records. Requires an instance rebuild.
    pub fn set_experiment_enabled(&mut self, experiment: usize, on: bool) {
        let count = self.records.as_ref().map_or(0, |r| r.experiments().len());
        self.experiments.set(experiment, on, count);
        self.instances_dirty = true;
    }

    pub fn set_display_category(&mut self, category: DisplayCategory) {
        let mode = DisplayMode::single(category);
        self.mode = if self.mode.has_stereo_bias() {
            mode.toggle_stereo()
        } else {
            mode
        };
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    pub fn toggle_stereo(&mut self) {
        self.mode = self.mode.toggle_stereo();
    }

    pub fn rotate(&mut self, axis: RotationAxis) {
        self.view.rotate_90(axis);
    }

    pub fn reset_view(&mut self) {
        self.view.reset();
    }

    pub fn set_orthographic(&mut self, on: bool) {
        self.config.orthographic = on;
        self.view.orthographic = on;
    }

    pub fn set_fov(&mut self, fov: u32) {
        self.config.fov = fov.max(1);
        self.view.fov = self.config.fov as f32;
    }

    pub fn toggle_spin(&mut self) {
        let on = !self.timer.spin_on();
        self.timer.set_spin(on);
    }

    /// Start or stop cycling through time bins from the base colour.
    pub fn toggle_color_cycling(&mut self) {
        let on = !self.timer.twinkle_on();
        self.timer.set_twinkle(on);
        self.animation.reset_cycle();
    }

    /// Stop cycling and show the next bin.
    pub fn single_step(&mut self) -> usize {
        if self.timer.twinkle_on() {
            self.toggle_color_cycling();
        }
        self.animation.single_step = true;
        self.animation.advance_bin()
    }

    pub fn set_single_twinkle(&mut self, on: bool) {
        self.single_twinkle = on;
    }

    pub fn set_spin_slider(&mut self, value: i32) {
        self.config.spin_slider = value;
        let (period, direction) = self.config.spin();
        self.animation.spin_direction = direction;
        self.timer.set_spin_period(period);
    }

    pub fn set_twinkle_fps(&mut self, fps: i32) {
        self.config.twinkle_fps = fps;
        self.timer.set_twinkle_period(self.config.twinkle_period_ms());
    }

    /// Run one timer tick and apply its events.
    pub fn tick(&mut self, now: Instant) -> TickEvents {
        let events = self.timer.tick(now);
        if events.spin {
            self.view.advance_spin(self.animation.spin_delta(events.spin_step));
        }
        if events.twinkle {
            self.animation.advance_bin();
        }
        events
    }

    /// Stop timers so a modal action can run; `resume_timers` restores them.
    pub fn pause_timers(&mut self) {
        self.timer.pause();
    }

    pub fn resume_timers(&mut self) {
        self.timer.resume();
    }

    pub fn settings_blob(&self) -> SettingsBlob {
        SettingsBlob {
            pose: CameraPose::from_view(&self.view),
            background: self.config.background_grey() as f64,
            outline_grey: self.config.outline_grey() as f64,
            show_outlines: self.config.show_outlines,
            show_axes: self.config.show_axes,
        }
    }

    /// Restore from a blob; unreadable blobs leave everything as is.
    pub fn apply_settings_blob(&mut self, bytes: &[u8]) -> bool {
        let Some(blob) = SettingsBlob::from_bytes(bytes) else {
            return false;
        };
        blob.pose.apply(&mut self.view);
        self.config.back_color = (blob.background.clamp(0.0, 1.0) * 255.0).round() as u8;
        self.config.section_color = (blob.outline_grey.clamp(0.0, 1.0) * 255.0).round() as u8;
        self.config.show_outlines = blob.show_outlines;
        self.config.show_axes = blob.show_axes;
        true
    }

    pub fn figure_settings(&self) -> FigureSettings {
        FigureSettings::capture(CameraPose::from_view(&self.view), &self.config)
    }

    pub fn save_figure(&self, path: &Path) -> Result<(), SettingsError> {
        self.figure_settings().save(path)
    }

    pub fn load_figure(&mut self, path: &Path) -> Result<(), SettingsError> {
        let figure = FigureSettings::load(path)?;
        figure.pose.apply(&mut self.view);
        figure.apply_to(&mut self.config);
        self.view.fov = self.config.fov as f32;
        Ok(())
    }

    pub fn movie_state(&self) -> MovieState {
        self.timer.movie_state()
    }

    /// Begin recording frames for `<output_base>.avi/.wmv`.
    pub fn start_movie(&mut self, output_base: &Path, temp_dir: &Path) -> Result<(), MovieError> {
        let mut recorder = MovieRecorder::new(output_base, temp_dir)?;
        recorder.start(self.timer.frames_per_sec());
        self.movie = Some(recorder);
        self.timer.set_movie_state(MovieState::On);
        Ok(())
    }

    pub fn pause_movie(&mut self) -> Result<MovieState, MovieError> {
        let recorder = self.movie.as_mut().ok_or(MovieError::NoSession)?;
        let state = recorder.pause();
        self.timer.set_movie_state(state);
        Ok(state)
    }

    pub fn stop_movie(&mut self) -> Result<Vec<PathBuf>, MovieError> {
        let mut recorder = self.movie.take().ok_or(MovieError::NoSession)?;
        self.timer.set_movie_state(MovieState::Off);
        recorder.stop()
    }

    pub fn movie_mut(&mut self) -> Option<&mut MovieRecorder> {
        self.movie.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::csv::load_csv_str;

    const CSV: &str = "\
name,mchan,ap,rl,dp,dchan,ref,r,g,b,ap_atlas,rl_atlas,dp_atlas,expname,period,archetype,cth
GLOBALS:,euclidean,average,2
a,1,0,0,0,d,r,1,0,0,1,2,3,exp1,CONTROL,0,1,2,0.1,0.9
b,2,0,0,0,d,r,1,0,0,2,2,3,exp2,CONTROL,0,1,2,0.5,0.5
c,3,0,0,0,d,r,0,0,1,3,2,3,exp1,CCO2STIM,0,1,2,1.0,0.0
";
    fn loaded() -> ViewerState {
        let mut state = ViewerState::new(ViewerConfig::default());
        state.set_records(load_csv_str(CSV).unwrap());
        state
    }

    #[test]
    fn test_load_marks_rebuild_and_fits() {
        let mut state = loaded();
        assert!(state.take_instances_dirty());
        assert!(!state.take_instances_dirty());
        assert_eq!(state.cluster_visibility(), &[true, true]);
        assert_eq!(state.animation.num_bins, 2);
        assert!((state.view.center() - Vec3::new(2.0, 2.0, 3.0)).length() < 1e-3);
    }

    #[test]
    fn test_failed_load_keeps_records() {
        let mut state = loaded();
        let missing = std::env::temp_dir().join("brainstem_state_missing.csv");
        assert!(state.load_records(&missing).is_err());
        assert_eq!(state.records().map(|r| r.cluster_count()), Some(2));
    }

    #[test]
    fn test_experiment_filter_requests_rebuild() {
        let mut state = loaded();
        state.take_instances_dirty();
        state.set_experiment_enabled(1, false);
        assert!(state.take_instances_dirty());
        assert!(!state.experiments().allows(Some(1)));
        assert!(state.experiments().allows(Some(0)));
    }

    #[test]
    fn test_cluster_toggle_is_visibility_only() {
        let mut state = loaded();
        state.take_instances_dirty();
        state.set_cluster_visible(1, false);
        assert!(state.take_visibility_dirty());
        assert!(!state.take_instances_dirty());
        assert_eq!(state.cluster_visibility(), &[true, false]);
    }

    #[test]
    fn test_single_step_stops_cycling() {
        let mut state = loaded();
        state.toggle_color_cycling();
        assert!(state.timer.twinkle_on());
        assert_eq!(state.single_step(), 1);
        assert!(!state.timer.twinkle_on());
        assert_eq!(state.single_step(), 2);
        assert_eq!(state.single_step(), 1);
    }

    #[test]
    fn test_tick_spins_and_twinkles() {
        let mut state = loaded();
        state.set_spin_slider(0);
        state.toggle_spin();
        state.toggle_color_cycling();
        let now = Instant::now();
        let mut twinkles = 0;
        for _ in 0..12 {
            twinkles += state.tick(now).twinkle as usize;
        }
        assert!(twinkles > 0);
        assert!(state.view.angle != 0.0);
        assert!(state.current_bin() >= 1);
    }

    #[test]
    fn test_load_picks_pair_mode() {
        let state = loaded();
        assert_eq!(state.mode(), DisplayMode::CtlStimPair);
    }

    #[test]
    fn test_display_category_keeps_stereo() {
        let mut state = loaded();
        state.set_display_category(DisplayCategory::Control);
        state.toggle_stereo();
        state.set_display_category(DisplayCategory::Stim);
        assert_eq!(state.mode(), DisplayMode::StimStereo);
    }

    #[test]
    fn test_blob_restores_pose() {
        let mut state = loaded();
        state.view.rot_x = 45.0;
        state.config.show_axes = true;
        let bytes = state.settings_blob().to_bytes();

        let mut other = loaded();
        assert!(other.apply_settings_blob(&bytes));
        assert_eq!(other.view.rot_x, 45.0);
        assert!(other.config.show_axes);
        assert_eq!(other.config.back_color, 70);

        assert!(!other.apply_settings_blob(&[0, 1, 2]));
    }

    #[test]
    fn test_figure_round_trip() {
        let mut state = loaded();
        state.view.rot_y = 30.0;
        state.view.translation = Vec3::new(0.5, -1.5, 2.0);
        state.view.radius = 12.5;
        let path = std::env::temp_dir().join(format!("brainstem_state_{}.set", std::process::id()));
        state.save_figure(&path).unwrap();

        let mut other = loaded();
        other.load_figure(&path).unwrap();
        assert_eq!(other.view.rot_y, 30.0);
        assert_eq!(other.view.translation, Vec3::new(0.5, -1.5, 2.0));
        assert_eq!(other.view.radius, 12.5);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_movie_commands_need_session() {
        let mut state = loaded();
        assert!(matches!(state.pause_movie(), Err(MovieError::NoSession)));
        assert!(matches!(state.stop_movie(), Err(MovieError::NoSession)));
    }
}
