use super::SettingsError;
use crate::animation::{spin_from_slider, twinkle_period_from_fps};
use crate::rendering::anatomy::SkinColor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "brainstem_viz.ron";

/// Display parameters, stored in the same units as the viewer controls
/// (grey levels 0..255, percentages 0..100, light position in tenths).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub back_color: u8,
    /// Section outline grey level.
    pub section_color: u8,
    /// Sphere size in hundredths of an atlas unit; sign ignored.
    pub point_size: i32,
    pub skin_transparency: u32,
    pub cell_transparency: u32,
    pub region_transparency: u32,
    pub fov: u32,
    pub orthographic: bool,
    pub light: [i32; 3],
    pub diffuse: u32,
    pub ambient: u32,
    pub show_axes: bool,
    pub show_outlines: bool,
    pub show_skin: bool,
    pub hide_cells: bool,
    pub skin_color: SkinColor,
    /// Spin speed slider, see [`spin_from_slider`].
    pub spin_slider: i32,
    pub twinkle_fps: i32,
    pub window_size: (u32, u32),
    /// OIT node pool size per screen pixel.
    pub nodes_per_pixel: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            back_color: 70,
            section_color: 255,
            point_size: 20,
            skin_transparency: 70,
            cell_transparency: 100,
            region_transparency: 50,
            fov: 20,
            orthographic: true,
            light: [0, 0, 10],
            diffuse: 100,
            ambient: 0,
            show_axes: false,
            show_outlines: false,
            show_skin: true,
            hide_cells: false,
            skin_color: SkinColor::Tan,
            spin_slider: 0,
            twinkle_fps: 10,
            window_size: (1280, 800),
            nodes_per_pixel: crate::rendering::oit::NODES_PER_PIXEL,
        }
    }
}

impl ViewerConfig {
    pub fn background_grey(&self) -> f32 {
        self.back_color as f32 / 255.0
    }

    pub fn outline_grey(&self) -> f32 {
        self.section_color as f32 / 255.0
    }

    pub fn cell_radius(&self) -> f32 {
        self.point_size.unsigned_abs() as f32 / 100.0
    }

    pub fn skin_alpha(&self) -> f32 {
        percent(self.skin_transparency)
    }

    pub fn cell_alpha(&self) -> f32 {
        percent(self.cell_transparency)
    }

    pub fn region_alpha(&self) -> f32 {
        percent(self.region_transparency)
    }

    pub fn ambient_level(&self) -> f32 {
        percent(self.ambient)
    }

    pub fn diffuse_level(&self) -> f32 {
        percent(self.diffuse)
    }

    pub fn light_position(&self) -> glam::Vec3 {
        glam::Vec3::new(
            self.light[0] as f32,
            self.light[1] as f32,
            self.light[2] as f32,
        ) / 10.0
    }

    /// Spin period in ms and direction.
    pub fn spin(&self) -> (u32, f32) {
        spin_from_slider(self.spin_slider)
    }

    pub fn twinkle_period_ms(&self) -> u32 {
        twinkle_period_from_fps(self.twinkle_fps)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let contents = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        std::fs::write(path, contents)?;
        log::info!("Saved viewer config to {}", path.display());
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(ron::from_str(&contents)?)
    }

    /// Load from `path`, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No viewer config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from_file(path) {
            Ok(config) => {
                log::info!("Loaded viewer config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to load viewer config: {}. Using defaults.", e);
                Self::default()
            }
        }
    }
}

fn percent(value: u32) -> f32 {
    value.min(100) as f32 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("brainstem_config_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_defaults_map_to_display_units() {
        let config = ViewerConfig::default();
        assert!((config.background_grey() - 70.0 / 255.0).abs() < 1e-6);
        assert_eq!(config.outline_grey(), 1.0);
        assert!((config.cell_radius() - 0.2).abs() < 1e-6);
        assert_eq!(config.cell_alpha(), 1.0);
        assert!((config.skin_alpha() - 0.7).abs() < 1e-6);
        assert_eq!(config.light_position(), glam::Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(config.twinkle_period_ms(), 100);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip.ron");
        let config = ViewerConfig {
            back_color: 12,
            show_axes: true,
            skin_color: SkinColor::White,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ViewerConfig::load(&path), config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let path = temp_path("bad.ron");
        std::fs::write(&path, "not ron at all {").unwrap();
        assert!(ViewerConfig::load_from_file(&path).is_err());
        assert_eq!(ViewerConfig::load(&path), ViewerConfig::default());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: ViewerConfig = ron::from_str("(fov: 45)").unwrap();
        assert_eq!(config.fov, 45);
        assert_eq!(config.back_color, 70);
    }

    #[test]
    fn test_missing_file_is_default() {
        assert_eq!(
            ViewerConfig::load(&temp_path("does_not_exist.ron")),
            ViewerConfig::default()
        );
    }
}
