//! Figure settings (`.set`) files: `key: value` lines in a fixed order,
//! camera pose first, then the display controls.

use super::{CameraPose, SettingsError, ViewerConfig};
use std::fmt::Write as _;
use std::path::Path;

pub const FIGURE_VERSION: i64 = 1;

/// Field names of a version 1 file, in file order.
const FIELDS_V1: [&str; 23] = [
    "version",
    "rotx",
    "roty",
    "rotz",
    "trx",
    "try",
    "trz",
    "angle",
    "radius",
    "back_color",
    "section_color",
    "point_size",
    "skin_transparency",
    "cell_size",
    "region_transparency",
    "FOV",
    "light_x",
    "light_y",
    "light_z",
    "diffuse",
    "ambient",
    "axes_on",
    "sections_on",
];

/// Everything a figure file restores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FigureSettings {
    pub pose: CameraPose,
    pub back_color: i32,
    pub section_color: i32,
    pub point_size: i32,
    pub skin_transparency: i32,
    /// Cell transparency control (named for the historical file key).
    pub cell_size: i32,
    pub region_transparency: i32,
    pub fov: i32,
    pub light: [i32; 3],
    pub diffuse: i32,
    pub ambient: i32,
    pub axes_on: bool,
    pub sections_on: bool,
}

impl FigureSettings {
    pub fn capture(pose: CameraPose, config: &ViewerConfig) -> Self {
        Self {
            pose,
            back_color: config.back_color as i32,
            section_color: config.section_color as i32,
            point_size: config.point_size,
            skin_transparency: config.skin_transparency as i32,
            cell_size: config.cell_transparency as i32,
            region_transparency: config.region_transparency as i32,
            fov: config.fov as i32,
            light: config.light,
            diffuse: config.diffuse as i32,
            ambient: config.ambient as i32,
            axes_on: config.show_axes,
            sections_on: config.show_outlines,
        }
    }

    /// Copy the display controls into `config`.
    pub fn apply_to(&self, config: &mut ViewerConfig) {
        config.back_color = self.back_color.clamp(0, 255) as u8;
        config.section_color = self.section_color.clamp(0, 255) as u8;
        config.point_size = self.point_size;
        config.skin_transparency = self.skin_transparency.clamp(0, 100) as u32;
        config.cell_transparency = self.cell_size.clamp(0, 100) as u32;
        config.region_transparency = self.region_transparency.clamp(0, 100) as u32;
        config.fov = self.fov.max(1) as u32;
        config.light = self.light;
        config.diffuse = self.diffuse.clamp(0, 100) as u32;
        config.ambient = self.ambient.clamp(0, 100) as u32;
        config.show_axes = self.axes_on;
        config.show_outlines = self.sections_on;
    }

    pub fn to_text(&self) -> String {
        let p = &self.pose;
        let floats = [p.rot_x, p.rot_y, p.rot_z, p.tr_x, p.tr_y, p.tr_z, p.angle, p.radius];
        let ints = [
            self.back_color,
            self.section_color,
            self.point_size,
            self.skin_transparency,
            self.cell_size,
            self.region_transparency,
            self.fov,
            self.light[0],
            self.light[1],
            self.light[2],
            self.diffuse,
            self.ambient,
            self.axes_on as i32,
            self.sections_on as i32,
        ];

        let mut out = String::new();
        let mut keys = FIELDS_V1.iter();
        let mut line = |value: &dyn std::fmt::Display| {
            if let Some(key) = keys.next() {
                let _ = writeln!(out, "{}: {}", key, value);
            }
        };
        line(&FIGURE_VERSION);
        for value in floats {
            line(&value);
        }
        for value in ints {
            line(&value);
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty()).enumerate();
        let mut next = |expected: &'static str| -> Result<(usize, String), SettingsError> {
            let (index, raw) = lines.next().ok_or_else(|| SettingsError::Malformed {
                line: 0,
                expected,
                found: "end of file".to_string(),
            })?;
            let malformed = || SettingsError::Malformed {
                line: index + 1,
                expected,
                found: raw.to_string(),
            };
            let (key, value) = raw.split_once(':').ok_or_else(malformed)?;
            if key.trim() != expected {
                return Err(malformed());
            }
            Ok((index + 1, value.trim().to_string()))
        };

        fn number<T: std::str::FromStr>(
            field: (usize, String),
            expected: &'static str,
        ) -> Result<T, SettingsError> {
            let (line, value) = field;
            value.parse().map_err(|_| SettingsError::Malformed {
                line,
                expected,
                found: value,
            })
        }

        let version: i64 = number(next("version")?, "version")?;
        if version != FIGURE_VERSION {
            return Err(SettingsError::UnsupportedVersion(version));
        }

        let mut f = |key: &'static str| -> Result<f32, SettingsError> { number(next(key)?, key) };
        let pose = CameraPose {
            rot_x: f("rotx")?,
            rot_y: f("roty")?,
            rot_z: f("rotz")?,
            tr_x: f("trx")?,
            tr_y: f("try")?,
            tr_z: f("trz")?,
            angle: f("angle")?,
            radius: f("radius")?,
        };

        let mut i = |key: &'static str| -> Result<i32, SettingsError> { number(next(key)?, key) };
        let settings = Self {
            pose,
            back_color: i("back_color")?,
            section_color: i("section_color")?,
            point_size: i("point_size")?,
            skin_transparency: i("skin_transparency")?,
            cell_size: i("cell_size")?,
            region_transparency: i("region_transparency")?,
            fov: i("FOV")?,
            light: [i("light_x")?, i("light_y")?, i("light_z")?],
            diffuse: i("diffuse")?,
            ambient: i("ambient")?,
            axes_on: i("axes_on")? != 0,
            sections_on: i("sections_on")? != 0,
        };
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_text())?;
        log::info!("Saved figure settings to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let settings = Self::parse(&std::fs::read_to_string(path)?)?;
        log::info!("Loaded figure settings from {}", path.display());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FigureSettings {
        let pose = CameraPose {
            rot_x: 33.5,
            rot_y: -270.0,
            rot_z: 0.1,
            tr_x: 1.25,
            tr_y: -0.35,
            tr_z: 7.0,
            angle: 12.3456,
            radius: 18.75,
        };
        FigureSettings::capture(pose, &ViewerConfig::default())
    }

    #[test]
    fn test_text_order() {
        let text = sample().to_text();
        let keys: Vec<&str> = text
            .lines()
            .map(|l| l.split_once(':').map(|(k, _)| k).unwrap_or(""))
            .collect();
        assert_eq!(keys, FIELDS_V1.to_vec());
        assert!(text.starts_with("version: 1\n"));
        assert!(text.contains("try: -0.35\n"));
    }

    #[test]
    fn test_save_then_load_restores_pose() {
        let path = std::env::temp_dir().join(format!("brainstem_fig_{}.set", std::process::id()));
        let settings = sample();
        settings.save(&path).unwrap();
        let back = FigureSettings::load(&path).unwrap();
        assert_eq!(back, settings);
        assert_eq!(back.pose.tr_y, -0.35);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_other_versions_rejected() {
        let text = sample().to_text().replacen("version: 1", "version: 2", 1);
        assert!(matches!(
            FigureSettings::parse(&text),
            Err(SettingsError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_out_of_order_field_rejected() {
        let text = sample().to_text().replacen("rotx:", "roty:", 1);
        match FigureSettings::parse(&text) {
            Err(SettingsError::Malformed { line, expected, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(expected, "rotx");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_file_rejected() {
        let text: String = sample().to_text().lines().take(10).map(|l| format!("{l}\n")).collect();
        assert!(matches!(
            FigureSettings::parse(&text),
            Err(SettingsError::Malformed { expected: "section_color", .. })
        ));
    }

    #[test]
    fn test_apply_to_config() {
        let mut settings = sample();
        settings.axes_on = true;
        settings.back_color = 300;
        let mut config = ViewerConfig::default();
        settings.apply_to(&mut config);
        assert!(config.show_axes);
        assert_eq!(config.back_color, 255);
    }
}
