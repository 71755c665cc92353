//! Persistent viewer settings: the RON config, the binary settings blob and
//! the text figure-settings file.

pub mod blob;
pub mod config;
pub mod figure;

pub use blob::SettingsBlob;
pub use config::ViewerConfig;
pub use figure::FigureSettings;

/// Camera pose shared by the blob and figure formats.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CameraPose {
    pub rot_x: f32,
    pub rot_y: f32,
    pub rot_z: f32,
    pub tr_x: f32,
    pub tr_y: f32,
    pub tr_z: f32,
    pub angle: f32,
    pub radius: f32,
}

impl CameraPose {
    pub fn from_view(view: &crate::view::ViewTransform) -> Self {
        Self {
            rot_x: view.rot_x,
            rot_y: view.rot_y,
            rot_z: view.rot_z,
            tr_x: view.translation.x,
            tr_y: view.translation.y,
            tr_z: view.translation.z,
            angle: view.angle,
            radius: view.radius,
        }
    }

    pub fn apply(&self, view: &mut crate::view::ViewTransform) {
        view.rot_x = self.rot_x;
        view.rot_y = self.rot_y;
        view.rot_z = self.rot_z;
        view.translation = glam::Vec3::new(self.tr_x, self.tr_y, self.tr_z);
        view.angle = self.angle;
        view.radius = self.radius;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
    #[error("RON serialize error: {0}")]
    RonSerialize(#[from] ron::Error),
    #[error("figure settings line {line}: expected `{expected}`, found `{found}`")]
    Malformed {
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[error("figure settings version {0} is not supported")]
    UnsupportedVersion(i64),
}
