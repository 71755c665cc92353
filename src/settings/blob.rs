//! Compact binary snapshot of the camera pose and display toggles.
//!
//! Layout (big-endian): i32 marker, eight f32 pose fields, f64 background
//! grey, f64 outline grey, u8 show-outlines, u8 show-axes.

use super::CameraPose;

pub const BLOB_MARKER: i32 = 0xFEEE;
const BLOB_LEN: usize = 4 + 8 * 4 + 2 * 8 + 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsBlob {
    pub pose: CameraPose,
    pub background: f64,
    pub outline_grey: f64,
    pub show_outlines: bool,
    pub show_axes: bool,
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.bytes.split_first_chunk::<N>()?;
        self.bytes = rest;
        Some(*head)
    }

    fn f32(&mut self) -> Option<f32> {
        self.take().map(f32::from_be_bytes)
    }

    fn f64(&mut self) -> Option<f64> {
        self.take().map(f64::from_be_bytes)
    }

    fn flag(&mut self) -> Option<bool> {
        self.take::<1>().map(|[b]| b != 0)
    }
}

impl SettingsBlob {
    pub fn to_bytes(&self) -> Vec<u8> {
        let p = &self.pose;
        let mut out = Vec::with_capacity(BLOB_LEN);
        out.extend_from_slice(&BLOB_MARKER.to_be_bytes());
        for value in [p.rot_x, p.rot_y, p.rot_z, p.tr_x, p.tr_y, p.tr_z, p.angle, p.radius] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out.extend_from_slice(&self.background.to_be_bytes());
        out.extend_from_slice(&self.outline_grey.to_be_bytes());
        out.push(self.show_outlines as u8);
        out.push(self.show_axes as u8);
        out
    }

    /// Decode a blob. A wrong marker or a short blob yields `None` and the
    /// caller keeps its current settings.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut r = Reader { bytes };
        let marker = i32::from_be_bytes(r.take()?);
        if marker != BLOB_MARKER {
            log::warn!("Ignoring settings blob with marker {:#x}", marker);
            return None;
        }
        let decoded = (|| {
            Some(Self {
                pose: CameraPose {
                    rot_x: r.f32()?,
                    rot_y: r.f32()?,
                    rot_z: r.f32()?,
                    tr_x: r.f32()?,
                    tr_y: r.f32()?,
                    tr_z: r.f32()?,
                    angle: r.f32()?,
                    radius: r.f32()?,
                },
                background: r.f64()?,
                outline_grey: r.f64()?,
                show_outlines: r.flag()?,
                show_axes: r.flag()?,
            })
        })();
        if decoded.is_none() {
            log::warn!("Ignoring truncated settings blob ({} bytes)", bytes.len());
        }
        decoded
    }
}
