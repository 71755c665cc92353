//! Brightness-ramp colour tables for time-bin colour cycling.
//!
//! Every cluster gets [`COLOR_STEPS`] shades from its full HSV value down to
//! black, laid out flat so a cluster's ramp starts at `cluster * COLOR_STEPS`.
//! Delta views use a fixed diverging table: gold shades, black, blue-gray
//! shades. All entries are gamma corrected before upload.

use crate::data::Rgb;
use glam::{Vec3, Vec4};

/// Shades per cluster ramp. Must be at least 3.
pub const COLOR_STEPS: usize = 16;
/// Shades on each side of the delta table's black midpoint.
pub const DELTA_STEPS: usize = 8;
/// Length of the delta table.
pub const DELTA_TABLE_LEN: usize = DELTA_STEPS * 2 + 1;
/// Delta colour index used for the base (bin 0) view.
pub const DELTA_BASE_INDEX: u32 = DELTA_STEPS as u32 - 1;

pub const GAMMA: f32 = 1.0 / 2.2;

const MONO_COLOR: Vec3 = Vec3::new(0.0, 1.0, 0.0);
const DELTA_POSITIVE: Vec3 = Vec3::new(1.0, 0.8, 0.0);
const DELTA_NEGATIVE: Vec3 = Vec3::new(0.4, 0.6, 0.8);

/// Hue in degrees, saturation and value in [0, 1].
pub fn rgb_to_hsv(rgb: Vec3) -> Vec3 {
    // Greys have no hue.
    if rgb.x == rgb.y && rgb.x == rgb.z {
        return Vec3::new(0.0, 0.0, rgb.x);
    }
    let max = rgb.max_element();
    let min = rgb.min_element();
    let delta = max - min;
    let hue = if max == rgb.x {
        60.0 * ((rgb.y - rgb.z) / delta)
    } else if max == rgb.y {
        60.0 * ((rgb.z - rgb.x) / delta + 2.0)
    } else {
        60.0 * ((rgb.x - rgb.y) / delta + 4.0)
    };
    let saturation = if max > 0.0 { delta / max } else { 0.0 };
    Vec3::new(hue.rem_euclid(360.0), saturation, max)
}

pub fn hsv_to_rgb(hsv: Vec3) -> Vec3 {
    let (h, s, v) = (hsv.x.rem_euclid(360.0), hsv.y, hsv.z);
    if s <= 0.0 {
        return Vec3::splat(v);
    }
    let sector = h / 60.0;
    let i = sector.floor();
    let f = sector - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as i32 {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

fn gamma_correct(rgb: Vec3) -> Vec4 {
    rgb.max(Vec3::ZERO).powf(GAMMA).extend(1.0)
}

/// `steps` shades descending from full value, the last forced to pure black.
pub fn brightness_ramp(base: Vec3, steps: usize) -> Vec<Vec4> {
    let mut hsv = rgb_to_hsv(base);
    let step = hsv.z / (steps - 1) as f32;
    (0..steps)
        .map(|bright| {
            let rgb = if bright < steps - 1 {
                hsv_to_rgb(hsv)
            } else {
                Vec3::ZERO
            };
            hsv.z = (hsv.z - step).max(0.0);
            gamma_correct(rgb)
        })
        .collect()
}

/// Diverging delta table: brightest gold at 0, black at the midpoint,
/// brightest blue-gray at the last index.
pub fn delta_table() -> Vec<Vec4> {
    let mut table = vec![Vec4::new(0.0, 0.0, 0.0, 1.0); DELTA_TABLE_LEN];

    let mut hsv = rgb_to_hsv(DELTA_POSITIVE);
    let step = hsv.z / DELTA_STEPS as f32;
    for entry in table.iter_mut().take(DELTA_STEPS) {
        *entry = gamma_correct(hsv_to_rgb(hsv));
        hsv.z = (hsv.z - step).max(0.0);
    }

    let mut hsv = rgb_to_hsv(DELTA_NEGATIVE);
    let step = hsv.z / DELTA_STEPS as f32;
    for bright in (DELTA_STEPS + 1..=DELTA_STEPS * 2).rev() {
        table[bright] = gamma_correct(hsv_to_rgb(hsv));
        hsv.z = (hsv.z - step).max(0.0);
    }
    table
}

/// Colour tables uploaded for one file load.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadeTables {
    /// Per-cluster ramps, `COLOR_STEPS` entries per cluster.
    pub cluster: Vec<Vec4>,
    /// Shared green ramp repeated per cluster so cluster offsets stay valid.
    pub mono: Vec<Vec4>,
    /// Present only when the file has delta records.
    pub delta: Option<Vec<Vec4>>,
}

impl ShadeTables {
    pub fn build(cluster_colors: &[Rgb], have_delta: bool) -> Self {
        let mono_ramp = brightness_ramp(MONO_COLOR, COLOR_STEPS);
        let mut cluster = Vec::with_capacity(cluster_colors.len() * COLOR_STEPS);
        let mut mono = Vec::with_capacity(cluster_colors.len() * COLOR_STEPS);
        for color in cluster_colors {
            cluster.extend(brightness_ramp(color.to_vec3(), COLOR_STEPS));
            mono.extend_from_slice(&mono_ramp);
        }
        Self {
            cluster,
            mono,
            delta: have_delta.then(delta_table),
        }
    }

    pub fn cluster_ramp(&self, cluster: usize) -> &[Vec4] {
        let start = (cluster * COLOR_STEPS).min(self.cluster.len());
        let end = (start + COLOR_STEPS).min(self.cluster.len());
        &self.cluster[start..end]
    }
}

/// Brightest shade of a cluster, used for the base view.
pub fn base_color_index(cluster: usize) -> u32 {
    (cluster * COLOR_STEPS) as u32
}

/// Shade index for a normalised bin value. Higher values are brighter
/// (lower step). Non-finite values map to black.
pub fn bin_color_index(cluster: usize, value: f32) -> u32 {
    let last = (COLOR_STEPS - 1) as f32;
    let step = if value.is_finite() {
        (last * (1.0 - value)).round().clamp(0.0, last)
    } else {
        last
    };
    step as u32 + base_color_index(cluster)
}

/// Delta table index. Positive values floor toward the gold end, negative
/// values ceil toward the blue-gray end.
pub fn delta_color_index(value: f32) -> u32 {
    let d = DELTA_STEPS as f32;
    let index = if !value.is_finite() {
        d
    } else if value >= 0.0 {
        (d - value * d).floor()
    } else {
        (d + 1.0 - value * d).ceil()
    };
    index.clamp(0.0, (DELTA_TABLE_LEN - 1) as f32) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn luminance(c: Vec4) -> f32 {
        c.x + c.y + c.z
    }

    #[test]
    fn test_ramp_length_and_black_tail() {
        let colors = [Rgb::new(1.0, 0.0, 0.0), Rgb::new(0.5, 0.5, 0.5), Rgb::new(0.1, 0.7, 0.3)];
        let tables = ShadeTables::build(&colors, false);
        assert_eq!(tables.cluster.len(), colors.len() * COLOR_STEPS);
        assert_eq!(tables.mono.len(), tables.cluster.len());
        for cluster in 0..colors.len() {
            let ramp = tables.cluster_ramp(cluster);
            assert_eq!(ramp.len(), COLOR_STEPS);
            assert_eq!(ramp[COLOR_STEPS - 1], Vec4::new(0.0, 0.0, 0.0, 1.0));
            for pair in ramp.windows(2) {
                assert!(luminance(pair[0]) >= luminance(pair[1]) - 1e-6);
            }
        }
        assert!(tables.delta.is_none());
    }

    #[test]
    fn test_first_shade_is_gamma_corrected_base() {
        let ramp = brightness_ramp(Vec3::new(0.25, 0.5, 1.0), COLOR_STEPS);
        let expected = Vec3::new(0.25, 0.5, 1.0).powf(GAMMA);
        assert!((ramp[0].truncate() - expected).abs().max_element() < 1e-5);
    }

    #[test]
    fn test_grey_keeps_value() {
        assert_eq!(rgb_to_hsv(Vec3::splat(0.4)), Vec3::new(0.0, 0.0, 0.4));
    }

    #[test]
    fn test_delta_table_layout() {
        let table = delta_table();
        assert_eq!(table.len(), DELTA_TABLE_LEN);
        assert_eq!(table[DELTA_STEPS], Vec4::new(0.0, 0.0, 0.0, 1.0));
        let gold = DELTA_POSITIVE.powf(GAMMA);
        assert!((table[0].truncate() - gold).abs().max_element() < 1e-5);
        let blue = DELTA_NEGATIVE.powf(GAMMA);
        assert!((table[DELTA_TABLE_LEN - 1].truncate() - blue).abs().max_element() < 1e-5);
        assert!(luminance(table[1]) < luminance(table[0]));
        assert!(luminance(table[DELTA_STEPS + 1]) < luminance(table[DELTA_STEPS + 2]));
    }

    #[test]
    fn test_bin_index_boundaries() {
        assert_eq!(bin_color_index(0, 1.0), 0);
        assert_eq!(bin_color_index(0, 0.0), (COLOR_STEPS - 1) as u32);
        assert_eq!(bin_color_index(0, 0.5), 8);
        assert_eq!(bin_color_index(2, 1.0), (2 * COLOR_STEPS) as u32);
        assert_eq!(bin_color_index(1, -3.0), (2 * COLOR_STEPS - 1) as u32);
        assert_eq!(bin_color_index(1, 7.0), COLOR_STEPS as u32);
        assert_eq!(bin_color_index(0, f32::NAN), (COLOR_STEPS - 1) as u32);
    }

    #[test]
    fn test_delta_index_asymmetry() {
        assert_eq!(delta_color_index(1.0), 0);
        assert_eq!(delta_color_index(0.0), DELTA_STEPS as u32);
        assert_eq!(delta_color_index(-1.0), (DELTA_TABLE_LEN - 1) as u32);
        assert_eq!(delta_color_index(-0.01), DELTA_STEPS as u32 + 2);
        assert_eq!(delta_color_index(0.5), 4);
        assert_eq!(delta_color_index(-0.5), 13);
        assert_eq!(delta_color_index(2.0), 0);
    }

    proptest! {
        #[test]
        fn prop_bin_index_monotonic(a in 0.0f32..1.0, b in 0.0f32..1.0, cluster in 0usize..8) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(bin_color_index(cluster, hi) <= bin_color_index(cluster, lo));
        }

        #[test]
        fn prop_bin_index_in_cluster_range(v in -10.0f32..10.0, cluster in 0usize..8) {
            let idx = bin_color_index(cluster, v) as usize;
            prop_assert!(idx >= cluster * COLOR_STEPS);
            prop_assert!(idx < (cluster + 1) * COLOR_STEPS);
        }

        #[test]
        fn prop_delta_index_in_range(v in -10.0f32..10.0) {
            prop_assert!((delta_color_index(v) as usize) < DELTA_TABLE_LEN);
        }
    }
}
