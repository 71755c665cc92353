//! View transforms and display modes.

pub mod camera;

pub use camera::{RotationAxis, ViewMatrices, ViewTransform};

use crate::data::DisplayCategory;
use serde::{Deserialize, Serialize};

/// What is drawn and in how many viewports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayMode {
    #[default]
    ControlOnly,
    ControlStereo,
    CtlStimPair,
    StimOnly,
    StimStereo,
    DeltaOnly,
    DeltaStereo,
}

impl DisplayMode {
    pub fn viewport_count(self) -> usize {
        match self {
            DisplayMode::ControlOnly | DisplayMode::StimOnly | DisplayMode::DeltaOnly => 1,
            _ => 2,
        }
    }

    /// Whether the secondary viewport gets the stereo rotation bias.
    pub fn has_stereo_bias(self) -> bool {
        matches!(
            self,
            DisplayMode::ControlStereo | DisplayMode::StimStereo | DisplayMode::DeltaStereo
        )
    }

    /// Category drawn in each viewport.
    pub fn categories(self) -> [DisplayCategory; 2] {
        match self {
            DisplayMode::ControlOnly | DisplayMode::ControlStereo => {
                [DisplayCategory::Control, DisplayCategory::Control]
            }
            DisplayMode::CtlStimPair => [DisplayCategory::Control, DisplayCategory::Stim],
            DisplayMode::StimOnly | DisplayMode::StimStereo => {
                [DisplayCategory::Stim, DisplayCategory::Stim]
            }
            DisplayMode::DeltaOnly | DisplayMode::DeltaStereo => {
                [DisplayCategory::Delta, DisplayCategory::Delta]
            }
        }
    }

    /// Single view of one category.
    pub fn single(category: DisplayCategory) -> Self {
        match category {
            DisplayCategory::Control => DisplayMode::ControlOnly,
            DisplayCategory::Stim => DisplayMode::StimOnly,
            DisplayCategory::Delta => DisplayMode::DeltaOnly,
        }
    }

    /// Flip between the single and stereo view of the same category.
    /// The control/stim pair has no stereo twin and is returned unchanged.
    pub fn toggle_stereo(self) -> Self {
        match self {
            DisplayMode::ControlOnly => DisplayMode::ControlStereo,
            DisplayMode::ControlStereo => DisplayMode::ControlOnly,
            DisplayMode::StimOnly => DisplayMode::StimStereo,
            DisplayMode::StimStereo => DisplayMode::StimOnly,
            DisplayMode::DeltaOnly => DisplayMode::DeltaStereo,
            DisplayMode::DeltaStereo => DisplayMode::DeltaOnly,
            DisplayMode::CtlStimPair => {
                log::info!("Stereo toggle ignored in control/stim pair mode");
                DisplayMode::CtlStimPair
            }
        }
    }
}

/// Pixel rectangle of one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// Side-by-side viewports for `count` (1 or 2) over a surface.
pub fn viewports(count: usize, width: u32, height: u32) -> Vec<Viewport> {
    let (w, h) = (width as f32, height as f32);
    if count < 2 {
        return vec![Viewport {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
        }];
    }
    let half = (w / 2.0).floor();
    vec![
        Viewport {
            x: 0.0,
            y: 0.0,
            width: half,
            height: h,
        },
        Viewport {
            x: w - half,
            y: 0.0,
            width: half,
            height: h,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_stereo() {
        assert_eq!(DisplayMode::ControlOnly.toggle_stereo(), DisplayMode::ControlStereo);
        assert_eq!(DisplayMode::DeltaStereo.toggle_stereo(), DisplayMode::DeltaOnly);
        assert_eq!(DisplayMode::CtlStimPair.toggle_stereo(), DisplayMode::CtlStimPair);
    }

    #[test]
    fn test_pair_mode_draws_both_categories_without_bias() {
        let mode = DisplayMode::CtlStimPair;
        assert_eq!(mode.viewport_count(), 2);
        assert!(!mode.has_stereo_bias());
        assert_eq!(mode.categories(), [DisplayCategory::Control, DisplayCategory::Stim]);
        assert!(DisplayMode::StimStereo.has_stereo_bias());
    }

    #[test]
    fn test_viewports_split() {
        let single = viewports(1, 800, 600);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].width, 800.0);

        let pair = viewports(2, 801, 600);
        assert_eq!(pair[0].width, 400.0);
        assert_eq!(pair[1].x, 401.0);
        assert!((pair[1].aspect() - 400.0 / 600.0).abs() < 1e-6);
    }
}
