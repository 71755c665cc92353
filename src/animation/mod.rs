//! Spin and twinkle animation state plus the shared timer.

pub mod timer;

pub use timer::{MovieState, TickEvents, TimerCoordinator};

/// Spin speed slider range. The centre is fastest; the sign picks direction.
pub const SPIN_SLIDER_MIN: i32 = -100;
pub const SPIN_SLIDER_MAX: i32 = 100;
pub const MIN_SPIN_FPS: u32 = 3;
pub const MAX_SPIN_FPS: u32 = 60;

/// Map the spin slider to (period ms, direction). Left of centre spins
/// positively.
pub fn spin_from_slider(value: i32) -> (u32, f32) {
    let value = value.clamp(SPIN_SLIDER_MIN, SPIN_SLIDER_MAX) as f64;
    let min = SPIN_SLIDER_MIN as f64;
    let max = SPIN_SLIDER_MAX as f64;
    let mid = (max + min) / 2.0;
    let fps = if value < mid {
        MAX_SPIN_FPS as f64 - MAX_SPIN_FPS as f64 * ((mid - value) / (mid - min))
    } else {
        MAX_SPIN_FPS as f64 * ((max - value) / (max - mid))
    };
    let fps = (fps as u32).max(MIN_SPIN_FPS);
    let period = (1000.0 / fps as f64).floor() as u32;
    let direction = if value < mid { 1.0 } else { -1.0 };
    (period, direction)
}

/// Twinkle slider values are frames per second (sign ignored).
pub fn twinkle_period_from_fps(fps: i32) -> u32 {
    let fps = fps.unsigned_abs().clamp(1, MAX_SPIN_FPS);
    (1000.0 / fps as f64).floor() as u32
}

/// Which time bin is shown and how the spin turns.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    /// 0 is the base colour, 1..=num_bins are time bins.
    pub current_bin: usize,
    pub num_bins: usize,
    /// +1 or -1.
    pub spin_direction: f32,
    /// Manual stepping through bins.
    pub single_step: bool,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            current_bin: 0,
            num_bins: 0,
            spin_direction: -1.0,
            single_step: false,
        }
    }
}

impl AnimationState {
    pub fn new(num_bins: usize) -> Self {
        Self {
            num_bins,
            ..Self::default()
        }
    }

    /// Next bin, cycling through 1..=num_bins and never returning to the base colour.
    pub fn advance_bin(&mut self) -> usize {
        if self.num_bins > 0 {
            self.current_bin += 1;
            if self.current_bin > self.num_bins {
                self.current_bin = 1;
            }
        }
        self.current_bin
    }

    /// Colour cycling switched on or off: start again from the base colour.
    pub fn reset_cycle(&mut self) {
        self.current_bin = 0;
    }

    /// Signed spin step for an unsigned tick step.
    pub fn spin_delta(&self, step: f32) -> f32 {
        self.spin_direction * step
    }
}
