//! One periodic tick drives both spin and twinkle.
//!
//! The faster event fires on every tick and the slower one counts down
//! `round(longer / shorter)` ticks. While a movie records, the tick runs at
//! the movie frame period and every tick captures a frame.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Highest effective frame rate.
pub const MAX_FPS: f64 = 60.0;
/// Movies are saved at no less than this rate.
pub const MOVIE_MIN_FPS: f64 = 24.0;
/// Below this tick period missed deadlines switch to running flat out.
const SPEEDUP_THRESHOLD_MS: u32 = 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MovieState {
    #[default]
    Off,
    Paused,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Countdown {
    remaining: u32,
    refresh: u32,
    movie_refresh: u32,
}

impl Countdown {
    fn new(refresh: u32, movie_refresh: u32, recording: bool) -> Self {
        let mut countdown = Self {
            remaining: 0,
            refresh: refresh.max(1),
            movie_refresh: movie_refresh.max(1),
        };
        countdown.remaining = countdown.interval(recording);
        countdown
    }

    /// Count one tick; true when the event fires.
    fn tick(&mut self, recording: bool) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = if recording { self.movie_refresh } else { self.refresh };
            true
        } else {
            false
        }
    }

    fn interval(&self, recording: bool) -> u32 {
        if recording {
            self.movie_refresh
        } else {
            self.refresh
        }
    }
}

/// What one tick asks the scene to do.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickEvents {
    pub spin: bool,
    pub twinkle: bool,
    pub capture_frame: bool,
    /// Spin angle step in degrees (unsigned) when `spin` is set.
    pub spin_step: f32,
}

#[derive(Debug, Clone)]
pub struct TimerCoordinator {
    spin_period_ms: u32,
    twinkle_period_ms: u32,
    spin_on: bool,
    twinkle_on: bool,
    movie: MovieState,

    spin: Option<Countdown>,
    twinkle: Option<Countdown>,
    active_period_ms: u32,
    movie_period_ms: f64,
    frames_per_sec: f64,
    running: bool,

    speedup: bool,
    last_tick: Option<Instant>,
    movie_frames: u64,
    saved: (bool, bool),
}

impl TimerCoordinator {
    pub fn new(spin_period_ms: u32, twinkle_period_ms: u32) -> Self {
        let mut coordinator = Self {
            spin_period_ms: spin_period_ms.max(1),
            twinkle_period_ms: twinkle_period_ms.max(1),
            spin_on: false,
            twinkle_on: false,
            movie: MovieState::Off,
            spin: None,
            twinkle: None,
            active_period_ms: spin_period_ms.max(1),
            movie_period_ms: 0.0,
            frames_per_sec: 0.0,
            running: false,
            speedup: false,
            last_tick: None,
            movie_frames: 0,
            saved: (false, false),
        };
        coordinator.reconfigure();
        coordinator
    }

    fn recording(&self) -> bool {
        self.movie == MovieState::On
    }

    /// Recompute the tick period and countdowns from the current state.
    fn reconfigure(&mut self) {
        let shortest = self.spin_period_ms.min(self.twinkle_period_ms) as f64;
        if shortest >= 1000.0 / MOVIE_MIN_FPS {
            self.movie_period_ms = (1000.0 / MOVIE_MIN_FPS).floor();
            self.frames_per_sec = (1000.0 / self.movie_period_ms).floor();
        } else {
            self.movie_period_ms = shortest;
            self.frames_per_sec = 1000.0 / shortest;
        }
        self.frames_per_sec = self.frames_per_sec.min(MAX_FPS);

        let spin = self.spin_period_ms as f64;
        let twinkle = self.twinkle_period_ms as f64;
        let twinkle_movie_ticks = if self.frames_per_sec <= MOVIE_MIN_FPS {
            Some(((twinkle / self.movie_period_ms).round() as u32).max(1))
        } else {
            None
        };

        // Spin advances on every movie frame, its step scaled by elapsed time.
        let recording = self.recording();
        self.running = true;
        match (self.spin_on, self.twinkle_on) {
            (true, false) => {
                self.spin = Some(Countdown::new(1, 1, recording));
                self.twinkle = None;
                self.active_period_ms = self.spin_period_ms;
            }
            (false, true) => {
                self.spin = None;
                self.twinkle = Some(Countdown::new(
                    1,
                    twinkle_movie_ticks.unwrap_or(1),
                    recording,
                ));
                self.active_period_ms = self.twinkle_period_ms;
            }
            (false, false) => {
                self.spin = None;
                self.twinkle = None;
                // Keeps ticking while recording so static stretches still get frames.
                self.running = recording;
            }
            (true, true) if spin >= twinkle => {
                let ticks = ((spin / twinkle).round() as u32).max(1);
                self.spin = Some(Countdown::new(ticks, 1, recording));
                self.twinkle = Some(Countdown::new(
                    1,
                    twinkle_movie_ticks.unwrap_or(1),
                    recording,
                ));
                self.active_period_ms = self.twinkle_period_ms;
            }
            (true, true) => {
                let ticks = ((twinkle / spin).round() as u32).max(1);
                self.spin = Some(Countdown::new(1, 1, recording));
                self.twinkle = Some(Countdown::new(
                    ticks,
                    twinkle_movie_ticks.unwrap_or(ticks),
                    recording,
                ));
                self.active_period_ms = self.spin_period_ms;
            }
        }
        self.speedup = false;

        log::debug!(
            "Timer reconfigured: spin {} ({} ms), twinkle {} ({} ms), tick {:?}, movie {:.1} fps",
            self.spin_on,
            self.spin_period_ms,
            self.twinkle_on,
            self.twinkle_period_ms,
            self.interval(),
            self.frames_per_sec
        );
    }

    pub fn set_spin(&mut self, on: bool) {
        self.spin_on = on;
        self.reconfigure();
    }

    pub fn set_twinkle(&mut self, on: bool) {
        self.twinkle_on = on;
        self.reconfigure();
    }

    pub fn set_spin_period(&mut self, ms: u32) {
        self.spin_period_ms = ms.max(1);
        self.reconfigure();
    }

    pub fn set_twinkle_period(&mut self, ms: u32) {
        self.twinkle_period_ms = ms.max(1);
        self.reconfigure();
    }

    pub fn set_movie_state(&mut self, state: MovieState) {
        if state == MovieState::On && self.movie == MovieState::Off {
            self.movie_frames = 0;
        }
        self.movie = state;
        self.reconfigure();
    }

    pub fn spin_on(&self) -> bool {
        self.spin_on
    }

    pub fn twinkle_on(&self) -> bool {
        self.twinkle_on
    }

    pub fn spin_period_ms(&self) -> u32 {
        self.spin_period_ms
    }

    pub fn twinkle_period_ms(&self) -> u32 {
        self.twinkle_period_ms
    }

    pub fn movie_state(&self) -> MovieState {
        self.movie
    }

    pub fn frames_per_sec(&self) -> f64 {
        self.frames_per_sec
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seconds of movie recorded so far.
    pub fn movie_seconds(&self) -> f64 {
        if self.frames_per_sec > 0.0 {
            self.movie_frames as f64 / self.frames_per_sec
        } else {
            0.0
        }
    }

    /// Time until the next tick, or `None` when stopped.
    pub fn interval(&self) -> Option<Duration> {
        if !self.running {
            None
        } else if self.speedup {
            Some(Duration::ZERO)
        } else if self.recording() {
            Some(Duration::from_millis(self.movie_period_ms.round() as u64))
        } else {
            Some(Duration::from_millis(self.active_period_ms as u64))
        }
    }

    /// Stop both events, remembering which were on. Pausing twice without
    /// `resume` overwrites the remembered state.
    pub fn pause(&mut self) {
        self.saved = (self.spin_on, self.twinkle_on);
        self.spin_on = false;
        self.twinkle_on = false;
        self.reconfigure();
    }

    pub fn resume(&mut self) {
        (self.spin_on, self.twinkle_on) = self.saved;
        self.reconfigure();
    }

    fn spin_step(&self, countdown: &Countdown) -> f32 {
        let elapsed_ms = if self.recording() {
            self.movie_period_ms * countdown.interval(true) as f64
        } else {
            self.active_period_ms as f64 * countdown.interval(false) as f64
        };
        (elapsed_ms / self.spin_period_ms as f64) as f32
    }

    /// Advance one tick at `now`.
    pub fn tick(&mut self, now: Instant) -> TickEvents {
        if !self.running {
            return TickEvents::default();
        }

        if !self.recording() {
            if let Some(last) = self.last_tick {
                let waited = now.saturating_duration_since(last);
                if waited > Duration::from_millis(self.active_period_ms as u64) {
                    if self.active_period_ms < SPEEDUP_THRESHOLD_MS && !self.speedup {
                        log::debug!("Missed tick after {:?}, running flat out", waited);
                        self.speedup = true;
                    }
                } else if self.speedup {
                    log::debug!("Caught up, back to {} ms ticks", self.active_period_ms);
                    self.speedup = false;
                }
            }
        }
        self.last_tick = Some(now);

        let recording = self.recording();
        let mut events = TickEvents::default();
        if let Some(mut countdown) = self.spin {
            events.spin = countdown.tick(recording);
            if events.spin {
                events.spin_step = self.spin_step(&countdown);
            }
            self.spin = Some(countdown);
        }
        if let Some(countdown) = self.twinkle.as_mut() {
            events.twinkle = countdown.tick(recording);
        }
        if recording {
            events.capture_frame = true;
            self.movie_frames += 1;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(timer: &mut TimerCoordinator, ticks: usize) -> (usize, usize) {
        let start = Instant::now();
        let mut spins = 0;
        let mut twinkles = 0;
        for i in 0..ticks {
            let period = timer.interval().unwrap_or_default();
            let events = timer.tick(start + period * i as u32);
            spins += events.spin as usize;
            twinkles += events.twinkle as usize;
        }
        (spins, twinkles)
    }

    #[test]
    fn test_twinkle_every_fourth_spin() {
        let mut timer = TimerCoordinator::new(100, 400);
        timer.set_spin(true);
        timer.set_twinkle(true);
        assert_eq!(timer.interval(), Some(Duration::from_millis(100)));
        assert_eq!(run(&mut timer, 16), (16, 4));
    }

    #[test]
    fn test_spin_every_fourth_twinkle() {
        let mut timer = TimerCoordinator::new(400, 100);
        timer.set_spin(true);
        timer.set_twinkle(true);
        assert_eq!(timer.interval(), Some(Duration::from_millis(100)));
        assert_eq!(run(&mut timer, 16), (4, 16));
    }

    #[test]
    fn test_ratio_rounds() {
        let mut timer = TimerCoordinator::new(100, 260);
        timer.set_spin(true);
        timer.set_twinkle(true);
        assert_eq!(run(&mut timer, 9), (9, 3));
    }

    #[test]
    fn test_spin_speed_independent_of_driver() {
        let mut slow = TimerCoordinator::new(400, 100);
        slow.set_spin(true);
        slow.set_twinkle(true);
        let mut alone = TimerCoordinator::new(400, 100);
        alone.set_spin(true);

        let step_both = (0..4).map(|_| slow.tick(Instant::now()).spin_step).sum::<f32>();
        let step_alone = alone.tick(Instant::now()).spin_step;
        assert!((step_both - step_alone).abs() < 1e-6);
        assert!((step_alone - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_idle_timer_stops_unless_recording() {
        let mut timer = TimerCoordinator::new(50, 50);
        assert!(!timer.is_running());
        assert_eq!(timer.interval(), None);
        assert_eq!(timer.tick(Instant::now()), TickEvents::default());

        timer.set_movie_state(MovieState::On);
        assert!(timer.is_running());
        let events = timer.tick(Instant::now());
        assert!(events.capture_frame);
        assert!(!events.spin && !events.twinkle);
    }

    #[test]
    fn test_movie_rate() {
        let timer = TimerCoordinator::new(100, 200);
        assert_eq!(timer.frames_per_sec(), 24.0);

        let fast = TimerCoordinator::new(20, 200);
        assert_eq!(fast.frames_per_sec(), 50.0);

        let fastest = TimerCoordinator::new(10, 10);
        assert_eq!(fastest.frames_per_sec(), MAX_FPS);
    }

    #[test]
    fn test_recording_ticks_at_movie_period() {
        let mut timer = TimerCoordinator::new(100, 400);
        timer.set_spin(true);
        timer.set_movie_state(MovieState::On);
        assert_eq!(timer.interval(), Some(Duration::from_millis(41)));
        let events = timer.tick(Instant::now());
        assert!(events.spin && events.capture_frame);
        assert!((events.spin_step - 0.41).abs() < 1e-5);
    }

    #[test]
    fn test_recording_twinkle_follows_movie_rate_when_spin_faster() {
        let mut timer = TimerCoordinator::new(100, 400);
        timer.set_spin(true);
        timer.set_twinkle(true);
        timer.set_movie_state(MovieState::On);
        // 400 ms twinkle over 41 ms movie frames: every 10th frame.
        assert_eq!(run(&mut timer, 120), (120, 12));
    }

    #[test]
    fn test_recording_twinkle_follows_movie_rate_when_twinkle_faster() {
        let mut timer = TimerCoordinator::new(400, 200);
        timer.set_spin(true);
        timer.set_twinkle(true);
        timer.set_movie_state(MovieState::On);
        assert_eq!(timer.interval(), Some(Duration::from_millis(41)));

        let start = Instant::now();
        let mut twinkles = 0;
        let mut degrees = 0.0;
        for i in 0..120u32 {
            let events = timer.tick(start + Duration::from_millis(41) * i);
            twinkles += events.twinkle as usize;
            if events.spin {
                degrees += events.spin_step;
            }
        }
        // 200 ms twinkle over 41 ms frames: every 5th frame.
        assert_eq!(twinkles, 24);
        // 120 frames of 41 ms at one step per 400 ms.
        assert!((degrees - 12.3).abs() < 1e-3);
    }

    #[test]
    fn test_leaving_movie_restores_live_ratio() {
        let mut timer = TimerCoordinator::new(400, 200);
        timer.set_spin(true);
        timer.set_twinkle(true);
        timer.set_movie_state(MovieState::On);
        timer.set_movie_state(MovieState::Off);
        assert_eq!(timer.interval(), Some(Duration::from_millis(200)));
        assert_eq!(run(&mut timer, 8), (4, 8));
    }

    #[test]
    fn test_pause_resume_restores_events() {
        let mut timer = TimerCoordinator::new(100, 400);
        timer.set_spin(true);
        timer.set_twinkle(true);
        timer.pause();
        assert!(!timer.spin_on() && !timer.twinkle_on());
        assert!(!timer.is_running());
        timer.resume();
        assert!(timer.spin_on() && timer.twinkle_on());
        assert_eq!(run(&mut timer, 8), (8, 2));
    }

    #[test]
    fn test_missed_deadline_speeds_up() {
        let mut timer = TimerCoordinator::new(20, 400);
        timer.set_spin(true);
        let start = Instant::now();
        timer.tick(start);
        timer.tick(start + Duration::from_millis(60));
        assert_eq!(timer.interval(), Some(Duration::ZERO));
        timer.tick(start + Duration::from_millis(61));
        assert_eq!(timer.interval(), Some(Duration::from_millis(20)));
    }
}
