//! Deterministic positional jitter for co-located cells.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Seed used for every load so repeated loads place cells identically.
pub const JITTER_SEED: u64 = 33620;

/// Half-width of the uniform jitter range on each axis.
pub const JITTER_RANGE: f32 = 0.2;

/// How repeated locations are jittered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Same (experiment, channel) at the same location reuses its offset.
    PerIdentity,
    /// Every repeat of a location gets a fresh offset (point-only formats).
    EveryRepeat,
}

type Identity = Option<(usize, i32)>;

/// Incrementally built lookup from exact location to per-identity offsets.
pub struct JitterTable {
    policy: JitterPolicy,
    rng: StdRng,
    locations: HashMap<[u64; 3], HashMap<Identity, Vec3>>,
}

impl JitterTable {
    pub fn new(policy: JitterPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
            locations: HashMap::new(),
        }
    }

    /// Offset for a record at `location`. The first record at a location stays put.
    pub fn offset(&mut self, location: [f64; 3], identity: Identity) -> Vec3 {
        let key = location.map(|v| (v + 0.0).to_bits());
        let Some(seen) = self.locations.get_mut(&key) else {
            self.locations
                .entry(key)
                .or_default()
                .insert(identity, Vec3::ZERO);
            return Vec3::ZERO;
        };

        if self.policy == JitterPolicy::PerIdentity {
            if let Some(offset) = seen.get(&identity) {
                return *offset;
            }
        }

        let offset = Vec3::new(
            self.rng.gen_range(-JITTER_RANGE..JITTER_RANGE),
            self.rng.gen_range(-JITTER_RANGE..JITTER_RANGE),
            self.rng.gen_range(-JITTER_RANGE..JITTER_RANGE),
        );
        if self.policy == JitterPolicy::PerIdentity {
            seen.insert(identity, offset);
        }
        offset
    }
}
