//! Headless input source standing in for a player

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::InputMask;

const MIN_HOLD_TICKS: u32 = 10;
const MAX_HOLD_TICKS: u32 = 60;
const DEFAULT_FIRE_CHANCE: f64 = 0.01;

/// Holds a random direction for a random number of ticks, then picks another.
/// Seeded, so a given seed always replays the same script.
pub struct InputManager {
    rng: StdRng,
    current: InputMask,
    remaining_ticks: u32,
    fire_chance: f64,
}

impl InputManager {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: InputMask::NONE,
            remaining_ticks: 0,
            fire_chance: DEFAULT_FIRE_CHANCE,
        }
    }

    pub fn with_fire_chance(mut self, chance: f64) -> Self {
        self.fire_chance = chance.clamp(0.0, 1.0);
        self
    }

    /// Returns the mask for this tick. FIRE is only ever set for a single tick.
    pub fn update(&mut self) -> InputMask {
        if self.remaining_ticks == 0 {
            self.current = self.pick_direction();
            self.remaining_ticks = self.rng.gen_range(MIN_HOLD_TICKS..=MAX_HOLD_TICKS);
        }
        self.remaining_ticks -= 1;

        let mut mask = self.current;
        if self.rng.gen_bool(self.fire_chance) {
            mask.insert(InputMask::FIRE);
        }
        mask
    }

    pub fn current_direction(&self) -> InputMask {
        self.current
    }

    fn pick_direction(&mut self) -> InputMask {
        let horizontal = match self.rng.gen_range(0..3) {
            0 => InputMask::LEFT,
            1 => InputMask::RIGHT,
            _ => InputMask::NONE,
        };
        let vertical = match self.rng.gen_range(0..3) {
            0 => InputMask::UP,
            1 => InputMask::DOWN,
            _ => InputMask::NONE,
        };
        horizontal | vertical
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(0)
    }
}
