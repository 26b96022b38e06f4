//! Process-wide random source for spawn colors and positions.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Field, Position};
use std::sync::{Mutex, OnceLock, PoisonError};

static INSTANCE: OnceLock<RandomGenerator> = OnceLock::new();

/// Attempts made to find an unoccupied cell before settling for any cell.
const FREE_POSITION_ATTEMPTS: usize = 64;

pub struct RandomGenerator {
    inner: Mutex<Inner>,
}

struct Inner {
    rng: StdRng,
    last_color: Option<u32>,
}

impl RandomGenerator {
    fn new() -> Self {
        debug!("Random generator initialized");
        Self {
            inner: Mutex::new(Inner {
                rng: StdRng::from_entropy(),
                last_color: None,
            }),
        }
    }

    /// The single shared generator, created on first use.
    pub fn instance() -> &'static RandomGenerator {
        INSTANCE.get_or_init(RandomGenerator::new)
    }

    /// Returns a `#RRGGBB` color that differs from the previous call's.
    pub fn random_color(&self) -> String {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut value = inner.rng.gen_range(0..0x0100_0000u32);
        while Some(value) == inner.last_color {
            value = inner.rng.gen_range(0..0x0100_0000u32);
        }
        inner.last_color = Some(value);
        format!("#{:06X}", value)
    }

    pub fn random_position(&self, field: Field) -> Position {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Position::new(
            inner.rng.gen_range(0..field.width.max(1)),
            inner.rng.gen_range(0..field.height.max(1)),
        )
    }

    /// Picks a position `is_taken` reports free, falling back to the last
    /// candidate when the field looks full.
    pub fn random_free_position(
        &self,
        field: Field,
        is_taken: impl Fn(Position) -> bool,
    ) -> Position {
        let mut candidate = self.random_position(field);
        for _ in 1..FREE_POSITION_ATTEMPTS {
            if !is_taken(candidate) {
                return candidate;
            }
            candidate = self.random_position(field);
        }
        candidate
    }
}
