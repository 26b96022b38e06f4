//! Movement strategies shared by the server simulation and any client that
//! wants to predict where a snake's head goes next.

use crate::Position;
use serde::{Deserialize, Serialize};

/// How a snake's head advances each tick.
///
/// A snake carries exactly one of these. The variant is swapped wholesale by
/// [`crate::Snake::toggle_movement_strategy`] and never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MovementStrategy {
    #[default]
    Normal,
    /// Covers exactly twice the Normal displacement.
    Boost,
}

impl MovementStrategy {
    /// Returns the strategy matching a snake's `fast` flag.
    pub fn for_fast(fast: bool) -> Self {
        if fast {
            MovementStrategy::Boost
        } else {
            MovementStrategy::Normal
        }
    }

    /// Multiplier applied to the Normal displacement.
    pub fn factor(&self) -> i32 {
        match self {
            MovementStrategy::Normal => 1,
            MovementStrategy::Boost => 2,
        }
    }

    /// Moves `position` along `direction` (degrees, any real value) by `speed`.
    ///
    /// The Normal displacement is rounded per axis to the nearest integer
    /// before the multiplier is applied, so Boost is always exactly twice
    /// Normal. Negative speed moves backwards and zero speed stays put.
    pub fn move_position(&self, position: Position, direction: f64, speed: i32) -> Position {
        let (dx, dy) = displacement(direction, speed);
        let factor = self.factor();
        position.offset(dx * factor, dy * factor)
    }
}

/// Rounded per-axis displacement for one Normal step.
pub fn displacement(direction: f64, speed: i32) -> (i32, i32) {
    let radians = direction.to_radians();
    let speed = speed as f64;
    let dx = (radians.cos() * speed).round();
    let dy = (radians.sin() * speed).round();
    (dx as i32, dy as i32)
}
