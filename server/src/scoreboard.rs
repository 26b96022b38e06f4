//! Leaderboard derived from the live snakes.

use crate::registry::Registry;
use shared::{ScoreEntry, Snake};

/// Scores ordered by length, longest first. Ties keep registry order.
pub fn compute_scores(snakes: &[Snake]) -> Vec<ScoreEntry> {
    let mut scores: Vec<ScoreEntry> = snakes
        .iter()
        .map(|snake| ScoreEntry {
            snake_name: snake.name.clone(),
            length: snake.len(),
        })
        .collect();
    // sort_by is stable
    scores.sort_by(|a, b| b.length.cmp(&a.length));
    scores
}

pub fn scores(registry: &Registry) -> Vec<ScoreEntry> {
    compute_scores(&registry.snapshot().snakes)
}
