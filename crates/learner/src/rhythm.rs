//! Per-file revisit rhythm: EWMA mean and variance of the gap, in turns,
//! between successive activations.  The predictor uses this to tell when a
//! file is "due" again.

use serde::{Deserialize, Serialize};

const ALPHA: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rhythm {
    pub mean: f64,
    pub var: f64,
    pub last_turn: u64,
}

impl Rhythm {
    pub fn first_activation(turn: u64) -> Self {
        Self { mean: 0.0, var: 0.0, last_turn: turn }
    }

    /// Fold in the gap since the previous activation, then move the anchor.
    pub fn activate(&mut self, turn: u64) {
        let gap = turn.saturating_sub(self.last_turn) as f64;
        if self.mean == 0.0 && self.var == 0.0 {
            self.mean = gap;
        } else {
            let delta = gap - self.mean;
            self.mean += ALPHA * delta;
            self.var = (1.0 - ALPHA) * (self.var + ALPHA * delta * delta);
        }
        self.last_turn = turn;
    }

    /// A file is due when at least its mean gap has elapsed since the last
    /// activation.
    pub fn is_due(&self, turn: u64) -> bool {
        self.mean > 0.0 && (turn.saturating_sub(self.last_turn) as f64) >= self.mean
    }
}
