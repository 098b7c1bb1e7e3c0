use serde::{Deserialize, Serialize};

/// Game agent state at one instant: [posX, posY, posZ, speed, rot]
pub type StateVector = [f32; STATE_DIM];

/// Directional intents as 0.0/1.0: [up, down, left, right]
pub type ActionVector = [f32; ACTION_DIM];

pub const STATE_DIM: usize = 5;
pub const ACTION_DIM: usize = 4;

/// Default history length of a training window
pub const SEQ_LEN: usize = 20;

/// Probability above which an output counts as pressed
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Decoded action flags, in the same order as [`ActionVector`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl Action {
    pub fn from_vector(v: &ActionVector) -> Self {
        Self::from_probabilities(v, DECISION_THRESHOLD)
    }

    /// Thresholds four independent probabilities (strictly greater than `threshold`).
    pub fn from_probabilities(p: &[f32; ACTION_DIM], threshold: f32) -> Self {
        Self {
            up: p[0] > threshold,
            down: p[1] > threshold,
            left: p[2] > threshold,
            right: p[3] > threshold,
        }
    }

    pub fn to_vector(self) -> ActionVector {
        let bit = |b: bool| if b { 1.0 } else { 0.0 };
        [bit(self.up), bit(self.down), bit(self.left), bit(self.right)]
    }
}

/// Counts rows whose four thresholded predictions all match the label bits.
///
/// `predictions` and `labels` are row-major `[rows * ACTION_DIM]`.
pub fn exact_match_count(predictions: &[f32], labels: &[f32]) -> usize {
    predictions
        .chunks_exact(ACTION_DIM)
        .zip(labels.chunks_exact(ACTION_DIM))
        .filter(|(p, y)| {
            p.iter()
                .zip(y.iter())
                .all(|(p, y)| (*p > DECISION_THRESHOLD) == (*y > DECISION_THRESHOLD))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_vector_roundtrip_keeps_flags() {
        let action = Action {
            up: true,
            down: false,
            left: false,
            right: true,
        };
        assert_eq!(action.to_vector(), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(Action::from_vector(&action.to_vector()), action);
    }

    #[test]
    fn exact_match_requires_all_four_bits() {
        let preds = [0.9, 0.1, 0.2, 0.7, 0.9, 0.1, 0.6, 0.7];
        let labels = [1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        assert_eq!(exact_match_count(&preds, &labels), 1);
    }

    #[test]
    fn threshold_is_strict() {
        let action = Action::from_probabilities(&[0.5, 0.51, 0.0, 1.0], 0.5);
        assert!(!action.up);
        assert!(action.down);
        assert!(action.right);
    }
}
