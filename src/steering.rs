use serde::{Deserialize, Serialize};

use crate::landmarks::HandLandmarks;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// Weight of the newest sample in the moving average
    pub smoothing: f32,
    /// Smoothed differentials within ±deadzone steer straight
    pub deadzone: f32,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.5,
            deadzone: 0.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Steer {
    Left,
    Right,
    Straight,
}

/// Exponential moving average of the left-minus-right wrist height.
///
/// Image `y` grows downwards, so a lowered left hand gives a positive
/// differential and steers left.
pub struct SteeringFilter {
    smoothed: f32,
    config: SteeringConfig,
}

impl SteeringFilter {
    pub fn new(config: SteeringConfig) -> Self {
        Self {
            smoothed: 0.0,
            config,
        }
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }

    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    /// Folds in one raw differential and returns the new smoothed value.
    pub fn push(&mut self, raw: f32) -> f32 {
        let a = self.config.smoothing;
        self.smoothed = self.smoothed * (1.0 - a) + raw * a;
        self.smoothed
    }

    pub fn update(&mut self, left: &HandLandmarks, right: &HandLandmarks) -> Steer {
        self.push(left.wrist().y - right.wrist().y);
        self.decision()
    }

    pub fn decision(&self) -> Steer {
        if self.smoothed > self.config.deadzone {
            Steer::Left
        } else if self.smoothed < -self.config.deadzone {
            Steer::Right
        } else {
            Steer::Straight
        }
    }
}
