//! Slider state: move events, noise reduction and normalization

pub mod normalize;
pub mod tracker;

use serde::{Deserialize, Serialize};

pub use tracker::{SliderTracker, TrackerSettings};

/// A single detected slider move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderMoveEvent {
    /// 0-based slider index
    pub slider_id: usize,
    /// Normalized volume scalar in `[0.0, 1.0]`
    pub percent_value: f32,
}

/// How far a reading must move before it counts as a real slider move
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseReductionLevel {
    /// Most responsive, lets more jitter through
    Low,
    #[default]
    Default,
    /// Strongest jitter suppression
    High,
}

impl NoiseReductionLevel {
    /// Minimum absolute change between two normalized values
    pub fn threshold(&self) -> f32 {
        match self {
            NoiseReductionLevel::Low => 0.015,
            NoiseReductionLevel::Default => 0.025,
            NoiseReductionLevel::High => 0.035,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ordering() {
        assert!(NoiseReductionLevel::Low.threshold() < NoiseReductionLevel::Default.threshold());
        assert!(NoiseReductionLevel::Default.threshold() < NoiseReductionLevel::High.threshold());
    }

    #[test]
    fn test_deserialize_level() {
        let level: NoiseReductionLevel = serde_yaml::from_str("high").unwrap();
        assert_eq!(level, NoiseReductionLevel::High);
    }
}
