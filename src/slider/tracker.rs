//! Slider state tracker
//!
//! Turns raw slider frames into [`SliderMoveEvent`]s. Keeps the last
//! emitted value per slider and only reports a slider again once it has
//! moved past the configured noise threshold.
//!
//! A change in the number of readings (board reconnected, different
//! firmware) resets every slot, so the next frame re-sends every slider.

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::normalize::{normalize_reading, significantly_different};
use super::{NoiseReductionLevel, SliderMoveEvent};

/// Runtime-adjustable tracker settings (replaced on config reload)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackerSettings {
    pub invert_sliders: bool,
    pub noise_reduction: NoiseReductionLevel,
}

#[derive(Debug, Default)]
struct TrackerState {
    last_known_slider_count: usize,
    /// `None` marks a slot that must be emitted on the next frame
    current: Vec<Option<f32>>,
}

/// Per-slider state shared by every frame-processing task
#[derive(Debug, Default)]
pub struct SliderTracker {
    state: Mutex<TrackerState>,
    settings: RwLock<TrackerSettings>,
}

impl SliderTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> TrackerSettings {
        *self.settings.read()
    }

    pub fn update_settings(&self, settings: TrackerSettings) {
        *self.settings.write() = settings;
    }

    /// Number of sliders seen in the most recent frame
    pub fn num_sliders(&self) -> usize {
        self.state.lock().last_known_slider_count
    }

    /// Forget the slider count so the next frame re-syncs every slider
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_known_slider_count = 0;
        state.current.clear();
    }

    /// Process one frame of raw readings
    ///
    /// Returns the move events for this frame in ascending slider order.
    /// Frames processed concurrently serialize on the internal lock.
    pub fn process(&self, readings: &[u16]) -> Vec<SliderMoveEvent> {
        let settings = self.settings();
        let threshold = settings.noise_reduction.threshold();

        let mut state = self.state.lock();

        if readings.len() != state.last_known_slider_count {
            info!(amount = readings.len(), "Detected sliders");
            state.last_known_slider_count = readings.len();
            state.current = vec![None; readings.len()];
        }

        let mut events = Vec::new();

        for (slider_id, &raw) in readings.iter().enumerate() {
            let mut value = normalize_reading(raw);
            if settings.invert_sliders {
                value = 1.0 - value;
            }

            let changed = match state.current[slider_id] {
                None => true,
                Some(current) => significantly_different(current, value, threshold),
            };

            if changed {
                state.current[slider_id] = Some(value);
                let event = SliderMoveEvent {
                    slider_id,
                    percent_value: value,
                };
                debug!(?event, "Slider moved");
                events.push(event);
            }
        }

        events
    }
}
