// THEORY:
// The `pipeline` module is the top-level synchronous API for the engine. It wires
// the gesture classifier directly to a pointer controller, so each observation is
// classified and applied before the next one is read. There is no snapshot cell
// in between and nothing is ever skipped, which makes runs reproducible: the
// replay tool and the tests drive the engine through this type.

use crate::core_modules::gesture::GestureStateMachine;
use crate::core_modules::pointer::PointerController;
use anyhow::Result;
use tracing::warn;

// Re-export key data structures for the public API.
pub use crate::core_modules::hand_data::{HandData, InteractionState};
pub use crate::core_modules::observation::{DetectionFrame, HandLandmarks, HandObservation, Landmark, TimedObservation};
pub use crate::core_modules::parameters::{ParameterStore, Parameters, Settings};
pub use crate::core_modules::pointer::{PointerButton, PointerCommand, PointerDevice, RecordingPointer};

/// Classifier and controller in lock step.
pub struct GesturePipeline<D: PointerDevice> {
    classifier: GestureStateMachine,
    controller: PointerController<D>,
    parameters: Parameters,
    last_timestamp_ms: Option<u64>,
    frames_processed: u64,
    frames_dropped: u64,
}

impl<D: PointerDevice> GesturePipeline<D> {
    pub fn new(parameters: Parameters, device: D) -> Result<Self> {
        let controller = PointerController::new(device, parameters.controller())?;
        Ok(Self {
            classifier: GestureStateMachine::new(parameters.screen_center()),
            controller,
            parameters,
            last_timestamp_ms: None,
            frames_processed: 0,
            frames_dropped: 0,
        })
    }

    /// Classifies one observation and applies the resulting snapshot.
    pub fn process(&mut self, observation: &HandObservation) -> Result<HandData> {
        let hand = self.classifier.classify(observation, &self.parameters.gesture());
        self.controller.apply(&hand)?;
        self.frames_processed += 1;
        Ok(hand)
    }

    /// Like `process`, but drops frames older than the last one seen.
    ///
    /// Returns `Ok(None)` for a dropped frame.
    pub fn process_timed(&mut self, timed: &TimedObservation) -> Result<Option<HandData>> {
        if self.last_timestamp_ms.is_some_and(|last| timed.timestamp_ms < last) {
            warn!(
                timestamp_ms = timed.timestamp_ms,
                last_timestamp_ms = self.last_timestamp_ms,
                "dropping out-of-order observation"
            );
            self.frames_dropped += 1;
            return Ok(None);
        }
        self.last_timestamp_ms = Some(timed.timestamp_ms);
        self.process(&timed.observation).map(Some)
    }

    /// Takes effect from the next observation.
    pub fn set_parameters(&mut self, parameters: Parameters) {
        self.controller.update_parameters(parameters.controller());
        self.parameters = parameters;
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn classifier(&self) -> &GestureStateMachine {
        &self.classifier
    }

    pub fn controller(&self) -> &PointerController<D> {
        &self.controller
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Releases any held button and hands back the device.
    pub fn finish(mut self) -> Result<D> {
        self.controller.release()?;
        Ok(self.controller.into_device())
    }
}
