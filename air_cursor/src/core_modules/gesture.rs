// THEORY:
// The `gesture` module is the classifier at the heart of the engine. It turns one
// `HandObservation` plus a little retained memory into one `HandData` snapshot.
// It does no I/O and knows nothing about threads, so every transition can be
// driven frame by frame from a test.
//
// Key architectural principles:
// 1.  **Geometry First**: Each frame is reduced to a handful of boolean cues
//     (`GestureCues`): is the hand pinching, are two fingers extended together, is
//     the index finger extended, is the fingertip moving fast toward the camera,
//     is a click cooldown running.
// 2.  **Explicit Transition Function**: `next_state` maps
//     `(previous_state, cues, coasting)` to the next `InteractionState` in a fixed
//     priority order. Output flags (`is_pressing`, `clicking`) follow from the
//     state alone.
// 3.  **Momentum Lives Here**: Scroll momentum and the click cooldown are part of
//     the retained state. A frame without a hand freezes the published position
//     and leaves momentum, cooldown and depth history untouched, so a one-frame
//     tracking drop does not erase a gesture in flight.
//
// All threshold tests are strict (`>` and `<`). A value sitting exactly on a
// threshold never triggers.

use crate::core_modules::hand_data::{HandData, InteractionState};
use crate::core_modules::observation::{HandLandmarks, HandObservation};
use crate::core_modules::parameters::{DISPLAY_SCALE, GestureParameters};
use tracing::{debug, trace};

/// Minimum inward fingertip speed (`delta_z` units per frame) that counts as a press.
pub const DELTA_Z_THRESHOLD: f64 = 1.0;
/// Pixels of vertical hand travel per scroll step.
pub const SCROLL_UNIT: f64 = (1440 / 120) as f64;
/// Squared wrist-to-index distance (m²) above which the index finger is extended.
pub const EXTENDED_DISTANCE_THRESHOLD: f64 = 0.034;
/// Per-axis fingertip gap (m) below which two fingertips touch.
pub const CLOSE_DISTANCE_THRESHOLD: f64 = 0.008;
/// Frames after a click during which no new gesture is recognized.
pub const COOLDOWN_FRAMES: u32 = 5;
/// Per-frame decay of scroll momentum once the scroll gesture is released.
pub const SCROLL_DECAY: f64 = 0.98;

const CROP_X: f64 = 0.25;
const CROP_Y: f64 = 0.2;
const CROP_GAIN: f64 = 2.0;

/// Boolean summary of one frame's hand geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GestureCues {
    /// A click cooldown is still running.
    pub cooldown_active: bool,
    /// Thumb and index tips touch while the index is not folded into the palm.
    pub pinch: bool,
    /// Index extended with the middle finger alongside it.
    pub two_finger_extended: bool,
    /// Index finger extended and pushed forward past the click threshold.
    pub index_extended: bool,
    /// Fingertip moving toward the camera faster than `DELTA_Z_THRESHOLD`.
    pub inward_motion: bool,
}

/// Maps the previous state and this frame's cues to the next state.
///
/// `coasting` tells whether scroll momentum is still large enough to produce a
/// non-zero step; it only matters when leaving `Scroll`.
pub fn next_state(previous: InteractionState, cues: &GestureCues, coasting: bool) -> InteractionState {
    use InteractionState::*;

    if cues.cooldown_active {
        return Idle;
    }
    if cues.pinch {
        return Drag;
    }
    if cues.two_finger_extended {
        return Scroll;
    }
    match previous {
        Scroll if coasting => Scroll,
        Scroll => Idle,
        PreClick if cues.index_extended => Click,
        PreClick if cues.inward_motion => PreClick,
        PreClick => Idle,
        _ if cues.inward_motion => PreClick,
        _ => Idle,
    }
}

/// Maps a normalized index-tip position to screen coordinates.
///
/// The usable image region starts at 25% of the width and 20% of the height and is
/// stretched by `DISPLAY_SCALE` so the whole screen is reachable without moving the
/// hand to the edge of the camera's view.
pub fn map_to_screen(x: f64, y: f64, params: &GestureParameters) -> (i32, i32) {
    let norm_x = crop(x, CROP_X);
    let norm_y = crop(y, CROP_Y);
    let tolerance = params.tolerance as f64;
    let span_x = params.screen_width as f64 * DISPLAY_SCALE + tolerance;
    let span_y = params.screen_height as f64 * DISPLAY_SCALE - tolerance;
    (
        (norm_x * span_x).round() as i32 - params.tolerance,
        (norm_y * span_y).round() as i32 - params.tolerance,
    )
}

fn crop(value: f64, offset: f64) -> f64 {
    if value > offset {
        (CROP_GAIN * (value - offset)).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn scroll_step(delta: f64) -> i32 {
    (delta / SCROLL_UNIT).round() as i32
}

/// Per-frame gesture classifier with retained memory.
#[derive(Debug, Clone)]
pub struct GestureStateMachine {
    /// `index.z - wrist.z` from the previous hand frame; `None` until a hand is seen.
    previous_depth_difference: Option<f64>,
    click_cooldown_frames: u32,
    /// Last same-direction scroll delta, in screen pixels.
    scroll_smoother: f64,
    previous_status: InteractionState,
    last_valid_target: (i32, i32),
}

impl GestureStateMachine {
    /// Creates a classifier whose pointer target starts at `initial_target`.
    pub fn new(initial_target: (i32, i32)) -> Self {
        Self {
            previous_depth_difference: None,
            click_cooldown_frames: 0,
            scroll_smoother: 0.0,
            previous_status: InteractionState::Idle,
            last_valid_target: initial_target,
        }
    }

    pub fn previous_status(&self) -> InteractionState {
        self.previous_status
    }

    pub fn last_valid_target(&self) -> (i32, i32) {
        self.last_valid_target
    }

    pub fn scroll_momentum(&self) -> f64 {
        self.scroll_smoother
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.click_cooldown_frames
    }

    /// Classifies one observation and returns the snapshot to publish.
    pub fn classify(&mut self, observation: &HandObservation, params: &GestureParameters) -> HandData {
        match observation {
            HandObservation::NoHand => {
                self.previous_status = InteractionState::Idle;
                HandData::lost(self.last_valid_target)
            }
            HandObservation::Hand(hand) => self.classify_hand(hand, params),
        }
    }

    fn classify_hand(&mut self, hand: &HandLandmarks, params: &GestureParameters) -> HandData {
        let target = map_to_screen(hand.normalized_index_tip.x, hand.normalized_index_tip.y, params);

        let wrist = &hand.world_wrist;
        let index = &hand.world_index_tip;
        let thumb = &hand.world_thumb_tip;
        let middle = &hand.world_middle_tip;

        let depth_difference = index.z - wrist.z;
        let previous_depth = self.previous_depth_difference.unwrap_or(depth_difference);
        let delta_z = 100.0 * (previous_depth - depth_difference);
        self.previous_depth_difference = Some(depth_difference);

        let index_distance_sq = index.distance_sq(wrist);
        let index_extended =
            index_distance_sq > EXTENDED_DISTANCE_THRESHOLD && (wrist.z - index.z) > params.click_threshold;
        let thumb_index_close = (index.x - thumb.x).abs() < CLOSE_DISTANCE_THRESHOLD
            && (index.y - thumb.y).abs() < CLOSE_DISTANCE_THRESHOLD;
        let index_middle_close = (index.x - middle.x).abs() < 4.0 * CLOSE_DISTANCE_THRESHOLD
            && (index.y - middle.y).abs() < 6.0 * CLOSE_DISTANCE_THRESHOLD;

        let cues = GestureCues {
            cooldown_active: self.click_cooldown_frames > 0,
            pinch: thumb_index_close && index_distance_sq > 0.2 * EXTENDED_DISTANCE_THRESHOLD,
            two_finger_extended: index_extended && index_middle_close,
            index_extended,
            inward_motion: delta_z > DELTA_Z_THRESHOLD,
        };

        // Momentum after this frame's decay, should the scroll gesture have ended.
        let coasting_momentum = self.scroll_smoother * SCROLL_DECAY;
        let coasting = scroll_step(coasting_momentum) != 0;

        let status = next_state(self.previous_status, &cues, coasting);
        trace!(?cues, delta_z, index_distance_sq, %status, "classified hand frame");

        let mut step = 0;
        if cues.cooldown_active {
            self.click_cooldown_frames -= 1;
        } else if status == InteractionState::Scroll && cues.two_finger_extended {
            let scroll_delta = (target.1 - self.last_valid_target.1) as f64;
            step = scroll_step(scroll_delta);
            // Momentum only ever holds the latest delta in the current direction.
            self.scroll_smoother = if scroll_delta == 0.0 || self.scroll_smoother * scroll_delta < 0.0 {
                0.0
            } else {
                scroll_delta
            };
        } else if self.previous_status == InteractionState::Scroll && !cues.pinch && !cues.two_finger_extended {
            self.scroll_smoother = coasting_momentum;
            step = scroll_step(self.scroll_smoother);
        } else if status == InteractionState::Click {
            self.click_cooldown_frames = COOLDOWN_FRAMES;
        }

        if status != self.previous_status {
            debug!(from = %self.previous_status, to = %status, x = target.0, y = target.1, "gesture transition");
        }

        self.previous_status = status;
        self.last_valid_target = target;
        HandData::tracked(status, target, step)
    }
}
