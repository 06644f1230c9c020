// THEORY:
// The `observation` module is the input boundary of the engine. Everything the
// classifier knows about the user's hand arrives through a `HandObservation`:
// either nothing (the detector found no hand in this frame) or the handful of
// landmarks the gesture logic actually reads.
//
// Key architectural principles:
// 1.  **Absence Is Data**: A frame without a hand is an ordinary observation,
//     not an error. The classifier has a dedicated branch for it.
// 2.  **Two Coordinate Spaces**: The index fingertip is delivered in normalized
//     image space (`[0,1]`, origin top-left) and drives the pointer position.
//     The wrist, thumb, index and middle tips are delivered in world space
//     (meters, hand-relative) and drive every shape test, because world space
//     does not change with the hand's distance from the camera.
// 3.  **Detector Wire Format**: Detectors speak the MediaPipe layout (21 landmarks
//     per hand, image and world sets side by side). `DetectionFrame` mirrors that
//     layout so a detector process can print its raw result as one JSON line, and
//     `DetectionFrame::into_observation` picks out the landmarks we need.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// MediaPipe hand landmark indices used by the gesture classifier.
pub mod landmarks {
    pub const WRIST: usize = 0;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_FINGER_TIP: usize = 8;
    pub const MIDDLE_FINGER_TIP: usize = 12;
    /// Landmarks per detected hand.
    pub const COUNT: usize = 21;
}

/// A single landmark position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Landmark {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared 3-D euclidean distance to `other`.
    pub fn distance_sq(&self, other: &Landmark) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)
    }
}

/// The landmarks of one tracked hand, as consumed by the gesture classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandLandmarks {
    /// Index fingertip in normalized image coordinates.
    pub normalized_index_tip: Landmark,
    /// Wrist in world coordinates (meters).
    pub world_wrist: Landmark,
    /// Thumb tip in world coordinates (meters).
    pub world_thumb_tip: Landmark,
    /// Index fingertip in world coordinates (meters).
    pub world_index_tip: Landmark,
    /// Middle fingertip in world coordinates (meters).
    pub world_middle_tip: Landmark,
}

/// One frame's worth of hand data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandObservation {
    /// The detector found no hand in this frame.
    NoHand,
    Hand(HandLandmarks),
}

impl From<Option<HandLandmarks>> for HandObservation {
    fn from(value: Option<HandLandmarks>) -> Self {
        match value {
            Some(hand) => HandObservation::Hand(hand),
            None => HandObservation::NoHand,
        }
    }
}

/// An observation stamped with the detector's frame timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedObservation {
    pub timestamp_ms: u64,
    pub observation: HandObservation,
}

/// One detected hand in detector wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedHand {
    /// Normalized image-space landmarks.
    pub landmarks: Vec<Landmark>,
    /// World-space landmarks (meters, hand-relative).
    pub world_landmarks: Vec<Landmark>,
}

/// One detector result in wire format: zero or more hands for a single frame.
///
/// Only the first hand is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub hands: Vec<DetectedHand>,
}

impl DetectionFrame {
    /// Converts the frame into the classifier's view of it.
    ///
    /// Fails when the first hand carries fewer landmarks than the MediaPipe layout,
    /// which means the detector is not speaking the format we expect.
    pub fn into_observation(self) -> Result<TimedObservation> {
        let observation = match self.hands.first() {
            None => HandObservation::NoHand,
            Some(hand) => {
                if hand.landmarks.len() < landmarks::COUNT || hand.world_landmarks.len() < landmarks::COUNT {
                    bail!(
                        "frame {}: expected {} image and world landmarks, got {} and {}",
                        self.timestamp_ms,
                        landmarks::COUNT,
                        hand.landmarks.len(),
                        hand.world_landmarks.len()
                    );
                }
                HandObservation::Hand(HandLandmarks {
                    normalized_index_tip: hand.landmarks[landmarks::INDEX_FINGER_TIP],
                    world_wrist: hand.world_landmarks[landmarks::WRIST],
                    world_thumb_tip: hand.world_landmarks[landmarks::THUMB_TIP],
                    world_index_tip: hand.world_landmarks[landmarks::INDEX_FINGER_TIP],
                    world_middle_tip: hand.world_landmarks[landmarks::MIDDLE_FINGER_TIP],
                })
            }
        };
        Ok(TimedObservation {
            timestamp_ms: self.timestamp_ms,
            observation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_hand() -> DetectedHand {
        let landmarks = (0..landmarks::COUNT)
            .map(|i| Landmark::new(i as f64 / 100.0, 0.5, 0.0))
            .collect();
        let world_landmarks = (0..landmarks::COUNT)
            .map(|i| Landmark::new(0.0, 0.0, -(i as f64) / 1000.0))
            .collect();
        DetectedHand {
            landmarks,
            world_landmarks,
        }
    }

    #[test]
    fn test_empty_frame_is_no_hand() {
        let frame = DetectionFrame {
            timestamp_ms: 7,
            hands: Vec::new(),
        };
        let timed = frame.into_observation().unwrap();
        assert_eq!(timed.timestamp_ms, 7);
        assert_eq!(timed.observation, HandObservation::NoHand);
    }

    #[test]
    fn test_first_hand_landmarks_are_picked_by_index() {
        let frame = DetectionFrame {
            timestamp_ms: 33,
            hands: vec![full_hand()],
        };
        let HandObservation::Hand(hand) = frame.into_observation().unwrap().observation else {
            panic!("expected a hand");
        };
        assert_eq!(hand.normalized_index_tip.x, 0.08);
        assert_eq!(hand.world_wrist.z, 0.0);
        assert_eq!(hand.world_thumb_tip.z, -0.004);
        assert_eq!(hand.world_index_tip.z, -0.008);
        assert_eq!(hand.world_middle_tip.z, -0.012);
    }

    #[test]
    fn test_truncated_hand_is_rejected() {
        let mut hand = full_hand();
        hand.world_landmarks.truncate(5);
        let frame = DetectionFrame {
            timestamp_ms: 1,
            hands: vec![hand],
        };
        assert!(frame.into_observation().is_err());
    }

    #[test]
    fn test_wire_format_parses_without_hands_key() {
        let frame: DetectionFrame = serde_json::from_str(r#"{"timestamp_ms": 12}"#).unwrap();
        assert!(frame.hands.is_empty());
    }

    #[test]
    fn test_distance_sq() {
        let a = Landmark::new(0.0, 0.0, 0.0);
        let b = Landmark::new(0.1, 0.2, 0.2);
        assert!((a.distance_sq(&b) - 0.09).abs() < 1e-12);
    }
}
