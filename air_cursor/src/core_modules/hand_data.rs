// THEORY:
// `HandData` is the single snapshot that connects the classifier (producer) to the
// pointer controller (consumer). It is overwritten every frame and has no queueing
// semantics: the consumer only ever cares about the latest value.
//
// The channel is a `tokio::sync::watch`, which is exactly a depth-1 "latest wins"
// slot: a publish replaces the whole value under a lock, so a reader can never see
// a torn mix of two frames, and a slow reader simply skips intermediate values.

use serde::Serialize;
use tokio::sync::watch;

/// Interaction state emitted by the gesture classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    /// Hand present (or absent) with no gesture in progress; the pointer follows.
    #[default]
    Idle,
    /// Fast inward index motion seen; waiting to confirm a click.
    PreClick,
    /// Click confirmed this frame.
    Click,
    /// Thumb-index pinch held; the button is held down.
    Drag,
    /// Index and middle fingers extended together; vertical motion scrolls.
    Scroll,
}

impl InteractionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PreClick => "pre_click",
            Self::Click => "click",
            Self::Drag => "drag",
            Self::Scroll => "scroll",
        }
    }

    /// Whether a button should be held while in this state.
    pub fn holds_button(&self) -> bool {
        matches!(self, Self::Click | Self::Drag)
    }

    /// Whether a click is in progress while in this state.
    pub fn is_clicking(&self) -> bool {
        matches!(self, Self::PreClick | Self::Click)
    }
}

impl std::fmt::Display for InteractionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The published per-frame snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandData {
    /// A hand is currently tracked.
    pub is_valid: bool,
    pub status: InteractionState,
    /// Target screen position. Holds the last valid position while `is_valid` is false.
    pub target_x: i32,
    pub target_y: i32,
    /// A button should be held.
    pub is_pressing: bool,
    /// A click is in progress this frame.
    pub clicking: bool,
    /// Signed scroll units; meaningful only when `status` is `Scroll`.
    pub scroll_step: i32,
}

impl HandData {
    /// The snapshot published while no hand is tracked.
    pub fn lost(target: (i32, i32)) -> Self {
        Self {
            is_valid: false,
            status: InteractionState::Idle,
            target_x: target.0,
            target_y: target.1,
            is_pressing: false,
            clicking: false,
            scroll_step: 0,
        }
    }

    /// A tracked-hand snapshot whose flags follow from `status`.
    pub fn tracked(status: InteractionState, target: (i32, i32), scroll_step: i32) -> Self {
        Self {
            is_valid: true,
            status,
            target_x: target.0,
            target_y: target.1,
            is_pressing: status.holds_button(),
            clicking: status.is_clicking(),
            scroll_step: if status == InteractionState::Scroll { scroll_step } else { 0 },
        }
    }

    pub fn target(&self) -> (i32, i32) {
        (self.target_x, self.target_y)
    }
}

/// Creates the shared snapshot cell, seeded with an invalid snapshot at `initial_target`.
pub fn hand_data_channel(initial_target: (i32, i32)) -> (HandDataPublisher, HandDataReader) {
    let (tx, rx) = watch::channel(HandData::lost(initial_target));
    (HandDataPublisher { tx }, HandDataReader { rx })
}

/// Writing half of the snapshot cell. Owned by the producer.
#[derive(Debug)]
pub struct HandDataPublisher {
    tx: watch::Sender<HandData>,
}

impl HandDataPublisher {
    /// Replaces the current snapshot. Succeeds even when no reader is left.
    pub fn publish(&self, data: HandData) {
        self.tx.send_replace(data);
    }

    pub fn latest(&self) -> HandData {
        *self.tx.borrow()
    }

    /// Another reader onto the same cell.
    pub fn reader(&self) -> HandDataReader {
        HandDataReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Reading half of the snapshot cell.
#[derive(Debug, Clone)]
pub struct HandDataReader {
    rx: watch::Receiver<HandData>,
}

impl HandDataReader {
    /// The current snapshot, without marking it seen.
    pub fn latest(&self) -> HandData {
        *self.rx.borrow()
    }

    /// Waits until a snapshot newer than the last one taken is published.
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<HandData> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
