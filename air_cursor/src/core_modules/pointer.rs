// THEORY:
// The `pointer` module turns `HandData` snapshots into physical pointer commands.
// It owns the only copy of the pointer's state (where the cursor was last put and
// whether the button is down) and applies its own smoothing, independent of the
// classifier.
//
// Key architectural principles:
// 1.  **Deadzone With Partial Catch-Up**: `move_toward` ignores any gap no larger
//     than the tolerance, and closes larger gaps only up to a tolerance-sized
//     residual. Tremor produces no motion and large moves never overshoot.
// 2.  **Idempotent Button Handling**: Pressing while pressed and releasing while
//     released are no-ops, so the controller can safely see the same snapshot
//     more than once.
// 3.  **Device Seam**: All I/O goes through the `PointerDevice` trait. The engine
//     ships a recording device (tests, replay) and an optional desktop device
//     backed by `enigo`.

use crate::core_modules::hand_data::{HandData, InteractionState};
use crate::core_modules::parameters::ControllerParameters;
use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Pointer buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

/// The pointer-injection primitive.
pub trait PointerDevice {
    /// Current absolute pointer position.
    fn position(&mut self) -> Result<(i32, i32)>;
    fn move_to(&mut self, x: i32, y: i32) -> Result<()>;
    fn press(&mut self, button: PointerButton) -> Result<()>;
    fn release(&mut self, button: PointerButton) -> Result<()>;
    /// A full press and release.
    fn click(&mut self, button: PointerButton) -> Result<()> {
        self.press(button)?;
        self.release(button)
    }
    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()>;
}

/// One command issued to a pointer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PointerCommand {
    MoveTo { x: i32, y: i32 },
    Press { button: PointerButton },
    Release { button: PointerButton },
    Scroll { dx: i32, dy: i32 },
}

/// A device that records every command instead of touching the desktop.
///
/// Clones share one command log, so a test can keep a handle while the
/// controller owns the device.
#[derive(Debug, Clone, Default)]
pub struct RecordingPointer {
    position: (i32, i32),
    log: Arc<Mutex<Vec<PointerCommand>>>,
}

impl RecordingPointer {
    pub fn new(position: (i32, i32)) -> Self {
        Self {
            position,
            log: Arc::default(),
        }
    }

    /// The commands recorded so far.
    pub fn commands(&self) -> Vec<PointerCommand> {
        self.log.lock().unwrap().clone()
    }

    /// Removes and returns the commands recorded so far.
    pub fn take_commands(&self) -> Vec<PointerCommand> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    fn record(&self, command: PointerCommand) {
        self.log.lock().unwrap().push(command);
    }
}

impl PointerDevice for RecordingPointer {
    fn position(&mut self) -> Result<(i32, i32)> {
        Ok(self.position)
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        self.position = (x, y);
        self.record(PointerCommand::MoveTo { x, y });
        Ok(())
    }

    fn press(&mut self, button: PointerButton) -> Result<()> {
        self.record(PointerCommand::Press { button });
        Ok(())
    }

    fn release(&mut self, button: PointerButton) -> Result<()> {
        self.record(PointerCommand::Release { button });
        Ok(())
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.record(PointerCommand::Scroll { dx, dy });
        Ok(())
    }
}

/// A device that only logs, for dry runs.
#[derive(Debug, Clone, Default)]
pub struct LoggingPointer {
    position: (i32, i32),
}

impl LoggingPointer {
    pub fn new(position: (i32, i32)) -> Self {
        Self { position }
    }
}

impl PointerDevice for LoggingPointer {
    fn position(&mut self) -> Result<(i32, i32)> {
        Ok(self.position)
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        self.position = (x, y);
        info!(x, y, "pointer move");
        Ok(())
    }

    fn press(&mut self, button: PointerButton) -> Result<()> {
        info!(?button, "pointer press");
        Ok(())
    }

    fn release(&mut self, button: PointerButton) -> Result<()> {
        info!(?button, "pointer release");
        Ok(())
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        info!(dx, dy, "pointer scroll");
        Ok(())
    }
}

#[cfg(feature = "desktop")]
pub use desktop::EnigoPointer;

#[cfg(feature = "desktop")]
mod desktop {
    use super::{PointerButton, PointerDevice};
    use anyhow::{Result, anyhow};
    use enigo::{Axis, Button, Coordinate, Direction, Enigo, Mouse, Settings};

    /// The real desktop pointer.
    pub struct EnigoPointer {
        enigo: Enigo,
    }

    impl EnigoPointer {
        pub fn new() -> Result<Self> {
            let enigo = Enigo::new(&Settings::default()).map_err(|e| anyhow!("failed to connect to the desktop pointer: {e:?}"))?;
            Ok(Self { enigo })
        }
    }

    fn button(button: PointerButton) -> Button {
        match button {
            PointerButton::Left => Button::Left,
            PointerButton::Right => Button::Right,
            PointerButton::Middle => Button::Middle,
        }
    }

    impl PointerDevice for EnigoPointer {
        fn position(&mut self) -> Result<(i32, i32)> {
            self.enigo.location().map_err(|e| anyhow!("{e:?}"))
        }

        fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
            self.enigo.move_mouse(x, y, Coordinate::Abs).map_err(|e| anyhow!("{e:?}"))
        }

        fn press(&mut self, b: PointerButton) -> Result<()> {
            self.enigo.button(button(b), Direction::Press).map_err(|e| anyhow!("{e:?}"))
        }

        fn release(&mut self, b: PointerButton) -> Result<()> {
            self.enigo.button(button(b), Direction::Release).map_err(|e| anyhow!("{e:?}"))
        }

        fn click(&mut self, b: PointerButton) -> Result<()> {
            self.enigo.button(button(b), Direction::Click).map_err(|e| anyhow!("{e:?}"))
        }

        fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
            if dx != 0 {
                self.enigo.scroll(dx, Axis::Horizontal).map_err(|e| anyhow!("{e:?}"))?;
            }
            if dy != 0 {
                self.enigo.scroll(dy, Axis::Vertical).map_err(|e| anyhow!("{e:?}"))?;
            }
            Ok(())
        }
    }
}

/// State owned solely by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub current_x: i32,
    pub current_y: i32,
    /// Mirrors the actual button state.
    pub is_pressing: bool,
}

/// Drives a `PointerDevice` from classifier snapshots.
pub struct PointerController<D: PointerDevice> {
    device: D,
    state: ControllerState,
    params: ControllerParameters,
}

impl<D: PointerDevice> PointerController<D> {
    /// Creates a controller starting from the device's current pointer position.
    pub fn new(mut device: D, params: ControllerParameters) -> Result<Self> {
        let (current_x, current_y) = device.position()?;
        Ok(Self {
            device,
            state: ControllerState {
                current_x,
                current_y,
                is_pressing: false,
            },
            params,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn update_parameters(&mut self, params: ControllerParameters) {
        self.params = params;
    }

    /// Moves toward the target, leaving a tolerance-sized gap on each axis.
    pub fn move_toward(&mut self, target_x: i32, target_y: i32) -> Result<()> {
        let tolerance = self.params.tolerance();
        let next_x = self.state.current_x + catch_up(target_x - self.state.current_x, tolerance);
        let next_y = self.state.current_y + catch_up(target_y - self.state.current_y, tolerance);
        if (next_x, next_y) != (self.state.current_x, self.state.current_y) {
            self.device.move_to(next_x, next_y)?;
            self.state.current_x = next_x;
            self.state.current_y = next_y;
        }
        Ok(())
    }

    /// `true` issues a single click pulse and marks the button pressed;
    /// `false` releases a pressed button. Both are no-ops when already in that state.
    pub fn set_pressing(&mut self, pressing: bool) -> Result<()> {
        match (pressing, self.state.is_pressing) {
            (true, false) => {
                self.device.click(PointerButton::Left)?;
                self.state.is_pressing = true;
                debug!("click");
            }
            (false, true) => {
                self.device.release(PointerButton::Left)?;
                self.state.is_pressing = false;
                debug!("release");
            }
            _ => {}
        }
        Ok(())
    }

    /// Presses and holds the button until the next `set_pressing(false)`.
    pub fn begin_drag(&mut self) -> Result<()> {
        if !self.state.is_pressing {
            self.device.press(PointerButton::Left)?;
            self.state.is_pressing = true;
            debug!("drag start");
        }
        Ok(())
    }

    /// Scrolls by `step` scroll units.
    pub fn scroll_by(&mut self, step: i32) -> Result<()> {
        let amount = step
            .saturating_mul(self.params.scroll_unit())
            .saturating_mul(self.params.scroll_speed());
        if amount != 0 {
            self.device.scroll(0, amount)?;
        }
        Ok(())
    }

    /// Releases any held button. Used whenever tracking or the session ends.
    pub fn release(&mut self) -> Result<()> {
        self.set_pressing(false)
    }

    /// Applies one snapshot.
    pub fn apply(&mut self, hand: &HandData) -> Result<()> {
        if !hand.is_valid {
            return self.release();
        }
        match hand.status {
            InteractionState::Drag => {
                self.begin_drag()?;
                self.move_toward(hand.target_x, hand.target_y)
            }
            InteractionState::Scroll => {
                self.scroll_by(hand.scroll_step)?;
                self.move_toward(hand.target_x, hand.target_y)
            }
            // Hold still while a click is being confirmed.
            InteractionState::PreClick => self.set_pressing(false),
            InteractionState::Click => self.set_pressing(true),
            InteractionState::Idle => {
                self.set_pressing(false)?;
                if !self.state.is_pressing {
                    self.move_toward(hand.target_x, hand.target_y)?;
                }
                Ok(())
            }
        }
    }
}

/// Signed distance to travel along one axis.
fn catch_up(gap: i32, tolerance: i32) -> i32 {
    if gap.abs() > tolerance {
        gap - gap.signum() * tolerance
    } else {
        0
    }
}
