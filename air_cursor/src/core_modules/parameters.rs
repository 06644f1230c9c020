// THEORY:
// The `parameters` module is the only place where configuration is parsed and
// checked. Settings arrive loosely typed (a TOML file, a `key=value` string from
// the command line) and leave as a validated `Parameters` value that the rest of
// the engine can trust without re-checking every frame.
//
// Key architectural principles:
// 1.  **Validate Once, At The Boundary**: `Parameters::try_from(Settings)` rejects
//     out-of-range values with an error naming the field. Nothing is clamped or
//     coerced silently.
// 2.  **Live Updates**: The `ParameterStore` publishes `Parameters` through a
//     `watch` channel. Producer and consumer re-read the current value each cycle,
//     so a change takes effect on the next frame without restarting a session.
// 3.  **Derived Views**: The classifier and the pointer controller each get a small
//     `Copy` struct with exactly the numbers they use (`GestureParameters`,
//     `ControllerParameters`).

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::watch;

/// Overscan applied when mapping the cropped camera region onto the screen.
pub const DISPLAY_SCALE: f64 = 1.75;
/// Maximum click threshold (world-space meters) at sensitivity 100.
const CLICK_THRESHOLD_RANGE: f64 = 0.16;
/// `move_tolerance = MOVE_TOLERANCE_BASE - move_sensitivity`, so it never reaches zero.
const MOVE_TOLERANCE_BASE: i32 = 102;
/// Screen height is divided into this many scroll units.
const SCROLL_DIVISIONS: u32 = 120;
/// Upper bounds keep every pixel and scroll product well inside `i32`.
const MAX_SCREEN_DIMENSION: u32 = 16_384;
const MAX_CAMERA_DIMENSION: u32 = 8_192;
const MAX_FPS: u32 = 1_000;
const MAX_SCROLL_SPEED: u32 = 100;

/// Raw, user-facing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub screen_width: u32,
    pub screen_height: u32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub fps: u32,
    pub scroll_speed: u32,
    /// Click depth sensitivity, 1..=100.
    pub click_sensitivity: u32,
    /// Pointer move sensitivity, 0..=100. Higher means a smaller deadzone.
    pub move_sensitivity: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            camera_width: 480,
            camera_height: 270,
            fps: 30,
            scroll_speed: 1,
            click_sensitivity: 50,
            move_sensitivity: 90,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing settings file {}", path.display()))
    }

    /// Sets one field from its string form, e.g. `("fps", "60")`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let slot = match key {
            "screen_width" => &mut self.screen_width,
            "screen_height" => &mut self.screen_height,
            "camera_width" => &mut self.camera_width,
            "camera_height" => &mut self.camera_height,
            "fps" => &mut self.fps,
            "scroll_speed" => &mut self.scroll_speed,
            "click_sensitivity" => &mut self.click_sensitivity,
            "move_sensitivity" => &mut self.move_sensitivity,
            other => bail!("unknown setting `{other}`"),
        };
        *slot = value
            .trim()
            .parse()
            .with_context(|| format!("setting `{key}` expects a non-negative integer, got `{value}`"))?;
        Ok(())
    }

    /// Applies a `key=value` assignment.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<()> {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("expected key=value, got `{assignment}`");
        };
        self.set(key.trim(), value)
    }
}

/// Settings that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    screen_width: u32,
    screen_height: u32,
    camera_width: u32,
    camera_height: u32,
    fps: u32,
    scroll_speed: u32,
    click_sensitivity: u32,
    move_sensitivity: u32,
}

impl TryFrom<Settings> for Parameters {
    type Error = anyhow::Error;

    fn try_from(s: Settings) -> Result<Self> {
        for (name, value, max) in [
            ("screen_width", s.screen_width, MAX_SCREEN_DIMENSION),
            ("screen_height", s.screen_height, MAX_SCREEN_DIMENSION),
            ("camera_width", s.camera_width, MAX_CAMERA_DIMENSION),
            ("camera_height", s.camera_height, MAX_CAMERA_DIMENSION),
            ("fps", s.fps, MAX_FPS),
            ("scroll_speed", s.scroll_speed, MAX_SCROLL_SPEED),
        ] {
            if value == 0 {
                bail!("`{name}` must be positive");
            }
            if value > max {
                bail!("`{name}` must be at most {max}, got {value}");
            }
        }
        if !(1..=100).contains(&s.click_sensitivity) {
            bail!("`click_sensitivity` must be within 1..=100, got {}", s.click_sensitivity);
        }
        if s.move_sensitivity > 100 {
            bail!("`move_sensitivity` must be within 0..=100, got {}", s.move_sensitivity);
        }
        Ok(Self {
            screen_width: s.screen_width,
            screen_height: s.screen_height,
            camera_width: s.camera_width,
            camera_height: s.camera_height,
            fps: s.fps,
            scroll_speed: s.scroll_speed,
            click_sensitivity: s.click_sensitivity,
            move_sensitivity: s.move_sensitivity,
        })
    }
}

impl Default for Parameters {
    fn default() -> Self {
        let s = Settings::default();
        Self {
            screen_width: s.screen_width,
            screen_height: s.screen_height,
            camera_width: s.camera_width,
            camera_height: s.camera_height,
            fps: s.fps,
            scroll_speed: s.scroll_speed,
            click_sensitivity: s.click_sensitivity,
            move_sensitivity: s.move_sensitivity,
        }
    }
}

impl Parameters {
    /// The raw settings these parameters were built from.
    pub fn settings(&self) -> Settings {
        Settings {
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            camera_width: self.camera_width,
            camera_height: self.camera_height,
            fps: self.fps,
            scroll_speed: self.scroll_speed,
            click_sensitivity: self.click_sensitivity,
            move_sensitivity: self.move_sensitivity,
        }
    }

    pub fn click_threshold(&self) -> f64 {
        CLICK_THRESHOLD_RANGE * self.click_sensitivity as f64 / 100.0
    }

    /// Pointer deadzone in pixels. Always in `2..=102`.
    pub fn move_tolerance(&self) -> i32 {
        MOVE_TOLERANCE_BASE - self.move_sensitivity as i32
    }

    pub fn camera_size(&self) -> (u32, u32) {
        (self.camera_width, self.camera_height)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn screen_center(&self) -> (i32, i32) {
        (to_i32(self.screen_width) / 2, to_i32(self.screen_height) / 2)
    }

    pub fn gesture(&self) -> GestureParameters {
        GestureParameters {
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            click_threshold: self.click_threshold(),
            tolerance: self.move_tolerance(),
        }
    }

    pub fn controller(&self) -> ControllerParameters {
        ControllerParameters {
            tolerance: self.move_tolerance(),
            scroll_unit: to_i32((self.screen_height / SCROLL_DIVISIONS).max(1)),
            scroll_speed: to_i32(self.scroll_speed),
        }
    }
}

/// Validated values are bounded far below `i32::MAX`; saturate rather than wrap regardless.
fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// The numbers the gesture classifier reads each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureParameters {
    pub screen_width: u32,
    pub screen_height: u32,
    /// Minimum wrist-to-index depth (meters) for the index finger to count as extended.
    pub click_threshold: f64,
    /// Pointer deadzone in pixels; also pads the target mapping.
    pub tolerance: i32,
}

/// The numbers the pointer controller reads each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerParameters {
    tolerance: i32,
    scroll_unit: i32,
    scroll_speed: i32,
}

impl ControllerParameters {
    pub fn new(tolerance: i32, scroll_unit: i32, scroll_speed: i32) -> Result<Self> {
        if tolerance <= 0 {
            bail!("pointer tolerance must be positive, got {tolerance}");
        }
        if scroll_unit <= 0 || scroll_speed <= 0 {
            bail!("scroll unit and speed must be positive, got {scroll_unit} and {scroll_speed}");
        }
        Ok(Self {
            tolerance,
            scroll_unit,
            scroll_speed,
        })
    }

    pub fn tolerance(&self) -> i32 {
        self.tolerance
    }

    pub fn scroll_unit(&self) -> i32 {
        self.scroll_unit
    }

    pub fn scroll_speed(&self) -> i32 {
        self.scroll_speed
    }
}

impl Default for ControllerParameters {
    fn default() -> Self {
        Parameters::default().controller()
    }
}

/// Live, shareable parameter source.
///
/// Cloning yields another handle onto the same store.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    tx: std::sync::Arc<watch::Sender<Parameters>>,
}

impl ParameterStore {
    pub fn new(parameters: Parameters) -> Self {
        let (tx, _) = watch::channel(parameters);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        Ok(Self::new(Parameters::try_from(settings)?))
    }

    /// The parameters currently in force.
    pub fn current(&self) -> Parameters {
        *self.tx.borrow()
    }

    /// Replaces every setting. On error the previous parameters stay in force.
    pub fn update(&self, settings: Settings) -> Result<()> {
        let parameters = Parameters::try_from(settings)?;
        self.tx.send_replace(parameters);
        tracing::info!(?parameters, "parameters updated");
        Ok(())
    }

    /// Changes a single setting from its string form.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut settings = self.current().settings();
        settings.set(key, value)?;
        self.update(settings)
    }

    /// A receiver that is notified whenever the parameters change.
    pub fn subscribe(&self) -> watch::Receiver<Parameters> {
        self.tx.subscribe()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(Parameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_derive_expected_values() {
        let p = Parameters::default();
        assert!((p.click_threshold() - 0.08).abs() < 1e-12);
        assert_eq!(p.move_tolerance(), 12);
        let c = p.controller();
        assert_eq!(c.tolerance(), 12);
        assert_eq!(c.scroll_unit(), 9);
        assert_eq!(c.scroll_speed(), 1);
        assert_eq!(p.screen_center(), (960, 540));
    }

    #[test]
    fn test_tolerance_never_zero() {
        let mut s = Settings::default();
        s.move_sensitivity = 100;
        assert_eq!(Parameters::try_from(s).unwrap().move_tolerance(), 2);
    }

    #[test]
    fn test_out_of_range_sensitivity_is_rejected() {
        let mut s = Settings::default();
        s.click_sensitivity = 0;
        assert!(Parameters::try_from(s.clone()).is_err());
        s.click_sensitivity = 101;
        assert!(Parameters::try_from(s.clone()).is_err());
        s.click_sensitivity = 50;
        s.move_sensitivity = 101;
        assert!(Parameters::try_from(s).is_err());
    }

    #[test]
    fn test_zero_geometry_is_rejected() {
        let mut s = Settings::default();
        s.screen_height = 0;
        let err = Parameters::try_from(s).unwrap_err();
        assert!(err.to_string().contains("screen_height"), "got {err}");
    }

    #[test]
    fn test_oversized_values_are_rejected() {
        for (key, value) in [
            ("scroll_speed", "300000000"),
            ("scroll_speed", "3000000000"),
            ("screen_width", "16385"),
            ("screen_height", "4294967295"),
            ("camera_width", "8193"),
            ("fps", "1001"),
        ] {
            let mut s = Settings::default();
            s.set(key, value).unwrap();
            let err = Parameters::try_from(s).unwrap_err();
            assert!(err.to_string().contains(key), "{key}={value}: got {err}");
        }
    }

    #[test]
    fn test_largest_accepted_values_stay_positive() {
        let s = Settings {
            screen_width: 16_384,
            screen_height: 16_384,
            scroll_speed: 100,
            ..Settings::default()
        };
        let p = Parameters::try_from(s).unwrap();
        let c = p.controller();
        assert_eq!(c.scroll_speed(), 100);
        assert_eq!(c.scroll_unit(), 136);
        assert_eq!(p.screen_center(), (8_192, 8_192));
        assert!(ControllerParameters::new(c.tolerance(), c.scroll_unit(), c.scroll_speed()).is_ok());
    }

    #[test]
    fn test_set_rejects_non_numeric_and_unknown() {
        let mut s = Settings::default();
        assert!(s.set("fps", "sixty").is_err());
        assert!(s.set("fps", "-3").is_err());
        assert!(s.set("brightness", "3").is_err());
        assert_eq!(s, Settings::default());
        s.set("fps", " 60 ").unwrap();
        assert_eq!(s.fps, 60);
    }

    #[test]
    fn test_apply_assignment() {
        let mut s = Settings::default();
        s.apply_assignment("scroll_speed=3").unwrap();
        assert_eq!(s.scroll_speed, 3);
        assert!(s.apply_assignment("scroll_speed").is_err());
    }

    #[test]
    fn test_store_keeps_previous_value_on_invalid_update() {
        let store = ParameterStore::default();
        store.set("move_sensitivity", "50").unwrap();
        assert_eq!(store.current().move_tolerance(), 52);
        assert!(store.set("move_sensitivity", "500").is_err());
        assert_eq!(store.current().move_tolerance(), 52);
    }

    #[test]
    fn test_store_notifies_subscribers() {
        let store = ParameterStore::default();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());
        store.set("scroll_speed", "4").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().controller().scroll_speed(), 4);
    }

    #[test]
    fn test_controller_parameters_reject_zero_tolerance() {
        assert!(ControllerParameters::new(0, 9, 1).is_err());
        assert!(ControllerParameters::new(12, 0, 1).is_err());
        assert!(ControllerParameters::new(12, 9, 1).is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "screen_width = 2560\nmove_sensitivity = 80").unwrap();
        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.screen_width, 2560);
        assert_eq!(s.move_sensitivity, 80);
        assert_eq!(s.screen_height, 1080);
    }

    #[test]
    fn test_load_rejects_wrong_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fps = \"fast\"").unwrap();
        assert!(Settings::load(file.path()).is_err());
    }
}
