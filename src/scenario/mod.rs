//! Scripted scenario engine for simulated detectors.
//!
//! A scenario is an immutable, ordered list of [`Action`]s parsed from a
//! small JSON script. The [`ScenarioEngine`] walks the list with a mutable
//! execution context (action cursor, per-action frame counter, session
//! frame counter, wait deadlines, a parameter map), synthesizing
//! deterministic frames and injecting scripted errors as it goes.
//!
//! Script shape:
//!
//! ```json
//! {
//!   "name": "example",
//!   "description": "optional",
//!   "actions": [
//!     {"type": "set_state", "state": "ready"},
//!     {"type": "wait", "duration_ms": 50},
//!     {"type": "acquire", "count": 100, "interval_ms": 33},
//!     {"type": "inject_error", "error": "hardware_error", "probability": 0.5},
//!     {"type": "set_parameter", "parameter": "mode", "value": "fast"},
//!     {"type": "calibration"}
//!   ]
//! }
//! ```
//!
//! Unknown action types are skipped at parse time so newer scripts degrade
//! gracefully on older engines. An empty action list is a valid scenario
//! that completes immediately.

pub mod parser;

use crate::types::{unix_timestamp, DetectorState, ErrorCode, ImageFrame};
use bytes::Bytes;
use parser::{parse, Object, ParseError, Value};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Errors loading a scenario script.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The scenario file could not be read.
    #[error("failed to read scenario file {path:?}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The script text is malformed.
    #[error("invalid scenario script: {0}")]
    Parse(#[from] ParseError),
}

/// One step of a scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Pause the walk for a duration. The deadline is armed when the
    /// cursor first reaches the action and never re-armed by polling.
    Wait {
        /// How long to pause.
        duration: Duration,
    },
    /// Move the simulated detector to a state.
    SetState {
        /// Target state.
        state: DetectorState,
    },
    /// Produce `count` frames, one per engine poll.
    Acquire {
        /// Number of frames this action yields.
        count: u32,
        /// Nominal inter-frame interval, advisory for pacing consumers.
        interval: Duration,
    },
    /// Probabilistically inject an error, consuming the action either way.
    InjectError {
        /// Error code to inject.
        error: ErrorCode,
        /// Draw probability in `[0, 1]`; `<= 0` never fires, `>= 1`
        /// always fires.
        probability: f64,
    },
    /// Set a named simulation parameter.
    SetParameter {
        /// Parameter name.
        key: String,
        /// Parameter value.
        value: String,
    },
    /// Run a (simulated) calibration cycle, ending in `Ready`.
    Calibration,
}

/// An immutable parsed scenario.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scenario {
    /// Scenario display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Ordered action list.
    pub actions: Vec<Action>,
}

impl Scenario {
    /// Parse a scenario from script text.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value = parse(text)?;
        Ok(Self::from_value(&value))
    }

    pub(crate) fn from_value(value: &Value) -> Self {
        let Value::Object(obj) = value else {
            return Self::default();
        };
        let mut scenario = Scenario {
            name: obj.get_str("name").unwrap_or_default().to_string(),
            description: obj.get_str("description").unwrap_or_default().to_string(),
            actions: Vec::new(),
        };
        if let Some(Value::Array(actions)) = obj.get("actions") {
            for action in actions {
                if let Value::Object(action) = action {
                    if let Some(action) = Self::action_from_object(action) {
                        scenario.actions.push(action);
                    }
                }
            }
        }
        scenario
    }

    fn action_from_object(obj: &Object) -> Option<Action> {
        match obj.get_str("type")? {
            "wait" => Some(Action::Wait {
                duration: Duration::from_millis(obj.get_u64("duration_ms").unwrap_or(0)),
            }),
            "set_state" => Some(Action::SetState {
                state: DetectorState::parse(obj.get_str("state")?)?,
            }),
            "acquire" => Some(Action::Acquire {
                count: obj.get_u64("count").unwrap_or(1).min(u64::from(u32::MAX)) as u32,
                interval: Duration::from_millis(obj.get_u64("interval_ms").unwrap_or(33)),
            }),
            "inject_error" => Some(Action::InjectError {
                error: ErrorCode::parse(obj.get_str("error")?)?,
                probability: obj.get_f64("probability").unwrap_or(1.0),
            }),
            "set_parameter" => {
                // The script vocabulary keys the name as "parameter";
                // "name" is accepted as an alias.
                let key = obj.get_str("parameter").or_else(|| obj.get_str("name"))?;
                Some(Action::SetParameter {
                    key: key.to_string(),
                    value: obj.get_str("value")?.to_string(),
                })
            }
            "calibration" => Some(Action::Calibration),
            // Unknown action types degrade to a skip.
            _ => None,
        }
    }
}

/// Frame geometry used for synthesized frames.
#[derive(Debug, Clone, Copy)]
struct FrameConfig {
    width: u32,
    height: u32,
    bit_depth: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            bit_depth: 16,
        }
    }
}

struct EngineInner {
    scenario: Scenario,
    running: bool,
    cursor: usize,
    /// Frames produced by the current `Acquire` action.
    frames_in_action: u32,
    /// Session-wide monotonic frame counter.
    total_frames: u64,
    state: DetectorState,
    wait_deadline: Option<Instant>,
    parameters: HashMap<String, String>,
    frame_config: FrameConfig,
}

impl Default for EngineInner {
    fn default() -> Self {
        Self {
            scenario: Scenario::default(),
            running: false,
            cursor: 0,
            frames_in_action: 0,
            total_frames: 0,
            state: DetectorState::Unknown,
            parameters: HashMap::new(),
            wait_deadline: None,
            frame_config: FrameConfig::default(),
        }
    }
}

/// Walks a [`Scenario`], synthesizing frames and errors on demand.
///
/// The engine is pull-driven: consumers poll [`next_error`] and
/// [`next_frame`] in that order, typically from an acquisition worker
/// thread. All state sits behind one lock, so the engine is safe to share.
///
/// [`next_error`]: ScenarioEngine::next_error
/// [`next_frame`]: ScenarioEngine::next_frame
#[derive(Default)]
pub struct ScenarioEngine {
    inner: Mutex<EngineInner>,
}

impl ScenarioEngine {
    /// Create an engine with an empty scenario.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Parse and install a scenario from script text. Stops and resets the
    /// walk.
    pub fn load_scenario(&self, text: &str) -> Result<(), ScenarioError> {
        let scenario = Scenario::parse(text)?;
        self.install_scenario(scenario);
        Ok(())
    }

    /// Load a scenario script from a file.
    pub fn load_scenario_from_file(&self, path: impl AsRef<Path>) -> Result<(), ScenarioError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_scenario(&text)
    }

    /// Install an already-parsed scenario. Stops and resets the walk.
    pub fn install_scenario(&self, scenario: Scenario) {
        let mut inner = self.lock();
        debug!(name = %scenario.name, actions = scenario.actions.len(), "installed scenario");
        inner.scenario = scenario;
        Self::rewind(&mut inner);
        inner.running = false;
    }

    /// Begin (or restart) the walk from the first action.
    pub fn start(&self) {
        let mut inner = self.lock();
        Self::rewind(&mut inner);
        inner.running = true;
    }

    /// Stop the walk, keeping the cursor position.
    pub fn stop(&self) {
        self.lock().running = false;
    }

    /// Stop and rewind to the first action, clearing the parameters set
    /// by earlier `set_parameter` actions.
    pub fn reset(&self) {
        let mut inner = self.lock();
        Self::rewind(&mut inner);
        inner.parameters.clear();
        inner.running = false;
    }

    // Rewinds the whole execution context; the simulated state returns to
    // Idle. Parameters survive a restart and are only cleared by reset.
    fn rewind(inner: &mut EngineInner) {
        inner.cursor = 0;
        inner.frames_in_action = 0;
        inner.total_frames = 0;
        inner.wait_deadline = None;
        inner.state = DetectorState::Idle;
    }

    /// Whether the walk has been started and neither stopped nor
    /// exhausted.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Whether the walk has consumed every action.
    pub fn is_complete(&self) -> bool {
        let inner = self.lock();
        inner.cursor >= inner.scenario.actions.len()
    }

    /// State most recently set by a `set_state` or `calibration` action.
    pub fn current_state(&self) -> DetectorState {
        self.lock().state
    }

    /// Value of a simulation parameter set by a `set_parameter` action.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.lock().parameters.get(name).cloned()
    }

    /// Set a simulation parameter directly.
    pub fn set_parameter(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().parameters.insert(name.into(), value.into());
    }

    /// Set the geometry used for synthesized frames.
    pub fn set_frame_config(&self, width: u32, height: u32, bit_depth: u32) {
        self.lock().frame_config = FrameConfig {
            width,
            height,
            bit_depth,
        };
    }

    /// A copy of the installed scenario.
    pub fn scenario(&self) -> Scenario {
        self.lock().scenario.clone()
    }

    /// If the current action is an error injection, consume it and draw.
    ///
    /// The cursor always advances past an `inject_error` action; the code
    /// is returned only when the probability draw fires. Returns `None`
    /// when the walk is stopped or the current action is not an injection.
    pub fn next_error(&self) -> Option<ErrorCode> {
        let mut inner = self.lock();
        if !inner.running {
            return None;
        }
        let action = inner.scenario.actions.get(inner.cursor)?.clone();
        let Action::InjectError { error, probability } = action else {
            return None;
        };
        inner.cursor += 1;
        if inner.cursor >= inner.scenario.actions.len() {
            inner.running = false;
        }
        let fired = if probability <= 0.0 {
            false
        } else if probability >= 1.0 {
            true
        } else {
            rand::thread_rng().gen::<f64>() < probability
        };
        if fired {
            debug!(error = error.as_str(), "scenario injected error");
            Some(error)
        } else {
            None
        }
    }

    /// Advance the walk and return the next synthesized frame, if the walk
    /// produced one.
    ///
    /// Non-frame actions (state changes, parameters, calibration) are
    /// applied transparently. A pending `wait` returns `None` until its
    /// deadline passes. `inject_error` actions are skipped here; they are
    /// consumed by [`ScenarioEngine::next_error`]. Returns `None` once the
    /// scenario is complete.
    pub fn next_frame(&self) -> Option<ImageFrame> {
        let mut inner = self.lock();
        if !inner.running {
            return None;
        }
        loop {
            let Some(action) = inner.scenario.actions.get(inner.cursor).cloned() else {
                inner.running = false;
                return None;
            };
            match action {
                Action::Wait { duration } => {
                    // Arm the deadline once; polling must not extend it.
                    let deadline = *inner
                        .wait_deadline
                        .get_or_insert_with(|| Instant::now() + duration);
                    if Instant::now() < deadline {
                        return None;
                    }
                    inner.wait_deadline = None;
                    inner.cursor += 1;
                }
                Action::SetState { state } => {
                    inner.state = state;
                    inner.cursor += 1;
                }
                Action::Acquire { count, .. } => {
                    if count == 0 {
                        inner.cursor += 1;
                        continue;
                    }
                    let frame = Self::synthesize(&inner.frame_config, inner.total_frames);
                    inner.total_frames += 1;
                    inner.frames_in_action += 1;
                    if inner.frames_in_action >= count {
                        inner.frames_in_action = 0;
                        inner.cursor += 1;
                        if inner.cursor >= inner.scenario.actions.len() {
                            inner.running = false;
                        }
                    }
                    return Some(frame);
                }
                Action::InjectError { .. } => {
                    // Consumed by next_error; a frame poll steps over it.
                    inner.cursor += 1;
                }
                Action::SetParameter { key, value } => {
                    inner.parameters.insert(key, value);
                    inner.cursor += 1;
                }
                Action::Calibration => {
                    inner.state = DetectorState::Ready;
                    inner.cursor += 1;
                }
            }
        }
    }

    /// Deterministic test pattern, mixed with the frame counter so
    /// consecutive frames differ.
    fn synthesize(config: &FrameConfig, frame_number: u64) -> ImageFrame {
        let w = u64::from(config.width.max(1));
        let h = u64::from(config.height.max(1));
        let mut data;
        if config.bit_depth > 8 {
            data = Vec::with_capacity((w * h * 2) as usize);
            for y in 0..h {
                for x in 0..w {
                    let value =
                        (x * 65535 / w + y * 16384 / h + frame_number * 257) % 65536;
                    data.extend_from_slice(&(value as u16).to_le_bytes());
                }
            }
        } else {
            data = Vec::with_capacity((w * h) as usize);
            for y in 0..h {
                for x in 0..w {
                    let value = (x * 255 / w + y * 64 / h + frame_number * 31) % 256;
                    data.push(value as u8);
                }
            }
        }
        ImageFrame {
            width: config.width,
            height: config.height,
            bit_depth: config.bit_depth,
            frame_number,
            timestamp: unix_timestamp(),
            data: Bytes::from(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(script: &str) -> ScenarioEngine {
        let engine = ScenarioEngine::new();
        engine.load_scenario(script).unwrap();
        engine.set_frame_config(8, 8, 16);
        engine
    }

    const DEFAULT_SCRIPT: &str = r#"{
        "name": "walk",
        "actions": [
            {"type": "set_state", "state": "ready"},
            {"type": "acquire", "count": 100, "interval_ms": 33}
        ]
    }"#;

    #[test]
    fn default_walk_yields_100_distinct_frames() {
        let engine = engine_with(DEFAULT_SCRIPT);
        engine.start();
        let mut frames = Vec::new();
        while let Some(frame) = engine.next_frame() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 100);
        assert!(engine.is_complete());
        assert_eq!(engine.current_state(), DetectorState::Ready);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_number, i as u64);
            assert_eq!(frame.data.len(), 8 * 8 * 2);
        }
        // Consecutive frames carry different pixel data.
        assert_ne!(frames[0].data, frames[1].data);
        // And the walk stays exhausted.
        assert!(engine.next_frame().is_none());
    }

    #[test]
    fn empty_scenario_is_valid_and_completes_immediately() {
        let engine = engine_with(r#"{"name": "empty", "actions": []}"#);
        engine.start();
        assert!(engine.next_frame().is_none());
        assert!(engine.is_complete());
    }

    #[test]
    fn not_running_until_started() {
        let engine = engine_with(DEFAULT_SCRIPT);
        assert!(engine.next_frame().is_none());
        assert!(engine.next_error().is_none());
    }

    #[test]
    fn wait_deadline_is_armed_once() {
        let engine = engine_with(
            r#"{"actions": [
                {"type": "wait", "duration_ms": 50},
                {"type": "acquire", "count": 1}
            ]}"#,
        );
        engine.start();
        let started = Instant::now();
        // Poll aggressively; re-arming on every poll would never elapse.
        let frame = loop {
            if let Some(frame) = engine.next_frame() {
                break frame;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "wait never elapsed");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(frame.frame_number, 0);
    }

    #[test]
    fn probability_bounds_are_deterministic() {
        let never = engine_with(
            r#"{"actions": [{"type": "inject_error", "error": "hardware_error", "probability": 0}]}"#,
        );
        never.start();
        assert_eq!(never.next_error(), None);
        assert!(never.is_complete());

        let always = engine_with(
            r#"{"actions": [{"type": "inject_error", "error": "timeout", "probability": 1}]}"#,
        );
        always.start();
        assert_eq!(always.next_error(), Some(ErrorCode::Timeout));
        assert!(always.is_complete());
    }

    #[test]
    fn frame_poll_steps_over_error_injection() {
        let engine = engine_with(
            r#"{"actions": [
                {"type": "inject_error", "error": "hardware_error", "probability": 1},
                {"type": "acquire", "count": 1}
            ]}"#,
        );
        engine.start();
        assert!(engine.next_frame().is_some());
        // The injection was skipped, not fired.
        assert!(engine.next_error().is_none());
    }

    #[test]
    fn parameters_and_calibration_apply() {
        let engine = engine_with(
            r#"{"actions": [
                {"type": "set_state", "state": "error"},
                {"type": "set_parameter", "name": "mode", "value": "fast"},
                {"type": "calibration"},
                {"type": "acquire", "count": 1}
            ]}"#,
        );
        engine.start();
        assert!(engine.next_frame().is_some());
        assert_eq!(engine.parameter("mode").as_deref(), Some("fast"));
        assert_eq!(engine.parameter("absent"), None);
        assert_eq!(engine.current_state(), DetectorState::Ready);

        engine.set_parameter("mode", "slow");
        assert_eq!(engine.parameter("mode").as_deref(), Some("slow"));
    }

    #[test]
    fn reset_rewinds_frame_numbering() {
        let engine = engine_with(r#"{"actions": [{"type": "acquire", "count": 3}]}"#);
        engine.start();
        assert_eq!(engine.next_frame().unwrap().frame_number, 0);
        assert_eq!(engine.next_frame().unwrap().frame_number, 1);
        engine.reset();
        assert!(engine.next_frame().is_none()); // stopped
        engine.start();
        assert_eq!(engine.next_frame().unwrap().frame_number, 0);
    }

    #[test]
    fn reset_returns_to_idle_and_clears_parameters() {
        let engine = engine_with(
            r#"{"actions": [
                {"type": "set_state", "state": "error"},
                {"type": "set_parameter", "parameter": "mode", "value": "fast"}
            ]}"#,
        );
        engine.start();
        assert!(engine.next_frame().is_none()); // walks the non-frame actions
        assert_eq!(engine.current_state(), DetectorState::Error);
        assert_eq!(engine.parameter("mode").as_deref(), Some("fast"));

        engine.reset();
        assert_eq!(engine.current_state(), DetectorState::Idle);
        assert_eq!(engine.parameter("mode"), None);

        // A restart also rewinds the state, but keeps parameters.
        engine.set_parameter("mode", "slow");
        engine.start();
        assert_eq!(engine.current_state(), DetectorState::Idle);
        assert_eq!(engine.parameter("mode").as_deref(), Some("slow"));
    }

    #[test]
    fn set_parameter_accepts_both_key_spellings() {
        let scenario = Scenario::parse(
            r#"{"actions": [
                {"type": "set_parameter", "parameter": "mode", "value": "fast"},
                {"type": "set_parameter", "name": "gain", "value": "2"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            scenario.actions,
            vec![
                Action::SetParameter {
                    key: "mode".to_string(),
                    value: "fast".to_string()
                },
                Action::SetParameter {
                    key: "gain".to_string(),
                    value: "2".to_string()
                },
            ]
        );
    }

    #[test]
    fn unknown_actions_are_skipped_at_parse() {
        let scenario = Scenario::parse(
            r#"{"actions": [
                {"type": "teleport"},
                {"type": "acquire", "count": 2}
            ]}"#,
        )
        .unwrap();
        assert_eq!(scenario.actions.len(), 1);
    }

    #[test]
    fn eight_bit_frames_have_one_byte_pixels() {
        let engine = engine_with(r#"{"actions": [{"type": "acquire", "count": 1}]}"#);
        engine.set_frame_config(4, 4, 8);
        engine.start();
        let frame = engine.next_frame().unwrap();
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.bit_depth, 8);
    }

    #[test]
    fn load_scenario_from_file_roundtrip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEFAULT_SCRIPT.as_bytes()).unwrap();
        let engine = ScenarioEngine::new();
        engine.load_scenario_from_file(file.path()).unwrap();
        assert_eq!(engine.scenario().name, "walk");
        assert!(engine
            .load_scenario_from_file("/nonexistent/scenario.json")
            .is_err());
    }
}
