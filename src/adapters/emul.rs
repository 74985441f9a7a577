//! The simulation adapter.
//!
//! [`EmulDetector`] implements the full detector contract against a
//! [`ScenarioEngine`] instead of hardware: frames, state changes, and
//! injected errors all come from a script. It is the reference
//! implementation of the contract, the test double for hosts, and the
//! adapter behind the `uxdi-adapter-emul` module.
//!
//! ## Configuration
//!
//! The factory configuration string selects the scenario:
//!
//! - empty — the built-in default scenario (ready + 100 frames),
//! - `file://<path>` — a scenario script file,
//! - `{"scenario_file": "<path>"}` — same, JSON-wrapped,
//! - `{"scenario": {...}}` — an inline scenario object,
//! - any other JSON object — treated as a raw scenario object.
//!
//! A scenario that fails to load falls back to the default; if even the
//! default cannot be installed the detector enters `Error` with an
//! `InvalidParameter` last error.
//!
//! Synchronous pulls ride the streaming path: a pull starts continuous
//! acquisition when none is running and consumes copies of the streamed
//! frames, so listeners observe pulled frames like any others.

use crate::detector::{BlockingAcquisition, Detector, DetectorListener};
use crate::plugin::export::AdapterFactory;
use crate::scenario::parser::{parse, Value};
use crate::scenario::{Scenario, ScenarioEngine};
use crate::types::{
    unix_timestamp, AcquisitionParams, DetectorInfo, DetectorState, ErrorCode, ErrorInfo,
    ImageFrame,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Scenario used when the configuration does not name one.
const DEFAULT_SCENARIO: &str = r#"{
    "name": "Default Emulator Scenario",
    "description": "Simple frame generation for emulator",
    "actions": [
        {"type": "set_state", "state": "ready"},
        {"type": "acquire", "count": 100, "interval_ms": 33}
    ]
}"#;

/// Poll period of the acquisition worker and the synchronous path.
const POLL_PERIOD: Duration = Duration::from_millis(10);

/// Scenario-driven simulated detector.
pub struct EmulDetector {
    shared: Arc<EmulShared>,
    sync: Arc<EmulBlocking>,
}

struct EmulShared {
    engine: ScenarioEngine,
    config: String,
    info: DetectorInfo,
    state: AtomicU32,
    initialized: AtomicBool,
    acquiring: AtomicBool,
    params: Mutex<AcquisitionParams>,
    listener: Mutex<Option<Arc<dyn DetectorListener>>>,
    last_error: Mutex<ErrorInfo>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes lifecycle transitions (initialize, shutdown, start,
    /// stop) so concurrent callers cannot interleave check and act.
    lifecycle: Mutex<()>,
    sync_frames: SyncChannel,
}

impl EmulDetector {
    /// Create a detector with the given factory configuration string. The
    /// scenario itself is loaded during [`Detector::initialize`].
    pub fn new(config: &str) -> Self {
        let info = DetectorInfo {
            vendor: "UXDI".to_string(),
            model: "EMUL-001".to_string(),
            serial_number: format!("EMUL-{}", unix_timestamp() as u64),
            firmware_version: "1.0.0".to_string(),
            max_width: 4096,
            max_height: 4096,
            bit_depth: 16,
        };
        let shared = Arc::new(EmulShared {
            engine: ScenarioEngine::new(),
            config: config.to_string(),
            info,
            state: AtomicU32::new(DetectorState::Idle as u32),
            initialized: AtomicBool::new(false),
            acquiring: AtomicBool::new(false),
            params: Mutex::new(AcquisitionParams::default()),
            listener: Mutex::new(None),
            last_error: Mutex::new(ErrorInfo::none()),
            worker: Mutex::new(None),
            lifecycle: Mutex::new(()),
            sync_frames: SyncChannel::new(),
        });
        Self {
            sync: Arc::new(EmulBlocking {
                shared: shared.clone(),
                cancelled: AtomicBool::new(false),
            }),
            shared,
        }
    }

    /// The scenario engine driving this detector, for tests and scripted
    /// hosts.
    pub fn engine(&self) -> &ScenarioEngine {
        &self.shared.engine
    }
}

impl EmulShared {
    fn lifecycle_guard(&self) -> MutexGuard<'_, ()> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state(&self) -> DetectorState {
        DetectorState::from_raw(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: DetectorState) {
        let previous = self.state.swap(state as u32, Ordering::SeqCst);
        if previous != state as u32 {
            debug!(state = %state, "emul state change");
            if let Some(listener) = self.listener() {
                listener.on_state_changed(state);
            }
        }
    }

    fn listener(&self) -> Option<Arc<dyn DetectorListener>> {
        match self.listener.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_error(&self, error: ErrorInfo) {
        match self.last_error.lock() {
            Ok(mut guard) => *guard = error,
            Err(poisoned) => *poisoned.into_inner() = error,
        }
    }

    fn fail(&self, code: ErrorCode, message: &str) -> bool {
        self.set_error(ErrorInfo::new(code, message));
        false
    }

    /// Resolve the configuration string to a scenario.
    fn load_configured_scenario(&self) -> Result<(), ()> {
        let config = self.config.trim();
        let result = if config.is_empty() {
            self.engine.load_scenario(DEFAULT_SCENARIO).map_err(|_| ())
        } else if let Some(path) = config.strip_prefix("file://") {
            self.engine.load_scenario_from_file(path).map_err(|_| ())
        } else {
            match parse(config) {
                Ok(Value::Object(obj)) => {
                    if let Some(path) = obj.get_str("scenario_file") {
                        self.engine.load_scenario_from_file(path).map_err(|_| ())
                    } else if let Some(inline) = obj.get("scenario") {
                        self.engine.install_scenario(Scenario::from_value(inline));
                        Ok(())
                    } else {
                        // A raw scenario object.
                        self.engine
                            .install_scenario(Scenario::from_value(&Value::Object(obj)));
                        Ok(())
                    }
                }
                _ => Err(()),
            }
        };
        if result.is_err() && !config.is_empty() {
            warn!(config, "scenario configuration rejected, falling back to default");
            return self.engine.load_scenario(DEFAULT_SCENARIO).map_err(|_| ());
        }
        result
    }

    fn apply_frame_config(&self) {
        let params = match self.params.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        self.engine
            .set_frame_config(params.width, params.height, self.info.bit_depth);
    }

    fn initialize(&self) -> bool {
        let _lifecycle = self.lifecycle_guard();
        if self.initialized.load(Ordering::SeqCst) {
            return self.fail(ErrorCode::AlreadyInitialized, "detector is already initialized");
        }
        self.set_state(DetectorState::Initializing);
        if self.load_configured_scenario().is_err() {
            self.set_state(DetectorState::Error);
            return self.fail(
                ErrorCode::InvalidParameter,
                "no usable scenario could be loaded",
            );
        }
        self.apply_frame_config();
        self.initialized.store(true, Ordering::SeqCst);
        self.set_state(DetectorState::Ready);
        true
    }

    fn shutdown(&self) -> bool {
        let _lifecycle = self.lifecycle_guard();
        if self.acquiring.load(Ordering::SeqCst) {
            self.stop_acquisition_locked();
        }
        self.reap_worker();
        self.engine.reset();
        self.initialized.store(false, Ordering::SeqCst);
        self.set_state(DetectorState::Idle);
        true
    }

    fn set_acquisition_params(&self, params: &AcquisitionParams) -> bool {
        if self.acquiring.load(Ordering::SeqCst) {
            return self.fail(
                ErrorCode::StateError,
                "cannot change parameters while acquiring",
            );
        }
        if let Err(error) = params.validate(&self.info) {
            // The active parameters stay untouched on rejection.
            self.set_error(error);
            return false;
        }
        match self.params.lock() {
            Ok(mut guard) => *guard = *params,
            Err(poisoned) => *poisoned.into_inner() = *params,
        }
        self.apply_frame_config();
        true
    }

    fn acquisition_params(&self) -> AcquisitionParams {
        match self.params.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn start_acquisition(self: &Arc<Self>) -> bool {
        let _lifecycle = self.lifecycle_guard();
        if !self.initialized.load(Ordering::SeqCst) {
            return self.fail(ErrorCode::NotInitialized, "detector is not initialized");
        }
        if self.state() != DetectorState::Ready {
            return self.fail(
                ErrorCode::StateError,
                "acquisition requires the READY state",
            );
        }
        self.reap_worker();
        self.engine.start();
        self.acquiring.store(true, Ordering::SeqCst);
        self.set_state(DetectorState::Acquiring);
        if let Some(listener) = self.listener() {
            listener.on_acquisition_started();
        }
        let shared = self.clone();
        let handle = std::thread::spawn(move || shared.acquisition_loop());
        match self.worker.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        true
    }

    /// Body of the acquisition worker thread.
    fn acquisition_loop(&self) {
        while self.acquiring.load(Ordering::SeqCst) {
            if let Some(code) = self.engine.next_error() {
                let error = ErrorInfo::new(code, "scenario injected an error")
                    .with_details(format!("error code: {}", code.as_str()));
                self.set_error(error.clone());
                self.acquiring.store(false, Ordering::SeqCst);
                self.set_state(DetectorState::Error);
                if let Some(listener) = self.listener() {
                    listener.on_error(&error);
                    listener.on_acquisition_stopped();
                }
                self.sync_frames.wake_all();
                return;
            }
            if let Some(frame) = self.engine.next_frame() {
                self.sync_frames.offer(&frame);
                if let Some(listener) = self.listener() {
                    listener.on_image(frame.as_view());
                }
                continue;
            }
            if self.engine.is_complete() {
                break;
            }
            std::thread::sleep(POLL_PERIOD);
        }
        // Natural completion; an external stop performs its own
        // transition after joining this thread.
        if self.acquiring.swap(false, Ordering::SeqCst) {
            self.set_state(DetectorState::Ready);
            if let Some(listener) = self.listener() {
                listener.on_acquisition_stopped();
            }
        }
        self.sync_frames.wake_all();
    }

    fn stop_acquisition(&self) -> bool {
        let _lifecycle = self.lifecycle_guard();
        self.stop_acquisition_locked()
    }

    /// Caller holds the lifecycle lock.
    fn stop_acquisition_locked(&self) -> bool {
        if !self.acquiring.swap(false, Ordering::SeqCst) {
            // Idempotent; still reap a worker that finished on its own.
            self.reap_worker();
            return true;
        }
        self.set_state(DetectorState::Stopping);
        self.engine.stop();
        self.reap_worker();
        self.sync_frames.wake_all();
        self.set_state(DetectorState::Ready);
        if let Some(listener) = self.listener() {
            listener.on_acquisition_stopped();
        }
        true
    }

    /// Join the worker thread. Called with no other locks held, after
    /// `acquiring` has been cleared, so the worker cannot be waiting on
    /// us.
    fn reap_worker(&self) {
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn last_error(&self) -> ErrorInfo {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Detector for EmulDetector {
    fn initialize(&self) -> bool {
        self.shared.initialize()
    }

    fn shutdown(&self) -> bool {
        self.shared.shutdown()
    }

    fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    fn info(&self) -> DetectorInfo {
        self.shared.info.clone()
    }

    fn state(&self) -> DetectorState {
        self.shared.state()
    }

    fn set_acquisition_params(&self, params: &AcquisitionParams) -> bool {
        self.shared.set_acquisition_params(params)
    }

    fn acquisition_params(&self) -> AcquisitionParams {
        self.shared.acquisition_params()
    }

    fn set_listener(&self, listener: Option<Arc<dyn DetectorListener>>) {
        match self.shared.listener.lock() {
            Ok(mut guard) => *guard = listener,
            Err(poisoned) => *poisoned.into_inner() = listener,
        }
    }

    fn listener(&self) -> Option<Arc<dyn DetectorListener>> {
        self.shared.listener()
    }

    fn start_acquisition(&self) -> bool {
        self.shared.start_acquisition()
    }

    fn stop_acquisition(&self) -> bool {
        self.shared.stop_acquisition()
    }

    fn is_acquiring(&self) -> bool {
        self.shared.acquiring.load(Ordering::SeqCst)
    }

    fn blocking(&self) -> Arc<dyn BlockingAcquisition> {
        self.sync.clone()
    }

    fn last_error(&self) -> ErrorInfo {
        self.shared.last_error()
    }

    fn clear_error(&self) {
        self.shared.set_error(ErrorInfo::none());
    }
}

impl Drop for EmulDetector {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl AdapterFactory for EmulDetector {
    fn from_config(config: &str) -> Option<Self> {
        Some(Self::new(config))
    }
}

// =============================================================================
// Synchronous acquisition
// =============================================================================

/// Upper bound on frames parked for synchronous pulls. The stream can
/// outpace a slow puller; the oldest parked frame is dropped first.
const SYNC_QUEUE_LIMIT: usize = 64;

/// Hand-off point between the acquisition worker and synchronous pulls.
/// Frames are parked only while at least one puller is registered.
struct SyncChannel {
    waiters: AtomicUsize,
    queue: Mutex<VecDeque<ImageFrame>>,
    available: Condvar,
}

impl SyncChannel {
    fn new() -> Self {
        Self {
            waiters: AtomicUsize::new(0),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn queue_guard(&self) -> MutexGuard<'_, VecDeque<ImageFrame>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Park a copy of a streamed frame if anyone is waiting for one.
    fn offer(&self, frame: &ImageFrame) {
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        let mut queue = self.queue_guard();
        if queue.len() >= SYNC_QUEUE_LIMIT {
            queue.pop_front();
        }
        queue.push_back(frame.clone());
        self.available.notify_all();
    }

    /// Wake pullers so they can observe that the stream ended.
    fn wake_all(&self) {
        self.available.notify_all();
    }
}

/// Registration of a synchronous puller. Parked frames are discarded when
/// the last puller leaves, so a later session never sees stale frames.
struct SyncWaiter<'a>(&'a SyncChannel);

impl<'a> SyncWaiter<'a> {
    fn register(channel: &'a SyncChannel) -> Self {
        channel.waiters.fetch_add(1, Ordering::SeqCst);
        Self(channel)
    }
}

impl Drop for SyncWaiter<'_> {
    fn drop(&mut self) {
        if self.0.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.queue_guard().clear();
        }
    }
}

struct EmulBlocking {
    shared: Arc<EmulShared>,
    cancelled: AtomicBool,
}

impl EmulBlocking {
    /// Start continuous acquisition unless it is already running. A pull
    /// rides the ordinary streaming path, so listeners observe the start
    /// and every frame.
    fn ensure_streaming(&self) -> bool {
        if self.shared.acquiring.load(Ordering::SeqCst) {
            return true;
        }
        // A concurrent start may win the race; the stream runs either way.
        self.shared.start_acquisition() || self.shared.acquiring.load(Ordering::SeqCst)
    }

    /// Wait for the worker to park a frame. The caller must hold a
    /// [`SyncWaiter`] registration.
    fn wait_streamed_frame(&self, deadline: Instant) -> Option<ImageFrame> {
        let mut queue = self.shared.sync_frames.queue_guard();
        loop {
            if let Some(frame) = queue.pop_front() {
                return Some(frame);
            }
            if self.cancelled.load(Ordering::SeqCst) {
                return None;
            }
            if !self.shared.acquiring.load(Ordering::SeqCst) {
                // The stream ended before a frame reached us. An injected
                // error already recorded itself; anything else is a
                // timeout from the puller's point of view.
                if self.shared.state() != DetectorState::Error {
                    self.shared
                        .fail(ErrorCode::Timeout, "no frame within the timeout");
                }
                return None;
            }
            if Instant::now() >= deadline {
                self.shared
                    .fail(ErrorCode::Timeout, "no frame within the timeout");
                return None;
            }
            queue = match self
                .shared
                .sync_frames
                .available
                .wait_timeout(queue, POLL_PERIOD)
            {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl BlockingAcquisition for EmulBlocking {
    fn acquire_frame(&self, timeout: Duration) -> Option<ImageFrame> {
        if !self.shared.initialized.load(Ordering::SeqCst) {
            self.shared
                .fail(ErrorCode::NotInitialized, "detector is not initialized");
            return None;
        }
        self.cancelled.store(false, Ordering::SeqCst);
        let _waiter = SyncWaiter::register(&self.shared.sync_frames);
        if !self.ensure_streaming() {
            return None;
        }
        self.wait_streamed_frame(Instant::now() + timeout)
    }

    fn acquire_frames(&self, count: u32, timeout: Duration) -> Option<Vec<ImageFrame>> {
        if !self.shared.initialized.load(Ordering::SeqCst) {
            self.shared
                .fail(ErrorCode::NotInitialized, "detector is not initialized");
            return None;
        }
        self.cancelled.store(false, Ordering::SeqCst);
        // One registration for the whole batch, so no frame slips through
        // between pulls.
        let _waiter = SyncWaiter::register(&self.shared.sync_frames);
        if !self.ensure_streaming() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match self.wait_streamed_frame(deadline) {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        if frames.is_empty() {
            None
        } else {
            Some(frames)
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.shared.sync_frames.wake_all();
    }
}
