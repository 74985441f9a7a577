//! End-to-end tests: registry + manager + simulation adapter, with the
//! adapter registered in-process so no module build is required.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uxdi::adapters::emul::EmulDetector;
use uxdi::detector::{Detector, DetectorListener};
use uxdi::plugin::export::builtin_entry_points;
use uxdi::types::{DetectorState, ErrorCode, FrameRef, INVALID_DETECTOR_ID};
use uxdi::{AdapterRegistry, DetectorManager};

/// Route registry/manager tracing through the test harness; `RUST_LOG`
/// selects the verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (DetectorManager, uxdi::AdapterId) {
    init_tracing();
    let registry = Arc::new(AdapterRegistry::new());
    let adapter_id = registry.register_builtin(
        "emul",
        "1.0.0",
        "Simulation adapter",
        builtin_entry_points::<EmulDetector>(),
    );
    (DetectorManager::new(registry), adapter_id)
}

#[derive(Default)]
struct FrameCounter {
    frames: AtomicUsize,
    numbers: Mutex<Vec<u64>>,
    errors: AtomicUsize,
    last_state: Mutex<Option<DetectorState>>,
}

impl DetectorListener for FrameCounter {
    fn on_image(&self, frame: FrameRef<'_>) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.numbers.lock().unwrap().push(frame.frame_number);
        assert!(!frame.data.is_empty());
    }
    fn on_error(&self, _error: &uxdi::ErrorInfo) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_state_changed(&self, state: DetectorState) {
        *self.last_state.lock().unwrap() = Some(state);
    }
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn full_session_with_default_scenario() {
    let (manager, adapter_id) = setup();
    let id = manager.create_detector(adapter_id, "");
    assert_ne!(id, INVALID_DETECTOR_ID);
    assert_eq!(manager.detector_state(id), DetectorState::Idle);
    assert_eq!(manager.detector_info(id).model, "EMUL-001");

    let counter = Arc::new(FrameCounter::default());
    assert!(manager.add_listener(id, counter.clone()));

    let detector = manager.detector(id).expect("detector registered");
    assert!(detector.initialize());
    assert_eq!(manager.detector_state(id), DetectorState::Ready);
    assert!(detector.start_acquisition());

    // The default scenario produces exactly 100 frames, then the stream
    // ends on its own.
    assert!(wait_until(Duration::from_secs(60), || !detector.is_acquiring()));
    assert!(detector.stop_acquisition());
    assert_eq!(counter.frames.load(Ordering::SeqCst), 100);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 0);
    assert_eq!(manager.detector_state(id), DetectorState::Ready);

    let numbers = counter.numbers.lock().unwrap();
    assert!(numbers.windows(2).all(|w| w[1] > w[0]), "monotonic numbering");
    drop(numbers);

    assert!(detector.shutdown());
    assert_eq!(manager.detector_state(id), DetectorState::Idle);
    manager.destroy_detector(id);
    manager.destroy_detector(id); // idempotent
    assert!(!manager.is_valid_detector(id));
}

#[test]
fn scripted_error_reaches_manager_listeners() {
    let (manager, adapter_id) = setup();
    let id = manager.create_detector(
        adapter_id,
        r#"{"scenario": {"actions": [
            {"type": "acquire", "count": 2},
            {"type": "inject_error", "error": "communication_error", "probability": 1}
        ]}}"#,
    );
    assert_ne!(id, INVALID_DETECTOR_ID);
    let counter = Arc::new(FrameCounter::default());
    assert!(manager.add_listener(id, counter.clone()));

    let detector = manager.detector(id).unwrap();
    assert!(detector.initialize());
    detector.set_acquisition_params(&uxdi::AcquisitionParams {
        width: 16,
        height: 16,
        ..uxdi::AcquisitionParams::default()
    });
    assert!(detector.start_acquisition());
    assert!(wait_until(Duration::from_secs(5), || {
        manager.detector_state(id) == DetectorState::Error
    }));
    assert_eq!(counter.frames.load(Ordering::SeqCst), 2);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    assert_eq!(manager.last_error(id).code, ErrorCode::CommunicationError);
    manager.destroy_detector(id);
}

#[test]
fn scenario_file_config_via_manager() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"{"name": "short", "actions": [
            {"type": "set_state", "state": "ready"},
            {"type": "acquire", "count": 3, "interval_ms": 1}
        ]}"#,
    )
    .unwrap();

    let (manager, adapter_id) = setup();
    let id = manager.create_detector(adapter_id, &format!("file://{}", file.path().display()));
    assert_ne!(id, INVALID_DETECTOR_ID);

    let counter = Arc::new(FrameCounter::default());
    assert!(manager.add_listener(id, counter.clone()));
    let detector = manager.detector(id).unwrap();
    assert!(detector.initialize());
    detector.set_acquisition_params(&uxdi::AcquisitionParams {
        width: 16,
        height: 16,
        ..uxdi::AcquisitionParams::default()
    });
    assert!(detector.start_acquisition());
    assert!(wait_until(Duration::from_secs(5), || !detector.is_acquiring()));
    detector.stop_acquisition();
    assert_eq!(counter.frames.load(Ordering::SeqCst), 3);
    manager.destroy_all_detectors();
}

#[test]
fn blocking_path_through_plugin_boundary() {
    let (manager, adapter_id) = setup();
    let id = manager.create_detector(
        adapter_id,
        r#"{"scenario": {"actions": [{"type": "acquire", "count": 1000000}]}}"#,
    );
    let detector = manager.detector(id).unwrap();
    assert!(detector.initialize());
    detector.set_acquisition_params(&uxdi::AcquisitionParams {
        width: 8,
        height: 8,
        ..uxdi::AcquisitionParams::default()
    });

    // Frames pulled through the vtable are owned copies; the first pull
    // starts the stream.
    let blocking = detector.blocking();
    let frames = blocking
        .acquire_frames(2, Duration::from_secs(5))
        .expect("two frames");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].data.len(), 8 * 8 * 2);
    assert!(frames[1].frame_number > frames[0].frame_number);
    assert!(detector.is_acquiring());

    assert!(detector.stop_acquisition());
    assert!(!detector.is_acquiring());
    manager.destroy_detector(id);
}

#[test]
fn create_with_unknown_adapter_is_swallowed() {
    let (manager, adapter_id) = setup();
    assert_eq!(manager.create_detector(adapter_id + 7, ""), INVALID_DETECTOR_ID);
    assert_eq!(manager.detector_count(), 0);
    // Lenient accessors keep working on the bad id.
    assert_eq!(manager.detector_state(INVALID_DETECTOR_ID), DetectorState::Unknown);
}

#[test]
fn emul_detector_is_usable_without_a_manager() {
    let detector = EmulDetector::new("");
    assert_eq!(detector.state(), DetectorState::Idle);
    assert_eq!(detector.vendor_name(), "UXDI");
}
