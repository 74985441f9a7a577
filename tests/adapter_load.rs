//! Dynamic-loading tests for the adapter registry.
//!
//! The failure paths run everywhere. The positive path needs the
//! `uxdi-adapter-emul` cdylib on disk, so it only runs when a prior
//! workspace build has produced the artifact.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uxdi::detector::Detector;
use uxdi::{AdapterRegistry, DetectorManager, UxdiError};

/// Route registry/manager tracing through the test harness; `RUST_LOG`
/// selects the verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn loading_a_missing_module_fails_cleanly() {
    init_tracing();
    let registry = AdapterRegistry::new();
    let result = registry.load_adapter("/definitely/not/here/libuxdi_adapter_emul.so");
    assert!(matches!(result, Err(UxdiError::ModuleLoad { .. })));
    assert_eq!(registry.adapter_count(), 0);
}

#[test]
fn loading_a_non_module_file_fails_cleanly() {
    init_tracing();
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"plain text, not a shared object").unwrap();
    let registry = AdapterRegistry::new();
    assert!(registry.load_adapter(file.path()).is_err());
    assert!(registry.adapters().is_empty());
}

/// Locate the built simulation adapter module, if any.
fn emul_module_path() -> Option<PathBuf> {
    let file = if cfg!(target_os = "macos") {
        "libuxdi_adapter_emul.dylib"
    } else if cfg!(windows) {
        "uxdi_adapter_emul.dll"
    } else {
        "libuxdi_adapter_emul.so"
    };
    let target = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target");
    for profile in ["debug", "release"] {
        let candidate = target.join(profile).join(file);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[test]
fn dynamically_loaded_emul_serves_frames() {
    init_tracing();
    let Some(path) = emul_module_path() else {
        eprintln!("uxdi-adapter-emul module not built; skipping dynamic load test");
        return;
    };

    let registry = Arc::new(AdapterRegistry::new());
    let adapter_id = registry.load_adapter(&path).expect("module loads");
    let info = registry.adapter_info(adapter_id).expect("metadata");
    assert!(info.name.contains("uxdi_adapter_emul"));
    assert_eq!(info.path, path);

    let manager = DetectorManager::new(registry.clone());
    let id = manager.create_detector(
        adapter_id,
        r#"{"scenario": {"actions": [{"type": "acquire", "count": 1}]}}"#,
    );
    let detector = manager.detector(id).expect("detector created");
    assert!(detector.initialize());
    detector.set_acquisition_params(&uxdi::AcquisitionParams {
        width: 8,
        height: 8,
        ..uxdi::AcquisitionParams::default()
    });
    let frame = detector
        .blocking()
        .acquire_frame(Duration::from_secs(5))
        .expect("one frame across the module boundary");
    assert_eq!(frame.data.len(), 8 * 8 * 2);

    // Destroy before unloading: instances must not outlive their module.
    manager.destroy_detector(id);
    assert!(registry.unload_adapter(adapter_id));
}
