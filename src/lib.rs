//! # UXDI — Unified X-ray Detector Interface
//!
//! A hardware-abstraction runtime for X-ray detectors. Host applications
//! drive every detector, real or simulated, through one stable contract;
//! vendor-specific code lives in adapter modules loaded at runtime behind
//! a fixed C ABI.
//!
//! ## Crate Structure
//!
//! - **`types`**: Shared value vocabulary — detector states, device info,
//!   acquisition parameters, image frames, and the error taxonomy.
//! - **`error`**: `UxdiError`, the typed error for registry/manager
//!   contract violations. Device-level faults use boolean returns plus the
//!   queryable last error instead.
//! - **`detector`**: The detector contract: the `Detector`,
//!   `DetectorListener`, and `BlockingAcquisition` traits, plus the state
//!   machine they obey.
//! - **`plugin`**: The C plugin boundary — the `#[repr(C)]` vtable ABI,
//!   adapter-side export shims, and the host-side `DetectorInstance`
//!   wrapper that owns a module-created detector.
//! - **`registry`**: `AdapterRegistry`, which loads adapter modules,
//!   resolves their entry points, and brokers detector creation.
//! - **`manager`**: `DetectorManager`, which owns detector instances,
//!   hands out stable ids, and fans events out to multiple listeners.
//! - **`scenario`**: The scripted scenario engine that drives simulated
//!   detectors through frames, state changes, and injected errors.
//! - **`adapters`**: In-tree adapters; currently the simulation adapter
//!   `EmulDetector`, also exported as the `uxdi-adapter-emul` module.
//!
//! ## A minimal host
//!
//! ```no_run
//! use std::sync::Arc;
//! use uxdi::manager::DetectorManager;
//! use uxdi::registry::AdapterRegistry;
//!
//! # fn main() -> uxdi::error::Result<()> {
//! let registry = Arc::new(AdapterRegistry::new());
//! let adapter = registry.load_adapter("./libuxdi_adapter_emul.so")?;
//! let manager = DetectorManager::new(registry);
//!
//! let id = manager.create_detector(adapter, "");
//! if let Some(detector) = manager.detector(id) {
//!     use uxdi::detector::Detector;
//!     detector.initialize();
//!     detector.start_acquisition();
//!     // ... frames arrive through listeners added via the manager ...
//!     detector.stop_acquisition();
//! }
//! manager.destroy_detector(id);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod detector;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod registry;
pub mod scenario;
pub mod types;

pub use detector::{BlockingAcquisition, Detector, DetectorListener};
pub use error::{Result, UxdiError};
pub use manager::DetectorManager;
pub use plugin::DetectorInstance;
pub use registry::{AdapterInfo, AdapterRegistry};
pub use scenario::{Action, Scenario, ScenarioEngine};
pub use types::{
    AcquisitionParams, AdapterId, DetectorId, DetectorInfo, DetectorState, ErrorCode, ErrorInfo,
    FrameOwnership, FrameRef, ImageFrame,
};
