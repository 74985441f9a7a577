//! Library-level error types.
//!
//! UXDI uses a two-tier error design. Runtime device faults (hardware
//! errors, timeouts, rejected parameters) travel as boolean returns plus a
//! queryable [`crate::types::ErrorInfo`] on the detector, because the plugin
//! ABI cannot carry rich Rust errors. Contract violations at the registry
//! and manager boundary — bad module paths, missing exports, invalid ids —
//! are programming or deployment errors and use the typed [`UxdiError`]
//! here.

use crate::types::AdapterId;
use std::ffi::NulError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the registry/manager tier of the runtime.
#[derive(Debug, Error)]
pub enum UxdiError {
    /// The shared module could not be loaded.
    #[error("failed to load adapter module {path:?}")]
    ModuleLoad {
        /// Path of the module that failed to load.
        path: PathBuf,
        /// Underlying loader error.
        #[source]
        source: libloading::Error,
    },

    /// The module loaded but is missing a required export.
    #[error("adapter module {path:?} is missing required export `{symbol}`")]
    MissingExport {
        /// Path of the offending module.
        path: PathBuf,
        /// Name of the missing entry point.
        symbol: &'static str,
    },

    /// The adapter id does not name a registered adapter.
    #[error("unknown adapter id {0}")]
    InvalidAdapterId(AdapterId),

    /// The adapter's factory returned a null detector handle.
    #[error("adapter {0} factory returned null")]
    FactoryReturnedNull(AdapterId),

    /// The adapter was built against an incompatible ABI revision.
    #[error("adapter ABI version mismatch: host expects {expected}, module reports {found}")]
    AbiMismatch {
        /// ABI version this host speaks.
        expected: u32,
        /// ABI version the module reported.
        found: u32,
    },

    /// The configuration string contained an interior NUL and cannot cross
    /// the C boundary.
    #[error("configuration string is not a valid C string")]
    InvalidConfig(#[from] NulError),
}

/// Convenience alias for registry/manager results.
pub type Result<T> = std::result::Result<T, UxdiError>;
