//! Adapter module registry.
//!
//! The [`AdapterRegistry`] loads vendor adapter modules at runtime,
//! resolves their two fixed entry points, and brokers detector creation and
//! destruction. Adapters get stable, monotonically assigned ids that are
//! never reused; unloading one adapter does not renumber the rest.
//!
//! Besides dynamic loading, embedders and tests can register a "builtin"
//! adapter — an entry-point pair linked into the host process — which then
//! behaves exactly like a loaded module.
//!
//! Unloading an adapter invalidates every detector it created: callers must
//! destroy those instances first. The registry logs a warning but does not
//! track back-references.

use crate::error::{Result, UxdiError};
use crate::plugin::abi::{
    CreateDetectorFn, DestroyDetectorFn, CREATE_DETECTOR_SYMBOL, DESTROY_DETECTOR_SYMBOL,
};
use crate::plugin::export::BuiltinEntryPoints;
use crate::plugin::instance::DetectorInstance;
use crate::types::{AdapterId, INVALID_ADAPTER_ID};
use libloading::Library;
use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Metadata describing a registered adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Stable registry id.
    pub id: AdapterId,
    /// Display name. For loaded modules this is the file stem.
    pub name: String,
    /// Adapter version string.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Module path, or `builtin://<name>` for in-process registrations.
    pub path: PathBuf,
}

struct AdapterHandle {
    // None for builtin adapters. Kept alive while the adapter is
    // registered; dropping it unmaps the module.
    library: Option<Library>,
    create: CreateDetectorFn,
    destroy: DestroyDetectorFn,
    info: AdapterInfo,
}

#[derive(Default)]
struct RegistryInner {
    adapters: BTreeMap<AdapterId, AdapterHandle>,
    next_id: AdapterId,
}

/// Registry of adapter modules.
///
/// An ordinary constructible value; share it as `Arc<AdapterRegistry>`.
/// All operations take a coarse internal lock, but detector factory calls
/// run outside it so a slow adapter cannot stall the registry.
#[derive(Default)]
pub struct AdapterRegistry {
    inner: Mutex<RegistryInner>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Load an adapter module from `path` and register it.
    ///
    /// Resolves `CreateDetector` and `DestroyDetector`; if either export is
    /// missing the module is released before this returns, leaving no
    /// residue. On success the adapter's new stable id is returned.
    pub fn load_adapter(&self, path: impl AsRef<Path>) -> Result<AdapterId> {
        let path = path.as_ref().to_path_buf();

        // SAFETY: loading a shared module runs its initializers; the caller
        // vouches for the module being a UXDI adapter.
        let library = unsafe { Library::new(&path) }.map_err(|source| UxdiError::ModuleLoad {
            path: path.clone(),
            source,
        })?;

        let create: CreateDetectorFn = unsafe {
            match library.get::<CreateDetectorFn>(CREATE_DETECTOR_SYMBOL) {
                Ok(symbol) => *symbol,
                // Early return drops `library`, unmapping the module.
                Err(_) => {
                    return Err(UxdiError::MissingExport {
                        path,
                        symbol: "CreateDetector",
                    })
                }
            }
        };
        let destroy: DestroyDetectorFn = unsafe {
            match library.get::<DestroyDetectorFn>(DESTROY_DETECTOR_SYMBOL) {
                Ok(symbol) => *symbol,
                Err(_) => {
                    return Err(UxdiError::MissingExport {
                        path,
                        symbol: "DestroyDetector",
                    })
                }
            }
        };

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let info = AdapterInfo {
            id,
            name,
            version: "1.0.0".to_string(),
            description: format!("Adapter module loaded from {}", path.display()),
            path: path.clone(),
        };
        info!(adapter_id = id, path = %path.display(), "loaded adapter module");
        inner.adapters.insert(
            id,
            AdapterHandle {
                library: Some(library),
                create,
                destroy,
                info,
            },
        );
        Ok(id)
    }

    /// Register an in-process adapter by its entry-point pair.
    pub fn register_builtin(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        entry_points: BuiltinEntryPoints,
    ) -> AdapterId {
        let name = name.into();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let info = AdapterInfo {
            id,
            path: PathBuf::from(format!("builtin://{name}")),
            name,
            version: version.into(),
            description: description.into(),
        };
        debug!(adapter_id = id, name = %info.name, "registered builtin adapter");
        inner.adapters.insert(
            id,
            AdapterHandle {
                library: None,
                create: entry_points.create,
                destroy: entry_points.destroy,
                info,
            },
        );
        id
    }

    /// Create a detector through the adapter's factory.
    ///
    /// `config` is an adapter-defined configuration string; empty selects
    /// the adapter's defaults.
    pub fn create_detector(&self, adapter_id: AdapterId, config: &str) -> Result<DetectorInstance> {
        if adapter_id == INVALID_ADAPTER_ID {
            return Err(UxdiError::InvalidAdapterId(adapter_id));
        }
        // Copy the entry points out, then call the factory outside the
        // lock: a slow adapter must not stall the registry.
        let (create, destroy) = {
            let inner = self.lock();
            let handle = inner
                .adapters
                .get(&adapter_id)
                .ok_or(UxdiError::InvalidAdapterId(adapter_id))?;
            (handle.create, handle.destroy)
        };

        let config = CString::new(config)?;
        // SAFETY: the entry points came from a registered adapter and stay
        // valid while its library is held by the registry.
        let raw = unsafe { create(config.as_ptr()) };
        if raw.is_null() {
            warn!(adapter_id, "adapter factory returned null");
            return Err(UxdiError::FactoryReturnedNull(adapter_id));
        }
        debug!(adapter_id, "created detector instance");
        // SAFETY: `raw` is fresh from this adapter's factory and `destroy`
        // is the matching destructor.
        unsafe { DetectorInstance::wrap(raw, destroy, adapter_id) }
    }

    /// Destroy a detector instance. `None` is a no-op, so callers can hand
    /// back the result of a failed lookup without checking.
    pub fn destroy_detector(&self, instance: Option<DetectorInstance>) {
        if let Some(instance) = instance {
            debug!(adapter_id = instance.adapter_id(), "destroying detector instance");
            drop(instance);
        }
    }

    /// Unregister an adapter and, for loaded modules, unmap it.
    ///
    /// Returns false if the id is unknown. Detectors created by the adapter
    /// must already be destroyed; see the module docs.
    pub fn unload_adapter(&self, adapter_id: AdapterId) -> bool {
        let mut inner = self.lock();
        match inner.adapters.remove(&adapter_id) {
            Some(handle) => {
                warn!(
                    adapter_id,
                    name = %handle.info.name,
                    "unloading adapter; any remaining detector instances are now invalid"
                );
                drop(handle);
                true
            }
            None => false,
        }
    }

    /// Unregister every adapter. Returns the number removed.
    pub fn unload_all_adapters(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.adapters.len();
        if count > 0 {
            info!(count, "unloading all adapters");
        }
        inner.adapters.clear();
        count
    }

    /// Metadata for one adapter.
    pub fn adapter_info(&self, adapter_id: AdapterId) -> Option<AdapterInfo> {
        self.lock().adapters.get(&adapter_id).map(|h| h.info.clone())
    }

    /// Snapshot of all registered adapters, in id order.
    pub fn adapters(&self) -> Vec<AdapterInfo> {
        self.lock().adapters.values().map(|h| h.info.clone()).collect()
    }

    /// Number of registered adapters.
    pub fn adapter_count(&self) -> usize {
        self.lock().adapters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::emul::EmulDetector;
    use crate::detector::Detector;
    use crate::plugin::export::builtin_entry_points;

    fn registry_with_emul() -> (AdapterRegistry, AdapterId) {
        let registry = AdapterRegistry::new();
        let id = registry.register_builtin(
            "emul",
            "1.0.0",
            "Simulation adapter",
            builtin_entry_points::<EmulDetector>(),
        );
        (registry, id)
    }

    #[test]
    fn load_failure_leaves_registry_unchanged() {
        let registry = AdapterRegistry::new();
        let err = registry.load_adapter("/nonexistent/libadapter.so");
        assert!(matches!(err, Err(UxdiError::ModuleLoad { .. })));
        assert_eq!(registry.adapter_count(), 0);
        assert!(registry.adapters().is_empty());
    }

    #[test]
    fn non_adapter_file_fails_without_residue() {
        use std::io::Write;
        // A real file that is not a shared module fails at load time;
        // nothing is registered either way.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a shared object").unwrap();
        assert!(matches!(
            registry_with_emul().0.load_adapter(file.path()),
            Err(UxdiError::ModuleLoad { .. })
        ));
    }

    #[test]
    fn create_rejects_invalid_ids() {
        let (registry, id) = registry_with_emul();
        assert!(matches!(
            registry.create_detector(INVALID_ADAPTER_ID, ""),
            Err(UxdiError::InvalidAdapterId(0))
        ));
        assert!(matches!(
            registry.create_detector(id + 100, ""),
            Err(UxdiError::InvalidAdapterId(_))
        ));
    }

    #[test]
    fn builtin_create_and_destroy() {
        let (registry, id) = registry_with_emul();
        let detector = registry.create_detector(id, "").unwrap();
        assert_eq!(detector.adapter_id(), id);
        assert!(!detector.is_initialized());
        assert!(detector.initialize());
        assert!(detector.is_initialized());
        registry.destroy_detector(Some(detector));
        registry.destroy_detector(None); // no-op
    }

    #[test]
    fn ids_are_stable_across_unload() {
        let registry = AdapterRegistry::new();
        let entry = || builtin_entry_points::<EmulDetector>();
        let a = registry.register_builtin("a", "1.0.0", "", entry());
        let b = registry.register_builtin("b", "1.0.0", "", entry());
        let c = registry.register_builtin("c", "1.0.0", "", entry());
        assert!(registry.unload_adapter(b));
        assert!(!registry.unload_adapter(b));
        let d = registry.register_builtin("d", "1.0.0", "", entry());
        // Remaining ids unchanged, new id never reuses b's.
        assert_eq!(
            registry.adapters().iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![a, c, d]
        );
        assert!(d > c);
        assert_eq!(registry.unload_all_adapters(), 3);
        assert_eq!(registry.adapter_count(), 0);
    }

    #[test]
    fn builtin_metadata() {
        let (registry, id) = registry_with_emul();
        let info = registry.adapter_info(id).unwrap();
        assert_eq!(info.name, "emul");
        assert_eq!(info.path, PathBuf::from("builtin://emul"));
        assert!(registry.adapter_info(id + 1).is_none());
    }
}
