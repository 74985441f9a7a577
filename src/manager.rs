//! Detector lifecycle manager.
//!
//! [`DetectorManager`] owns the detectors created through a registry, hands
//! out stable detector ids, and multiplexes listeners: the manager installs
//! one internal fan-out bridge as each detector's contract-level listener
//! and dispatches events to every listener subscribed for that detector.
//!
//! The manager is lenient by design. Creation failures return the invalid
//! id `0` rather than an error; accessors on unknown ids return neutral
//! values (`Unknown` state, default info); destroys are idempotent. Hosts
//! that want the failure detail use the registry directly.

use crate::detector::{Detector, DetectorListener};
use crate::plugin::instance::DetectorInstance;
use crate::registry::AdapterRegistry;
use crate::types::{
    AcquisitionParams, AdapterId, DetectorId, DetectorInfo, DetectorState, ErrorInfo, FrameRef,
    INVALID_DETECTOR_ID,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Owns and tracks detector instances created through an [`AdapterRegistry`].
pub struct DetectorManager {
    registry: Arc<AdapterRegistry>,
    inner: Mutex<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    entries: Vec<DetectorEntry>,
    next_id: DetectorId,
}

struct DetectorEntry {
    id: DetectorId,
    adapter_id: AdapterId,
    detector: Arc<DetectorInstance>,
    fanout: Arc<ListenerFanout>,
}

impl DetectorManager {
    /// Create a manager backed by `registry`.
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            inner: Mutex::new(ManagerInner::default()),
        }
    }

    /// The registry this manager creates detectors through.
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManagerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a detector from `adapter_id` with an adapter-defined
    /// configuration string.
    ///
    /// Returns the new detector id, or [`INVALID_DETECTOR_ID`] on any
    /// failure (unknown adapter, factory failure, bad config). The failure
    /// is logged, not raised.
    pub fn create_detector(&self, adapter_id: AdapterId, config: &str) -> DetectorId {
        let detector = match self.registry.create_detector(adapter_id, config) {
            Ok(detector) => detector,
            Err(err) => {
                warn!(adapter_id, error = %err, "detector creation failed");
                return INVALID_DETECTOR_ID;
            }
        };

        let fanout = Arc::new(ListenerFanout::default());
        detector.set_listener(Some(fanout.clone() as Arc<dyn DetectorListener>));

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        debug!(detector_id = id, adapter_id, "created detector");
        inner.entries.push(DetectorEntry {
            id,
            adapter_id,
            detector: Arc::new(detector),
            fanout,
        });
        id
    }

    /// Destroy a detector. Unknown ids are a no-op, so double-destroy is
    /// safe. A running acquisition is stopped and the detector shut down
    /// before the instance is released.
    pub fn destroy_detector(&self, detector_id: DetectorId) {
        let entry = {
            let mut inner = self.lock();
            match inner.entries.iter().position(|e| e.id == detector_id) {
                Some(index) => Some(inner.entries.remove(index)),
                None => None,
            }
        };
        if let Some(entry) = entry {
            debug!(detector_id, adapter_id = entry.adapter_id, "destroying detector");
            entry.detector.set_listener(None);
            if entry.detector.is_initialized() {
                entry.detector.shutdown();
            }
            // Dropping the last Arc runs the module's own destructor.
            drop(entry);
        }
    }

    /// Destroy every managed detector. Returns the number destroyed.
    pub fn destroy_all_detectors(&self) -> usize {
        let ids = self.detector_ids();
        for id in &ids {
            self.destroy_detector(*id);
        }
        ids.len()
    }

    /// Shared handle to a managed detector for direct contract calls.
    pub fn detector(&self, detector_id: DetectorId) -> Option<Arc<DetectorInstance>> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.id == detector_id)
            .map(|e| e.detector.clone())
    }

    // -- Lenient accessors ----------------------------------------------

    /// State of a detector; `Unknown` for unknown ids.
    pub fn detector_state(&self, detector_id: DetectorId) -> DetectorState {
        self.detector(detector_id)
            .map(|d| d.state())
            .unwrap_or(DetectorState::Unknown)
    }

    /// Description of a detector; default (empty) info for unknown ids.
    pub fn detector_info(&self, detector_id: DetectorId) -> DetectorInfo {
        self.detector(detector_id)
            .map(|d| d.info())
            .unwrap_or_default()
    }

    /// Active acquisition parameters; defaults for unknown ids.
    pub fn acquisition_params(&self, detector_id: DetectorId) -> AcquisitionParams {
        self.detector(detector_id)
            .map(|d| d.acquisition_params())
            .unwrap_or_default()
    }

    /// Last error recorded by a detector; the no-error record for unknown
    /// ids.
    pub fn last_error(&self, detector_id: DetectorId) -> ErrorInfo {
        self.detector(detector_id)
            .map(|d| d.last_error())
            .unwrap_or_default()
    }

    /// Number of managed detectors.
    pub fn detector_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Ids of all managed detectors, in creation order.
    pub fn detector_ids(&self) -> Vec<DetectorId> {
        self.lock().entries.iter().map(|e| e.id).collect()
    }

    /// Whether `detector_id` names a managed detector.
    pub fn is_valid_detector(&self, detector_id: DetectorId) -> bool {
        self.lock().entries.iter().any(|e| e.id == detector_id)
    }

    // -- Listener fan-out -----------------------------------------------

    /// Subscribe a listener to a detector's events. Rejects unknown ids and
    /// duplicate subscriptions (same `Arc`) with `false`.
    pub fn add_listener(
        &self,
        detector_id: DetectorId,
        listener: Arc<dyn DetectorListener>,
    ) -> bool {
        match self.fanout(detector_id) {
            Some(fanout) => fanout.add(listener),
            None => false,
        }
    }

    /// Unsubscribe a listener. Returns false if the id is unknown or the
    /// listener was not subscribed.
    pub fn remove_listener(
        &self,
        detector_id: DetectorId,
        listener: &Arc<dyn DetectorListener>,
    ) -> bool {
        match self.fanout(detector_id) {
            Some(fanout) => fanout.remove(listener),
            None => false,
        }
    }

    /// Unsubscribe every listener of a detector. Returns the number
    /// removed.
    pub fn remove_all_listeners(&self, detector_id: DetectorId) -> usize {
        match self.fanout(detector_id) {
            Some(fanout) => fanout.clear(),
            None => 0,
        }
    }

    fn fanout(&self, detector_id: DetectorId) -> Option<Arc<ListenerFanout>> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.id == detector_id)
            .map(|e| e.fanout.clone())
    }
}

impl Drop for DetectorManager {
    fn drop(&mut self) {
        self.destroy_all_detectors();
    }
}

// =============================================================================
// Fan-out bridge
// =============================================================================

/// The single contract-level listener the manager installs per detector,
/// dispatching each event to every subscribed listener.
#[derive(Default)]
struct ListenerFanout {
    listeners: Mutex<Vec<Arc<dyn DetectorListener>>>,
}

impl ListenerFanout {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn DetectorListener>>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn add(&self, listener: Arc<dyn DetectorListener>) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    fn remove(&self, listener: &Arc<dyn DetectorListener>) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn clear(&self) -> usize {
        let mut listeners = self.lock();
        let count = listeners.len();
        listeners.clear();
        count
    }

    // Snapshot before dispatch so listener callbacks can re-enter the
    // subscription methods without deadlocking.
    fn snapshot(&self) -> Vec<Arc<dyn DetectorListener>> {
        self.lock().clone()
    }
}

impl DetectorListener for ListenerFanout {
    fn on_image(&self, frame: FrameRef<'_>) {
        for listener in self.snapshot() {
            listener.on_image(frame);
        }
    }

    fn on_state_changed(&self, state: DetectorState) {
        for listener in self.snapshot() {
            listener.on_state_changed(state);
        }
    }

    fn on_error(&self, error: &ErrorInfo) {
        for listener in self.snapshot() {
            listener.on_error(error);
        }
    }

    fn on_acquisition_started(&self) {
        for listener in self.snapshot() {
            listener.on_acquisition_started();
        }
    }

    fn on_acquisition_stopped(&self) {
        for listener in self.snapshot() {
            listener.on_acquisition_stopped();
        }
    }
}
