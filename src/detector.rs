//! The detector contract.
//!
//! Every detector — simulated or real hardware behind a vendor SDK — is
//! driven through the [`Detector`] trait. The contract is deliberately
//! narrow and blocking: operations return `bool` for success/failure and a
//! failed call records a queryable last error ([`Detector::last_error`]),
//! mirroring what the plugin ABI can express. Rich typed errors exist only
//! above this boundary (see [`crate::error`]).
//!
//! ## State machine
//!
//! ```text
//!             initialize            start_acquisition
//!   IDLE ---> INITIALIZING ---> READY <-------------> ACQUIRING
//!    ^                            |   stop_acquisition     |
//!    |        shutdown            |   (via STOPPING)       |
//!    +----------------------------+------------------------+
//!
//!   any state --(unrecoverable fault)--> ERROR --(shutdown)--> IDLE
//! ```
//!
//! `shutdown` on an acquiring detector stops the acquisition first. Every
//! operation is safe to call in every state: an out-of-place call fails with
//! `StateError` rather than panicking or corrupting the device.
//!
//! ## Callback discipline
//!
//! Listener callbacks run on the detector's acquisition thread. They must
//! not block and must not call back into the delivering detector; doing so
//! deadlocks or stalls frame delivery. Heavy consumers should copy the frame
//! ([`FrameRef::to_frame`]) and hand it to their own thread.

use crate::types::{
    AcquisitionParams, DetectorInfo, DetectorState, ErrorInfo, FrameRef, ImageFrame,
};
use std::sync::Arc;
use std::time::Duration;

/// The uniform detector contract implemented by every adapter.
///
/// Implementations must be `Send + Sync`: the manager shares detectors
/// across threads, and acquisition workers call listener methods
/// concurrently with host calls.
pub trait Detector: Send + Sync {
    // -- Lifecycle ------------------------------------------------------

    /// Initialize the device. Fails with `AlreadyInitialized` if called on
    /// an initialized detector. On success the state is `Ready`.
    fn initialize(&self) -> bool;

    /// Shut the device down, stopping any running acquisition first.
    /// Idempotent: shutting down an uninitialized detector succeeds.
    fn shutdown(&self) -> bool;

    /// Whether `initialize` has completed successfully.
    fn is_initialized(&self) -> bool;

    // -- Identity -------------------------------------------------------

    /// Static description of the device.
    fn info(&self) -> DetectorInfo;

    /// Vendor name shortcut.
    fn vendor_name(&self) -> String {
        self.info().vendor
    }

    /// Model name shortcut.
    fn model_name(&self) -> String {
        self.info().model
    }

    // -- State ----------------------------------------------------------

    /// Current lifecycle state.
    fn state(&self) -> DetectorState;

    /// Display form of the current state.
    fn state_string(&self) -> &'static str {
        self.state().as_str()
    }

    // -- Configuration --------------------------------------------------

    /// Validate and apply an acquisition parameter set atomically. On
    /// rejection the active parameters are unchanged and the reason is
    /// available from [`Detector::last_error`].
    fn set_acquisition_params(&self, params: &AcquisitionParams) -> bool;

    /// The currently active parameter set.
    fn acquisition_params(&self) -> AcquisitionParams;

    // -- Listener -------------------------------------------------------

    /// Install (or with `None`, clear) the event listener. At most one
    /// listener is attached at the contract level; fan-out to multiple
    /// consumers is the manager's job.
    fn set_listener(&self, listener: Option<Arc<dyn DetectorListener>>);

    /// The currently installed listener, if any.
    fn listener(&self) -> Option<Arc<dyn DetectorListener>>;

    // -- Acquisition ----------------------------------------------------

    /// Begin continuous acquisition. Requires `Ready`; fails with
    /// `StateError` otherwise. Frames are delivered through the listener.
    fn start_acquisition(&self) -> bool;

    /// Stop a running acquisition. Blocks until the acquisition thread has
    /// exited: after this returns, no further frame callbacks occur.
    /// Idempotent when nothing is running.
    fn stop_acquisition(&self) -> bool;

    /// Whether an acquisition is currently running.
    fn is_acquiring(&self) -> bool;

    /// Handle for synchronous (pull-style) acquisition.
    fn blocking(&self) -> Arc<dyn BlockingAcquisition>;

    // -- Errors ---------------------------------------------------------

    /// The error recorded by the most recent failed operation, or the
    /// no-error record if none.
    fn last_error(&self) -> ErrorInfo;

    /// Clear the recorded last error.
    fn clear_error(&self);
}

/// Event sink for asynchronous detector notifications.
///
/// All methods have no-op defaults so a listener implements only what it
/// consumes. Callbacks arrive on the detector's acquisition thread; see the
/// module docs for the discipline they must follow.
pub trait DetectorListener: Send + Sync {
    /// A new frame is available. The borrow in `frame` is valid only for
    /// the duration of this call; retain via [`FrameRef::to_frame`].
    fn on_image(&self, frame: FrameRef<'_>) {
        let _ = frame;
    }

    /// The detector's lifecycle state changed.
    fn on_state_changed(&self, state: DetectorState) {
        let _ = state;
    }

    /// An asynchronous error occurred (e.g. a hardware fault mid-stream).
    fn on_error(&self, error: &ErrorInfo) {
        let _ = error;
    }

    /// Continuous acquisition started.
    fn on_acquisition_started(&self) {}

    /// Continuous acquisition stopped.
    fn on_acquisition_stopped(&self) {}
}

/// Synchronous, pull-style acquisition.
///
/// Obtained from [`Detector::blocking`]; usable from any thread. A pull
/// starts continuous acquisition if none is running and waits for the
/// next frame the stream delivers, so listeners observe pulled frames
/// like any others. Frames returned here are always owned copies, safe
/// to retain.
pub trait BlockingAcquisition: Send + Sync {
    /// Acquire a single frame, waiting up to `timeout`. Returns `None` on
    /// timeout or cancellation; a timeout records `Timeout` as the
    /// detector's last error.
    fn acquire_frame(&self, timeout: Duration) -> Option<ImageFrame>;

    /// Acquire `count` frames, with `timeout` as the overall deadline.
    /// Returns the frames collected so far (possibly fewer than `count`)
    /// wrapped in `Some`, or `None` if nothing was acquired.
    fn acquire_frames(&self, count: u32, timeout: Duration) -> Option<Vec<ImageFrame>>;

    /// Cancel a blocked acquisition from another thread. The blocked call
    /// returns `None` promptly.
    fn cancel(&self);
}
