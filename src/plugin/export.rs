//! Adapter-side ABI shims.
//!
//! An adapter crate implements [`crate::detector::Detector`] in ordinary
//! safe Rust and exports it with one macro invocation:
//!
//! ```ignore
//! uxdi::export_detector_adapter!(MyDetector);
//! ```
//!
//! The macro emits the two C entry points (`CreateDetector`,
//! `DestroyDetector`) that delegate to the generic shims in this module.
//! The shims box the detector, hand out a [`RawDetector`] whose vtable
//! dispatches back into the trait impl, and bridge a host-installed
//! [`RawListener`] into a [`DetectorListener`].

use crate::detector::{Detector, DetectorListener};
use crate::plugin::abi::{
    CreateDetectorFn, DestroyDetectorFn, DetectorVTable, RawAcquisitionParams, RawDetector,
    RawDetectorInfo, RawErrorInfo, RawImageFrame, RawListener, FRAME_OWNERSHIP_BORROWED,
    FRAME_OWNERSHIP_COPIED, UXDI_ABI_VERSION,
};
use crate::types::{AcquisitionParams, DetectorState, ErrorInfo, FrameOwnership, FrameRef};
use bytes::Bytes;
use std::ffi::CStr;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_void};
use std::sync::Arc;
use std::time::Duration;

/// Constructs an adapter's detector from the factory configuration string.
///
/// Returning `None` makes the module's `CreateDetector` return null.
pub trait AdapterFactory: Detector + Sized + 'static {
    /// Build a detector from the (possibly empty) configuration string.
    fn from_config(config: &str) -> Option<Self>;
}

// =============================================================================
// Entry points
// =============================================================================

/// Generic body of an adapter's `CreateDetector` export.
///
/// # Safety
///
/// `config` must be null or a valid NUL-terminated string.
pub unsafe extern "C" fn create_detector_entry<T: AdapterFactory>(
    config: *const c_char,
) -> *mut RawDetector {
    let config = if config.is_null() {
        String::new()
    } else {
        CStr::from_ptr(config).to_string_lossy().into_owned()
    };
    let Some(detector) = T::from_config(&config) else {
        return std::ptr::null_mut();
    };
    let ctx = Box::into_raw(Box::new(detector)) as *mut c_void;
    Box::into_raw(Box::new(RawDetector {
        abi_version: UXDI_ABI_VERSION,
        ctx,
        vtable: VTableHolder::<T>::VTABLE_REF,
    }))
}

/// Generic body of an adapter's `DestroyDetector` export. Tolerates null.
///
/// # Safety
///
/// `detector` must be null or a handle produced by
/// [`create_detector_entry::<T>`] that has not been destroyed.
pub unsafe extern "C" fn destroy_detector_entry<T: AdapterFactory>(detector: *mut RawDetector) {
    if detector.is_null() {
        return;
    }
    let raw = Box::from_raw(detector);
    drop(Box::from_raw(raw.ctx as *mut T));
}

/// Emit the `CreateDetector`/`DestroyDetector` exports for a detector type
/// implementing [`AdapterFactory`].
#[macro_export]
macro_rules! export_detector_adapter {
    ($detector:ty) => {
        /// Factory entry point resolved by the adapter registry.
        ///
        /// # Safety
        ///
        /// `config` must be null or a valid NUL-terminated string.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn CreateDetector(
            config: *const ::std::os::raw::c_char,
        ) -> *mut $crate::plugin::abi::RawDetector {
            $crate::plugin::export::create_detector_entry::<$detector>(config)
        }

        /// Destructor entry point resolved by the adapter registry.
        ///
        /// # Safety
        ///
        /// `detector` must be null or an undestroyed handle from this
        /// module's `CreateDetector`.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn DestroyDetector(
            detector: *mut $crate::plugin::abi::RawDetector,
        ) {
            $crate::plugin::export::destroy_detector_entry::<$detector>(detector)
        }
    };
}

/// The entry-point pair for a builtin (in-process) adapter registration.
pub struct BuiltinEntryPoints {
    /// Factory function.
    pub create: CreateDetectorFn,
    /// Destructor function.
    pub destroy: DestroyDetectorFn,
}

/// Entry points for registering `T` as a builtin adapter, bypassing dynamic
/// loading. Used by tests and embedders that link the adapter statically.
pub fn builtin_entry_points<T: AdapterFactory>() -> BuiltinEntryPoints {
    BuiltinEntryPoints {
        create: create_detector_entry::<T>,
        destroy: destroy_detector_entry::<T>,
    }
}

// =============================================================================
// Vtable shims
// =============================================================================

struct VTableHolder<T>(PhantomData<T>);

impl<T: AdapterFactory> VTableHolder<T> {
    const VTABLE_REF: &'static DetectorVTable = &Self::VTABLE;

    const VTABLE: DetectorVTable = DetectorVTable {
        initialize: initialize_shim::<T>,
        shutdown: shutdown_shim::<T>,
        is_initialized: is_initialized_shim::<T>,
        get_info: get_info_shim::<T>,
        get_state: get_state_shim::<T>,
        set_acquisition_params: set_acquisition_params_shim::<T>,
        get_acquisition_params: get_acquisition_params_shim::<T>,
        set_listener: set_listener_shim::<T>,
        start_acquisition: start_acquisition_shim::<T>,
        stop_acquisition: stop_acquisition_shim::<T>,
        is_acquiring: is_acquiring_shim::<T>,
        acquire_frame: acquire_frame_shim::<T>,
        cancel_acquisition: cancel_acquisition_shim::<T>,
        last_error: last_error_shim::<T>,
        clear_error: clear_error_shim::<T>,
    };
}

unsafe fn detector<'a, T: Detector>(ctx: *mut c_void) -> &'a T {
    &*(ctx as *const T)
}

unsafe extern "C" fn initialize_shim<T: Detector>(ctx: *mut c_void) -> bool {
    detector::<T>(ctx).initialize()
}

unsafe extern "C" fn shutdown_shim<T: Detector>(ctx: *mut c_void) -> bool {
    detector::<T>(ctx).shutdown()
}

unsafe extern "C" fn is_initialized_shim<T: Detector>(ctx: *mut c_void) -> bool {
    detector::<T>(ctx).is_initialized()
}

unsafe extern "C" fn get_info_shim<T: Detector>(ctx: *mut c_void, out: *mut RawDetectorInfo) {
    if !out.is_null() {
        *out = RawDetectorInfo::from(&detector::<T>(ctx).info());
    }
}

unsafe extern "C" fn get_state_shim<T: Detector>(ctx: *mut c_void) -> u32 {
    detector::<T>(ctx).state() as u32
}

unsafe extern "C" fn set_acquisition_params_shim<T: Detector>(
    ctx: *mut c_void,
    params: *const RawAcquisitionParams,
) -> bool {
    if params.is_null() {
        return false;
    }
    let params = AcquisitionParams::from(&*params);
    detector::<T>(ctx).set_acquisition_params(&params)
}

unsafe extern "C" fn get_acquisition_params_shim<T: Detector>(
    ctx: *mut c_void,
    out: *mut RawAcquisitionParams,
) {
    if !out.is_null() {
        *out = RawAcquisitionParams::from(&detector::<T>(ctx).acquisition_params());
    }
}

unsafe extern "C" fn set_listener_shim<T: Detector>(
    ctx: *mut c_void,
    listener: *const RawListener,
) {
    let detector = detector::<T>(ctx);
    if listener.is_null() {
        detector.set_listener(None);
    } else {
        detector.set_listener(Some(Arc::new(ForeignListener { raw: *listener })));
    }
}

unsafe extern "C" fn start_acquisition_shim<T: Detector>(ctx: *mut c_void) -> bool {
    detector::<T>(ctx).start_acquisition()
}

unsafe extern "C" fn stop_acquisition_shim<T: Detector>(ctx: *mut c_void) -> bool {
    detector::<T>(ctx).stop_acquisition()
}

unsafe extern "C" fn is_acquiring_shim<T: Detector>(ctx: *mut c_void) -> bool {
    detector::<T>(ctx).is_acquiring()
}

unsafe extern "C" fn acquire_frame_shim<T: Detector>(
    ctx: *mut c_void,
    timeout_ms: u64,
    out: *mut RawImageFrame,
) -> bool {
    if out.is_null() {
        return false;
    }
    let blocking = detector::<T>(ctx).blocking();
    match blocking.acquire_frame(Duration::from_millis(timeout_ms)) {
        Some(frame) => {
            *out = frame_into_raw(frame);
            true
        }
        None => false,
    }
}

unsafe extern "C" fn cancel_acquisition_shim<T: Detector>(ctx: *mut c_void) {
    detector::<T>(ctx).blocking().cancel();
}

unsafe extern "C" fn last_error_shim<T: Detector>(ctx: *mut c_void, out: *mut RawErrorInfo) {
    if !out.is_null() {
        *out = RawErrorInfo::from(&detector::<T>(ctx).last_error());
    }
}

unsafe extern "C" fn clear_error_shim<T: Detector>(ctx: *mut c_void) {
    detector::<T>(ctx).clear_error();
}

// =============================================================================
// Frame ownership transfer
// =============================================================================

/// Move an owned frame's payload across the boundary. The `Bytes` is boxed
/// and kept alive until the receiver invokes the bundled release function.
fn frame_into_raw(frame: crate::types::ImageFrame) -> RawImageFrame {
    let payload = Box::new(frame.data);
    let data = payload.as_ptr();
    let len = payload.len();
    RawImageFrame {
        width: frame.width,
        height: frame.height,
        bit_depth: frame.bit_depth,
        frame_number: frame.frame_number,
        timestamp: frame.timestamp,
        data,
        len,
        ownership: FRAME_OWNERSHIP_COPIED,
        release_ctx: Box::into_raw(payload) as *mut c_void,
        release: Some(release_bytes),
    }
}

unsafe extern "C" fn release_bytes(ctx: *mut c_void, _data: *const u8, _len: usize) {
    drop(Box::from_raw(ctx as *mut Bytes));
}

// =============================================================================
// Host listener bridge (adapter side)
// =============================================================================

/// Wraps a host-installed [`RawListener`] so the adapter's ordinary
/// [`DetectorListener`] plumbing can drive it.
struct ForeignListener {
    raw: RawListener,
}

// The host guarantees the listener context stays valid and callable from
// any thread until the listener is replaced (RawListener contract).
unsafe impl Send for ForeignListener {}
unsafe impl Sync for ForeignListener {}

impl DetectorListener for ForeignListener {
    fn on_image(&self, frame: FrameRef<'_>) {
        if let Some(cb) = self.raw.on_image {
            let raw = RawImageFrame {
                width: frame.width,
                height: frame.height,
                bit_depth: frame.bit_depth,
                frame_number: frame.frame_number,
                timestamp: frame.timestamp,
                data: frame.data.as_ptr(),
                len: frame.data.len(),
                ownership: match frame.ownership {
                    FrameOwnership::Copied => FRAME_OWNERSHIP_COPIED,
                    FrameOwnership::Borrowed => FRAME_OWNERSHIP_BORROWED,
                },
                release_ctx: std::ptr::null_mut(),
                release: None,
            };
            unsafe { cb(self.raw.ctx, &raw) };
        }
    }

    fn on_state_changed(&self, state: DetectorState) {
        if let Some(cb) = self.raw.on_state_changed {
            unsafe { cb(self.raw.ctx, state as u32) };
        }
    }

    fn on_error(&self, error: &ErrorInfo) {
        if let Some(cb) = self.raw.on_error {
            let raw = RawErrorInfo::from(error);
            unsafe { cb(self.raw.ctx, &raw) };
        }
    }

    fn on_acquisition_started(&self) {
        if let Some(cb) = self.raw.on_acquisition_started {
            unsafe { cb(self.raw.ctx) };
        }
    }

    fn on_acquisition_stopped(&self) {
        if let Some(cb) = self.raw.on_acquisition_stopped {
            unsafe { cb(self.raw.ctx) };
        }
    }
}
