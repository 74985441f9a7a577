//! Host-side wrapper around a module-created detector.
//!
//! [`DetectorInstance`] owns a raw handle returned by some module's
//! `CreateDetector` together with that same module's `DestroyDetector`
//! function, and runs the destructor exactly once when the last clone of
//! the instance is dropped. Destruction always happens with the allocator
//! that created the object; the host never frees module memory itself.
//!
//! The wrapper implements the full [`Detector`] contract by dispatching
//! through the handle's vtable, bridging host listeners into the ABI's
//! [`RawListener`] callback table along the way.

use crate::detector::{BlockingAcquisition, Detector, DetectorListener};
use crate::error::UxdiError;
use crate::plugin::abi::{
    DestroyDetectorFn, DetectorVTable, RawAcquisitionParams, RawDetector, RawDetectorInfo,
    RawErrorInfo, RawImageFrame, RawListener, FRAME_OWNERSHIP_BORROWED, UXDI_ABI_VERSION,
};
use crate::types::{
    AcquisitionParams, AdapterId, DetectorInfo, DetectorState, ErrorInfo, FrameOwnership,
    FrameRef, ImageFrame,
};
use std::os::raw::c_void;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A detector created through the plugin boundary.
///
/// Cheap to clone; the underlying handle is destroyed when the last clone
/// drops. Implements [`Detector`], so hosts use it exactly like an
/// in-process detector.
#[derive(Clone)]
pub struct DetectorInstance {
    handle: Arc<ModuleHandle>,
}

impl DetectorInstance {
    /// Take ownership of a raw handle and its module's destructor.
    ///
    /// Verifies the handle's ABI version; on mismatch the handle is
    /// destroyed immediately and an error returned.
    ///
    /// # Safety
    ///
    /// `raw` must be a non-null, undestroyed handle returned by the
    /// `CreateDetector` of the same module `destroy` comes from, and must
    /// not be destroyed by anyone else afterwards.
    pub(crate) unsafe fn wrap(
        raw: *mut RawDetector,
        destroy: DestroyDetectorFn,
        adapter_id: AdapterId,
    ) -> Result<Self, UxdiError> {
        let found = (*raw).abi_version;
        if found != UXDI_ABI_VERSION || (*raw).vtable.is_null() {
            destroy(raw);
            return Err(UxdiError::AbiMismatch {
                expected: UXDI_ABI_VERSION,
                found,
            });
        }
        Ok(Self {
            handle: Arc::new(ModuleHandle {
                ctx: (*raw).ctx,
                vtable: (*raw).vtable,
                raw,
                destroy,
                adapter_id,
                listener: Mutex::new(ListenerSlot::default()),
            }),
        })
    }

    /// Id of the adapter that created this detector.
    pub fn adapter_id(&self) -> AdapterId {
        self.handle.adapter_id
    }
}

struct ModuleHandle {
    ctx: *mut c_void,
    vtable: *const DetectorVTable,
    raw: *mut RawDetector,
    destroy: DestroyDetectorFn,
    adapter_id: AdapterId,
    listener: Mutex<ListenerSlot>,
}

#[derive(Default)]
struct ListenerSlot {
    listener: Option<Arc<dyn DetectorListener>>,
    current: Option<Box<ListenerBridge>>,
    // Replaced bridges are parked until the handle drops, in case a
    // misbehaving adapter keeps a stale callback table around.
    retired: Vec<Box<ListenerBridge>>,
}

// The ABI requires adapters to be callable from any thread; the handle's
// raw pointers are only dereferenced through the vtable contract.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    fn vt(&self) -> &DetectorVTable {
        // Checked non-null in `wrap`; immutable for the handle's lifetime.
        unsafe { &*self.vtable }
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        unsafe {
            (self.vt().set_listener)(self.ctx, std::ptr::null());
            (self.destroy)(self.raw);
        }
    }
}

impl Detector for DetectorInstance {
    fn initialize(&self) -> bool {
        unsafe { (self.handle.vt().initialize)(self.handle.ctx) }
    }

    fn shutdown(&self) -> bool {
        unsafe { (self.handle.vt().shutdown)(self.handle.ctx) }
    }

    fn is_initialized(&self) -> bool {
        unsafe { (self.handle.vt().is_initialized)(self.handle.ctx) }
    }

    fn info(&self) -> DetectorInfo {
        let mut raw = RawDetectorInfo::default();
        unsafe { (self.handle.vt().get_info)(self.handle.ctx, &mut raw) };
        DetectorInfo::from(&raw)
    }

    fn state(&self) -> DetectorState {
        DetectorState::from_raw(unsafe { (self.handle.vt().get_state)(self.handle.ctx) })
    }

    fn set_acquisition_params(&self, params: &AcquisitionParams) -> bool {
        let raw = RawAcquisitionParams::from(params);
        unsafe { (self.handle.vt().set_acquisition_params)(self.handle.ctx, &raw) }
    }

    fn acquisition_params(&self) -> AcquisitionParams {
        let mut raw = RawAcquisitionParams::from(&AcquisitionParams::default());
        unsafe { (self.handle.vt().get_acquisition_params)(self.handle.ctx, &mut raw) };
        AcquisitionParams::from(&raw)
    }

    fn set_listener(&self, listener: Option<Arc<dyn DetectorListener>>) {
        let mut slot = match self.handle.listener.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match listener {
            Some(listener) => {
                let bridge = Box::new(ListenerBridge {
                    listener: listener.clone(),
                });
                let raw = bridge.as_raw();
                unsafe { (self.handle.vt().set_listener)(self.handle.ctx, &raw) };
                if let Some(old) = slot.current.take() {
                    slot.retired.push(old);
                }
                slot.current = Some(bridge);
                slot.listener = Some(listener);
            }
            None => {
                unsafe { (self.handle.vt().set_listener)(self.handle.ctx, std::ptr::null()) };
                if let Some(old) = slot.current.take() {
                    slot.retired.push(old);
                }
                slot.listener = None;
            }
        }
    }

    fn listener(&self) -> Option<Arc<dyn DetectorListener>> {
        match self.handle.listener.lock() {
            Ok(slot) => slot.listener.clone(),
            Err(poisoned) => poisoned.into_inner().listener.clone(),
        }
    }

    fn start_acquisition(&self) -> bool {
        unsafe { (self.handle.vt().start_acquisition)(self.handle.ctx) }
    }

    fn stop_acquisition(&self) -> bool {
        unsafe { (self.handle.vt().stop_acquisition)(self.handle.ctx) }
    }

    fn is_acquiring(&self) -> bool {
        unsafe { (self.handle.vt().is_acquiring)(self.handle.ctx) }
    }

    fn blocking(&self) -> Arc<dyn BlockingAcquisition> {
        Arc::new(ForeignBlocking {
            handle: self.handle.clone(),
        })
    }

    fn last_error(&self) -> ErrorInfo {
        let mut raw = RawErrorInfo::default();
        unsafe { (self.handle.vt().last_error)(self.handle.ctx, &mut raw) };
        ErrorInfo::from(&raw)
    }

    fn clear_error(&self) {
        unsafe { (self.handle.vt().clear_error)(self.handle.ctx) }
    }
}

// =============================================================================
// Synchronous acquisition over the vtable
// =============================================================================

struct ForeignBlocking {
    handle: Arc<ModuleHandle>,
}

impl ForeignBlocking {
    /// Pull one frame through the ABI and copy it into an owned frame,
    /// honoring the frame's release protocol before returning.
    fn pull_frame(&self, timeout: Duration) -> Option<ImageFrame> {
        let mut raw = RawImageFrame {
            width: 0,
            height: 0,
            bit_depth: 0,
            frame_number: 0,
            timestamp: 0.0,
            data: std::ptr::null(),
            len: 0,
            ownership: 0,
            release_ctx: std::ptr::null_mut(),
            release: None,
        };
        let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        let ok =
            unsafe { (self.handle.vt().acquire_frame)(self.handle.ctx, timeout_ms, &mut raw) };
        if !ok || raw.data.is_null() {
            return None;
        }
        let data = unsafe { std::slice::from_raw_parts(raw.data, raw.len) };
        let frame = ImageFrame {
            width: raw.width,
            height: raw.height,
            bit_depth: raw.bit_depth,
            frame_number: raw.frame_number,
            timestamp: raw.timestamp,
            data: bytes::Bytes::copy_from_slice(data),
        };
        if let Some(release) = raw.release {
            unsafe { release(raw.release_ctx, raw.data, raw.len) };
        }
        Some(frame)
    }
}

impl BlockingAcquisition for ForeignBlocking {
    fn acquire_frame(&self, timeout: Duration) -> Option<ImageFrame> {
        self.pull_frame(timeout)
    }

    fn acquire_frames(&self, count: u32, timeout: Duration) -> Option<Vec<ImageFrame>> {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.pull_frame(remaining) {
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
        unsafe { (self.handle.vt().cancel_acquisition)(self.handle.ctx) }
    }
}

// =============================================================================
// Listener bridge (host side)
// =============================================================================

/// Heap-pinned context behind the [`RawListener`] installed in the module.
struct ListenerBridge {
    listener: Arc<dyn DetectorListener>,
}

impl ListenerBridge {
    fn as_raw(&self) -> RawListener {
        RawListener {
            ctx: self as *const ListenerBridge as *mut c_void,
            on_image: Some(bridge_on_image),
            on_state_changed: Some(bridge_on_state_changed),
            on_error: Some(bridge_on_error),
            on_acquisition_started: Some(bridge_on_acquisition_started),
            on_acquisition_stopped: Some(bridge_on_acquisition_stopped),
        }
    }
}

unsafe fn bridge<'a>(ctx: *mut c_void) -> &'a ListenerBridge {
    &*(ctx as *const ListenerBridge)
}

unsafe extern "C" fn bridge_on_image(ctx: *mut c_void, frame: *const RawImageFrame) {
    if frame.is_null() {
        return;
    }
    let raw = &*frame;
    if raw.data.is_null() {
        return;
    }
    let data = std::slice::from_raw_parts(raw.data, raw.len);
    let view = FrameRef {
        width: raw.width,
        height: raw.height,
        bit_depth: raw.bit_depth,
        frame_number: raw.frame_number,
        timestamp: raw.timestamp,
        data,
        ownership: if raw.ownership == FRAME_OWNERSHIP_BORROWED {
            FrameOwnership::Borrowed
        } else {
            FrameOwnership::Copied
        },
    };
    bridge(ctx).listener.on_image(view);
    if let Some(release) = raw.release {
        release(raw.release_ctx, raw.data, raw.len);
    }
}

unsafe extern "C" fn bridge_on_state_changed(ctx: *mut c_void, state: u32) {
    bridge(ctx)
        .listener
        .on_state_changed(DetectorState::from_raw(state));
}

unsafe extern "C" fn bridge_on_error(ctx: *mut c_void, error: *const RawErrorInfo) {
    if error.is_null() {
        return;
    }
    let error = ErrorInfo::from(&*error);
    bridge(ctx).listener.on_error(&error);
}

unsafe extern "C" fn bridge_on_acquisition_started(ctx: *mut c_void) {
    bridge(ctx).listener.on_acquisition_started();
}

unsafe extern "C" fn bridge_on_acquisition_stopped(ctx: *mut c_void) {
    bridge(ctx).listener.on_acquisition_stopped();
}
