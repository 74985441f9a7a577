//! Raw `#[repr(C)]` types of the adapter ABI.
//!
//! This is the complete vocabulary that crosses the module boundary. Both
//! sides of the boundary are built from this file: the host reads these
//! structs through [`crate::plugin::instance`], adapters produce them
//! through [`crate::plugin::export`]. Strings travel in fixed-size
//! NUL-terminated buffers, frames as pointer + length with an explicit
//! release function, callbacks as nullable function pointers with a context
//! pointer.
//!
//! Any change to the layout of these types is an ABI break and must bump
//! [`UXDI_ABI_VERSION`].

use std::os::raw::{c_char, c_void};

/// ABI revision spoken by this host. Checked against
/// [`RawDetector::abi_version`] when a detector is created.
pub const UXDI_ABI_VERSION: u32 = 1;

/// Name of the factory entry point every adapter module must export.
pub const CREATE_DETECTOR_SYMBOL: &[u8] = b"CreateDetector\0";

/// Name of the destructor entry point every adapter module must export.
pub const DESTROY_DETECTOR_SYMBOL: &[u8] = b"DestroyDetector\0";

/// Size of the fixed string buffers in [`RawDetectorInfo`].
pub const INFO_STRING_SIZE: usize = 64;

/// Size of the message buffer in [`RawErrorInfo`].
pub const ERROR_MESSAGE_SIZE: usize = 160;

/// Size of the details buffer in [`RawErrorInfo`].
pub const ERROR_DETAILS_SIZE: usize = 160;

/// Signature of `CreateDetector`. Takes a NUL-terminated UTF-8
/// configuration string (possibly empty, never null) and returns a detector
/// handle, or null on failure.
pub type CreateDetectorFn = unsafe extern "C" fn(config: *const c_char) -> *mut RawDetector;

/// Signature of `DestroyDetector`. Destroys a handle previously returned by
/// the same module's `CreateDetector`. Must tolerate null.
pub type DestroyDetectorFn = unsafe extern "C" fn(detector: *mut RawDetector);

/// Buffer release callback carried inside [`RawImageFrame`].
pub type FrameReleaseFn = unsafe extern "C" fn(ctx: *mut c_void, data: *const u8, len: usize);

/// Opaque detector handle handed across the boundary.
///
/// The host never touches `ctx` except to pass it back to vtable entries
/// and, finally, to the module's `DestroyDetector`.
#[repr(C)]
pub struct RawDetector {
    /// ABI revision the module was built against.
    pub abi_version: u32,
    /// Module-private instance state.
    pub ctx: *mut c_void,
    /// Dispatch table. Non-null for the lifetime of the handle.
    pub vtable: *const DetectorVTable,
}

/// ABI form of [`crate::types::AcquisitionParams`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawAcquisitionParams {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub exposure_time_ms: f32,
    pub gain: f32,
    pub binning: u32,
}

/// ABI form of [`crate::types::DetectorInfo`]. Strings are NUL-terminated
/// within their fixed buffers and truncated if longer.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawDetectorInfo {
    pub vendor: [u8; INFO_STRING_SIZE],
    pub model: [u8; INFO_STRING_SIZE],
    pub serial_number: [u8; INFO_STRING_SIZE],
    pub firmware_version: [u8; INFO_STRING_SIZE],
    pub max_width: u32,
    pub max_height: u32,
    pub bit_depth: u32,
}

impl Default for RawDetectorInfo {
    fn default() -> Self {
        Self {
            vendor: [0; INFO_STRING_SIZE],
            model: [0; INFO_STRING_SIZE],
            serial_number: [0; INFO_STRING_SIZE],
            firmware_version: [0; INFO_STRING_SIZE],
            max_width: 0,
            max_height: 0,
            bit_depth: 0,
        }
    }
}

/// ABI form of [`crate::types::ErrorInfo`].
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawErrorInfo {
    /// [`crate::types::ErrorCode`] as its `u32` discriminant.
    pub code: u32,
    pub message: [u8; ERROR_MESSAGE_SIZE],
    pub details: [u8; ERROR_DETAILS_SIZE],
}

impl Default for RawErrorInfo {
    fn default() -> Self {
        Self {
            code: 0,
            message: [0; ERROR_MESSAGE_SIZE],
            details: [0; ERROR_DETAILS_SIZE],
        }
    }
}

/// Buffer ownership tag on [`RawImageFrame`]: adapter-owned copy.
pub const FRAME_OWNERSHIP_COPIED: u32 = 0;

/// Buffer ownership tag on [`RawImageFrame`]: SDK-borrowed, valid only
/// until the delivering call returns.
pub const FRAME_OWNERSHIP_BORROWED: u32 = 1;

/// ABI form of a frame.
///
/// `data` is valid for the duration of the delivering call. If `release`
/// is non-null the receiver must invoke it exactly once with
/// `(release_ctx, data, len)` when done with the buffer; for borrowed
/// buffers `release` is null and the pointer simply becomes invalid when
/// the call returns.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawImageFrame {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    pub frame_number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
    pub data: *const u8,
    pub len: usize,
    /// [`FRAME_OWNERSHIP_COPIED`] or [`FRAME_OWNERSHIP_BORROWED`].
    pub ownership: u32,
    pub release_ctx: *mut c_void,
    pub release: Option<FrameReleaseFn>,
}

/// Host-provided callback table installed via
/// [`DetectorVTable::set_listener`]. Entries are individually nullable.
///
/// `ctx` must remain valid until the listener is replaced or cleared and
/// the replacing call has returned.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawListener {
    pub ctx: *mut c_void,
    pub on_image: Option<unsafe extern "C" fn(ctx: *mut c_void, frame: *const RawImageFrame)>,
    pub on_state_changed: Option<unsafe extern "C" fn(ctx: *mut c_void, state: u32)>,
    pub on_error: Option<unsafe extern "C" fn(ctx: *mut c_void, error: *const RawErrorInfo)>,
    pub on_acquisition_started: Option<unsafe extern "C" fn(ctx: *mut c_void)>,
    pub on_acquisition_stopped: Option<unsafe extern "C" fn(ctx: *mut c_void)>,
}

/// The dispatch table behind every detector handle.
///
/// Every entry takes the handle's `ctx` first. Fallible operations return
/// `bool`; the failure reason is retrieved with `last_error`.
#[repr(C)]
pub struct DetectorVTable {
    pub initialize: unsafe extern "C" fn(ctx: *mut c_void) -> bool,
    pub shutdown: unsafe extern "C" fn(ctx: *mut c_void) -> bool,
    pub is_initialized: unsafe extern "C" fn(ctx: *mut c_void) -> bool,

    pub get_info: unsafe extern "C" fn(ctx: *mut c_void, out: *mut RawDetectorInfo),
    pub get_state: unsafe extern "C" fn(ctx: *mut c_void) -> u32,

    pub set_acquisition_params:
        unsafe extern "C" fn(ctx: *mut c_void, params: *const RawAcquisitionParams) -> bool,
    pub get_acquisition_params:
        unsafe extern "C" fn(ctx: *mut c_void, out: *mut RawAcquisitionParams),

    /// Install the listener (null clears it). When this returns after a
    /// clear or replace, the previous listener's `ctx` receives no further
    /// callbacks.
    pub set_listener: unsafe extern "C" fn(ctx: *mut c_void, listener: *const RawListener),

    pub start_acquisition: unsafe extern "C" fn(ctx: *mut c_void) -> bool,
    pub stop_acquisition: unsafe extern "C" fn(ctx: *mut c_void) -> bool,
    pub is_acquiring: unsafe extern "C" fn(ctx: *mut c_void) -> bool,

    /// Acquire one frame synchronously, waiting up to `timeout_ms`. On
    /// success fills `out` and returns true; the host must honor the
    /// frame's release protocol.
    pub acquire_frame:
        unsafe extern "C" fn(ctx: *mut c_void, timeout_ms: u64, out: *mut RawImageFrame) -> bool,

    /// Cancel a synchronous acquisition blocked on another thread.
    pub cancel_acquisition: unsafe extern "C" fn(ctx: *mut c_void),

    pub last_error: unsafe extern "C" fn(ctx: *mut c_void, out: *mut RawErrorInfo),
    pub clear_error: unsafe extern "C" fn(ctx: *mut c_void),
}

// =============================================================================
// Fixed-buffer string helpers
// =============================================================================

/// Copy `s` into a fixed NUL-terminated buffer, truncating on a UTF-8
/// character boundary if needed.
pub fn write_fixed<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let mut end = s.len().min(N - 1);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    buf[..end].copy_from_slice(&s.as_bytes()[..end]);
    buf
}

/// Read a NUL-terminated string out of a fixed buffer. Invalid UTF-8 is
/// replaced lossily.
pub fn read_fixed(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

// =============================================================================
// Conversions to/from the public value types
// =============================================================================

use crate::types::{AcquisitionParams, DetectorInfo, ErrorCode, ErrorInfo};

impl From<&AcquisitionParams> for RawAcquisitionParams {
    fn from(p: &AcquisitionParams) -> Self {
        Self {
            width: p.width,
            height: p.height,
            offset_x: p.offset_x,
            offset_y: p.offset_y,
            exposure_time_ms: p.exposure_time_ms,
            gain: p.gain,
            binning: p.binning,
        }
    }
}

impl From<&RawAcquisitionParams> for AcquisitionParams {
    fn from(p: &RawAcquisitionParams) -> Self {
        Self {
            width: p.width,
            height: p.height,
            offset_x: p.offset_x,
            offset_y: p.offset_y,
            exposure_time_ms: p.exposure_time_ms,
            gain: p.gain,
            binning: p.binning,
        }
    }
}

impl From<&DetectorInfo> for RawDetectorInfo {
    fn from(info: &DetectorInfo) -> Self {
        Self {
            vendor: write_fixed(&info.vendor),
            model: write_fixed(&info.model),
            serial_number: write_fixed(&info.serial_number),
            firmware_version: write_fixed(&info.firmware_version),
            max_width: info.max_width,
            max_height: info.max_height,
            bit_depth: info.bit_depth,
        }
    }
}

impl From<&RawDetectorInfo> for DetectorInfo {
    fn from(raw: &RawDetectorInfo) -> Self {
        Self {
            vendor: read_fixed(&raw.vendor),
            model: read_fixed(&raw.model),
            serial_number: read_fixed(&raw.serial_number),
            firmware_version: read_fixed(&raw.firmware_version),
            max_width: raw.max_width,
            max_height: raw.max_height,
            bit_depth: raw.bit_depth,
        }
    }
}

impl From<&ErrorInfo> for RawErrorInfo {
    fn from(err: &ErrorInfo) -> Self {
        Self {
            code: err.code as u32,
            message: write_fixed(&err.message),
            details: write_fixed(&err.details),
        }
    }
}

impl From<&RawErrorInfo> for ErrorInfo {
    fn from(raw: &RawErrorInfo) -> Self {
        Self {
            code: ErrorCode::from_raw(raw.code),
            message: read_fixed(&raw.message),
            details: read_fixed(&raw.details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_buffer_roundtrip() {
        let buf: [u8; 16] = write_fixed("hello");
        assert_eq!(read_fixed(&buf), "hello");
    }

    #[test]
    fn fixed_buffer_truncates_with_terminator() {
        let buf: [u8; 8] = write_fixed("a very long string");
        assert_eq!(buf[7], 0);
        assert_eq!(read_fixed(&buf), "a very ");
    }

    #[test]
    fn fixed_buffer_truncates_on_char_boundary() {
        // "é" is two bytes; a naive cut at 4 would split it.
        let buf: [u8; 5] = write_fixed("aéé");
        let s = read_fixed(&buf);
        assert!(s.is_char_boundary(s.len()));
        assert_eq!(s, "aé");
    }

    #[test]
    fn info_conversion_roundtrip() {
        let info = DetectorInfo {
            vendor: "UXDI".into(),
            model: "EMUL-001".into(),
            serial_number: "S123".into(),
            firmware_version: "1.0".into(),
            max_width: 4096,
            max_height: 4096,
            bit_depth: 16,
        };
        let raw = RawDetectorInfo::from(&info);
        assert_eq!(DetectorInfo::from(&raw), info);
    }

    #[test]
    fn error_conversion_roundtrip() {
        let err = ErrorInfo::new(ErrorCode::Timeout, "timed out").with_details("10ms");
        let raw = RawErrorInfo::from(&err);
        assert_eq!(ErrorInfo::from(&raw), err);
    }
}
