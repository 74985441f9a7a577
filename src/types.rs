//! Shared value vocabulary for the detector runtime.
//!
//! Everything in this module is plain data: detector states, device
//! descriptions, acquisition parameters, image frames, and the error
//! taxonomy shared between the host and adapter modules. Adapters and
//! hosts agree on these types; all behavior lives elsewhere.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned by [`crate::registry::AdapterRegistry`] to a loaded
/// adapter module. Stable for the lifetime of the registry; never reused.
pub type AdapterId = usize;

/// Identifier assigned by [`crate::manager::DetectorManager`] to a detector
/// instance. Unique within a manager; never reused while the manager lives.
pub type DetectorId = usize;

/// Reserved sentinel: never a valid adapter id.
pub const INVALID_ADAPTER_ID: AdapterId = 0;

/// Reserved sentinel: never a valid detector id. Returned by
/// `DetectorManager::create_detector` on failure.
pub const INVALID_DETECTOR_ID: DetectorId = 0;

// =============================================================================
// Detector state
// =============================================================================

/// Lifecycle state of a detector.
///
/// Valid transitions:
///
/// ```text
/// Idle -> Initializing -> Ready <-> Acquiring
///                           |          |
///                           +--(stop, optionally via Stopping)
/// Ready/Idle -> Idle  (shutdown; a running acquisition is stopped first)
/// any -> Error        (unrecoverable fault; exit via shutdown/reinitialize)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum DetectorState {
    /// State could not be determined (also returned for unknown detector ids).
    #[default]
    Unknown = 0,
    /// Created but not initialized.
    Idle = 1,
    /// `initialize` in progress.
    Initializing = 2,
    /// Initialized and ready to acquire.
    Ready = 3,
    /// Acquisition in progress.
    Acquiring = 4,
    /// `stop_acquisition` in progress.
    Stopping = 5,
    /// Unrecoverable fault; requires shutdown/reinitialize.
    Error = 6,
}

impl DetectorState {
    /// Upper-case display name, matching the wire vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorState::Unknown => "UNKNOWN",
            DetectorState::Idle => "IDLE",
            DetectorState::Initializing => "INITIALIZING",
            DetectorState::Ready => "READY",
            DetectorState::Acquiring => "ACQUIRING",
            DetectorState::Stopping => "STOPPING",
            DetectorState::Error => "ERROR",
        }
    }

    /// Parse the lower-case scenario-script spelling (`"ready"`, `"idle"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(DetectorState::Unknown),
            "idle" => Some(DetectorState::Idle),
            "initializing" => Some(DetectorState::Initializing),
            "ready" => Some(DetectorState::Ready),
            "acquiring" => Some(DetectorState::Acquiring),
            "stopping" => Some(DetectorState::Stopping),
            "error" => Some(DetectorState::Error),
            _ => None,
        }
    }

    /// Decode the ABI representation. Out-of-range values map to `Unknown`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => DetectorState::Idle,
            2 => DetectorState::Initializing,
            3 => DetectorState::Ready,
            4 => DetectorState::Acquiring,
            5 => DetectorState::Stopping,
            6 => DetectorState::Error,
            _ => DetectorState::Unknown,
        }
    }
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Detector description
// =============================================================================

/// Static description of a detector device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorInfo {
    /// Vendor name (e.g. "UXDI").
    pub vendor: String,
    /// Model name (e.g. "EMUL-001").
    pub model: String,
    /// Device serial number.
    pub serial_number: String,
    /// Firmware revision string.
    pub firmware_version: String,
    /// Maximum sensor width in pixels.
    pub max_width: u32,
    /// Maximum sensor height in pixels.
    pub max_height: u32,
    /// Pixel bit depth (e.g. 8, 16).
    pub bit_depth: u32,
}

// =============================================================================
// Acquisition parameters
// =============================================================================

/// Acquisition configuration for a detector.
///
/// Validated as a whole before acceptance; a rejected update leaves the
/// previously active parameters unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionParams {
    /// Region-of-interest width in pixels.
    pub width: u32,
    /// Region-of-interest height in pixels.
    pub height: u32,
    /// Horizontal ROI offset in pixels.
    pub offset_x: u32,
    /// Vertical ROI offset in pixels.
    pub offset_y: u32,
    /// Exposure time in milliseconds. Must be positive.
    pub exposure_time_ms: f32,
    /// Detector gain factor. Must be positive.
    pub gain: f32,
    /// Pixel binning factor. Must be 1, 2, or 4.
    pub binning: u32,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            offset_x: 0,
            offset_y: 0,
            exposure_time_ms: 100.0,
            gain: 1.0,
            binning: 1,
        }
    }
}

impl AcquisitionParams {
    /// Validate this parameter set against the device limits in `info`.
    ///
    /// Returns the rejection reason as an [`ErrorInfo`] with code
    /// [`ErrorCode::InvalidParameter`]; adapters record it as the detector's
    /// last error and reject the whole update.
    pub fn validate(&self, info: &DetectorInfo) -> Result<(), ErrorInfo> {
        let reject = |msg: &str| {
            Err(ErrorInfo::new(ErrorCode::InvalidParameter, msg))
        };
        if self.width == 0 || self.height == 0 {
            return reject("width and height must be non-zero");
        }
        if self.width > info.max_width || self.height > info.max_height {
            return reject("resolution exceeds maximum supported");
        }
        if self.exposure_time_ms <= 0.0 {
            return reject("exposure time must be positive");
        }
        if self.gain <= 0.0 {
            return reject("gain must be positive");
        }
        if !matches!(self.binning, 1 | 2 | 4) {
            return reject("binning must be 1, 2, or 4");
        }
        Ok(())
    }
}

// =============================================================================
// Image frames
// =============================================================================

/// Ownership of a frame buffer at the point of delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwnership {
    /// Buffer is owned by the adapter layer; safe to retain indefinitely.
    Copied,
    /// Buffer belongs to the underlying SDK and is only valid for the
    /// duration of the delivering call (e.g. until the next poll).
    Borrowed,
}

/// An owned image frame.
///
/// The payload is an [`Bytes`] buffer, cheap to clone across listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel bit depth.
    pub bit_depth: u32,
    /// Monotonic frame number within the acquisition session.
    pub frame_number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
    /// Pixel data, row-major, little-endian for multi-byte depths.
    pub data: Bytes,
}

impl ImageFrame {
    /// Expected buffer length in bytes for the given geometry.
    pub fn buffer_len(width: u32, height: u32, bit_depth: u32) -> usize {
        let bytes_per_pixel = (bit_depth as usize + 7) / 8;
        width as usize * height as usize * bytes_per_pixel
    }

    /// Borrow this frame for delivery to a listener.
    pub fn as_view(&self) -> FrameRef<'_> {
        FrameRef {
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            frame_number: self.frame_number,
            timestamp: self.timestamp,
            data: &self.data,
            ownership: FrameOwnership::Copied,
        }
    }
}

/// A borrowed view of a frame, scoped to a single listener callback.
///
/// The buffer borrow cannot outlive the callback, which makes the
/// "use before the next poll" rule on zero-copy adapters a compile-time
/// property: retaining a frame requires [`FrameRef::to_frame`], which copies
/// the pixel data into an owned buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel bit depth.
    pub bit_depth: u32,
    /// Monotonic frame number within the acquisition session.
    pub frame_number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
    /// Pixel data, valid only for the duration of the callback.
    pub data: &'a [u8],
    /// Whether the underlying buffer was adapter-copied or SDK-borrowed.
    pub ownership: FrameOwnership,
}

impl FrameRef<'_> {
    /// Copy this view into an owned [`ImageFrame`], safe to retain.
    pub fn to_frame(&self) -> ImageFrame {
        ImageFrame {
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            frame_number: self.frame_number,
            timestamp: self.timestamp,
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

/// Current wall-clock time as a Unix timestamp in seconds.
pub(crate) fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// =============================================================================
// Error taxonomy
// =============================================================================

/// Closed error taxonomy exposed to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ErrorCode {
    /// No error. The zero/default value.
    #[default]
    Success = 0,
    /// Unclassified failure.
    UnknownError = 1,
    /// Operation requires an initialized detector.
    NotInitialized = 2,
    /// Detector is already initialized.
    AlreadyInitialized = 3,
    /// Rejected parameter value.
    InvalidParameter = 4,
    /// Operation did not complete within its deadline.
    Timeout = 5,
    /// Device-level hardware fault.
    HardwareError = 6,
    /// Link or protocol failure talking to the device.
    CommunicationError = 7,
    /// Operation not supported by this adapter.
    NotSupported = 8,
    /// Operation invalid in the current state.
    StateError = 9,
    /// Allocation failure.
    OutOfMemory = 10,
}

impl ErrorCode {
    /// Lower-case spelling used by the scenario script vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::UnknownError => "unknown_error",
            ErrorCode::NotInitialized => "not_initialized",
            ErrorCode::AlreadyInitialized => "already_initialized",
            ErrorCode::InvalidParameter => "invalid_parameter",
            ErrorCode::Timeout => "timeout",
            ErrorCode::HardwareError => "hardware_error",
            ErrorCode::CommunicationError => "communication_error",
            ErrorCode::NotSupported => "not_supported",
            ErrorCode::StateError => "state_error",
            ErrorCode::OutOfMemory => "out_of_memory",
        }
    }

    /// Parse the scenario-script spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ErrorCode::Success),
            "unknown_error" => Some(ErrorCode::UnknownError),
            "not_initialized" => Some(ErrorCode::NotInitialized),
            "already_initialized" => Some(ErrorCode::AlreadyInitialized),
            "invalid_parameter" => Some(ErrorCode::InvalidParameter),
            "timeout" => Some(ErrorCode::Timeout),
            "hardware_error" => Some(ErrorCode::HardwareError),
            "communication_error" => Some(ErrorCode::CommunicationError),
            "not_supported" => Some(ErrorCode::NotSupported),
            "state_error" => Some(ErrorCode::StateError),
            "out_of_memory" => Some(ErrorCode::OutOfMemory),
            _ => None,
        }
    }

    /// Decode the ABI representation. Out-of-range values map to
    /// `UnknownError`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ErrorCode::Success,
            2 => ErrorCode::NotInitialized,
            3 => ErrorCode::AlreadyInitialized,
            4 => ErrorCode::InvalidParameter,
            5 => ErrorCode::Timeout,
            6 => ErrorCode::HardwareError,
            7 => ErrorCode::CommunicationError,
            8 => ErrorCode::NotSupported,
            9 => ErrorCode::StateError,
            10 => ErrorCode::OutOfMemory,
            _ => ErrorCode::UnknownError,
        }
    }
}

/// Last-error record queryable from a detector after a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional additional detail.
    pub details: String,
}

impl ErrorInfo {
    /// Build an error record with an empty detail field.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: String::new(),
        }
    }

    /// Attach a detail string.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// The cleared, no-error record.
    pub fn none() -> Self {
        Self::new(ErrorCode::Success, "No error")
    }

    /// True if this record holds no error.
    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self::none()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_string_roundtrip() {
        for state in [
            DetectorState::Unknown,
            DetectorState::Idle,
            DetectorState::Initializing,
            DetectorState::Ready,
            DetectorState::Acquiring,
            DetectorState::Stopping,
            DetectorState::Error,
        ] {
            let lower = state.as_str().to_lowercase();
            assert_eq!(DetectorState::parse(&lower), Some(state));
            assert_eq!(DetectorState::from_raw(state as u32), state);
        }
        assert_eq!(DetectorState::parse("bogus"), None);
        assert_eq!(DetectorState::from_raw(99), DetectorState::Unknown);
    }

    #[test]
    fn error_code_roundtrip() {
        for code in [
            ErrorCode::Success,
            ErrorCode::Timeout,
            ErrorCode::HardwareError,
            ErrorCode::StateError,
            ErrorCode::OutOfMemory,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
            assert_eq!(ErrorCode::from_raw(code as u32), code);
        }
        assert_eq!(ErrorCode::parse("nope"), None);
    }

    fn limits() -> DetectorInfo {
        DetectorInfo {
            max_width: 4096,
            max_height: 4096,
            bit_depth: 16,
            ..Default::default()
        }
    }

    #[test]
    fn default_params_are_valid() {
        assert!(AcquisitionParams::default().validate(&limits()).is_ok());
    }

    #[test]
    fn params_validation_rejects_bad_values() {
        let info = limits();
        let good = AcquisitionParams::default();

        let zero_width = AcquisitionParams { width: 0, ..good };
        assert!(zero_width.validate(&info).is_err());

        let too_large = AcquisitionParams { width: 8192, ..good };
        assert!(too_large.validate(&info).is_err());

        let bad_exposure = AcquisitionParams {
            exposure_time_ms: 0.0,
            ..good
        };
        assert!(bad_exposure.validate(&info).is_err());

        let bad_gain = AcquisitionParams { gain: -1.0, ..good };
        assert!(bad_gain.validate(&info).is_err());

        let bad_binning = AcquisitionParams { binning: 3, ..good };
        let err = bad_binning.validate(&info).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }

    #[test]
    fn frame_ref_to_frame_copies() {
        let frame = ImageFrame {
            width: 2,
            height: 2,
            bit_depth: 8,
            frame_number: 7,
            timestamp: 1.5,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let view = frame.as_view();
        assert_eq!(view.ownership, FrameOwnership::Copied);
        let owned = view.to_frame();
        assert_eq!(owned, frame);
    }

    #[test]
    fn buffer_len_rounds_bit_depth_up() {
        assert_eq!(ImageFrame::buffer_len(4, 4, 8), 16);
        assert_eq!(ImageFrame::buffer_len(4, 4, 16), 32);
        assert_eq!(ImageFrame::buffer_len(4, 4, 12), 32);
    }
}
