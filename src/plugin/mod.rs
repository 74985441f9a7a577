//! The C plugin boundary.
//!
//! Vendor adapters are shared modules exposing exactly two C entry points,
//! `CreateDetector` and `DestroyDetector`. Everything else crosses the
//! boundary through a `#[repr(C)]` function-pointer vtable; no Rust trait
//! objects or generics are visible to the module.
//!
//! - [`abi`] — the raw `#[repr(C)]` types: vtable, value structs, entry
//!   point signatures, and the ABI version constant.
//! - [`export`] — adapter-side: generic shims wrapping any
//!   [`crate::detector::Detector`] into the vtable, and the
//!   [`crate::export_detector_adapter!`] macro that emits the two exports.
//! - [`instance`] — host-side: [`instance::DetectorInstance`], the owned
//!   wrapper that implements `Detector` over a module's vtable and runs the
//!   module's own destructor exactly once on drop.

pub mod abi;
pub mod export;
pub mod instance;

pub use instance::DetectorInstance;
