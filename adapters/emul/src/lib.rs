//! Loadable module for the simulation adapter.
//!
//! Exports `CreateDetector`/`DestroyDetector` for
//! [`uxdi::adapters::emul::EmulDetector`], so hosts can exercise the
//! dynamic-loading path end to end without any hardware attached.

uxdi::export_detector_adapter!(uxdi::adapters::emul::EmulDetector);
