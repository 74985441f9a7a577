//! In-tree adapters.
//!
//! Real vendor adapters live in their own cdylib crates and are loaded
//! through the registry. The simulation adapter is kept in-tree so the
//! core crate always has a complete, scriptable reference implementation
//! of the detector contract; the `uxdi-adapter-emul` workspace member
//! re-exports it as a loadable module.

pub mod emul;
