//! IPC surface exposed to the Tauri frontend.
//!
//! Versioned modules (currently `v1`) group related commands to keep the
//! interface stable while we iterate on the implementation details.

pub mod v1;
