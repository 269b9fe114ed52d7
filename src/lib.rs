//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `core-sync`). Host applications can
//! depend on `asset-sync-workspace` and enable the documented features without
//! needing to wire each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
