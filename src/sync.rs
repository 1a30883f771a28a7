//! Synchronization primitives with optional loom support.
//!
//! This module re-exports the atomic types used by slot bookkeeping from
//! either `std` or `loom`, enabling model-checking of the eviction
//! scan/revalidate protocol while using plain std atomics in production.
//!
//! Bucket, eviction, and content locks stay on `parking_lot` (loom does not
//! model them); the loom tests exercise the protocol on bare atomics with
//! loom's own mutex instead.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
