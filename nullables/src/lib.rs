//! Nullable infrastructure for deterministic testing.
//!
//! Storage is abstracted behind the `lattice-store` traits. This crate
//! provides an implementation that:
//! - Keeps everything in memory
//! - Can be inspected and seeded programmatically
//! - Never touches the filesystem
//!
//! Usage: swap `LmdbStore` for `NullStore` in tests.

pub mod store;

pub use store::NullStore;
