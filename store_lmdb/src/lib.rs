//! LMDB storage backend for the lattice ledger.
//!
//! Implements all storage traits from `lattice-store` using the `heed` LMDB bindings.
//! Each logical store maps to one LMDB database within a single environment.
//! Keys are raw fixed-width bytes; values are `bincode`-encoded records.

pub mod account;
pub mod block;
pub mod confirmation_height;
pub mod environment;
pub mod error;
pub mod pending;
pub mod write_batch;

pub use environment::{LmdbConfig, LmdbEnvironment, LmdbStore};
pub use error::LmdbError;
