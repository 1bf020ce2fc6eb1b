//! Fundamental types for the lattice ledger.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! accounts, hashes, roots, amounts, blocks, votes and timestamps.

pub mod account;
pub mod amount;
pub mod block;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod time;
pub mod vote;

pub use account::Account;
pub use amount::Amount;
pub use block::{
    Block, BlockDetails, BlockSideband, BlockType, ChangeBlock, Link, OpenBlock, ReceiveBlock,
    SavedBlock, SendBlock, StateBlock,
};
pub use error::TypesError;
pub use hash::{BlockHash, QualifiedRoot, Root};
pub use keys::Signature;
pub use network::NetworkId;
pub use time::Timestamp;
pub use vote::Vote;
