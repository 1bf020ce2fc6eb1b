//! Block-lattice ledger.
//!
//! Each account has its own chain. Blocks are accepted asynchronously, with
//! no global ordering; a send leaves a receivable entry that the destination
//! later claims with a receive. Consensus is only needed to pick between
//! blocks competing for the same chain position, and confirmation heights
//! record the prefix of every chain that has been agreed on.

pub mod dependents;
pub mod error;
pub mod genesis;
pub mod ledger;
pub mod ledger_context;
pub mod rep_weights;
pub mod write_queue;

pub use dependents::DependentBlocks;
pub use error::LedgerError;
pub use genesis::{Genesis, GENESIS_AMOUNT};
pub use ledger::{Ledger, ProcessResult};
pub use ledger_context::LedgerContext;
pub use rep_weights::RepWeights;
pub use write_queue::{WriteGuard, WriteQueue, Writer};
