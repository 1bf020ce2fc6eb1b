use lattice_ledger::LedgerError;
use lattice_types::{BlockHash, QualifiedRoot};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("no election for root {0}")]
    ElectionNotFound(QualifiedRoot),

    #[error("block {0} is not in the ledger")]
    BlockNotFound(BlockHash),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
