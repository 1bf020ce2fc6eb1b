//! Bounded cementing.
//!
//! Walks each account chain forward from its cemented frontier toward the
//! target. When a receive's source is not yet cemented the walk stops and
//! the source is pushed as a checkpoint; the source chain is cemented first
//! and the walk resumes from where it stopped. Pending writes are flushed
//! whenever `max_pending_writes` blocks have accumulated or `batch_time` has
//! passed since the last flush, so memory stays bounded however long the
//! chains are.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_ledger::{Ledger, LedgerError};
use lattice_store::ConfirmationHeightInfo;
use lattice_types::{Account, BlockHash, SavedBlock};
use tracing::trace;

use crate::cementing::{load, Cementer, CementingMode, HeightOverlay, PendingWrites};

pub struct BoundedCementer {
    ledger: Arc<Ledger>,
    max_pending_writes: usize,
    batch_time: Duration,
}

impl BoundedCementer {
    pub fn new(ledger: Arc<Ledger>, max_pending_writes: usize, batch_time: Duration) -> Self {
        Self {
            ledger,
            max_pending_writes: max_pending_writes.max(1),
            batch_time,
        }
    }

    /// First block above the cemented prefix described by `info`.
    fn first_uncemented(
        &self,
        account: &Account,
        info: &ConfirmationHeightInfo,
    ) -> Result<BlockHash, LedgerError> {
        if info.height == 0 {
            let account_info = self
                .ledger
                .account_info(account)?
                .ok_or(LedgerError::AccountNotFound(*account))?;
            Ok(account_info.open_block)
        } else {
            Ok(load(&self.ledger, &info.frontier)?.successor())
        }
    }
}

impl Cementer for BoundedCementer {
    fn mode(&self) -> CementingMode {
        CementingMode::Bounded
    }

    fn cement(&mut self, hash: &BlockHash) -> Result<Vec<SavedBlock>, LedgerError> {
        let ledger = Arc::clone(&self.ledger);
        let mut overlay = HeightOverlay::new(&ledger);
        let mut pending = PendingWrites::default();
        let mut cemented = Vec::new();
        let mut last_flush = Instant::now();

        // Blocks that must be cemented; the innermost dependency is on top.
        let mut checkpoints = vec![*hash];
        while let Some(&target_hash) = checkpoints.last() {
            let target = load(&ledger, &target_hash)?;
            let account = target.account();
            let info = overlay.get(&account)?;
            if target.height() <= info.height {
                checkpoints.pop();
                continue;
            }

            let mut next = self.first_uncemented(&account, &info)?;
            let mut blocked = false;
            loop {
                let block = load(&ledger, &next)?;
                if let Some(source) = block.source() {
                    if !overlay.is_cemented(&source)? {
                        trace!(%source, receive = %block.hash(), "checkpoint on receive source");
                        checkpoints.push(source);
                        blocked = true;
                        break;
                    }
                }

                overlay.set(account, ConfirmationHeightInfo::new(block.height(), block.hash()));
                let reached = block.height() >= target.height();
                next = block.successor();
                pending.push(block);

                if pending.len() >= self.max_pending_writes || last_flush.elapsed() >= self.batch_time
                {
                    cemented.extend(pending.flush(&ledger)?);
                    last_flush = Instant::now();
                }
                if reached {
                    break;
                }
            }
            if !blocked {
                checkpoints.pop();
            }
        }

        cemented.extend(pending.flush(&ledger)?);
        Ok(cemented)
    }
}
