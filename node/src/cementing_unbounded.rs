//! Unbounded cementing.
//!
//! For each target, collects the uncemented segment of its chain by walking
//! backward to the cemented frontier, then looks for receives in that
//! segment whose sources are not cemented yet. Those sources are resolved
//! first; once a segment has no open dependencies it is added to the pending
//! writes whole. Everything is committed in a single write at the end, which
//! is fast but holds the full dependency closure in memory.

use std::sync::Arc;

use lattice_ledger::{Ledger, LedgerError};
use lattice_store::ConfirmationHeightInfo;
use lattice_types::{BlockHash, SavedBlock};
use tracing::trace;

use crate::cementing::{load, Cementer, CementingMode, HeightOverlay, PendingWrites};

pub struct UnboundedCementer {
    ledger: Arc<Ledger>,
}

impl UnboundedCementer {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

impl Cementer for UnboundedCementer {
    fn mode(&self) -> CementingMode {
        CementingMode::Unbounded
    }

    fn cement(&mut self, hash: &BlockHash) -> Result<Vec<SavedBlock>, LedgerError> {
        let ledger = Arc::clone(&self.ledger);
        let mut overlay = HeightOverlay::new(&ledger);
        let mut pending = PendingWrites::default();

        let mut stack = vec![*hash];
        while let Some(&target_hash) = stack.last() {
            let target = load(&ledger, &target_hash)?;
            let account = target.account();
            let confirmed = overlay.get(&account)?.height;
            if target.height() <= confirmed {
                stack.pop();
                continue;
            }

            // Newest first while collecting.
            let mut segment = vec![target];
            while let Some(lowest) = segment.last() {
                if lowest.height() <= confirmed + 1 {
                    break;
                }
                let previous = lowest.previous();
                segment.push(load(&ledger, &previous)?);
            }
            segment.reverse();

            let mut unresolved = Vec::new();
            for block in &segment {
                if let Some(source) = block.source() {
                    if !overlay.is_cemented(&source)? {
                        unresolved.push(source);
                    }
                }
            }
            if !unresolved.is_empty() {
                trace!(%account, sources = unresolved.len(), "segment waits on receive sources");
                // Oldest source ends up on top.
                stack.extend(unresolved.into_iter().rev());
                continue;
            }

            stack.pop();
            if let Some(top) = segment.last() {
                overlay.set(account, ConfirmationHeightInfo::new(top.height(), top.hash()));
            }
            for block in segment {
                pending.push(block);
            }
        }

        pending.flush(&ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cementing::test_support::chained_receives;
    use lattice_ledger::LedgerContext;
    use lattice_types::{Account, Amount};

    #[test]
    fn whole_closure_is_one_commit() {
        let (ctx, receive) = chained_receives();
        let commits_before = ctx.store.commit_count();
        let cemented = UnboundedCementer::new(ctx.ledger.clone())
            .cement(&receive.hash())
            .unwrap();
        assert_eq!(ctx.store.commit_count() - commits_before, 1);
        assert_eq!(cemented.len() as u64, ctx.ledger.block_count() - 1);
        assert_eq!(cemented.last().unwrap().hash(), receive.hash());
        assert_eq!(ctx.ledger.cemented_count(), ctx.ledger.block_count());
    }

    #[test]
    fn sources_precede_their_receives() {
        let (ctx, receive) = chained_receives();
        let cemented = UnboundedCementer::new(ctx.ledger.clone())
            .cement(&receive.hash())
            .unwrap();
        let position = |hash: BlockHash| cemented.iter().position(|b| b.hash() == hash);
        for block in &cemented {
            if let Some(source) = block.source() {
                assert!(position(source).unwrap() < position(block.hash()).unwrap());
            }
        }
    }

    #[test]
    fn stops_at_cemented_frontier() {
        let ctx = LedgerContext::new();
        let genesis = ctx.genesis_account();
        let first = ctx.send(genesis, Account::from(5), Amount::new(1));
        let second = ctx.send(genesis, Account::from(5), Amount::new(1));
        UnboundedCementer::new(ctx.ledger.clone())
            .cement(&first.hash())
            .unwrap();

        let cemented = UnboundedCementer::new(ctx.ledger.clone())
            .cement(&second.hash())
            .unwrap();
        assert_eq!(cemented.len(), 1);
        assert_eq!(cemented[0].hash(), second.hash());
        assert!(UnboundedCementer::new(ctx.ledger.clone())
            .cement(&second.hash())
            .unwrap()
            .is_empty());
    }
}
