//! Cementing: durably advancing per-account confirmation heights.
//!
//! Cementing a block cements everything it depends on as well: its
//! ancestors in the account chain and, for every receive among them, the
//! source send on the sending account. Dependencies are always written
//! before (or in the same commit as) their dependents, so a crash never
//! leaves a cemented receive whose source is not.
//!
//! Two strategies implement [`Cementer`]:
//! - [`BoundedCementer`](crate::cementing_bounded::BoundedCementer) walks
//!   chains forward from the cemented frontier and flushes in capped batches.
//! - [`UnboundedCementer`](crate::cementing_unbounded::UnboundedCementer)
//!   collects the whole dependency closure and commits it at once.
//!
//! Both leave the store in the same state for the same input.

use std::collections::HashMap;

use lattice_ledger::{Ledger, LedgerError, Writer};
use lattice_store::ConfirmationHeightInfo;
use lattice_types::{Account, BlockHash, SavedBlock};
use serde::{Deserialize, Serialize};

/// Selects the cementing strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CementingMode {
    /// Unbounded while the uncemented backlog is small, bounded otherwise.
    #[default]
    Automatic,
    Bounded,
    Unbounded,
}

impl CementingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Bounded => "bounded",
            Self::Unbounded => "unbounded",
        }
    }
}

pub trait Cementer: Send {
    fn mode(&self) -> CementingMode;

    /// Cement `hash` and every block it depends on, dependencies first.
    ///
    /// Returns the newly cemented blocks in the order they were cemented.
    /// An empty result means `hash` was already cemented.
    fn cement(&mut self, hash: &BlockHash) -> Result<Vec<SavedBlock>, LedgerError>;
}

/// Confirmation heights as the store will see them once pending writes are
/// flushed. Loaded lazily, one account at a time.
pub(crate) struct HeightOverlay<'a> {
    ledger: &'a Ledger,
    heights: HashMap<Account, ConfirmationHeightInfo>,
}

impl<'a> HeightOverlay<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            heights: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, account: &Account) -> Result<ConfirmationHeightInfo, LedgerError> {
        if let Some(info) = self.heights.get(account) {
            return Ok(*info);
        }
        let info = self.ledger.confirmation_height(account)?;
        self.heights.insert(*account, info);
        Ok(info)
    }

    pub(crate) fn set(&mut self, account: Account, info: ConfirmationHeightInfo) {
        self.heights.insert(account, info);
    }

    pub(crate) fn is_cemented(&mut self, hash: &BlockHash) -> Result<bool, LedgerError> {
        let block = load(self.ledger, hash)?;
        Ok(block.height() <= self.get(&block.account())?.height)
    }
}

/// Cemented blocks not yet committed, plus the height each touched account
/// will end up at.
#[derive(Default)]
pub(crate) struct PendingWrites {
    blocks: Vec<SavedBlock>,
    heights: HashMap<Account, ConfirmationHeightInfo>,
}

impl PendingWrites {
    pub(crate) fn push(&mut self, block: SavedBlock) {
        let info = ConfirmationHeightInfo::new(block.height(), block.hash());
        self.heights
            .entry(block.account())
            .and_modify(|current| {
                if info.height > current.height {
                    *current = info;
                }
            })
            .or_insert(info);
        self.blocks.push(block);
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Commit every pending height in one write and hand back the blocks.
    pub(crate) fn flush(&mut self, ledger: &Ledger) -> Result<Vec<SavedBlock>, LedgerError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let updates: Vec<_> = self.heights.drain().collect();
        {
            let _guard = ledger.write_queue().wait(Writer::ConfirmationHeight);
            ledger.write_confirmation_heights(&updates)?;
        }
        tracing::debug!(blocks = self.blocks.len(), accounts = updates.len(), "cementing flushed");
        Ok(std::mem::take(&mut self.blocks))
    }
}

pub(crate) fn load(ledger: &Ledger, hash: &BlockHash) -> Result<SavedBlock, LedgerError> {
    ledger.block(hash)?.ok_or(LedgerError::BlockNotFound(*hash))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use lattice_ledger::LedgerContext;
    use lattice_types::Amount;

    /// Genesis sends to `a`, `a` opens and sends on to `b`, `b` opens and
    /// receives a second send from genesis. Returns the ledger and the last
    /// receive on `b`.
    pub(crate) fn chained_receives() -> (LedgerContext, SavedBlock) {
        let ctx = LedgerContext::new();
        let genesis = ctx.genesis_account();
        let a = Account::from(10);
        let b = Account::from(11);
        ctx.fund(a, Amount::new(1000));
        let a_to_b = ctx.send(a, b, Amount::new(400));
        ctx.open(b, a_to_b.hash(), b);
        let genesis_to_b = ctx.send(genesis, b, Amount::new(5));
        let receive = ctx.receive(b, genesis_to_b.hash());
        (ctx, receive)
    }

    /// Confirmation height of every account in the ledger.
    pub(crate) fn heights(ctx: &LedgerContext) -> Vec<(Account, ConfirmationHeightInfo)> {
        use lattice_store::AccountStore;
        ctx.store
            .iter_accounts()
            .unwrap()
            .into_iter()
            .map(|(account, _)| (account, ctx.ledger.confirmation_height(&account).unwrap()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_ledger::LedgerContext;
    use lattice_types::Amount;

    #[test]
    fn pending_writes_keep_highest_per_account() {
        let ctx = LedgerContext::new();
        let genesis = ctx.genesis_account();
        let first = ctx.send(genesis, Account::from(5), Amount::new(1));
        let second = ctx.send(genesis, Account::from(5), Amount::new(1));

        let mut pending = PendingWrites::default();
        pending.push(first.clone());
        pending.push(second.clone());
        assert_eq!(pending.len(), 2);

        let flushed = pending.flush(&ctx.ledger).unwrap();
        assert_eq!(flushed, vec![first, second.clone()]);
        assert!(pending.is_empty());
        let info = ctx.ledger.confirmation_height(&genesis).unwrap();
        assert_eq!(info, ConfirmationHeightInfo::new(3, second.hash()));
        assert!(pending.flush(&ctx.ledger).unwrap().is_empty());
    }

    #[test]
    fn overlay_sees_unflushed_heights() {
        let ctx = LedgerContext::new();
        let genesis = ctx.genesis_account();
        let send = ctx.send(genesis, Account::from(5), Amount::new(1));

        let mut overlay = HeightOverlay::new(&ctx.ledger);
        assert!(!overlay.is_cemented(&send.hash()).unwrap());
        overlay.set(genesis, ConfirmationHeightInfo::new(2, send.hash()));
        assert!(overlay.is_cemented(&send.hash()).unwrap());
        assert!(!ctx.ledger.block_confirmed(&send.hash()).unwrap());
        assert!(matches!(
            overlay.is_cemented(&BlockHash::from(404)),
            Err(LedgerError::BlockNotFound(_))
        ));
    }
}
