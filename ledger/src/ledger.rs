//! The ledger: block acceptance and the queries consensus is built on.
//!
//! Reads go straight to the store. Every accepted block becomes one
//! [`WriteBatch`] (block, predecessor successor link, account info and
//! receivable entry) committed atomically; representative weights are kept
//! in memory and adjusted after the commit.
//!
//! Writers (block processing and cementing) serialize through
//! [`WriteQueue`]; the ledger itself does not lock around `process`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_store::{
    AccountInfo, ConfirmationHeightInfo, LedgerStore, PendingInfo, PendingKey, WriteBatch,
};
use lattice_types::{
    Account, Amount, Block, BlockDetails, BlockHash, BlockSideband, SavedBlock, Timestamp,
};

use crate::{DependentBlocks, Genesis, LedgerError, RepWeights, WriteQueue};

/// Outcome of offering a block to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Accepted and persisted.
    Progress(SavedBlock),
    /// Already in the ledger.
    Old,
    /// The previous block is unknown.
    GapPrevious,
    /// The send block being received is unknown.
    GapSource,
    /// Another block already occupies this chain position.
    Fork,
    /// The source send has no receivable entry for this account.
    Unreceivable,
    /// A send that would increase the balance.
    NegativeSpend,
    /// The balance does not match the received amount, or a change carries a link.
    BalanceMismatch,
    /// Structurally invalid for this position.
    Invalid,
}

impl ProcessResult {
    pub fn is_progress(&self) -> bool {
        matches!(self, Self::Progress(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Old => "old",
            Self::GapPrevious => "gap_previous",
            Self::GapSource => "gap_source",
            Self::Fork => "fork",
            Self::Unreceivable => "unreceivable",
            Self::NegativeSpend => "negative_spend",
            Self::BalanceMismatch => "balance_mismatch",
            Self::Invalid => "invalid",
        }
    }
}

/// What a block does to its account, worked out before anything is written.
struct Effect {
    balance: Amount,
    representative: Account,
    details: BlockDetails,
    /// Send: receivable entry to create.
    send_to: Option<(Account, Amount)>,
    /// Receive: receivable entry to consume.
    received: Option<PendingKey>,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    genesis: Genesis,
    rep_weights: RepWeights,
    write_queue: Arc<WriteQueue>,
    block_count: AtomicU64,
    cemented_count: AtomicU64,
}

impl Ledger {
    /// Open a ledger over `store`, seeding it with `genesis` if it is empty.
    pub fn new(store: Arc<dyn LedgerStore>, genesis: Genesis) -> Result<Self, LedgerError> {
        if store.block_count()? == 0 {
            let mut batch = WriteBatch::new();
            batch
                .put_block(genesis.block.clone())
                .put_account(
                    genesis.account,
                    AccountInfo {
                        head: genesis.hash(),
                        representative: genesis.account,
                        open_block: genesis.hash(),
                        balance: genesis.block.balance(),
                        modified: genesis.block.timestamp(),
                        block_count: 1,
                    },
                )
                .put_confirmation_height(
                    genesis.account,
                    ConfirmationHeightInfo::new(1, genesis.hash()),
                );
            store.commit(batch)?;
            tracing::info!(account = %genesis.account, hash = %genesis.hash(), "seeded genesis");
        }

        let rep_weights = RepWeights::new();
        let accounts = store.iter_accounts()?;
        rep_weights.rebuild(
            accounts
                .iter()
                .map(|(_, info)| (info.representative, info.balance)),
        );
        let cemented: u64 = store
            .iter_confirmation_heights()?
            .iter()
            .map(|(_, info)| info.height)
            .sum();

        let ledger = Self {
            block_count: AtomicU64::new(store.block_count()?),
            cemented_count: AtomicU64::new(cemented),
            store,
            genesis,
            rep_weights,
            write_queue: Arc::new(WriteQueue::new()),
        };
        tracing::info!(
            blocks = ledger.block_count(),
            cemented = ledger.cemented_count(),
            accounts = accounts.len(),
            "ledger opened"
        );
        Ok(ledger)
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub fn rep_weights(&self) -> &RepWeights {
        &self.rep_weights
    }

    pub fn write_queue(&self) -> &Arc<WriteQueue> {
        &self.write_queue
    }

    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }

    pub fn cemented_count(&self) -> u64 {
        self.cemented_count.load(Ordering::Relaxed)
    }

    pub fn account_count(&self) -> Result<u64, LedgerError> {
        Ok(self.store.account_count()?)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, LedgerError> {
        Ok(self.store.get_block(hash)?)
    }

    pub fn block_exists(&self, hash: &BlockHash) -> Result<bool, LedgerError> {
        Ok(self.store.block_exists(hash)?)
    }

    pub fn account_info(&self, account: &Account) -> Result<Option<AccountInfo>, LedgerError> {
        Ok(self.store.get_account(account)?)
    }

    /// Cemented prefix of `account`; height zero if nothing is cemented.
    pub fn confirmation_height(
        &self,
        account: &Account,
    ) -> Result<ConfirmationHeightInfo, LedgerError> {
        Ok(self
            .store
            .get_confirmation_height(account)?
            .unwrap_or_default())
    }

    pub fn successor(&self, hash: &BlockHash) -> Result<Option<BlockHash>, LedgerError> {
        Ok(self
            .store
            .get_block(hash)?
            .map(|b| b.successor())
            .filter(|s| !s.is_zero()))
    }

    /// True if `hash` is in the ledger at or below its account's confirmation height.
    pub fn block_confirmed(&self, hash: &BlockHash) -> Result<bool, LedgerError> {
        match self.store.get_block(hash)? {
            Some(block) => {
                let info = self.confirmation_height(&block.account())?;
                Ok(block.height() <= info.height)
            }
            None => Ok(false),
        }
    }

    pub fn dependents(&self, block: &SavedBlock) -> DependentBlocks {
        DependentBlocks::of(block)
    }

    /// True once every block `block` depends on is cemented.
    pub fn dependents_confirmed(&self, block: &SavedBlock) -> Result<bool, LedgerError> {
        for dependency in self.dependents(block).iter() {
            if !self.block_confirmed(&dependency)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Voting weight delegated to `representative`.
    pub fn weight(&self, representative: &Account) -> Amount {
        self.rep_weights.weight(representative)
    }

    /// Sum of all delegated weight.
    pub fn total_weight(&self) -> Amount {
        self.rep_weights.total()
    }

    pub fn pending_info(&self, key: &PendingKey) -> Result<Option<PendingInfo>, LedgerError> {
        Ok(self.store.get_pending(key)?)
    }

    // ── Block acceptance ────────────────────────────────────────────────

    /// Validate `block` against the current ledger and persist it if valid.
    ///
    /// Rejections are returned as [`ProcessResult`] values; only storage
    /// failures are errors.
    pub fn process(&self, block: &Block) -> Result<ProcessResult, LedgerError> {
        let hash = block.hash();
        if self.store.block_exists(&hash)? {
            return Ok(ProcessResult::Old);
        }

        let previous_hash = block.previous();
        let (account, previous, info) = if previous_hash.is_zero() {
            let Some(account) = block.account_field() else {
                return Ok(ProcessResult::Invalid);
            };
            if account.is_zero() {
                return Ok(ProcessResult::Invalid);
            }
            if self.store.get_account(&account)?.is_some() {
                return Ok(ProcessResult::Fork);
            }
            (account, None, None)
        } else {
            let Some(previous) = self.store.get_block(&previous_hash)? else {
                return Ok(ProcessResult::GapPrevious);
            };
            let account = previous.account();
            if block.account_field().is_some_and(|a| a != account) {
                return Ok(ProcessResult::Invalid);
            }
            let info = self
                .store
                .get_account(&account)?
                .ok_or(LedgerError::AccountNotFound(account))?;
            if info.head != previous_hash {
                return Ok(ProcessResult::Fork);
            }
            (account, Some(previous), Some(info))
        };

        let effect = match self.effect(block, account, previous.as_ref(), info.as_ref())? {
            Ok(effect) => effect,
            Err(rejection) => return Ok(rejection),
        };

        let height = previous.as_ref().map_or(1, |p| p.height() + 1);
        let now = Timestamp::now();
        let saved = SavedBlock::new(
            block.clone(),
            BlockSideband {
                account,
                height,
                successor: BlockHash::ZERO,
                balance: effect.balance,
                timestamp: now,
                details: effect.details,
            },
        );

        let mut batch = WriteBatch::new();
        batch.put_block(saved.clone());
        if previous.is_some() {
            batch.set_successor(previous_hash, hash);
        }
        batch.put_account(
            account,
            AccountInfo {
                head: hash,
                representative: effect.representative,
                open_block: info.as_ref().map_or(hash, |i| i.open_block),
                balance: effect.balance,
                modified: now,
                block_count: height,
            },
        );
        if let Some((destination, amount)) = effect.send_to {
            batch.put_pending(
                PendingKey::new(destination, hash),
                PendingInfo {
                    source: account,
                    amount,
                },
            );
        }
        if let Some(key) = effect.received {
            batch.delete_pending(key);
        }
        self.store.commit(batch)?;

        if let Some(info) = &info {
            self.rep_weights.sub(info.representative, info.balance);
        }
        self.rep_weights.add(effect.representative, effect.balance);
        self.block_count.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(%hash, %account, height, "block accepted");
        Ok(ProcessResult::Progress(saved))
    }

    /// Work out balances, representative and receivable changes of `block`.
    /// The inner `Err` is a rejection, the outer one a storage failure.
    fn effect(
        &self,
        block: &Block,
        account: Account,
        previous: Option<&SavedBlock>,
        info: Option<&AccountInfo>,
    ) -> Result<Result<Effect, ProcessResult>, LedgerError> {
        let previous_balance = previous.map_or(Amount::ZERO, |p| p.balance());
        let previous_rep = info.map_or(Account::ZERO, |i| i.representative);

        let effect = match block {
            Block::Send(b) => {
                let Some(amount) = previous_balance.checked_sub(b.balance) else {
                    return Ok(Err(ProcessResult::NegativeSpend));
                };
                Effect {
                    balance: b.balance,
                    representative: previous_rep,
                    details: BlockDetails {
                        is_send: true,
                        is_receive: false,
                    },
                    send_to: Some((b.destination, amount)),
                    received: None,
                }
            }
            Block::Receive(b) => {
                let (key, amount) = match self.receivable(account, b.source)? {
                    Ok(found) => found,
                    Err(rejection) => return Ok(Err(rejection)),
                };
                let Some(balance) = previous_balance.checked_add(amount) else {
                    return Ok(Err(ProcessResult::BalanceMismatch));
                };
                Effect {
                    balance,
                    representative: previous_rep,
                    details: receive_details(),
                    send_to: None,
                    received: Some(key),
                }
            }
            Block::Open(b) => {
                let (key, amount) = match self.receivable(account, b.source)? {
                    Ok(found) => found,
                    Err(rejection) => return Ok(Err(rejection)),
                };
                Effect {
                    balance: amount,
                    representative: b.representative,
                    details: receive_details(),
                    send_to: None,
                    received: Some(key),
                }
            }
            Block::Change(b) => Effect {
                balance: previous_balance,
                representative: b.representative,
                details: BlockDetails::default(),
                send_to: None,
                received: None,
            },
            Block::State(b) => {
                if b.balance < previous_balance {
                    Effect {
                        balance: b.balance,
                        representative: b.representative,
                        details: BlockDetails {
                            is_send: true,
                            is_receive: false,
                        },
                        send_to: Some((b.link.as_account(), previous_balance - b.balance)),
                        received: None,
                    }
                } else if b.balance > previous_balance {
                    if b.link.is_zero() {
                        return Ok(Err(ProcessResult::BalanceMismatch));
                    }
                    let (key, amount) = match self.receivable(account, b.link.as_block_hash())? {
                        Ok(found) => found,
                        Err(rejection) => return Ok(Err(rejection)),
                    };
                    if previous_balance.checked_add(amount) != Some(b.balance) {
                        return Ok(Err(ProcessResult::BalanceMismatch));
                    }
                    Effect {
                        balance: b.balance,
                        representative: b.representative,
                        details: receive_details(),
                        send_to: None,
                        received: Some(key),
                    }
                } else {
                    if !b.link.is_zero() {
                        return Ok(Err(ProcessResult::BalanceMismatch));
                    }
                    if previous.is_none() {
                        // An open must receive something.
                        return Ok(Err(ProcessResult::Invalid));
                    }
                    Effect {
                        balance: b.balance,
                        representative: b.representative,
                        details: BlockDetails::default(),
                        send_to: None,
                        received: None,
                    }
                }
            }
        };
        Ok(Ok(effect))
    }

    /// Look up the receivable entry `source` left for `account`.
    fn receivable(
        &self,
        account: Account,
        source: BlockHash,
    ) -> Result<Result<(PendingKey, Amount), ProcessResult>, LedgerError> {
        if !self.store.block_exists(&source)? {
            return Ok(Err(ProcessResult::GapSource));
        }
        let key = PendingKey::new(account, source);
        match self.store.get_pending(&key)? {
            Some(pending) => Ok(Ok((key, pending.amount))),
            None => Ok(Err(ProcessResult::Unreceivable)),
        }
    }

    // ── Cementing ───────────────────────────────────────────────────────

    /// Persist new confirmation heights in one write.
    ///
    /// Heights must not decrease and must not exceed the account's block
    /// count. Returns the number of newly cemented blocks.
    pub fn write_confirmation_heights(
        &self,
        updates: &[(Account, ConfirmationHeightInfo)],
    ) -> Result<u64, LedgerError> {
        let mut batch = WriteBatch::new();
        let mut added = 0u64;
        let mut latest: HashMap<Account, u64> = HashMap::new();
        for (account, info) in updates {
            let current = match latest.get(account) {
                Some(height) => *height,
                None => self.confirmation_height(account)?.height,
            };
            if info.height < current {
                return Err(LedgerError::HeightDecrease {
                    account: *account,
                    current,
                    requested: info.height,
                });
            }
            let block_count = self
                .account_info(account)?
                .map_or(0, |account_info| account_info.block_count);
            if info.height > block_count {
                return Err(LedgerError::HeightAboveBlockCount {
                    account: *account,
                    height: info.height,
                    block_count,
                });
            }
            added += info.height - current;
            latest.insert(*account, info.height);
            batch.put_confirmation_height(*account, *info);
        }
        self.store.commit(batch)?;
        self.cemented_count.fetch_add(added, Ordering::Relaxed);
        Ok(added)
    }

    // ── Rollback ────────────────────────────────────────────────────────

    /// Remove `hash` and every block built on top of it.
    ///
    /// Chains are unwound head first; a send whose receivable entry was
    /// already claimed first rolls back the receiving account up to and
    /// including the receive. Returns the removed blocks in removal order.
    /// Cemented blocks are never removed: an uncemented send can only have
    /// been received by uncemented blocks, so only a cemented target fails.
    pub fn rollback(&self, hash: &BlockHash) -> Result<Vec<SavedBlock>, LedgerError> {
        let target = self.block(hash)?.ok_or(LedgerError::BlockNotFound(*hash))?;
        let account = target.account();
        if target.height() <= self.confirmation_height(&account)?.height {
            return Err(LedgerError::RollbackCemented(*hash));
        }

        let mut rolled_back = Vec::new();
        while self.store.block_exists(hash)? {
            let info = self
                .account_info(&account)?
                .ok_or(LedgerError::AccountNotFound(account))?;
            self.rollback_head(account, info, &mut rolled_back)?;
        }
        Ok(rolled_back)
    }

    fn rollback_head(
        &self,
        account: Account,
        info: AccountInfo,
        rolled_back: &mut Vec<SavedBlock>,
    ) -> Result<(), LedgerError> {
        let head = self
            .block(&info.head)?
            .ok_or(LedgerError::BlockNotFound(info.head))?;
        let hash = head.hash();
        if head.height() <= self.confirmation_height(&account)?.height {
            return Err(LedgerError::RollbackCemented(hash));
        }

        let mut batch = WriteBatch::new();
        if let Some(destination) = head.destination() {
            let key = PendingKey::new(destination, hash);
            while self.store.get_pending(&key)?.is_none() {
                let destination_info = self
                    .account_info(&destination)?
                    .ok_or(LedgerError::AccountNotFound(destination))?;
                self.rollback_head(destination, destination_info, rolled_back)?;
            }
            batch.delete_pending(key);
        }

        let previous = match head.previous() {
            p if p.is_zero() => None,
            p => Some(self.block(&p)?.ok_or(LedgerError::BlockNotFound(p))?),
        };
        let previous_balance = previous.as_ref().map_or(Amount::ZERO, |p| p.balance());

        if let Some(source) = head.source() {
            let source_block = self
                .block(&source)?
                .ok_or(LedgerError::BlockNotFound(source))?;
            batch.put_pending(
                PendingKey::new(account, source),
                PendingInfo {
                    source: source_block.account(),
                    amount: head.balance() - previous_balance,
                },
            );
        }

        let restored = match &previous {
            Some(previous) => {
                let restored = AccountInfo {
                    head: previous.hash(),
                    representative: self.representative_at(previous)?,
                    open_block: info.open_block,
                    balance: previous.balance(),
                    modified: Timestamp::now(),
                    block_count: previous.height(),
                };
                batch
                    .set_successor(previous.hash(), BlockHash::ZERO)
                    .put_account(account, restored.clone());
                Some(restored)
            }
            None => {
                batch.delete_account(account);
                None
            }
        };
        batch.delete_block(hash);
        self.store.commit(batch)?;

        self.rep_weights.sub(info.representative, info.balance);
        if let Some(restored) = &restored {
            self.rep_weights.add(restored.representative, restored.balance);
        }
        self.block_count.fetch_sub(1, Ordering::Relaxed);

        tracing::debug!(%hash, %account, height = head.height(), "block rolled back");
        rolled_back.push(head);
        Ok(())
    }

    /// Representative in effect once `block` is the account head.
    fn representative_at(&self, block: &SavedBlock) -> Result<Account, LedgerError> {
        let mut current = block.clone();
        loop {
            if let Some(representative) = current.representative_field() {
                return Ok(representative);
            }
            let previous = current.previous();
            current = self
                .block(&previous)?
                .ok_or(LedgerError::BlockNotFound(previous))?;
        }
    }
}

fn receive_details() -> BlockDetails {
    BlockDetails {
        is_send: false,
        is_receive: true,
    }
}
