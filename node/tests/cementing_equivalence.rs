//! Bounded and unbounded cementing must leave the store in the same state.
//!
//! Random lattices are built identically in two ledgers; the same targets
//! are cemented in each, one ledger per strategy, and every account's
//! confirmation height is compared afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use lattice_ledger::LedgerContext;
use lattice_node::{BoundedCementer, Cementer, UnboundedCementer};
use lattice_store::{AccountStore, ConfirmationHeightInfo};
use lattice_types::{Account, Amount, BlockHash};
use proptest::prelude::*;

const ACCOUNTS: usize = 4;

#[derive(Clone, Debug)]
enum Op {
    /// Send one unit from participant `from` to participant `to`.
    Send { from: usize, to: usize },
    /// Receive (or open with) the oldest send still pending for `to`.
    Receive { to: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..=ACCOUNTS, 0..=ACCOUNTS).prop_map(|(from, to)| Op::Send { from, to }),
        (0..=ACCOUNTS).prop_map(|to| Op::Receive { to }),
    ]
}

/// Participant 0 is genesis; the rest start unopened.
fn participant(ctx: &LedgerContext, index: usize) -> Account {
    if index == 0 {
        ctx.genesis_account()
    } else {
        Account::from(1000 + index as u64)
    }
}

/// Apply `ops` to a fresh ledger, skipping any that would be rejected.
/// Returns the ledger and every block hash it accepted, in order.
fn build(ops: &[Op]) -> (LedgerContext, Vec<BlockHash>) {
    let ctx = LedgerContext::new();
    let mut hashes = vec![ctx.ledger.genesis().hash()];
    let mut pending: Vec<(usize, BlockHash)> = Vec::new();

    for op in ops {
        match *op {
            Op::Send { from, to } => {
                if from == to {
                    continue;
                }
                let sender = participant(&ctx, from);
                let opened = ctx.ledger.account_info(&sender).unwrap().is_some();
                if !opened || ctx.balance(sender) < Amount::new(1) {
                    continue;
                }
                let send = ctx.send(sender, participant(&ctx, to), Amount::new(1));
                pending.push((to, send.hash()));
                hashes.push(send.hash());
            }
            Op::Receive { to } => {
                let Some(position) = pending.iter().position(|(dest, _)| *dest == to) else {
                    continue;
                };
                let (_, source) = pending.remove(position);
                let account = participant(&ctx, to);
                let block = if ctx.ledger.account_info(&account).unwrap().is_some() {
                    ctx.receive(account, source)
                } else {
                    ctx.open(account, source, account)
                };
                hashes.push(block.hash());
            }
        }
    }
    (ctx, hashes)
}

fn heights(ctx: &LedgerContext) -> BTreeMap<Account, ConfirmationHeightInfo> {
    ctx.store
        .iter_accounts()
        .unwrap()
        .into_iter()
        .map(|(account, _)| (account, ctx.ledger.confirmation_height(&account).unwrap()))
        .collect()
}

fn cement_all(cementer: &mut dyn Cementer, targets: &[BlockHash]) -> Vec<BlockHash> {
    targets
        .iter()
        .flat_map(|target| cementer.cement(target).unwrap())
        .map(|block| block.hash())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bounded_and_unbounded_agree(
        ops in prop::collection::vec(op(), 1..60),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..5),
        max_pending_writes in 1usize..8,
    ) {
        let (bounded_ctx, hashes) = build(&ops);
        let (unbounded_ctx, same_hashes) = build(&ops);
        prop_assert_eq!(&hashes, &same_hashes);
        let targets: Vec<BlockHash> = picks.iter().map(|i| *i.get(&hashes)).collect();

        let mut bounded = BoundedCementer::new(
            bounded_ctx.ledger.clone(),
            max_pending_writes,
            Duration::from_secs(60),
        );
        let mut unbounded = UnboundedCementer::new(unbounded_ctx.ledger.clone());
        let bounded_order = cement_all(&mut bounded, &targets);
        let unbounded_order = cement_all(&mut unbounded, &targets);

        prop_assert_eq!(heights(&bounded_ctx), heights(&unbounded_ctx));
        prop_assert_eq!(bounded_ctx.ledger.cemented_count(), unbounded_ctx.ledger.cemented_count());

        // Same set of blocks, each cemented once.
        let mut sorted_bounded = bounded_order.clone();
        let mut sorted_unbounded = unbounded_order.clone();
        sorted_bounded.sort();
        sorted_unbounded.sort();
        prop_assert_eq!(&sorted_bounded, &sorted_unbounded);
        sorted_bounded.dedup();
        prop_assert_eq!(sorted_bounded.len(), bounded_order.len());

        for target in &targets {
            prop_assert!(bounded_ctx.ledger.block_confirmed(target).unwrap());
        }
    }
}
