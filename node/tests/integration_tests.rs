//! Integration tests exercising the node end to end:
//! block processing → scheduling → elections → votes → cementing.
//!
//! Every test builds a real [`Node`] over an in-memory store on the dev
//! network, where the genesis representative holds the whole supply and a
//! single final vote from it is enough to confirm an election.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lattice_consensus::{ElectionStatus, VoteCode};
use lattice_ledger::{Genesis, Ledger, ProcessResult};
use lattice_node::{BlockSource, CementedBatch, Cementer, Node, NodeConfig, UnboundedCementer};
use lattice_nullables::NullStore;
use lattice_store::LedgerStore;
use lattice_types::{
    Account, Amount, Block, BlockHash, NetworkId, QualifiedRoot, SavedBlock, Vote,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TIMEOUT: Duration = Duration::from_secs(10);

fn assert_timely(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn config(backlog_scan: bool) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network = NetworkId::Dev;
    config.backlog_scan.enabled = backlog_scan;
    config.backlog_scan.interval_ms = 50;
    config
}

/// A store seeded with the dev genesis, plus whatever `setup` adds through
/// a ledger that is dropped before the node opens the store.
fn prepared_store(setup: impl FnOnce(&Arc<Ledger>)) -> Arc<NullStore> {
    let store = Arc::new(NullStore::new());
    let ledger = Arc::new(
        Ledger::new(store.clone(), Genesis::for_network(NetworkId::Dev)).unwrap(),
    );
    setup(&ledger);
    store
}

fn cement(ledger: &Arc<Ledger>, hash: &BlockHash) {
    UnboundedCementer::new(ledger.clone()).cement(hash).unwrap();
}

fn start_node(store: Arc<NullStore>, backlog_scan: bool) -> Node {
    lattice_utils::init_tracing();
    let store: Arc<dyn LedgerStore> = store;
    let node = Node::new(config(backlog_scan), store).unwrap();
    node.start().unwrap();
    node
}

fn genesis(ledger: &Ledger) -> Account {
    ledger.genesis().account
}

fn head(ledger: &Ledger, account: Account) -> BlockHash {
    ledger.account_info(&account).unwrap().unwrap().head
}

fn balance(ledger: &Ledger, account: Account) -> Amount {
    ledger.account_info(&account).unwrap().unwrap().balance
}

fn accept(ledger: &Ledger, block: Block) -> SavedBlock {
    match ledger.process(&block).unwrap() {
        ProcessResult::Progress(saved) => saved,
        other => panic!("block rejected: {}", other.as_str()),
    }
}

fn send(ledger: &Ledger, from: Account, to: Account, amount: u128) -> SavedBlock {
    let block = Block::new_send(
        head(ledger, from),
        to,
        balance(ledger, from) - Amount::new(amount),
    );
    accept(ledger, block)
}

fn final_vote(representative: Account, hash: BlockHash) -> Vote {
    Vote::new_final(representative, vec![hash])
}

fn exists(node: &Node, hash: &BlockHash) -> bool {
    node.ledger.block_exists(hash).unwrap()
}

fn confirmed(node: &Node, hash: &BlockHash) -> bool {
    node.ledger.block_confirmed(hash).unwrap()
}

// ---------------------------------------------------------------------------
// Gap handling
// ---------------------------------------------------------------------------

#[test]
fn gapped_blocks_are_persisted_once_their_dependency_arrives() {
    let store = prepared_store(|_| {});
    let node = start_node(store, false);
    let genesis = genesis(&node.ledger);
    let x = Account::from(100);
    let y = Account::from(101);

    let supply = balance(&node.ledger, genesis);
    let b1 = Block::new_send(head(&node.ledger, genesis), x, supply - Amount::new(10));
    let b2 = Block::new_send(b1.hash(), y, supply - Amount::new(20));
    let b3 = Block::new_open(b1.hash(), x, x);

    assert!(node.process_block(b2.clone(), BlockSource::Live));
    assert!(node.process_block(b3.clone(), BlockSource::Live));
    assert_timely("both gaps cached", || node.gap_cache.len() == 2);
    assert!(node.gap_cache.contains(&b2.hash()));
    assert!(node.gap_cache.contains(&b3.hash()));
    assert_eq!(node.unchecked.len(), 2);
    assert!(!exists(&node, &b2.hash()));

    assert!(node.process_block(b1.clone(), BlockSource::Live));
    assert_timely("gapped blocks persisted", || {
        exists(&node, &b1.hash()) && exists(&node, &b2.hash()) && exists(&node, &b3.hash())
    });
    assert_timely("gap cache drained", || node.gap_cache.is_empty());
    assert!(node.unchecked.is_empty());
    assert_eq!(node.ledger.block_count(), 4);
    node.stop();
}

// ---------------------------------------------------------------------------
// Elections
// ---------------------------------------------------------------------------

#[test]
fn quorum_confirms_one_of_two_competing_blocks() {
    let rep = Account::from(200);
    let store = prepared_store(|ledger| {
        let genesis = genesis(ledger);
        let funding = send(ledger, genesis, rep, 1_000);
        accept(ledger, Block::new_open(funding.hash(), rep, rep));
        cement(ledger, &head(ledger, rep));
    });
    let node = start_node(store, false);
    let genesis = genesis(&node.ledger);

    let statuses = Arc::new(Mutex::new(Vec::<ElectionStatus>::new()));
    let sink = statuses.clone();
    node.active_elections
        .on_confirmed(Box::new(move |status: &ElectionStatus| {
            sink.lock().unwrap().push(status.clone());
        }));
    let cemented = Arc::new(Mutex::new(Vec::<BlockHash>::new()));
    let sink = cemented.clone();
    node.confirming_set
        .on_cemented(Box::new(move |block: &SavedBlock| {
            sink.lock().unwrap().push(block.hash());
        }));

    let previous = head(&node.ledger, genesis);
    let remaining = balance(&node.ledger, genesis) - Amount::new(5);
    let winner = Block::new_send(previous, Account::from(300), remaining);
    let loser = Block::new_send(previous, Account::from(301), remaining);
    let root = winner.qualified_root();
    assert_eq!(root, loser.qualified_root());

    node.process_block(winner.clone(), BlockSource::Live);
    assert_timely("election started", || node.active_elections.active(&root));
    node.process_block(loser.clone(), BlockSource::Live);
    let election = node.active_elections.election(&root).unwrap();
    assert_timely("fork published", || election.contains(&loser.hash()));

    // A light representative backs the fork; the genesis representative
    // carries quorum for the other block.
    let codes = node.process_vote(&final_vote(rep, loser.hash()));
    assert_eq!(codes[&loser.hash()], VoteCode::Vote);
    assert!(!election.is_confirmed());
    let codes = node.process_vote(&final_vote(genesis, winner.hash()));
    assert_eq!(codes[&winner.hash()], VoteCode::Vote);

    assert_timely("winner cemented", || confirmed(&node, &winner.hash()));
    assert!(!exists(&node, &loser.hash()));
    assert!(node.recently_confirmed.hash_exists(&winner.hash()));
    assert!(!node.recently_confirmed.hash_exists(&loser.hash()));
    {
        let statuses = statuses.lock().unwrap();
        let status = statuses
            .iter()
            .find(|s| s.winner.qualified_root() == root)
            .unwrap();
        assert_eq!(status.winner.hash(), winner.hash());
        assert_eq!(status.block_count, 2);
        assert_eq!(status.voter_count, 2);
    }
    assert!(cemented.lock().unwrap().contains(&winner.hash()));
    assert!(!cemented.lock().unwrap().contains(&loser.hash()));

    // Late votes for the settled root are replays.
    let codes = node.process_vote(&final_vote(rep, loser.hash()));
    assert_ne!(codes[&loser.hash()], VoteCode::Vote);
    node.stop();
}

#[test]
fn fork_winning_quorum_replaces_the_ledger_block() {
    let store = prepared_store(|_| {});
    let node = start_node(store, false);
    let genesis = genesis(&node.ledger);

    let rolled_back = Arc::new(Mutex::new(Vec::<BlockHash>::new()));
    let sink = rolled_back.clone();
    node.block_processor.on_rolled_back(Box::new(
        move |blocks: &[SavedBlock], _root: &QualifiedRoot| {
            sink.lock().unwrap().extend(blocks.iter().map(|b| b.hash()));
        },
    ));

    let previous = head(&node.ledger, genesis);
    let remaining = balance(&node.ledger, genesis) - Amount::new(5);
    let first = Block::new_send(previous, Account::from(310), remaining);
    let fork = Block::new_send(previous, Account::from(311), remaining);
    let root = first.qualified_root();

    node.process_block(first.clone(), BlockSource::Live);
    assert_timely("election started", || node.active_elections.active(&root));
    assert!(exists(&node, &first.hash()));
    node.process_block(fork.clone(), BlockSource::Live);
    let election = node.active_elections.election(&root).unwrap();
    assert_timely("fork published", || election.contains(&fork.hash()));
    assert!(!exists(&node, &fork.hash()));

    node.process_vote(&final_vote(genesis, fork.hash()));

    assert_timely("fork cemented", || {
        exists(&node, &fork.hash()) && confirmed(&node, &fork.hash())
    });
    assert!(!exists(&node, &first.hash()));
    assert_eq!(head(&node.ledger, genesis), fork.hash());
    assert_eq!(
        node.ledger.confirmation_height(&genesis).unwrap().height,
        2
    );
    assert_eq!(*rolled_back.lock().unwrap(), vec![first.hash()]);
    node.stop();
}

#[test]
fn live_votes_mark_their_representative_online() {
    let store = prepared_store(|_| {});
    let node = start_node(store, false);
    let genesis = genesis(&node.ledger);
    assert!(node.election_context.online_reps.is_empty());

    node.process_vote(&final_vote(genesis, BlockHash::from(9)));
    assert!(!node.election_context.online_reps.is_empty());
    node.stop();
}

#[test]
fn votes_arriving_before_their_block_are_replayed_from_the_cache() {
    let store = prepared_store(|_| {});
    let node = start_node(store, false);
    let genesis = genesis(&node.ledger);
    let block = Block::new_send(
        head(&node.ledger, genesis),
        Account::from(400),
        balance(&node.ledger, genesis) - Amount::new(1),
    );

    let codes = node.process_vote(&final_vote(genesis, block.hash()));
    assert_eq!(codes[&block.hash()], VoteCode::Indeterminate);
    assert_eq!(node.election_context.vote_cache.lock().unwrap().len(), 1);

    node.process_block(block.clone(), BlockSource::Live);
    assert_timely("cached vote confirms the block", || {
        confirmed(&node, &block.hash())
    });
    node.stop();
}

#[test]
fn backlog_scan_elects_blocks_left_unconfirmed() {
    let mut pending = None;
    let store = prepared_store(|ledger| {
        pending = Some(send(ledger, genesis(ledger), Account::from(500), 7));
    });
    let pending = pending.unwrap();
    let node = start_node(store, true);
    let genesis = genesis(&node.ledger);

    assert_timely("backlog election", || {
        node.active_elections.active(&pending.qualified_root())
    });
    node.process_vote(&final_vote(genesis, pending.hash()));
    assert_timely("backlog block cemented", || {
        confirmed(&node, &pending.hash())
    });
    node.stop();
}

#[test]
fn cementing_activates_the_next_block_of_the_account() {
    let store = prepared_store(|_| {});
    let node = start_node(store, false);
    let genesis = genesis(&node.ledger);
    let supply = balance(&node.ledger, genesis);
    let first = Block::new_send(head(&node.ledger, genesis), Account::from(600), supply - Amount::new(1));
    let second = Block::new_send(first.hash(), Account::from(600), supply - Amount::new(2));

    node.process_block(first.clone(), BlockSource::Live);
    node.process_block(second.clone(), BlockSource::Live);
    assert_timely("both processed", || exists(&node, &second.hash()));
    // Only the first uncemented block of a chain is scheduled.
    assert_timely("first election", || {
        node.active_elections.active(&first.qualified_root())
    });
    assert!(!node.active_elections.active(&second.qualified_root()));

    node.process_vote(&final_vote(genesis, first.hash()));
    assert_timely("successor election", || {
        node.active_elections.active(&second.qualified_root())
    });
    node.process_vote(&final_vote(genesis, second.hash()));
    assert_timely("successor cemented", || confirmed(&node, &second.hash()));
    node.stop();
}

// ---------------------------------------------------------------------------
// Cementing
// ---------------------------------------------------------------------------

fn funded_receiver() -> (Arc<NullStore>, SavedBlock, SavedBlock) {
    let account = Account::from(700);
    let mut blocks = None;
    let store = prepared_store(|ledger| {
        let send = send(ledger, genesis(ledger), account, 50);
        let open = accept(ledger, Block::new_open(send.hash(), account, account));
        blocks = Some((send, open));
    });
    let (send, open) = blocks.unwrap();
    (store, send, open)
}

#[test]
fn cementing_a_receive_cements_its_source_in_the_same_pass() {
    let (store, send, open) = funded_receiver();
    let node = start_node(store, false);
    let batches = Arc::new(Mutex::new(Vec::<CementedBatch>::new()));
    let sink = batches.clone();
    node.confirming_set
        .on_batch_cemented(Box::new(move |batch: &CementedBatch| {
            sink.lock().unwrap().push(batch.clone());
        }));

    assert!(node.confirming_set.add(open.hash()));
    assert_timely("open cemented", || confirmed(&node, &open.hash()));
    assert!(confirmed(&node, &send.hash()));

    assert_timely("batch notified", || !batches.lock().unwrap().is_empty());
    let batches = batches.lock().unwrap();
    let batch = batches
        .iter()
        .find(|b| b.cemented.iter().any(|block| block.hash() == open.hash()))
        .unwrap();
    let order: Vec<_> = batch.cemented.iter().map(|b| b.hash()).collect();
    assert_eq!(order, vec![send.hash(), open.hash()]);
    node.stop();
}

#[test]
fn recementing_is_reported_and_changes_nothing() {
    let (store, _send, open) = funded_receiver();
    let node = start_node(store, false);
    let already = Arc::new(Mutex::new(Vec::<BlockHash>::new()));
    let sink = already.clone();
    node.confirming_set
        .on_already_cemented(Box::new(move |hash: &BlockHash| {
            sink.lock().unwrap().push(*hash);
        }));

    node.confirming_set.add(open.hash());
    assert_timely("open cemented", || confirmed(&node, &open.hash()));
    assert_timely("set drained", || node.confirming_set.is_empty());
    let account = open.account();
    let height_before = node.ledger.confirmation_height(&account).unwrap();
    let cemented_before = node.ledger.cemented_count();

    for _ in 0..2 {
        node.confirming_set.add(open.hash());
        assert_timely("set drained", || node.confirming_set.is_empty());
    }
    assert_timely("already cemented reported", || {
        already.lock().unwrap().len() == 2
    });
    assert!(already.lock().unwrap().iter().all(|h| *h == open.hash()));
    assert_eq!(node.ledger.confirmation_height(&account).unwrap(), height_before);
    assert_eq!(node.ledger.cemented_count(), cemented_before);
    node.stop();
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
fn metrics_track_node_activity() {
    let (store, _send, open) = funded_receiver();
    let node = start_node(store, false);
    node.confirming_set.add(open.hash());
    assert_timely("open cemented", || confirmed(&node, &open.hash()));
    assert_timely("cemented counted", || node.metrics.cemented_blocks.get() == 2);

    node.process_vote(&final_vote(Account::from(1), BlockHash::from(1)));
    node.refresh_metrics();
    assert_eq!(node.metrics.votes_processed.get(), 1);
    assert_eq!(node.metrics.vote_cache.get(), 1);
    let text = node.metrics.encode().unwrap();
    assert!(text.contains("lattice_cemented_blocks_total 2"));
    node.stop();
}
