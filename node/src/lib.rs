//! Lattice node: the components around consensus, and the wiring between them.
//!
//! - [`block_processor`]: applies incoming blocks to the ledger in batches.
//! - [`gap_cache`] and [`unchecked`]: blocks waiting on a missing dependency.
//! - [`confirming_set`]: queues confirmed winners and cements them with a
//!   [`cementing_bounded`] or [`cementing_unbounded`] strategy.
//! - [`backlog_scan`]: rediscovers accounts with uncemented blocks.
//! - [`node`]: builds and connects everything above with the consensus crate.
//! - [`config`], [`logging`], [`metrics`], [`error`]: the node's plumbing.

pub mod backlog_scan;
pub mod block_processor;
pub mod cementing;
pub mod cementing_bounded;
pub mod cementing_unbounded;
pub mod config;
pub mod confirming_set;
pub mod error;
pub mod gap_cache;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod unchecked;

pub use backlog_scan::{ActivatedInfo, BacklogScan, BacklogScanConfig};
pub use block_processor::{
    BlockContext, BlockProcessor, BlockProcessorConfig, BlockSource, ProcessingQueue,
    RolledBackObserver,
};
pub use cementing::{Cementer, CementingMode};
pub use cementing_bounded::BoundedCementer;
pub use cementing_unbounded::UnboundedCementer;
pub use config::{
    HintedSchedulerSection, NodeConfig, OptimisticSchedulerSection, VoteCacheSection,
};
pub use confirming_set::{CementedBatch, ConfirmingSet, ConfirmingSetConfig};
pub use error::NodeError;
pub use gap_cache::{GapCache, GapCacheConfig};
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::Node;
pub use unchecked::{UncheckedConfig, UncheckedMap};
