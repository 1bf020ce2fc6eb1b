//! LMDB environment setup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};

use crate::account::LmdbAccountStore;
use crate::block::LmdbBlockStore;
use crate::confirmation_height::LmdbConfirmationHeightStore;
use crate::pending::LmdbPendingStore;
use crate::LmdbError;

const BLOCKS_DB: &str = "blocks";
const ACCOUNTS_DB: &str = "accounts";
const CONFIRMATION_HEIGHT_DB: &str = "confirmation_height";
const PENDING_DB: &str = "pending";

/// Sizing parameters for the LMDB environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdbConfig {
    /// Maximum size of the memory map in bytes.
    #[serde(default = "default_map_size")]
    pub map_size: usize,
    #[serde(default = "default_max_dbs")]
    pub max_dbs: u32,
}

fn default_map_size() -> usize {
    // 16 GiB
    16 * 1024 * 1024 * 1024
}

fn default_max_dbs() -> u32 {
    16
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            map_size: default_map_size(),
            max_dbs: default_max_dbs(),
        }
    }
}

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    path: PathBuf,
    env: Arc<Env>,
    pub(crate) blocks_db: Database<Bytes, Bytes>,
    pub(crate) accounts_db: Database<Bytes, Bytes>,
    pub(crate) confirmation_height_db: Database<Bytes, Bytes>,
    pub(crate) pending_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment in the directory `path`.
    pub fn open(path: &Path, config: &LmdbConfig) -> Result<Self, LmdbError> {
        fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per directory by this process
        // and is never opened with conflicting flags elsewhere.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_dbs(config.max_dbs)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks_db = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(BLOCKS_DB))?;
        let accounts_db = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(ACCOUNTS_DB))?;
        let confirmation_height_db =
            env.create_database::<Bytes, Bytes>(&mut wtxn, Some(CONFIRMATION_HEIGHT_DB))?;
        let pending_db = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(PENDING_DB))?;
        wtxn.commit()?;

        tracing::info!(path = %path.display(), map_size = config.map_size, "opened LMDB environment");

        Ok(Self {
            path: path.to_path_buf(),
            env: Arc::new(env),
            blocks_db,
            accounts_db,
            confirmation_height_db,
            pending_db,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn env(&self) -> &Env {
        &self.env
    }

    /// Build the per-table stores sharing this environment.
    pub fn into_store(self) -> LmdbStore {
        let env = Arc::clone(&self.env);
        LmdbStore {
            blocks: LmdbBlockStore {
                env: Arc::clone(&env),
                blocks_db: self.blocks_db,
            },
            accounts: LmdbAccountStore {
                env: Arc::clone(&env),
                accounts_db: self.accounts_db,
            },
            confirmation_height: LmdbConfirmationHeightStore {
                env: Arc::clone(&env),
                confirmation_height_db: self.confirmation_height_db,
            },
            pending: LmdbPendingStore {
                env: Arc::clone(&env),
                pending_db: self.pending_db,
            },
            environment: self,
        }
    }
}

/// The full ledger store backed by one LMDB environment.
///
/// Implements [`lattice_store::LedgerStore`]; see `write_batch.rs` for commit.
pub struct LmdbStore {
    pub(crate) environment: LmdbEnvironment,
    pub(crate) blocks: LmdbBlockStore,
    pub(crate) accounts: LmdbAccountStore,
    pub(crate) confirmation_height: LmdbConfirmationHeightStore,
    pub(crate) pending: LmdbPendingStore,
}

impl LmdbStore {
    /// Open (or create) the store in `path`.
    pub fn open(path: &Path, config: &LmdbConfig) -> Result<Self, LmdbError> {
        Ok(LmdbEnvironment::open(path, config)?.into_store())
    }

    pub fn environment(&self) -> &LmdbEnvironment {
        &self.environment
    }
}
