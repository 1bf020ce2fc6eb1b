//! Backlog scan: periodic sweep of the account table for unconfirmed chains.
//!
//! Accounts are read a page at a time in account order. Every account whose
//! confirmation height is below its block count is reported to the batch
//! observers, which hand it to the election schedulers. After a full sweep
//! the cursor wraps and the thread sleeps for `interval_ms`, or until
//! [`BacklogScan::trigger`] is called.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_ledger::{Ledger, LedgerError};
use lattice_store::{AccountInfo, ConfirmationHeightInfo};
use lattice_types::Account;
use lattice_utils::{DetailType, StatType, Stats};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogScanConfig {
    pub enabled: bool,
    /// Accounts read per page.
    pub batch_size: usize,
    /// Pause between full sweeps.
    pub interval_ms: u64,
}

impl Default for BacklogScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 1000,
            interval_ms: 60_000,
        }
    }
}

impl BacklogScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// An account with blocks above its confirmation height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivatedInfo {
    pub account: Account,
    pub account_info: AccountInfo,
    pub conf_info: ConfirmationHeightInfo,
}

pub type BatchActivatedObserver = Box<dyn Fn(&[ActivatedInfo]) + Send + Sync>;

struct ScanState {
    stopped: bool,
    triggered: bool,
    cursor: Option<Account>,
}

pub struct BacklogScan {
    config: BacklogScanConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    state: Mutex<ScanState>,
    condition: Condvar,
    observers: Mutex<Vec<BatchActivatedObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BacklogScan {
    pub fn new(config: BacklogScanConfig, ledger: Arc<Ledger>, stats: Arc<Stats>) -> Self {
        Self {
            config,
            ledger,
            stats,
            state: Mutex::new(ScanState {
                stopped: false,
                triggered: false,
                cursor: None,
            }),
            condition: Condvar::new(),
            observers: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn on_batch_activated(&self, observer: BatchActivatedObserver) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Start a sweep now instead of waiting for the interval.
    pub fn trigger(&self) {
        self.state.lock().unwrap().triggered = true;
        self.condition.notify_all();
    }

    /// Scan one page after the current cursor and notify observers.
    ///
    /// Returns true once the sweep has reached the end of the table; the
    /// cursor is then reset so the next call starts over.
    pub fn scan_page(&self) -> Result<bool, LedgerError> {
        let cursor = self.state.lock().unwrap().cursor;
        let page = self
            .ledger
            .store()
            .iter_accounts_paged(cursor.as_ref(), self.config.batch_size.max(1))?;
        self.stats.inc(StatType::BacklogScan, DetailType::Loop);

        let finished = page.len() < self.config.batch_size.max(1);
        let next_cursor = if finished {
            None
        } else {
            page.last().map(|(account, _)| *account)
        };

        let mut activated = Vec::new();
        for (account, account_info) in page {
            let conf_info = self.ledger.confirmation_height(&account)?;
            if conf_info.height < account_info.block_count {
                activated.push(ActivatedInfo {
                    account,
                    account_info,
                    conf_info,
                });
            }
        }
        self.stats
            .add(StatType::BacklogScan, DetailType::Activated, activated.len() as u64);

        self.state.lock().unwrap().cursor = next_cursor;

        if !activated.is_empty() {
            debug!(count = activated.len(), "backlog accounts activated");
            let observers = self.observers.lock().unwrap();
            for observer in observers.iter() {
                observer(&activated);
            }
        }
        Ok(finished)
    }

    fn run(&self) {
        loop {
            {
                let state = self.state.lock().unwrap();
                if state.stopped {
                    return;
                }
            }

            let finished = match self.scan_page() {
                Ok(finished) => finished,
                Err(err) => {
                    warn!(%err, "backlog scan failed");
                    self.state.lock().unwrap().cursor = None;
                    true
                }
            };

            if finished {
                let state = self.state.lock().unwrap();
                let (mut state, _) = self
                    .condition
                    .wait_timeout_while(state, self.config.interval(), |s| {
                        !s.stopped && !s.triggered
                    })
                    .unwrap();
                state.triggered = false;
            }
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if !self.config.enabled {
            info!("backlog scan disabled");
            return Ok(());
        }
        debug_assert!(self.thread.lock().unwrap().is_none());
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("Backlog scan".to_owned())
            .spawn(move || this.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.condition.notify_all();
        let thread = self.thread.lock().unwrap().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for BacklogScan {
    fn drop(&mut self) {
        debug_assert!(self.thread.lock().unwrap().is_none());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cementing::Cementer;
    use crate::cementing_unbounded::UnboundedCementer;
    use lattice_ledger::LedgerContext;
    use lattice_types::Amount;
    use std::time::Instant;

    fn scan(ctx: &LedgerContext, batch_size: usize) -> (Arc<BacklogScan>, Arc<Mutex<Vec<Account>>>) {
        let scan = Arc::new(BacklogScan::new(
            BacklogScanConfig {
                enabled: true,
                batch_size,
                interval_ms: 60_000,
            },
            ctx.ledger.clone(),
            Arc::new(Stats::new()),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        scan.on_batch_activated(Box::new(move |batch: &[ActivatedInfo]| {
            sink.lock()
                .unwrap()
                .extend(batch.iter().map(|info| info.account));
        }));
        (scan, seen)
    }

    #[test]
    fn reports_only_unconfirmed_accounts() {
        let ctx = LedgerContext::new();
        let (send, _open) = ctx.fund(Account::from(20), Amount::new(50));
        UnboundedCementer::new(ctx.ledger.clone())
            .cement(&send.hash())
            .unwrap();

        let (scan, seen) = scan(&ctx, 100);
        assert!(scan.scan_page().unwrap());
        // Genesis is cemented up to the send; the new account is not.
        assert_eq!(*seen.lock().unwrap(), vec![Account::from(20)]);
    }

    #[test]
    fn pages_through_accounts_and_wraps() {
        let ctx = LedgerContext::new();
        for n in 20..25 {
            ctx.fund(Account::from(n), Amount::new(1));
        }
        // Genesis and the five funded accounts all have uncemented blocks.
        let (scan, seen) = scan(&ctx, 4);
        let mut pages = 1;
        while !scan.scan_page().unwrap() {
            pages += 1;
        }
        assert_eq!(pages, 2);
        let mut accounts = seen.lock().unwrap().clone();
        accounts.sort();
        assert_eq!(accounts.len(), 6);
        assert!(accounts.contains(&ctx.genesis_account()));

        seen.lock().unwrap().clear();
        assert!(!scan.scan_page().unwrap());
        assert_eq!(seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn trigger_starts_a_new_sweep() {
        let ctx = LedgerContext::new();
        let (scan, seen) = scan(&ctx, 100);
        scan.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while scan.stats.count(StatType::BacklogScan, DetailType::Loop) == 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(seen.lock().unwrap().is_empty());

        ctx.fund(Account::from(30), Amount::new(1));
        scan.trigger();
        while !seen.lock().unwrap().contains(&Account::from(30)) {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        scan.stop();
    }
}
