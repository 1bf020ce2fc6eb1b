//! Online representative tracking.
//!
//! Quorum is computed against *online* stake, not total delegated weight. A
//! representative counts as online if it cast a live vote within the last
//! `weight_period`. The online stake never drops below a configured floor so
//! quorum cannot collapse when only a few representatives are reachable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, NetworkId};

/// Share of online stake a winner must lead by, in percent.
const QUORUM_PERCENT: u128 = 67;

/// Principal representatives hold at least 1/1000 of online stake.
const PRINCIPAL_DIVISOR: u128 = 1000;

#[derive(Clone, Debug)]
pub struct OnlineRepsConfig {
    /// How long a representative stays online after its last live vote.
    pub weight_period: Duration,
    /// Floor for the online stake. `None` selects the network default: the
    /// full ledger weight on dev, 60/133 of it elsewhere.
    pub online_weight_minimum: Option<Amount>,
}

impl Default for OnlineRepsConfig {
    fn default() -> Self {
        Self {
            weight_period: Duration::from_secs(5 * 60),
            online_weight_minimum: None,
        }
    }
}

pub struct OnlineReps {
    ledger: Arc<Ledger>,
    network: NetworkId,
    config: OnlineRepsConfig,
    /// Representative -> local time of its most recent live vote.
    reps: Mutex<HashMap<Account, Instant>>,
}

impl OnlineReps {
    pub fn new(ledger: Arc<Ledger>, network: NetworkId, config: OnlineRepsConfig) -> Self {
        Self {
            ledger,
            network,
            config,
            reps: Mutex::new(HashMap::new()),
        }
    }

    /// Record a live vote. Representatives without weight are not tracked.
    pub fn observe(&self, rep: Account) {
        if self.ledger.weight(&rep).is_zero() {
            return;
        }
        self.reps.lock().unwrap().insert(rep, Instant::now());
    }

    /// Drop representatives not heard from within the weight period.
    pub fn trim(&self) {
        let period = self.config.weight_period;
        self.reps
            .lock()
            .unwrap()
            .retain(|_, seen| seen.elapsed() <= period);
    }

    /// Representatives currently considered online.
    pub fn list(&self) -> Vec<Account> {
        let period = self.config.weight_period;
        self.reps
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, seen)| seen.elapsed() <= period)
            .map(|(rep, _)| *rep)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed weight of the online representatives.
    pub fn online(&self) -> Amount {
        self.list()
            .iter()
            .fold(Amount::ZERO, |acc, rep| acc.saturating_add(self.ledger.weight(rep)))
    }

    pub fn minimum(&self) -> Amount {
        match self.config.online_weight_minimum {
            Some(minimum) => minimum,
            None if self.network.is_dev() => self.ledger.total_weight(),
            None => self.ledger.total_weight().scaled(60, 133),
        }
    }

    /// Online weight, floored at the configured minimum.
    pub fn online_stake(&self) -> Amount {
        self.online().max(self.minimum())
    }

    /// Weight a winner must lead the runner-up by to be confirmed.
    pub fn delta(&self) -> Amount {
        self.online_stake().scaled(QUORUM_PERCENT, 100)
    }

    /// Votes from representatives at or below this weight are not counted
    /// outside the dev network.
    pub fn minimum_principal_weight(&self) -> Amount {
        self.online_stake().scaled(1, PRINCIPAL_DIVISOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_ledger::LedgerContext;

    fn rep_with_weight(ctx: &LedgerContext, n: u64, percent: u128) -> Account {
        let rep = Account::from(n);
        ctx.fund(rep, Amount::MAX.scaled(percent, 100));
        rep
    }

    #[test]
    fn dev_floor_is_total_weight() {
        let ctx = LedgerContext::new();
        let reps = OnlineReps::new(ctx.ledger.clone(), NetworkId::Dev, OnlineRepsConfig::default());
        assert_eq!(reps.online_stake(), Amount::MAX);
        assert_eq!(reps.delta(), Amount::MAX.scaled(67, 100));
    }

    #[test]
    fn observed_reps_raise_online_weight() {
        let ctx = LedgerContext::new();
        let rep = rep_with_weight(&ctx, 50, 10);
        let config = OnlineRepsConfig {
            online_weight_minimum: Some(Amount::ZERO),
            ..Default::default()
        };
        let reps = OnlineReps::new(ctx.ledger.clone(), NetworkId::Live, config);
        assert_eq!(reps.online(), Amount::ZERO);

        reps.observe(rep);
        reps.observe(ctx.genesis_account());
        assert_eq!(reps.len(), 2);
        assert_eq!(reps.online(), Amount::MAX);
    }

    #[test]
    fn weightless_reps_are_not_tracked() {
        let ctx = LedgerContext::new();
        let reps = OnlineReps::new(ctx.ledger.clone(), NetworkId::Dev, OnlineRepsConfig::default());
        reps.observe(Account::from(999));
        assert!(reps.is_empty());
    }

    #[test]
    fn stale_reps_expire() {
        let ctx = LedgerContext::new();
        let config = OnlineRepsConfig {
            weight_period: Duration::ZERO,
            online_weight_minimum: Some(Amount::ZERO),
        };
        let reps = OnlineReps::new(ctx.ledger.clone(), NetworkId::Live, config);
        reps.observe(ctx.genesis_account());
        std::thread::sleep(Duration::from_millis(5));
        reps.trim();
        assert!(reps.is_empty());
        assert_eq!(reps.online(), Amount::ZERO);
    }

    #[test]
    fn principal_weight_is_a_thousandth() {
        let ctx = LedgerContext::new();
        let config = OnlineRepsConfig {
            online_weight_minimum: Some(Amount::new(1_000_000)),
            ..Default::default()
        };
        let reps = OnlineReps::new(ctx.ledger.clone(), NetworkId::Live, config);
        assert_eq!(reps.minimum_principal_weight(), Amount::new(1_000));
    }
}
