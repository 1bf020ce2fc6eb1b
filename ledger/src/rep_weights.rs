//! Cached representative weights, updated incrementally as blocks are accepted.
//!
//! Avoids scanning all accounts to compute a representative's total delegated
//! weight. The cache is rebuilt once at startup from the full account set,
//! then maintained by the ledger on every accepted block: the previous
//! representative loses the account's previous balance and the (possibly new)
//! representative gains the new balance.

use std::collections::HashMap;
use std::sync::RwLock;

use lattice_types::{Account, Amount};

#[derive(Default)]
struct Inner {
    /// representative → total delegated balance.
    weights: HashMap<Account, Amount>,
    /// Total weight across all representatives.
    total: Amount,
}

/// Thread-safe representative weight cache.
#[derive(Default)]
pub struct RepWeights {
    inner: RwLock<Inner>,
}

impl RepWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add weight to a representative (when an account delegates to them).
    pub fn add(&self, rep: Account, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        let mut inner = self.inner.write().unwrap();
        let entry = inner.weights.entry(rep).or_default();
        *entry = entry.saturating_add(amount);
        inner.total = inner.total.saturating_add(amount);
    }

    /// Remove weight from a representative, never below zero.
    pub fn sub(&self, rep: Account, amount: Amount) {
        let mut inner = self.inner.write().unwrap();
        let Some(entry) = inner.weights.get_mut(&rep) else {
            return;
        };
        let removed = amount.min(*entry);
        *entry -= removed;
        if entry.is_zero() {
            inner.weights.remove(&rep);
        }
        inner.total = inner.total.saturating_sub(removed);
    }

    /// A representative's current weight. Zero if unknown.
    pub fn weight(&self, rep: &Account) -> Amount {
        self.inner
            .read()
            .unwrap()
            .weights
            .get(rep)
            .copied()
            .unwrap_or_default()
    }

    pub fn total(&self) -> Amount {
        self.inner.read().unwrap().total
    }

    /// Number of representatives with non-zero weight.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every representative's weight.
    pub fn snapshot(&self) -> HashMap<Account, Amount> {
        self.inner.read().unwrap().weights.clone()
    }

    /// Rebuild from `(representative, balance)` pairs, one per account.
    pub fn rebuild(&self, accounts: impl IntoIterator<Item = (Account, Amount)>) {
        let mut inner = self.inner.write().unwrap();
        inner.weights.clear();
        inner.total = Amount::ZERO;
        for (rep, balance) in accounts {
            if balance.is_zero() {
                continue;
            }
            let entry = inner.weights.entry(rep).or_default();
            *entry = entry.saturating_add(balance);
            inner.total = inner.total.saturating_add(balance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(n: u64) -> Account {
        Account::from(n)
    }

    #[test]
    fn new_cache_is_empty() {
        let cache = RepWeights::new();
        assert_eq!(cache.total(), Amount::ZERO);
        assert!(cache.is_empty());
        assert_eq!(cache.weight(&rep(1)), Amount::ZERO);
    }

    #[test]
    fn add_weight_multiple_reps() {
        let cache = RepWeights::new();
        cache.add(rep(1), Amount::new(10_000));
        cache.add(rep(2), Amount::new(20_000));
        cache.add(rep(1), Amount::new(5_000));

        assert_eq!(cache.weight(&rep(1)), Amount::new(15_000));
        assert_eq!(cache.weight(&rep(2)), Amount::new(20_000));
        assert_eq!(cache.total(), Amount::new(35_000));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn sub_clamps_and_drops_empty_reps() {
        let cache = RepWeights::new();
        cache.add(rep(1), Amount::new(10_000));
        cache.sub(rep(1), Amount::new(3_000));
        assert_eq!(cache.weight(&rep(1)), Amount::new(7_000));

        cache.sub(rep(1), Amount::new(50_000));
        assert_eq!(cache.weight(&rep(1)), Amount::ZERO);
        assert_eq!(cache.total(), Amount::ZERO);
        assert!(cache.is_empty());
    }

    #[test]
    fn sub_unknown_rep_is_noop() {
        let cache = RepWeights::new();
        cache.add(rep(1), Amount::new(1));
        cache.sub(rep(2), Amount::new(1));
        assert_eq!(cache.total(), Amount::new(1));
    }

    #[test]
    fn rebuild_replaces_contents() {
        let cache = RepWeights::new();
        cache.add(rep(9), Amount::new(999));
        cache.rebuild([
            (rep(1), Amount::new(100)),
            (rep(2), Amount::new(200)),
            (rep(1), Amount::new(50)),
            (rep(3), Amount::ZERO),
        ]);
        assert_eq!(cache.weight(&rep(9)), Amount::ZERO);
        assert_eq!(cache.weight(&rep(1)), Amount::new(150));
        assert_eq!(cache.total(), Amount::new(350));
        assert_eq!(cache.len(), 2);
    }
}
