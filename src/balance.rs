//! Cached balance reads with periodic reconciliation (spec §4.5).
//!
//! `balance` is a cache; the ledger is the source of truth. The executor
//! updates the cache synchronously on the fast path (so the very next read
//! in the same request sees the new number) and also kicks off an async
//! recompute from the ledger so a crashed or skipped fast-path update can't
//! leave the cache silently wrong forever.

use crate::ledger::Ledger;
use crate::money::Money;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Default)]
pub struct BalanceService {
    cache: DashMap<String, Money>,
}

/// Spec §4.5: "if the cached `User.balance` differs from the sum by more
/// than `1e-4`, overwrite the cache and emit a drift event."
fn drift_tolerance() -> Money {
    Money::of("0.00010000").expect("constant parses")
}

/// Independently sums every transaction's `amount` for a user, the same way
/// `Ledger::verify_running_balance_invariant` walks `history_for_user` —
/// deliberately *not* `Ledger::running_balance`, which is just the O(1)
/// latest-`balance_after` pointer `BalanceService::get` already reads. A
/// reconciliation sweep that reused that pointer could never catch a
/// genuine divergence between the two.
fn sum_ledger_history(user_id: &str, ledger: &Ledger) -> Money {
    ledger
        .history_for_user(user_id)
        .iter()
        .fold(Money::ZERO, |total, tx| total.add(&tx.amount))
}

impl BalanceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) read of the cached balance, falling back to the ledger (and
    /// populating the cache) on a cold entry.
    pub fn get(&self, user_id: &str, ledger: &Ledger) -> Money {
        if let Some(balance) = self.cache.get(user_id) {
            return *balance;
        }
        let computed = ledger.running_balance(user_id);
        self.cache.insert(user_id.to_string(), computed);
        computed
    }

    /// Fast-path write used right after a ledger append lands.
    pub fn set(&self, user_id: &str, balance: Money) {
        self.cache.insert(user_id.to_string(), balance);
    }

    /// Reconciliation (spec §4.5): fully scans the ledger and sums
    /// `amount` directly, rather than trusting the cached running-balance
    /// pointer. Only overwrites the cache (and emits a drift event) when the
    /// cached value differs from that sum by more than the spec's `1e-4`
    /// tolerance; returns whichever value is now current.
    pub fn recompute_one(&self, user_id: &str, ledger: &Ledger) -> Money {
        let authoritative = sum_ledger_history(user_id, ledger);
        match self.cache.get(user_id).map(|stale| *stale) {
            Some(stale) if stale.subtract(&authoritative).abs() > drift_tolerance() => {
                warn!(
                    user_id,
                    cached = %stale.to_canonical_string(),
                    ledger = %authoritative.to_canonical_string(),
                    "balance cache drifted from ledger; correcting"
                );
                self.cache.insert(user_id.to_string(), authoritative);
                authoritative
            }
            Some(stale) => stale,
            None => {
                self.cache.insert(user_id.to_string(), authoritative);
                authoritative
            }
        }
    }

    /// Spawns the fire-and-forget recompute the executor triggers after
    /// every fill (spec §4.8 step 8: "async balance recompute").
    pub fn spawn_recompute(self: &Arc<Self>, ledger: Arc<Ledger>, user_id: String) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.recompute_one(&user_id, &ledger);
        });
    }

    /// Background reconciliation loop: periodically recomputes every known
    /// user's balance from the ledger, correcting any cache drift. Intended
    /// to run as a long-lived `tokio::spawn`med task from `main`.
    pub async fn run_reconciliation_loop(
        self: Arc<Self>,
        ledger: Arc<Ledger>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let users = ledger.known_users();
            debug!(count = users.len(), "running balance reconciliation sweep");
            for user_id in users {
                self.recompute_one(&user_id, &ledger);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;

    #[test]
    fn cold_read_populates_cache_from_ledger() {
        let ledger = Ledger::new();
        let service = BalanceService::new();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("42").unwrap(), "n1")
            .unwrap();
        assert_eq!(service.get("u1", &ledger), Money::of("42").unwrap());
        // Second read hits the cache, not the ledger.
        assert_eq!(service.get("u1", &ledger), Money::of("42").unwrap());
    }

    #[test]
    fn recompute_corrects_drifted_cache() {
        let ledger = Ledger::new();
        let service = BalanceService::new();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("10").unwrap(), "n1")
            .unwrap();
        service.set("u1", Money::of("999").unwrap());
        let fixed = service.recompute_one("u1", &ledger);
        assert_eq!(fixed, Money::of("10").unwrap());
        assert_eq!(service.get("u1", &ledger), Money::of("10").unwrap());
    }

    #[test]
    fn recompute_sums_full_history_rather_than_trusting_the_latest_pointer() {
        // Three separate entries; the correct answer only comes from
        // summing every `amount`, not from reading the last `balance_after`.
        let ledger = Ledger::new();
        let service = BalanceService::new();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("100").unwrap(), "n1")
            .unwrap();
        ledger
            .append("u1", Some("m1"), TransactionType::TradeBuy, Money::of("-30").unwrap(), "n2")
            .unwrap();
        ledger
            .append("u1", Some("m1"), TransactionType::TradeBuy, Money::of("-5").unwrap(), "n3")
            .unwrap();
        assert_eq!(service.recompute_one("u1", &ledger), Money::of("65").unwrap());
    }

    #[test]
    fn recompute_leaves_cache_untouched_within_drift_tolerance() {
        // spec §4.5: only drift of more than 1e-4 triggers a correction.
        let ledger = Ledger::new();
        let service = BalanceService::new();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("10.00000000").unwrap(), "n1")
            .unwrap();
        service.set("u1", Money::of("10.00000500").unwrap());
        let result = service.recompute_one("u1", &ledger);
        assert_eq!(result, Money::of("10.00000500").unwrap(), "within-tolerance drift must not be corrected");
        assert_eq!(service.get("u1", &ledger), Money::of("10.00000500").unwrap());
    }

    #[tokio::test]
    async fn spawn_recompute_eventually_fixes_cache() {
        let ledger = Arc::new(Ledger::new());
        let service = Arc::new(BalanceService::new());
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("5").unwrap(), "n1")
            .unwrap();
        service.set("u1", Money::of("0").unwrap());
        service.spawn_recompute(Arc::clone(&ledger), "u1".to_string());
        // Yield so the spawned task gets a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.get("u1", &ledger), Money::of("5").unwrap());
    }
}
