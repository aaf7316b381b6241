//! Append-only ledger (spec §4.6).
//!
//! Every entry is immutable once written; the only operation is `append`,
//! which is dedupe-checked by nonce and advances the per-user running
//! balance by exactly `amount`. Structurally this mirrors the reference
//! ledger's snapshot-plus-sequence-number shape, generalized from a single
//! portfolio to one running balance per user, with the nonce taking the
//! place of the out-of-order sequence-number guard.

use crate::domain::{Outcome, TransactionType};
use crate::error::AppError;
use crate::money::Money;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

/// Spec §3 Transaction. `outcome`/`shares`/`price` are populated for trade
/// fills (spec §4.8.1: "shares=quantity, price=cost/quantity") and left
/// `None` for non-trade entries (deposits, withdrawals, resolutions) that
/// have no associated outcome pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub nonce: String,
    pub user_id: String,
    pub market_id: Option<String>,
    pub tx_type: TransactionType,
    pub amount: Money,
    pub outcome: Option<Outcome>,
    pub shares: Option<f64>,
    pub price: Option<Money>,
    pub balance_after: Money,
    pub created_at: DateTime<Utc>,
}

/// Append-only, nonce-deduped transaction log with an O(1) per-user running
/// balance. `by_nonce` is the source of truth; `by_user` holds each user's
/// nonces in append order so the running balance can be derived without
/// rescanning the whole ledger.
#[derive(Default)]
pub struct Ledger {
    by_nonce: DashMap<String, Transaction>,
    by_user: DashMap<String, Mutex<Vec<String>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a non-trade transaction (deposit, withdrawal, resolution):
    /// no outcome/shares/price to record. See `append_trade` for fills.
    pub fn append(
        &self,
        user_id: &str,
        market_id: Option<&str>,
        tx_type: TransactionType,
        amount: Money,
        nonce: impl Into<String>,
    ) -> Result<Transaction, AppError> {
        self.append_internal(user_id, market_id, tx_type, amount, None, None, None, nonce)
    }

    /// Appends a trade fill, recording the outcome traded, the share
    /// quantity, and the per-share price alongside the signed `amount`
    /// (spec §3 Transaction, §4.8.1: "shares=quantity, price=cost/quantity").
    #[allow(clippy::too_many_arguments)]
    pub fn append_trade(
        &self,
        user_id: &str,
        market_id: Option<&str>,
        tx_type: TransactionType,
        amount: Money,
        outcome: Outcome,
        shares: f64,
        price: Money,
        nonce: impl Into<String>,
    ) -> Result<Transaction, AppError> {
        self.append_internal(
            user_id,
            market_id,
            tx_type,
            amount,
            Some(outcome),
            Some(shares),
            Some(price),
            nonce,
        )
    }

    /// Appends a transaction, returning the existing entry's clone is NOT
    /// done here deliberately: a duplicate nonce is always a hard error so
    /// callers (the executor) are forced to treat it as "already recorded,
    /// go read it back" rather than silently re-applying it twice.
    #[allow(clippy::too_many_arguments)]
    fn append_internal(
        &self,
        user_id: &str,
        market_id: Option<&str>,
        tx_type: TransactionType,
        amount: Money,
        outcome: Option<Outcome>,
        shares: Option<f64>,
        price: Option<Money>,
        nonce: impl Into<String>,
    ) -> Result<Transaction, AppError> {
        let nonce = nonce.into();
        if self.by_nonce.contains_key(&nonce) {
            return Err(AppError::DuplicateNonce(nonce));
        }

        let user_nonces = self
            .by_user
            .entry(user_id.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut nonces = user_nonces.lock();

        // Re-check under the per-user lock: two concurrent appends for the
        // same user racing past the first check above must not both pass.
        if self.by_nonce.contains_key(&nonce) {
            return Err(AppError::DuplicateNonce(nonce));
        }

        let previous_balance = nonces
            .last()
            .and_then(|n| self.by_nonce.get(n).map(|t| t.balance_after))
            .unwrap_or(Money::ZERO);
        let balance_after = previous_balance.add(&amount);

        let tx = Transaction {
            id: Uuid::new_v4(),
            nonce: nonce.clone(),
            user_id: user_id.to_string(),
            market_id: market_id.map(str::to_string),
            tx_type,
            amount,
            outcome,
            shares,
            price,
            balance_after,
            created_at: Utc::now(),
        };

        self.by_nonce.insert(nonce.clone(), tx.clone());
        nonces.push(nonce);
        Ok(tx)
    }

    pub fn get_by_nonce(&self, nonce: &str) -> Option<Transaction> {
        self.by_nonce.get(nonce).map(|t| t.clone())
    }

    pub fn contains_nonce(&self, nonce: &str) -> bool {
        self.by_nonce.contains_key(nonce)
    }

    /// The current running balance for a user: the `balance_after` of their
    /// most recent transaction, or zero if they have none yet.
    pub fn running_balance(&self, user_id: &str) -> Money {
        self.by_user
            .get(user_id)
            .and_then(|nonces| {
                nonces
                    .lock()
                    .last()
                    .and_then(|n| self.by_nonce.get(n).map(|t| t.balance_after))
            })
            .unwrap_or(Money::ZERO)
    }

    /// Full transaction history for a user, oldest first.
    pub fn history_for_user(&self, user_id: &str) -> Vec<Transaction> {
        match self.by_user.get(user_id) {
            None => Vec::new(),
            Some(nonces) => nonces
                .lock()
                .iter()
                .filter_map(|n| self.by_nonce.get(n).map(|t| t.clone()))
                .collect(),
        }
    }

    /// All user ids that have at least one ledger entry, for the periodic
    /// reconciliation sweep.
    pub fn known_users(&self) -> Vec<String> {
        self.by_user.iter().map(|e| e.key().clone()).collect()
    }

    /// P2: verifies the running-balance invariant holds for one user's full
    /// history — `balance_after[n] == balance_after[n-1] + amount[n]`.
    pub fn verify_running_balance_invariant(&self, user_id: &str) -> bool {
        let history = self.history_for_user(user_id);
        let mut expected = Money::ZERO;
        for tx in &history {
            expected = expected.add(&tx.amount);
            if expected != tx.balance_after {
                return false;
            }
        }
        true
    }
}
