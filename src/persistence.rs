//! Durable-storage contract (spec §6) and its in-memory adapter.
//!
//! The spec deliberately leaves the backing store unspecified ("Postgres,
//! Mongo, etc. are explicitly out of scope"). Rather than invent a trait
//! object around it, this follows the teacher's own shape: `DbAdapter` in
//! the teacher repo is a concrete struct wrapping a `PgPool` with a fixed
//! set of async methods, not a trait — so `InMemoryStore` here is the same
//! kind of concrete adapter, just backed by `DashMap`s instead of SQL. A
//! real deployment would write a second concrete adapter with the same
//! method surface and swap the one `main` constructs.

use crate::error::AppError;
use crate::ledger::Transaction;
use crate::order_state::{Order, OrderStatus};
use crate::store::{Market, Position};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-process stand-in for durable storage. Every operation is
/// infallible in practice (a `DashMap` insert can't fail) but the methods
/// still return `Result` so call sites read the same way a real backend's
/// I/O-fallible adapter would.
#[derive(Default)]
pub struct InMemoryStore {
    orders_by_id: DashMap<Uuid, Order>,
    orders_by_nonce: DashMap<String, Uuid>,
    markets: DashMap<String, Market>,
    positions: DashMap<String, Position>,
    ledger: DashMap<String, Transaction>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Upserts an order, enforcing the unique index on `nonce` (spec §6:
    /// "orders: upsert by id; unique index on nonce"). Re-saving the same
    /// order (same id, e.g. a later lifecycle transition) is always fine;
    /// a second, distinct order id trying to claim a nonce already owned by
    /// another order is rejected with `DuplicateNonce` rather than silently
    /// overwriting the `nonce -> id` mapping and orphaning the original
    /// order. The check-and-insert happens under the nonce's shard lock via
    /// `DashMap::entry`, so two concurrent callers racing on the same new
    /// nonce can't both win.
    pub async fn save_order(&self, order: &Order) -> Result<(), AppError> {
        match self.orders_by_nonce.entry(order.nonce.clone()) {
            Entry::Occupied(existing) => {
                if *existing.get() != order.id {
                    return Err(AppError::DuplicateNonce(order.nonce.clone()));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(order.id);
            }
        }
        self.orders_by_id.insert(order.id, order.clone());
        Ok(())
    }

    pub async fn load_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.orders_by_id.get(&id).map(|o| o.clone()))
    }

    pub async fn load_order_by_nonce(&self, nonce: &str) -> Result<Option<Order>, AppError> {
        match self.orders_by_nonce.get(nonce) {
            Some(id) => Ok(self.orders_by_id.get(&*id).map(|o| o.clone())),
            None => Ok(None),
        }
    }

    pub async fn save_market(&self, market: &Market) -> Result<(), AppError> {
        self.markets.insert(market.id.clone(), market.clone());
        Ok(())
    }

    pub async fn load_market(&self, id: &str) -> Result<Option<Market>, AppError> {
        Ok(self.markets.get(id).map(|m| m.clone()))
    }

    pub async fn save_position(&self, position: &Position) -> Result<(), AppError> {
        let key = format!("{}:{}", position.user_id, position.market_id);
        self.positions.insert(key, position.clone());
        Ok(())
    }

    pub async fn load_position(
        &self,
        user_id: &str,
        market_id: &str,
    ) -> Result<Option<Position>, AppError> {
        let key = format!("{user_id}:{market_id}");
        Ok(self.positions.get(&key).map(|p| p.clone()))
    }

    pub async fn append_ledger_entry(&self, tx: &Transaction) -> Result<(), AppError> {
        if self.ledger.contains_key(&tx.nonce) {
            return Err(AppError::DuplicateNonce(tx.nonce.clone()));
        }
        self.ledger.insert(tx.nonce.clone(), tx.clone());
        Ok(())
    }

    /// Atomic conditional update keyed by `(id, status ∈ expected)` (spec §6
    /// orders contract). Sets status to CANCELLED and returns the updated
    /// order iff the current status was one of `expected`; returns `None`
    /// (modified-count 0) otherwise, letting `OrderExecutor::cancel` raise
    /// `RaceLost`.
    pub async fn cancel_order_if_active(
        &self,
        id: Uuid,
        expected: &[OrderStatus],
    ) -> Result<Option<Order>, AppError> {
        let mut entry = match self.orders_by_id.get_mut(&id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if !expected.contains(&entry.status) {
            return Ok(None);
        }
        entry.transition_to(OrderStatus::Cancelled)?;
        Ok(Some(entry.clone()))
    }
}
