//! `executeMarketOrder`, the trade-execution pipeline (spec §4.8).
//!
//! Bundles every collaborator a single trade touches — market/position
//! stores, ledger, balance cache, validator, and the durable-storage
//! adapter — the way the teacher's `lmsr_api` transaction helpers thread a
//! `PgPool` through `update_market`/`sell_shares`. The eight steps below
//! are the same steps named in the design: derive nonce, check for a
//! replay, persist NEW, load the market, validate, NEW -> OPEN, execute the
//! fill, return. Callers are expected to invoke this only from within a
//! single market's serialized worker (`dispatcher::MarketDispatcher`) so
//! steps 4 through 7 never race against another order for the same market.

use crate::balance::BalanceService;
use crate::domain::{Outcome, TransactionType};
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::money::Money;
use crate::order_state::{Order, OrderStatus};
use crate::persistence::InMemoryStore;
use crate::pricing;
use crate::store::{MarketStore, PositionStore};
use crate::validator::OrderValidator;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A market-buy request, already through the HTTP/API boundary.
#[derive(Debug, Clone)]
pub struct MarketOrderRequest {
    pub user_id: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub quantity: f64,
    /// Idempotency key. If omitted, one is derived; if supplied by a
    /// retrying caller, a prior execution with the same nonce is replayed
    /// instead of re-run (spec §6 nonce format: `{userId}:{marketId}:{timestampMs}:{uuidv4}`).
    pub nonce: Option<String>,
}

impl MarketOrderRequest {
    pub fn derive_nonce(user_id: &str, market_id: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            user_id,
            market_id,
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        )
    }
}

pub struct OrderExecutor {
    markets: Arc<MarketStore>,
    positions: Arc<PositionStore>,
    ledger: Arc<Ledger>,
    balances: Arc<BalanceService>,
    persistence: Arc<InMemoryStore>,
    validator: OrderValidator,
}

impl OrderExecutor {
    pub fn new(
        markets: Arc<MarketStore>,
        positions: Arc<PositionStore>,
        ledger: Arc<Ledger>,
        balances: Arc<BalanceService>,
        persistence: Arc<InMemoryStore>,
    ) -> Self {
        Self {
            markets,
            positions,
            ledger,
            balances,
            persistence,
            validator: OrderValidator::new(),
        }
    }

    /// Runs the full eight-step pipeline for one market-buy request.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, market_id = %request.market_id))]
    pub async fn execute_market_order(&self, request: MarketOrderRequest) -> Result<Order, AppError> {
        // Step 1: nonce derivation.
        let nonce = request
            .nonce
            .clone()
            .unwrap_or_else(|| MarketOrderRequest::derive_nonce(&request.user_id, &request.market_id));

        // Step 2: idempotent replay check.
        if let Some(existing) = self.persistence.load_order_by_nonce(&nonce).await? {
            info!(nonce = %nonce, "replaying previously executed order");
            return Ok(existing);
        }

        // Step 3: persist NEW. If another caller raced us and already
        // claimed this nonce, re-read and return its order instead of
        // propagating the conflict (spec §4.8 step 3).
        let mut order = Order::new_market_buy(
            Uuid::new_v4(),
            nonce.clone(),
            request.user_id.clone(),
            request.market_id.clone(),
            request.outcome,
            request.quantity,
        );
        match self.persistence.save_order(&order).await {
            Ok(()) => {}
            Err(AppError::DuplicateNonce(_)) => {
                info!(nonce = %nonce, "order creation raced; replaying the winner");
                return match self.persistence.load_order_by_nonce(&nonce).await? {
                    Some(existing) => Ok(existing),
                    None => Err(AppError::DuplicateNonce(nonce)),
                };
            }
            Err(other) => return Err(other),
        }

        // Step 4: load market.
        let market = match self.markets.get(&request.market_id) {
            Some(market) => market,
            None => {
                let _ = order.reject("Market not found");
                self.persistence.save_order(&order).await?;
                return Err(AppError::MarketNotFound(request.market_id));
            }
        };

        // Step 5: validate (field/quantity/type/status/balance).
        let available = self.balances.get(&request.user_id, &self.ledger);
        if let Err(err) = self.validator.validate(&order, &market, available) {
            let _ = order.reject(err.to_string());
            self.persistence.save_order(&order).await?;
            return Err(AppError::ValidationFailed(match err {
                AppError::ValidationFailed(errors) => errors,
                other => crate::error::ValidationErrors(vec![other.to_string()]),
            }));
        }

        // Step 6: NEW -> OPEN.
        order.transition_to(OrderStatus::Open)?;
        self.persistence.save_order(&order).await?;

        // Step 7: execute the fill.
        match self.fill(&mut order, &market).await {
            Ok(()) => {}
            Err(FillOutcome::AlreadyExecuted) => {
                // spec §7: DuplicateNonce on the ledger append within
                // execution means a prior attempt already succeeded. Log
                // and return the order as currently persisted rather than
                // rejecting or re-mutating any cache.
                info!(nonce = %order.nonce, "fill already recorded by a prior attempt; replaying");
                if let Some(existing) = self.persistence.load_order_by_nonce(&order.nonce).await? {
                    return Ok(existing);
                }
                return Ok(order);
            }
            Err(FillOutcome::Failed(err)) => {
                warn!(error = %err, nonce = %order.nonce, "order execution failed");
                // OPEN -> REJECTED is legal; ignore a transition error here
                // so the original `err` is what the caller sees.
                let _ = order.reject(err.to_string());
                self.persistence.save_order(&order).await?;
                return Err(err);
            }
        }

        // Step 8: return.
        self.persistence.save_order(&order).await?;
        Ok(order)
    }

    /// `cancel(orderId, byUserId)` (spec §4.8.2). Not subject to per-market
    /// serialization: the storage layer's conditional update is the only
    /// synchronization point, matching the spec's "atomic conditional
    /// update keyed by (id, status ∈ expectedSet)" contract.
    pub async fn cancel(&self, order_id: Uuid, by_user_id: &str) -> Result<Order, AppError> {
        let order = self
            .persistence
            .load_order(order_id)
            .await?
            .ok_or(AppError::NotActive)?;

        if order.user_id != by_user_id {
            return Err(AppError::NotAuthorized);
        }
        if !order.status.is_active() {
            return Err(AppError::NotActive);
        }

        match self
            .persistence
            .cancel_order_if_active(order_id, &[OrderStatus::Open, OrderStatus::Partial])
            .await?
        {
            Some(cancelled) => Ok(cancelled),
            None => Err(AppError::RaceLost),
        }
    }

    /// Step 7 in detail: price the trade, re-check balance against the
    /// actual (not buffered) cost, append the ledger transaction, fill the
    /// order, mutate market/position state, and kick off the async balance
    /// recompute.
    async fn fill(&self, order: &mut Order, market: &crate::store::Market) -> Result<(), FillOutcome> {
        let actual_cost_f64 = pricing::compute_cost(
            market.yes_shares,
            market.no_shares,
            order.outcome,
            order.quantity,
            market.liquidity_b,
        );
        let actual_cost = Money::from_f64_lossy(actual_cost_f64).map_err(FillOutcome::Failed)?;

        // Authoritative re-check: the validator's estimate may have been
        // optimistic (spec §4.8.1).
        let available = self.balances.get(&order.user_id, &self.ledger);
        if available < actual_cost {
            return Err(FillOutcome::Failed(AppError::InsufficientBalance {
                required: actual_cost.to_canonical_string(),
                available: available.to_canonical_string(),
            }));
        }

        // spec §4.8.1: "shares=quantity, price=cost/quantity".
        let fill_price = actual_cost.divide_i64(order.quantity as i64).map_err(FillOutcome::Failed)?;
        let tx_nonce = format!("{}:tx", order.nonce);
        let tx = match self.ledger.append_trade(
            &order.user_id,
            Some(&order.market_id),
            TransactionType::TradeBuy,
            actual_cost.negate(),
            order.outcome,
            order.quantity,
            fill_price,
            tx_nonce,
        ) {
            Ok(tx) => tx,
            Err(AppError::DuplicateNonce(_)) => return Err(FillOutcome::AlreadyExecuted),
            Err(other) => return Err(FillOutcome::Failed(other)),
        };
        self.persistence
            .append_ledger_entry(&tx)
            .await
            .map_err(FillOutcome::Failed)?;

        order.fill(order.quantity, actual_cost).map_err(FillOutcome::Failed)?;
        order.transaction_id = Some(tx.id);

        self.markets
            .with_mut(&order.market_id, |m| m.apply_fill(order.outcome, order.quantity));
        self.positions
            .apply_fill(&order.user_id, &order.market_id, order.outcome, order.quantity);

        if let Some(market) = self.markets.get(&order.market_id) {
            self.persistence.save_market(&market).await.map_err(FillOutcome::Failed)?;
        }
        if let Some(position) = self.positions.get(&order.user_id, &order.market_id) {
            self.persistence.save_position(&position).await.map_err(FillOutcome::Failed)?;
        }

        self.balances.set(&order.user_id, tx.balance_after);
        self.balances.spawn_recompute(Arc::clone(&self.ledger), order.user_id.clone());

        Ok(())
    }
}

/// Internal outcome of `fill`, distinguishing a genuine failure (which must
/// reject the order) from a duplicate-nonce ledger append (which means a
/// prior attempt already completed this exact fill and must NOT be treated
/// as a failure — spec §7 policy).
enum FillOutcome {
    AlreadyExecuted,
    Failed(AppError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Market;

    fn executor() -> (OrderExecutor, Arc<MarketStore>, Arc<Ledger>) {
        let markets = Arc::new(MarketStore::new());
        let positions = Arc::new(PositionStore::new());
        let ledger = Arc::new(Ledger::new());
        let balances = Arc::new(BalanceService::new());
        let persistence = InMemoryStore::new();
        markets.insert(Market::new("m1", 100.0));
        let executor = OrderExecutor::new(
            Arc::clone(&markets),
            positions,
            Arc::clone(&ledger),
            balances,
            persistence,
        );
        (executor, markets, ledger)
    }

    #[tokio::test]
    async fn happy_path_fills_and_debits_ledger() {
        let (executor, markets, ledger) = executor();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("1000").unwrap(), "seed")
            .unwrap();

        let request = MarketOrderRequest {
            user_id: "u1".to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            quantity: 10.0,
            nonce: Some("n1".to_string()),
        };
        let order = executor.execute_market_order(request).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 10.0);
        assert!(order.total_cost.unwrap().is_positive());
        assert!(order.average_fill_price.is_some());
        assert!(order.transaction_id.is_some());
        assert!(order.completed_at.is_some());
        assert!(ledger.running_balance("u1") < Money::of("1000").unwrap());
        assert_eq!(markets.get("m1").unwrap().yes_shares, 10.0);

        // The ledger entry itself must carry outcome/shares/price (spec §3,
        // §4.8.1), not just the order record.
        let tx = ledger.get_by_nonce("n1:tx").expect("fill must append a ledger entry");
        assert_eq!(tx.outcome, Some(Outcome::Yes));
        assert_eq!(tx.shares, Some(10.0));
        assert_eq!(tx.price, order.average_fill_price);
    }

    #[tokio::test]
    async fn replayed_nonce_returns_original_order_without_double_charging() {
        let (executor, _markets, ledger) = executor();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("1000").unwrap(), "seed")
            .unwrap();
        let request = MarketOrderRequest {
            user_id: "u1".to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            quantity: 10.0,
            nonce: Some("n1".to_string()),
        };
        let first = executor.execute_market_order(request.clone()).await.unwrap();
        let balance_after_first = ledger.running_balance("u1");
        let second = executor.execute_market_order(request).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.running_balance("u1"), balance_after_first);
    }

    #[tokio::test]
    async fn concurrent_creation_with_the_same_nonce_never_orphans_an_order() {
        // Bypasses MarketDispatcher (OrderExecutor's own public API does not
        // serialize by market), so two callers can race step 3's
        // persistence.save_order for the same nonce. Exactly one order must
        // end up reachable by that nonce; the loser must see the winner
        // rather than silently overwriting the nonce -> id mapping.
        let (executor, _markets, ledger) = executor();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("1000").unwrap(), "seed")
            .unwrap();
        let executor = Arc::new(executor);

        let request = MarketOrderRequest {
            user_id: "u1".to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            quantity: 10.0,
            nonce: Some("race-nonce".to_string()),
        };

        let e1 = Arc::clone(&executor);
        let r1 = request.clone();
        let h1 = tokio::spawn(async move { e1.execute_market_order(r1).await });
        let e2 = Arc::clone(&executor);
        let r2 = request.clone();
        let h2 = tokio::spawn(async move { e2.execute_market_order(r2).await });

        let order1 = h1.await.unwrap().unwrap();
        let order2 = h2.await.unwrap().unwrap();
        assert_eq!(order1.id, order2.id, "both callers must converge on the same order");
    }

    #[tokio::test]
    async fn unknown_market_rejects_with_market_not_found() {
        let (executor, _markets, _ledger) = executor();
        let request = MarketOrderRequest {
            user_id: "u1".to_string(),
            market_id: "ghost".to_string(),
            outcome: Outcome::Yes,
            quantity: 1.0,
            nonce: None,
        };
        let err = executor.execute_market_order(request).await.unwrap_err();
        assert!(matches!(err, AppError::MarketNotFound(_)));
    }

    #[tokio::test]
    async fn insufficient_balance_rejects_before_any_ledger_mutation() {
        let (executor, _markets, ledger) = executor();
        ledger
            .append("u1", None, TransactionType::Deposit, Money::of("1").unwrap(), "seed")
            .unwrap();
        let request = MarketOrderRequest {
            user_id: "u1".to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            quantity: 10.0,
            nonce: None,
        };
        let err = executor.execute_market_order(request).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));
        assert_eq!(ledger.running_balance("u1"), Money::of("1").unwrap());
    }
}
