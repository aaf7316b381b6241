//! In-memory hot maps for markets and positions (spec §4.6 MarketStore /
//! PositionStore).
//!
//! Both stores are `DashMap`s so reads and per-key writes don't serialize
//! across unrelated markets or positions — the same sharded-map approach
//! the order book in the matching-engine teacher repo uses for its live
//! book. A market or position carries a `dirty` flag set on every mutation;
//! the idle-flush task periodically drains dirty entries out to durable
//! storage and clears the flag, rather than writing through on every trade.

use crate::domain::{MarketStatus, Outcome};
use crate::pricing;
use dashmap::DashMap;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Market {
    pub id: String,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub liquidity_b: f64,
    /// Kept in lockstep with `yes_shares`/`no_shares` (spec §3 invariant:
    /// `currentPrice = price(yesShares, noShares, liquidityB)` after every
    /// applied trade) so readers never have to recompute it.
    pub current_price: f64,
    pub status: MarketStatus,
    pub dirty: bool,
    pub last_touched: Instant,
    pub last_trade_at: Option<Instant>,
    pub last_persisted_at: Option<Instant>,
}

impl Market {
    pub fn new(id: impl Into<String>, liquidity_b: f64) -> Self {
        Self {
            id: id.into(),
            yes_shares: 0.0,
            no_shares: 0.0,
            liquidity_b,
            current_price: pricing::price_yes(0.0, 0.0, liquidity_b),
            status: MarketStatus::Open,
            dirty: false,
            last_touched: Instant::now(),
            last_trade_at: None,
            last_persisted_at: None,
        }
    }

    pub fn pool_for(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes_shares,
            Outcome::No => self.no_shares,
        }
    }

    /// Applies a fill, bumping the outcome's share pool, recomputing
    /// `current_price`, and marking the market dirty for the next flush.
    pub fn apply_fill(&mut self, outcome: Outcome, shares: f64) {
        match outcome {
            Outcome::Yes => self.yes_shares += shares,
            Outcome::No => self.no_shares += shares,
        }
        self.current_price = pricing::price_yes(self.yes_shares, self.no_shares, self.liquidity_b);
        let now = Instant::now();
        self.dirty = true;
        self.last_touched = now;
        self.last_trade_at = Some(now);
    }

    /// Whether this market is due for the idle-flush sweep: dirty, quiet
    /// for at least `quiet_for`, and not already persisted past its last
    /// trade (spec §4.6: "now − lastModified > 1000 ms and
    /// lastPersistedTimestamp < lastTradeTimestamp").
    fn due_for_flush(&self, quiet_for: std::time::Duration) -> bool {
        self.dirty
            && self.last_touched.elapsed() >= quiet_for
            && match (self.last_persisted_at, self.last_trade_at) {
                (None, Some(_)) => true,
                (Some(persisted), Some(traded)) => persisted < traded,
                _ => false,
            }
    }
}

#[derive(Default)]
pub struct MarketStore {
    markets: DashMap<String, Market>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, market: Market) {
        self.markets.insert(market.id.clone(), market);
    }

    pub fn get(&self, id: &str) -> Option<Market> {
        self.markets.get(id).map(|m| m.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.markets.contains_key(id)
    }

    /// Mutates a market in place under its shard lock, for executors that
    /// need read-then-write atomicity (spec §4.8 step 6: mutate market and
    /// mark dirty in one step).
    pub fn with_mut<R>(&self, id: &str, f: impl FnOnce(&mut Market) -> R) -> Option<R> {
        self.markets.get_mut(id).map(|mut m| f(&mut m))
    }

    /// Snapshot of every market due for a flush (dirty, quiet for at least
    /// `quiet_for`, not already persisted past its last trade), clearing
    /// the flag and advancing `last_persisted_at` as it goes — used by the
    /// idle-flush task (spec §4.6).
    pub fn take_due_for_flush(&self, quiet_for: std::time::Duration) -> Vec<Market> {
        let mut flushed = Vec::new();
        for mut entry in self.markets.iter_mut() {
            if entry.due_for_flush(quiet_for) {
                entry.dirty = false;
                entry.last_persisted_at = Some(Instant::now());
                flushed.push(entry.clone());
            }
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// A user's net position in one market: how many shares of each outcome
/// they hold. Positions mutate in place rather than append-only (spec §9
/// design note: unlike the ledger, positions are a current-state cache).
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub user_id: String,
    pub market_id: String,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub dirty: bool,
}

impl Position {
    pub fn shares_for(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes_shares,
            Outcome::No => self.no_shares,
        }
    }

    pub fn apply_fill(&mut self, outcome: Outcome, shares: f64) {
        match outcome {
            Outcome::Yes => self.yes_shares += shares,
            Outcome::No => self.no_shares += shares,
        }
        self.dirty = true;
    }
}

fn position_key(user_id: &str, market_id: &str) -> String {
    format!("{user_id}:{market_id}")
}

#[derive(Default)]
pub struct PositionStore {
    positions: DashMap<String, Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str, market_id: &str) -> Option<Position> {
        self.positions.get(&position_key(user_id, market_id)).map(|p| p.clone())
    }

    /// Applies a fill to a user's position, creating it if this is their
    /// first trade in this market.
    pub fn apply_fill(&self, user_id: &str, market_id: &str, outcome: Outcome, shares: f64) {
        let key = position_key(user_id, market_id);
        self.positions
            .entry(key)
            .or_insert_with(|| Position {
                user_id: user_id.to_string(),
                market_id: market_id.to_string(),
                ..Default::default()
            })
            .apply_fill(outcome, shares);
    }

    pub fn take_dirty(&self) -> Vec<Position> {
        let mut flushed = Vec::new();
        for mut entry in self.positions.iter_mut() {
            if entry.dirty {
                entry.dirty = false;
                flushed.push(entry.clone());
            }
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }
}

/// Periodic idle-flush: drains dirty markets and positions and logs what
/// would be persisted. The actual write goes through `persistence::Store`
/// (wired up by the caller in `main`), kept separate here so this module
/// stays storage-agnostic.
pub async fn run_idle_flush_loop(
    markets: std::sync::Arc<MarketStore>,
    positions: std::sync::Arc<PositionStore>,
    interval: std::time::Duration,
    quiet_for: std::time::Duration,
    mut on_flush: impl FnMut(Vec<Market>, Vec<Position>),
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let dirty_markets = markets.take_due_for_flush(quiet_for);
        let dirty_positions = positions.take_dirty();
        if dirty_markets.is_empty() && dirty_positions.is_empty() {
            continue;
        }
        debug!(
            markets = dirty_markets.len(),
            positions = dirty_positions.len(),
            "idle-flush sweep"
        );
        on_flush(dirty_markets, dirty_positions);
    }
}
