use lmsr_engine::balance::BalanceService;
use lmsr_engine::config::Config;
use lmsr_engine::dispatcher::MarketDispatcher;
use lmsr_engine::executor::OrderExecutor;
use lmsr_engine::http::{self, AppState};
use lmsr_engine::ledger::Ledger;
use lmsr_engine::persistence::InMemoryStore;
use lmsr_engine::rate_limiter::RateLimiter;
use lmsr_engine::store::{MarketStore, PositionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("starting lmsr_engine");

    let config = Config::from_env();
    config.log_effective_config();

    let markets = Arc::new(MarketStore::new());
    let positions = Arc::new(PositionStore::new());
    let ledger = Arc::new(Ledger::new());
    let balances = Arc::new(BalanceService::new());
    let persistence = InMemoryStore::new();

    let executor = Arc::new(OrderExecutor::new(
        Arc::clone(&markets),
        Arc::clone(&positions),
        Arc::clone(&ledger),
        Arc::clone(&balances),
        Arc::clone(&persistence),
    ));
    let dispatcher = Arc::new(MarketDispatcher::new(executor));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit));

    // Balance reconciliation sweep: corrects any cache drift against the
    // ledger on a fixed interval (spec §4.5).
    {
        let balances = Arc::clone(&balances);
        let ledger = Arc::clone(&ledger);
        let interval = Duration::from_secs(config.balance.reconciliation_interval_secs);
        tokio::spawn(async move {
            balances.run_reconciliation_loop(ledger, interval).await;
        });
    }

    // Idle-flush sweep: drains dirty markets/positions out to durable
    // storage on a fixed interval (spec §4.6).
    {
        let markets = Arc::clone(&markets);
        let positions = Arc::clone(&positions);
        let persistence = Arc::clone(&persistence);
        let interval = Duration::from_secs(config.store.idle_flush_interval_secs);
        let quiet_for = Duration::from_millis(config.store.idle_flush_quiet_ms);
        tokio::spawn(async move {
            lmsr_engine::store::run_idle_flush_loop(markets, positions, interval, quiet_for, move |dirty_markets, dirty_positions| {
                let persistence = Arc::clone(&persistence);
                tokio::spawn(async move {
                    for market in dirty_markets {
                        if let Err(err) = persistence.save_market(&market).await {
                            tracing::warn!(error = %err, market_id = %market.id, "idle-flush of market failed");
                        }
                    }
                    for position in dirty_positions {
                        if let Err(err) = persistence.save_position(&position).await {
                            tracing::warn!(error = %err, user_id = %position.user_id, "idle-flush of position failed");
                        }
                    }
                });
            })
            .await;
        });
    }

    let http_port = config.http.port;
    let config = Arc::new(config);

    let state = AppState {
        markets,
        positions,
        ledger,
        balances,
        dispatcher,
        rate_limiter,
        config,
    };
    let app = http::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
