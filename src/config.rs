//! Configuration management for the trade-execution engine.
//! Supports environment variables with fallback to defaults, the same
//! shape as the original market-config loader this was adapted from.

use crate::rate_limiter::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Top-level configuration, assembled once at startup and handed to every
/// subsystem that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub market: MarketConfig,
    pub rate_limit: RateLimitConfig,
    pub rate_limit_exempt_prefixes: Vec<String>,
    pub balance: BalanceConfig,
    pub store: StoreConfig,
    pub http: HttpConfig,
}

/// Defaults applied when a market is created without its own liquidity
/// parameter (spec §4.2: `b` controls how much the price moves per share).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub default_liquidity_b: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_liquidity_b: 100.0,
        }
    }
}

/// Cadence of the background balance-reconciliation sweep. Spec §4.5: "every
/// 5 minutes".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    pub reconciliation_interval_secs: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval_secs: 300,
        }
    }
}

/// Cadence and quiet-window of the idle-flush sweep for dirty
/// markets/positions. Spec §4.6: scheduled flush every 1s, entries flushed
/// once `now − lastModified > 1000 ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub idle_flush_interval_secs: u64,
    pub idle_flush_quiet_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idle_flush_interval_secs: 1,
            idle_flush_quiet_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            rate_limit: RateLimitConfig::default(),
            rate_limit_exempt_prefixes: vec!["/health".to_string()],
            balance: BalanceConfig::default(),
            store: StoreConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with fallback to
    /// defaults; malformed values fall back rather than panicking so a
    /// typo'd env var degrades to the default instead of crashing startup.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(b) = env::var("LMSR_DEFAULT_LIQUIDITY_B") {
            config.market.default_liquidity_b = b.parse().unwrap_or(config.market.default_liquidity_b);
        }

        if let Ok(capacity) = env::var("RATE_LIMIT_CAPACITY") {
            config.rate_limit.capacity = capacity.parse().unwrap_or(config.rate_limit.capacity);
        }

        if let Ok(refill) = env::var("RATE_LIMIT_REFILL_PER_SECOND") {
            config.rate_limit.refill_per_second = refill.parse().unwrap_or(config.rate_limit.refill_per_second);
        }

        if let Ok(secs) = env::var("BALANCE_RECONCILIATION_INTERVAL_SECS") {
            config.balance.reconciliation_interval_secs =
                secs.parse().unwrap_or(config.balance.reconciliation_interval_secs);
        }

        if let Ok(secs) = env::var("STORE_IDLE_FLUSH_INTERVAL_SECS") {
            config.store.idle_flush_interval_secs =
                secs.parse().unwrap_or(config.store.idle_flush_interval_secs);
        }

        if let Ok(ms) = env::var("STORE_IDLE_FLUSH_QUIET_MS") {
            config.store.idle_flush_quiet_ms = ms.parse().unwrap_or(config.store.idle_flush_quiet_ms);
        }

        if let Ok(prefixes) = env::var("RATE_LIMIT_EXEMPT_PREFIXES") {
            config.rate_limit_exempt_prefixes =
                prefixes.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }

        if let Ok(port) = env::var("HTTP_PORT") {
            config.http.port = port.parse().unwrap_or(config.http.port);
        }

        config.validate();
        config
    }

    /// Clamps out-of-range values to something sane, logging each
    /// correction instead of failing startup over a bad env var.
    fn validate(&mut self) {
        if self.market.default_liquidity_b <= 0.0 {
            warn!(
                value = self.market.default_liquidity_b,
                "invalid default_liquidity_b, falling back to default"
            );
            self.market.default_liquidity_b = MarketConfig::default().default_liquidity_b;
        }

        if self.rate_limit.capacity <= 0.0 {
            warn!(
                value = self.rate_limit.capacity,
                "invalid rate_limit.capacity, falling back to default"
            );
            self.rate_limit.capacity = RateLimitConfig::default().capacity;
        }

        if self.rate_limit.refill_per_second <= 0.0 {
            warn!(
                value = self.rate_limit.refill_per_second,
                "invalid rate_limit.refill_per_second, falling back to default"
            );
            self.rate_limit.refill_per_second = RateLimitConfig::default().refill_per_second;
        }

        if self.balance.reconciliation_interval_secs == 0 {
            warn!("balance.reconciliation_interval_secs cannot be zero, falling back to default");
            self.balance.reconciliation_interval_secs = BalanceConfig::default().reconciliation_interval_secs;
        }

        if self.store.idle_flush_interval_secs == 0 {
            warn!("store.idle_flush_interval_secs cannot be zero, falling back to default");
            self.store.idle_flush_interval_secs = StoreConfig::default().idle_flush_interval_secs;
        }
    }

    /// Logs the effective configuration once at startup.
    pub fn log_effective_config(&self) {
        tracing::info!(
            default_liquidity_b = self.market.default_liquidity_b,
            rate_limit_capacity = self.rate_limit.capacity,
            rate_limit_refill_per_second = self.rate_limit.refill_per_second,
            rate_limit_exempt_prefixes = ?self.rate_limit_exempt_prefixes,
            reconciliation_interval_secs = self.balance.reconciliation_interval_secs,
            idle_flush_interval_secs = self.store.idle_flush_interval_secs,
            idle_flush_quiet_ms = self.store.idle_flush_quiet_ms,
            http_port = self.http.port,
            "effective configuration"
        );
    }

    /// Whether `path` should skip the rate limiter entirely (spec §6: "(iii)
    /// exempt configured prefixes").
    pub fn is_rate_limit_exempt(&self, path: &str) -> bool {
        self.rate_limit_exempt_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = Config::default();
        assert!(config.market.default_liquidity_b > 0.0);
        assert!(config.rate_limit.capacity > 0.0);
    }

    #[test]
    fn validate_repairs_invalid_liquidity() {
        let mut config = Config::default();
        config.market.default_liquidity_b = -5.0;
        config.validate();
        assert_eq!(config.market.default_liquidity_b, MarketConfig::default().default_liquidity_b);
    }

    #[test]
    fn validate_repairs_zero_intervals() {
        let mut config = Config::default();
        config.balance.reconciliation_interval_secs = 0;
        config.store.idle_flush_interval_secs = 0;
        config.validate();
        assert!(config.balance.reconciliation_interval_secs > 0);
        assert!(config.store.idle_flush_interval_secs > 0);
    }

    #[test]
    fn health_is_exempt_by_default() {
        let config = Config::default();
        assert!(config.is_rate_limit_exempt("/health"));
        assert!(!config.is_rate_limit_exempt("/trade"));
    }
}
