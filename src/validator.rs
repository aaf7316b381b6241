//! Order pre-validation (spec §4.7).
//!
//! Runs before an order is ever persisted as `NEW`: field checks, then
//! quantity/type/side checks, then a balance check against a deliberately
//! overestimated cost. Spec §4.7 specifies this estimate as the *linear*
//! `quantity * price * 1.10` (not the true LMSR integral `computeCost`,
//! which the executor uses at fill time) — the 10% slippage buffer is what
//! keeps the gap between this quick estimate and the executor's exact,
//! curved cost from turning into a mid-execution insufficient-balance
//! rejection on orders that looked fine a moment earlier.

use crate::domain::{MarketStatus, Outcome, OrderType, Side};
use crate::error::{AppError, ValidationErrors};
use crate::money::Money;
use crate::order_state::Order;
use crate::store::Market;
use rust_decimal::Decimal;

/// Quantity bounds from spec §4.7: `quantity ∈ [1, 1_000_000]`.
const MIN_QUANTITY: f64 = 1.0;
const MAX_QUANTITY: f64 = 1_000_000.0;

/// Estimated-cost bounds from spec §4.7: `estimate ∈ [0.01, 1_000_000.00]`.
const MIN_ESTIMATE: &str = "0.01";
const MAX_ESTIMATE: &str = "1000000.00";

pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        OrderValidator
    }

    /// Full pre-check. On success, returns the buffered cost estimate the
    /// caller can log or compare against the executor's actual fill cost.
    pub fn validate(
        &self,
        order: &Order,
        market: &Market,
        available_balance: Money,
    ) -> Result<Money, AppError> {
        self.validate_fields(order)?;

        if market.status != MarketStatus::Open {
            return Err(AppError::NotActive);
        }

        // spec §4.7: `quantity * currentPrice * 1.10` (YES) or
        // `quantity * (1 - currentPrice) * 1.10` (NO).
        let price = match order.outcome {
            Outcome::Yes => market.current_price,
            Outcome::No => 1.0 - market.current_price,
        };
        let estimate = Money::from_f64_lossy(order.quantity * price)?;
        let buffer = Decimal::new(11, 1); // 1.10
        let buffered_estimate = estimate.multiply_decimal(buffer);

        let min_estimate = Money::of(MIN_ESTIMATE).expect("constant parses");
        let max_estimate = Money::of(MAX_ESTIMATE).expect("constant parses");
        if buffered_estimate < min_estimate || buffered_estimate > max_estimate {
            let mut errors = ValidationErrors::new();
            errors.push(format!(
                "estimated cost {} is outside the allowed range [{MIN_ESTIMATE}, {MAX_ESTIMATE}]",
                buffered_estimate.to_canonical_string()
            ));
            return Err(AppError::ValidationFailed(errors));
        }

        if available_balance < buffered_estimate {
            return Err(AppError::InsufficientBalance {
                required: buffered_estimate.to_canonical_string(),
                available: available_balance.to_canonical_string(),
            });
        }

        Ok(buffered_estimate)
    }

    fn validate_fields(&self, order: &Order) -> Result<(), AppError> {
        let mut errors = ValidationErrors::new();

        if order.user_id.trim().is_empty() {
            errors.push("user_id is required");
        }
        if order.market_id.trim().is_empty() {
            errors.push("market_id is required");
        }
        if order.nonce.trim().is_empty() {
            errors.push("nonce is required");
        }
        if !order.quantity.is_finite() || order.quantity.fract() != 0.0 {
            errors.push("quantity must be a whole number of shares");
        } else if order.quantity < MIN_QUANTITY {
            errors.push("Quantity must be at least 1");
        } else if order.quantity > MAX_QUANTITY {
            errors.push("quantity must not exceed 1,000,000");
        }
        if order.order_type != OrderType::Market {
            errors.push("only MARKET orders are supported");
        }
        if order.side != Side::Buy {
            errors.push("only BUY orders are supported");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationFailed(errors))
        }
    }
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;
    use crate::store::Market;
    use uuid::Uuid;

    fn valid_order() -> Order {
        Order::new_market_buy(Uuid::new_v4(), "n1", "u1", "m1", Outcome::Yes, 10.0)
    }

    #[test]
    fn rejects_zero_quantity_with_documented_message() {
        // End-to-end scenario 3 from spec §8.
        let mut order = valid_order();
        order.quantity = 0.0;
        let market = Market::new("m1", 100.0);
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1000").unwrap())
            .unwrap_err();
        assert_eq!(err.reason_code(), "validation_failed");
        if let AppError::ValidationFailed(errors) = &err {
            assert!(errors.to_string().contains("Quantity must be at least 1"));
        } else {
            panic!("expected ValidationFailed");
        }
    }

    #[test]
    fn rejects_quantity_above_one_million() {
        let mut order = valid_order();
        order.quantity = 1_000_001.0;
        let market = Market::new("m1", 100.0);
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1000000").unwrap())
            .unwrap_err();
        assert_eq!(err.reason_code(), "validation_failed");
    }

    #[test]
    fn rejects_fractional_quantity() {
        let mut order = valid_order();
        order.quantity = 1.5;
        let market = Market::new("m1", 100.0);
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1000").unwrap())
            .unwrap_err();
        assert_eq!(err.reason_code(), "validation_failed");
    }

    #[test]
    fn rejects_limit_orders() {
        let mut order = valid_order();
        order.order_type = OrderType::Limit;
        let market = Market::new("m1", 100.0);
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1000").unwrap())
            .unwrap_err();
        assert_eq!(err.reason_code(), "validation_failed");
    }

    #[test]
    fn rejects_trades_on_non_open_market() {
        let order = valid_order();
        let mut market = Market::new("m1", 100.0);
        market.status = crate::domain::MarketStatus::Resolved;
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1000").unwrap())
            .unwrap_err();
        assert_eq!(err.reason_code(), "not_active");
    }

    #[test]
    fn rejects_insufficient_balance_against_buffered_estimate() {
        let order = valid_order();
        let market = Market::new("m1", 100.0);
        // linear estimate at price=0.5: 10 * 0.5 * 1.10 = 5.50.
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1.00000000").unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));
    }

    #[test]
    fn rejects_large_buy_against_small_balance() {
        // End-to-end scenario 4 from spec §8: bal=1.00, BUY YES qty=1_000_000.
        let order = Order::new_market_buy(Uuid::new_v4(), "n1", "u1", "m1", Outcome::Yes, 1_000_000.0);
        let market = Market::new("m1", 100.0);
        let err = OrderValidator::new()
            .validate(&order, &market, Money::of("1.00").unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));
    }

    #[test]
    fn accepts_well_funded_valid_order() {
        let order = valid_order();
        let market = Market::new("m1", 100.0);
        let buffered = OrderValidator::new()
            .validate(&order, &market, Money::of("1000").unwrap())
            .unwrap();
        assert!(buffered.is_positive());
    }
}
