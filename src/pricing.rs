//! Pure LMSR cost/price functions (spec §4.2).
//!
//! No state, no I/O — every function is a closed-form expression over
//! `(yes_shares, no_shares, liquidity_b)`. The numerically stable
//! `log_sum_exp` formulation (subtracting the running max before calling
//! `exp`) is required to avoid overflow for large share pools; it is
//! grounded directly on the teacher's `lmsr_core::log_sum_exp`.

use crate::domain::Outcome;

/// `m + ln(e^(a-m) + e^(b-m))`, where `m = max(a, b)`. Equivalent to
/// `ln(e^a + e^b)` but safe for large `a`/`b`.
#[inline]
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// `cost(q_y, q_n, b) = b * (m + ln(e^(q_y/b - m) + e^(q_n/b - m)))`.
#[inline]
pub fn cost(yes_shares: f64, no_shares: f64, liquidity_b: f64) -> f64 {
    debug_assert!(liquidity_b > 0.0 && liquidity_b.is_finite());
    let a = yes_shares / liquidity_b;
    let c = no_shares / liquidity_b;
    liquidity_b * log_sum_exp(a, c)
}

/// Price of the YES outcome: `e^(q_y/b - m) / (e^(q_y/b - m) + e^(q_n/b - m))`.
/// Always strictly between 0 and 1 for finite, positive `b` (spec P6).
#[inline]
pub fn price_yes(yes_shares: f64, no_shares: f64, liquidity_b: f64) -> f64 {
    let a = yes_shares / liquidity_b;
    let c = no_shares / liquidity_b;
    let m = a.max(c);
    let ey = (a - m).exp();
    let en = (c - m).exp();
    ey / (ey + en)
}

/// Price of the given outcome. For NO this is `1 - price_yes`, computed
/// directly (not via subtraction) to keep the same numerical footing.
pub fn price(yes_shares: f64, no_shares: f64, outcome: Outcome, liquidity_b: f64) -> f64 {
    match outcome {
        Outcome::Yes => price_yes(yes_shares, no_shares, liquidity_b),
        Outcome::No => price_yes(no_shares, yes_shares, liquidity_b),
    }
}

/// `computeCost(q_y, q_n, outcome, delta, b) = cost(q_y', q_n', b) - cost(q_y, q_n, b)`
/// where the outcome's pool is bumped by `delta`. Returns 0.0 for `delta == 0`
/// and is guaranteed non-negative for any legal state and `delta >= 0`
/// (spec P5); a few ULP of float noise below zero is clamped rather than
/// surfaced, since the LMSR cost function is provably monotonic in each pool.
pub fn compute_cost(
    yes_shares: f64,
    no_shares: f64,
    outcome: Outcome,
    delta: f64,
    liquidity_b: f64,
) -> f64 {
    if delta <= 0.0 {
        return 0.0;
    }
    let (new_yes, new_no) = match outcome {
        Outcome::Yes => (yes_shares + delta, no_shares),
        Outcome::No => (yes_shares, no_shares + delta),
    };
    let delta_cost = cost(new_yes, new_no, liquidity_b) - cost(yes_shares, no_shares, liquidity_b);
    delta_cost.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_market_buy_ten_yes_matches_known_value() {
        // End-to-end scenario 1 from spec §8: b=100, buy 10 YES from (0, 0).
        let c = compute_cost(0.0, 0.0, Outcome::Yes, 10.0, 100.0);
        assert!((c - 5.0124979).abs() < 1e-5, "cost={c}");
    }

    #[test]
    fn zero_delta_is_zero_cost() {
        assert_eq!(compute_cost(12.0, 3.0, Outcome::Yes, 0.0, 100.0), 0.0);
    }

    #[test]
    fn price_bounds_hold_for_extreme_pools() {
        let p = price_yes(1.0e6, 0.0, 100.0);
        assert!(p > 0.0 && p < 1.0, "p={p}");
        let p = price_yes(0.0, 1.0e6, 100.0);
        assert!(p > 0.0 && p < 1.0, "p={p}");
    }

    proptest! {
        // P5: computeCost >= 0 for any legal state and delta > 0.
        #[test]
        fn compute_cost_is_non_negative(
            yes in 0.0f64..100_000.0,
            no in 0.0f64..100_000.0,
            b in 1.0f64..10_000.0,
            delta in 0.0001f64..100_000.0,
            yes_side in any::<bool>(),
        ) {
            let outcome = if yes_side { Outcome::Yes } else { Outcome::No };
            let c = compute_cost(yes, no, outcome, delta, b);
            prop_assert!(c >= 0.0, "computeCost was negative: {}", c);
        }

        // P6: 0 < price < 1 whenever liquidity_b > 0.
        #[test]
        fn price_is_strictly_between_zero_and_one(
            yes in 0.0f64..1_000_000.0,
            no in 0.0f64..1_000_000.0,
            b in 1.0f64..10_000.0,
        ) {
            let p = price_yes(yes, no, b);
            prop_assert!(p > 0.0 && p < 1.0, "p={}", p);
            prop_assert!((p + price_yes(no, yes, b) - 1.0).abs() < 1e-9);
        }
    }
}
