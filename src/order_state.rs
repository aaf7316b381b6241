//! Order lifecycle state machine (spec §4.4).
//!
//! `OrderStatus` and the legal-transition table live here, isolated from
//! `AppError` by returning a bare `bool`/`Option` where possible so this
//! module stays a pure function of two states — `error.rs` is the one that
//! wraps a rejected transition into `AppError::IllegalTransition`.

use crate::domain::{OrderType, Outcome, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single order (spec §3 Order). `quantity` is denominated in shares;
/// `filled_quantity` and `total_cost` are populated once execution completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub nonce: String,
    pub user_id: String,
    pub market_id: String,
    pub side: Side,
    pub outcome: Outcome,
    pub order_type: OrderType,
    pub quantity: f64,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    /// Total LMSR cost paid across the fill (spec §3 Order.totalCost).
    pub total_cost: Option<crate::money::Money>,
    /// `total_cost / filled_quantity`, set only once the order is FILLED.
    pub average_fill_price: Option<crate::money::Money>,
    /// The ledger transaction that recorded this order's fill.
    pub transaction_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when and only when a terminal state is entered (spec §4.4).
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new_market_buy(
        id: Uuid,
        nonce: impl Into<String>,
        user_id: impl Into<String>,
        market_id: impl Into<String>,
        outcome: Outcome,
        quantity: f64,
    ) -> Self {
        let now = Utc::now();
        Order {
            id,
            nonce: nonce.into(),
            user_id: user_id.into(),
            market_id: market_id.into(),
            side: Side::Buy,
            outcome,
            order_type: OrderType::Market,
            quantity,
            status: OrderStatus::New,
            filled_quantity: 0.0,
            total_cost: None,
            average_fill_price: None,
            transaction_id: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Moves to `next` if legal, stamping `updated_at`; otherwise leaves the
    /// order untouched and surfaces `IllegalTransition`. `completed_at` is
    /// populated exactly once, the moment a terminal state is entered.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), crate::error::AppError> {
        validate_transition(self.status, next)?;
        self.status = next;
        let now = Utc::now();
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// `reject(reason)` is the only path that populates `rejection_reason`
    /// (spec §4.4).
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), crate::error::AppError> {
        self.transition_to(OrderStatus::Rejected)?;
        self.rejection_reason = Some(reason.into());
        Ok(())
    }

    /// Marks the order FILLED for `quantity` shares at `cost` (spec §4.8.1:
    /// "market orders always fill completely"). Sets `average_fill_price`
    /// and leaves `transaction_id` to the caller, who knows the ledger id.
    pub fn fill(&mut self, quantity: f64, cost: crate::money::Money) -> Result<(), crate::error::AppError> {
        self.filled_quantity = quantity;
        self.total_cost = Some(cost);
        self.transition_to(OrderStatus::Filled)?;
        self.average_fill_price = Some(cost.divide_i64(quantity as i64).unwrap_or(cost));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Open,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal states never accept another transition (spec §4.4 invariant).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected)
    }

    /// True if this status is one that can still be matched against in the
    /// executor (NEW has not yet reached OPEN, so it is excluded).
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::Partial)
    }

    /// The legal-transition table from spec §4.4:
    /// NEW -> OPEN, REJECTED
    /// OPEN -> PARTIAL, FILLED, CANCELLED, REJECTED
    /// PARTIAL -> FILLED, CANCELLED
    /// FILLED, CANCELLED, REJECTED -> (none; terminal)
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, Open) | (New, Rejected)
                | (Open, Partial) | (Open, Filled) | (Open, Cancelled) | (Open, Rejected)
                | (Partial, Filled) | (Partial, Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Open => "OPEN",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// Attempts the transition, returning the error the caller should raise
/// (spec error kind IllegalTransition) when it is not legal.
pub fn validate_transition(
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), crate::error::AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::error::AppError::IllegalTransition { from, to })
    }
}
