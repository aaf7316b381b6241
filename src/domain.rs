//! Small enums shared across the trade-execution core.
//!
//! Kept separate from `order_state` so `pricing` and `ledger` can depend on
//! them without pulling in the order lifecycle machinery.

use serde::{Deserialize, Serialize};

/// The two outcomes of a binary market. Stored canonically uppercase (spec
/// §4.7); parsing is case-insensitive at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Some(Outcome::Yes),
            "NO" => Some(Outcome::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side. MVP only exercises BUY (spec §9 open question, resolved:
/// source declares `side` but only BUY is exercised here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
}

/// Order type. LIMIT is rejected by the validator in this MVP (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Ledger entry kind (spec §3 Transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    TradeBuy,
    TradeSell,
    Deposit,
    Withdrawal,
    MarketResolution,
}

/// Market lifecycle status (spec §3 MarketState, §9 open question: only
/// OPEN markets accept trades when status is present).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Open,
    Resolved,
}
