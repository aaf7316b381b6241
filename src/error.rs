//! Error taxonomy for the trade-execution core.
//!
//! Each variant below is one of the "kinds, not names" from the design's
//! error-handling section. Call sites match on these directly instead of
//! string-matching a message, and the `OrderExecutor` uses them to decide
//! which transitions and HTTP statuses apply.

use crate::order_state::OrderStatus;
use thiserror::Error;

/// An ordered list of field-validation failures, joined for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("arithmetic error: {0}")]
    ArithmeticError(String),

    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("duplicate nonce: {0}")]
    DuplicateNonce(String),

    #[error("illegal order transition {from:?} -> {to:?}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("not authorized")]
    NotAuthorized,

    #[error("order not active")]
    NotActive,

    #[error("race lost updating order")]
    RaceLost,

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("persistence error: {0}")]
    PersistenceError(String),
}

impl AppError {
    /// Machine-readable reason tag, used by the HTTP surface and by order
    /// rejection reasons so callers never need to substring-match `Display`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::ArithmeticError(_) => "arithmetic_error",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::MarketNotFound(_) => "market_not_found",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::DuplicateNonce(_) => "duplicate_nonce",
            AppError::IllegalTransition { .. } => "illegal_transition",
            AppError::NotAuthorized => "not_authorized",
            AppError::NotActive => "not_active",
            AppError::RaceLost => "race_lost",
            AppError::ExecutionFailed(_) => "execution_failed",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::PersistenceError(_) => "persistence_error",
        }
    }
}
