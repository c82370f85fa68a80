//! Error types for rusty-ledger

use crate::order::OrderStatus;
use crate::types::OrderId;
use thiserror::Error;

/// Main error type for journal operations
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} is {status}, expected PENDING")]
    OrderNotPending { order_id: OrderId, status: OrderStatus },

    #[error("Invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Broker execution is disabled")]
    BrokerDisabled,

    #[error("Order {0} has no external broker linkage")]
    NotBrokerLinked(OrderId),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Unsupported broker provider: {0}")]
    UnsupportedProvider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl JournalError {
    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        JournalError::Validation(msg.into())
    }

    /// True for caller-input errors (4xx-style)
    pub fn is_validation(&self) -> bool {
        matches!(self, JournalError::Validation(_) | JournalError::Parse(_))
    }
}

/// Result type alias for journal operations
pub type Result<T> = std::result::Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = JournalError::OrderNotPending {
            order_id: 7,
            status: OrderStatus::Filled,
        };
        assert_eq!(err.to_string(), "Order 7 is FILLED, expected PENDING");

        let err = JournalError::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Filled,
        };
        assert!(err.to_string().contains("CANCELLED -> FILLED"));
    }

    #[test]
    fn test_validation_classification() {
        assert!(JournalError::validation("symbol required").is_validation());
        assert!(!JournalError::BrokerDisabled.is_validation());
    }
}
