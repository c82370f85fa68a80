//! Broker / OMS adapter boundary
//!
//! The journal talks to execution venues only through [`BrokerAdapter`]. One
//! reference implementation ships with the crate: [`PaperBroker`], a simulated
//! venue that keeps order status in a local JSON file.

pub mod paper;

pub use paper::PaperBroker;

use crate::config::BrokerConfig;
use crate::error::{JournalError, Result};
use crate::types::{Action, Instrument, Price, Symbol, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Order as sent to a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub action: Action,
    pub quantity: i64,
    pub limit_price: Option<Price>,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    pub external_order_id: String,
    pub venue: String,
    pub external_status: String,
    pub submitted_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub external_status: String,
    pub cancelled_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub external_order_id: String,
    pub venue: String,
    pub external_status: String,
    pub last_synced_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillOrderResponse {
    pub external_order_id: String,
    pub venue: String,
    pub external_status: String,
    pub filled_price: Option<Price>,
    pub filled_at: Timestamp,
}

/// Provider-agnostic execution venue
///
/// Calls are synchronous and are not retried by the journal. Any error aborts
/// the surrounding journal transaction.
pub trait BrokerAdapter: Send + Sync {
    /// Provider name, e.g. "paper"
    fn name(&self) -> &str;

    fn submit_order(&self, user_id: UserId, req: &SubmitOrderRequest)
        -> Result<SubmitOrderResponse>;

    fn cancel_order(&self, user_id: UserId, external_order_id: &str)
        -> Result<CancelOrderResponse>;

    fn get_order_status(
        &self,
        user_id: UserId,
        external_order_id: &str,
    ) -> Result<OrderStatusResponse>;

    fn fill_order(
        &self,
        user_id: UserId,
        external_order_id: &str,
        filled_price: Option<Price>,
        filled_at: Option<Timestamp>,
    ) -> Result<FillOrderResponse>;
}

/// Build the configured adapter, or `None` when broker execution is disabled
pub fn from_config(config: &BrokerConfig) -> Result<Option<Box<dyn BrokerAdapter>>> {
    if !config.enabled {
        return Ok(None);
    }
    create_broker(&config.provider, config).map(Some)
}

/// Provider factory keyed by name
pub fn create_broker(provider: &str, config: &BrokerConfig) -> Result<Box<dyn BrokerAdapter>> {
    match provider.trim().to_lowercase().as_str() {
        "paper" => Ok(Box::new(PaperBroker::new(config.paper_state_file.clone()))),
        other => Err(JournalError::UnsupportedProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn broker_config(dir: &TempDir, enabled: bool, provider: &str) -> BrokerConfig {
        BrokerConfig {
            enabled,
            provider: provider.to_string(),
            paper_state_file: dir.path().join("paper.json"),
        }
    }

    #[test]
    fn test_disabled_broker_yields_none() {
        let dir = TempDir::new().unwrap();
        let broker = from_config(&broker_config(&dir, false, "paper")).unwrap();
        assert!(broker.is_none());
    }

    #[test]
    fn test_paper_provider_selected() {
        let dir = TempDir::new().unwrap();
        let broker = from_config(&broker_config(&dir, true, " Paper ")).unwrap().unwrap();
        assert_eq!(broker.name(), "paper");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let dir = TempDir::new().unwrap();
        let err = from_config(&broker_config(&dir, true, "ibkr")).err().unwrap();
        assert!(matches!(err, JournalError::UnsupportedProvider(p) if p == "ibkr"));
    }
}
