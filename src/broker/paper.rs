//! Paper broker
//!
//! Simulates an external OMS without any external dependency. Orders are
//! accepted and stay there until the journal marks them filled or cancelled.
//! Status lives in a small JSON file so it survives restarts; writes go
//! through a temp file and a rename.

use super::{
    BrokerAdapter, CancelOrderResponse, FillOrderResponse, OrderStatusResponse,
    SubmitOrderRequest, SubmitOrderResponse,
};
use crate::error::Result;
use crate::types::{Price, Timestamp, UserId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const VENUE: &str = "PAPER";

pub const STATUS_ACCEPTED: &str = "ACCEPTED";
pub const STATUS_CANCELLED: &str = "CANCELLED";
pub const STATUS_FILLED: &str = "FILLED";
pub const STATUS_UNKNOWN: &str = "UNKNOWN";

/// One order as remembered by the paper venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub status: String,
    pub venue: String,
}

/// On-disk layout: `{"orders": {"<external id>": {"status": .., "venue": ..}}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperState {
    #[serde(default)]
    pub orders: BTreeMap<String, PaperOrder>,
}

/// File-backed simulated venue
#[derive(Debug, Clone)]
pub struct PaperBroker {
    state_file: PathBuf,
}

impl PaperBroker {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Deterministic for a given client id so resubmissions map to one venue order
    pub fn external_id(user_id: UserId, client_order_id: Option<&str>) -> String {
        match client_order_id {
            Some(coid) => format!("paper:{}:{}", user_id, coid),
            None => format!("paper:{}:{}", user_id, uuid::Uuid::new_v4().simple()),
        }
    }

    /// Load the state file; a missing or unreadable file is an empty venue
    pub fn load_state(&self) -> PaperState {
        let contents = match fs::read_to_string(&self.state_file) {
            Ok(contents) => contents,
            Err(_) => return PaperState::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable paper broker state {}: {}",
                    self.state_file.display(),
                    e
                );
                PaperState::default()
            }
        }
    }

    fn save_state(&self, state: &PaperState) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = self.state_file.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, &self.state_file)?;
        Ok(())
    }

    fn set_status(&self, external_order_id: &str, status: &str) -> Result<()> {
        let mut state = self.load_state();
        state.orders.insert(
            external_order_id.to_string(),
            PaperOrder {
                status: status.to_string(),
                venue: VENUE.to_string(),
            },
        );
        self.save_state(&state)
    }

    fn get_status(&self, external_order_id: &str) -> (String, String) {
        self.load_state()
            .orders
            .remove(external_order_id)
            .map(|o| (o.status, o.venue))
            .unwrap_or_else(|| (STATUS_UNKNOWN.to_string(), VENUE.to_string()))
    }
}

impl BrokerAdapter for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    fn submit_order(
        &self,
        user_id: UserId,
        req: &SubmitOrderRequest,
    ) -> Result<SubmitOrderResponse> {
        let ext = Self::external_id(user_id, req.client_order_id.as_deref());
        self.set_status(&ext, STATUS_ACCEPTED)?;
        log::debug!("Paper broker accepted {} {} {} as {}", req.action, req.quantity, req.symbol, ext);
        Ok(SubmitOrderResponse {
            external_order_id: ext,
            venue: VENUE.to_string(),
            external_status: STATUS_ACCEPTED.to_string(),
            submitted_at: Utc::now(),
        })
    }

    fn cancel_order(&self, _user_id: UserId, external_order_id: &str) -> Result<CancelOrderResponse> {
        self.set_status(external_order_id, STATUS_CANCELLED)?;
        Ok(CancelOrderResponse {
            external_status: STATUS_CANCELLED.to_string(),
            cancelled_at: Utc::now(),
        })
    }

    fn get_order_status(
        &self,
        _user_id: UserId,
        external_order_id: &str,
    ) -> Result<OrderStatusResponse> {
        let (status, venue) = self.get_status(external_order_id);
        Ok(OrderStatusResponse {
            external_order_id: external_order_id.to_string(),
            venue,
            external_status: status,
            last_synced_at: Utc::now(),
        })
    }

    fn fill_order(
        &self,
        _user_id: UserId,
        external_order_id: &str,
        filled_price: Option<Price>,
        filled_at: Option<Timestamp>,
    ) -> Result<FillOrderResponse> {
        self.set_status(external_order_id, STATUS_FILLED)?;
        Ok(FillOrderResponse {
            external_order_id: external_order_id.to_string(),
            venue: VENUE.to_string(),
            external_status: STATUS_FILLED.to_string(),
            filled_price,
            filled_at: filled_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Instrument};
    use tempfile::TempDir;

    fn request(client_order_id: Option<&str>) -> SubmitOrderRequest {
        SubmitOrderRequest {
            symbol: "AAPL".to_string(),
            instrument: Instrument::Stock,
            action: Action::Buy,
            quantity: 2,
            limit_price: Some(123.45),
            client_order_id: client_order_id.map(str::to_string),
        }
    }

    #[test]
    fn test_submit_is_deterministic_for_client_id() {
        let dir = TempDir::new().unwrap();
        let broker = PaperBroker::new(dir.path().join("state.json"));

        let a = broker.submit_order(1, &request(Some("coid-1"))).unwrap();
        let b = broker.submit_order(1, &request(Some("coid-1"))).unwrap();
        assert_eq!(a.external_order_id, "paper:1:coid-1");
        assert_eq!(a.external_order_id, b.external_order_id);
        assert_eq!(a.external_status, STATUS_ACCEPTED);
        assert_eq!(broker.load_state().orders.len(), 1);
    }

    #[test]
    fn test_submit_without_client_id_is_unique() {
        let dir = TempDir::new().unwrap();
        let broker = PaperBroker::new(dir.path().join("state.json"));

        let a = broker.submit_order(1, &request(None)).unwrap();
        let b = broker.submit_order(1, &request(None)).unwrap();
        assert_ne!(a.external_order_id, b.external_order_id);
        assert!(a.external_order_id.starts_with("paper:1:"));
    }

    #[test]
    fn test_status_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let ext = PaperBroker::new(&path)
            .submit_order(3, &request(Some("x")))
            .unwrap()
            .external_order_id;
        PaperBroker::new(&path).cancel_order(3, &ext).unwrap();

        let status = PaperBroker::new(&path).get_order_status(3, &ext).unwrap();
        assert_eq!(status.external_status, STATUS_CANCELLED);
        assert_eq!(status.venue, VENUE);
    }

    #[test]
    fn test_unknown_and_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let broker = PaperBroker::new(&path);
        let status = broker.get_order_status(1, "paper:1:missing").unwrap();
        assert_eq!(status.external_status, STATUS_UNKNOWN);

        // A write replaces the corrupt file with a valid one
        broker.fill_order(1, "paper:1:abc", Some(10.5), None).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["orders"]["paper:1:abc"]["status"], "FILLED");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
