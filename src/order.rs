//! Order types and the order state machine

use crate::error::{JournalError, Result};
use crate::types::{
    sql_text_enum, Action, Instrument, OrderId, Price, Symbol, Timestamp, TradeId, UserId,
};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local order status
///
/// `Pending` is the only non-terminal state; `Filled` and `Cancelled` have no
/// outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

sql_text_enum!(OrderStatus {
    Pending => "PENDING",
    Filled => "FILLED",
    Cancelled => "CANCELLED",
});

impl OrderStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::Pending, OrderStatus::Filled) => true,
            (OrderStatus::Pending, OrderStatus::Cancelled) => true,
            (OrderStatus::Pending, OrderStatus::Pending) => false,
            (OrderStatus::Filled, _) | (OrderStatus::Cancelled, _) => false,
        }
    }

    /// Validate a transition, returning the target status
    pub fn transition(&self, next: OrderStatus) -> Result<OrderStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(JournalError::InvalidTransition { from: *self, to: next })
        }
    }
}

/// Kind of entry in an order's event trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderEventType {
    Created,
    Submitted,
    Filled,
    Cancelled,
    Synced,
}

sql_text_enum!(OrderEventType {
    Created => "CREATED",
    Submitted => "SUBMITTED",
    Filled => "FILLED",
    Cancelled => "CANCELLED",
    Synced => "SYNCED",
});

/// Order intent as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub action: Action,
    pub strategy: Option<String>,
    pub quantity: i64,
    pub limit_price: Option<Price>,
    /// Caller-generated idempotency token
    pub client_order_id: Option<String>,
}

impl NewOrder {
    /// Market order with no strategy or client id
    pub fn market(symbol: impl Into<String>, action: Action, quantity: i64) -> Self {
        Self {
            symbol: symbol.into(),
            instrument: Instrument::Stock,
            action,
            strategy: None,
            quantity,
            limit_price: None,
            client_order_id: None,
        }
    }

    pub fn with_limit(mut self, limit_price: Price) -> Self {
        self.limit_price = Some(limit_price);
        self
    }

    pub fn with_client_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instrument = instrument;
        self
    }
}

/// Persisted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub action: Action,
    pub strategy: Option<String>,
    pub quantity: i64,
    pub limit_price: Option<Price>,
    pub status: OrderStatus,
    pub created_at: Timestamp,
    pub filled_at: Option<Timestamp>,
    pub filled_price: Option<Price>,
    pub trade_id: Option<TradeId>,
    pub client_order_id: Option<String>,
    /// Venue-side linkage; advisory only
    pub external_order_id: Option<String>,
    pub venue: Option<String>,
    pub external_status: Option<String>,
    pub last_synced_at: Option<Timestamp>,
}

pub(crate) const ORDER_COLUMNS: &str = "id, user_id, symbol, instrument, action, strategy, \
     quantity, limit_price, status, created_at, filled_at, filled_price, trade_id, \
     client_order_id, external_order_id, venue, external_status, last_synced_at";

impl Order {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            symbol: row.get(2)?,
            instrument: row.get(3)?,
            action: row.get(4)?,
            strategy: row.get(5)?,
            quantity: row.get(6)?,
            limit_price: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
            filled_at: row.get(10)?,
            filled_price: row.get(11)?,
            trade_id: row.get(12)?,
            client_order_id: row.get(13)?,
            external_order_id: row.get(14)?,
            venue: row.get(15)?,
            external_status: row.get(16)?,
            last_synced_at: row.get(17)?,
        })
    }

    /// Check if order can still be filled or cancelled
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Check if the order is linked to an external venue
    pub fn is_broker_linked(&self) -> bool {
        self.external_order_id.is_some()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order#{}({}, {}, {} x{}, {})",
            self.id, self.action, self.symbol, self.instrument, self.quantity, self.status
        )
    }
}

/// Immutable order audit row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub created_at: Timestamp,
    pub event_type: OrderEventType,
    pub order_status: OrderStatus,
    pub external_status: Option<String>,
    pub note: Option<String>,
}

impl OrderEvent {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            order_id: row.get(1)?,
            user_id: row.get(2)?,
            created_at: row.get(3)?,
            event_type: row.get(4)?,
            order_status: row.get(5)?,
            external_status: row.get(6)?,
            note: row.get(7)?,
        })
    }
}
