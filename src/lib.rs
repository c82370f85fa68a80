//! # Rusty-Ledger
//!
//! A personal trading journal: orders, trades, holdings and cash, kept
//! consistent on every fill, close, edit and delete.
//!
//! The order-to-ledger pipeline turns an order intent into an executed trade,
//! maintains per-symbol quantity and weighted average cost, and posts
//! balanced double-entry cash records. Retried requests are absorbed through
//! client ids and idempotency keys; an optional broker adapter mirrors orders
//! at an external venue.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rusty_ledger::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let mut journal = Journal::in_memory()?;
//! let user = 1;
//!
//! journal.deposit(user, 10_000.0)?;
//! let order = journal.create_order(user, &NewOrder::market("AAPL", Action::Buy, 10))?;
//! let trade = journal.fill_order(user, order, 100.0, None)?;
//! journal.close_trade(user, trade, 110.0, None)?;
//!
//! assert_eq!(journal.pnl_summary(user)?.realized_pnl, 100.0);
//! # Ok(())
//! # }
//! ```

pub mod blotter;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod finance;
pub mod holdings;
pub mod journal;
pub mod market;
pub mod order;
pub mod reconcile;
pub mod trade;
pub mod types;

pub use journal::Journal;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::broker::{BrokerAdapter, PaperBroker};
    pub use crate::config::{BrokerConfig, JournalConfig};
    pub use crate::error::{JournalError, Result};
    pub use crate::finance::ledger::{CashAction, CashPosting};
    pub use crate::finance::{PnLSummary, PortfolioSummary, Position};
    pub use crate::holdings::Holding;
    pub use crate::journal::Journal;
    pub use crate::market::{PriceSource, StaticPrices};
    pub use crate::order::{NewOrder, Order, OrderStatus};
    pub use crate::trade::{NewTrade, Trade, TradeUpdate};
    pub use crate::types::*;
}
