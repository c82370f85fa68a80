//! Trade records
//!
//! A Trade is created when an Order fills or when a trade is entered
//! directly. It carries the entry, and once closed the exit and realized P&L.

use crate::db::is_unique_violation;
use crate::error::Result;
use crate::types::{
    Action, Cash, Instrument, OptionType, Price, Quantity, Symbol, Timestamp, TradeId, UserId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Trade as entered by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub strategy: String,
    pub action: Action,
    pub quantity: i64,
    pub entry_price: Price,
    pub entry_date: Timestamp,
    pub option_type: Option<OptionType>,
    pub strike_price: Option<Price>,
    pub expiry_date: Option<Timestamp>,
    pub client_order_id: Option<String>,
}

impl NewTrade {
    pub fn stock(
        symbol: impl Into<String>,
        action: Action,
        quantity: i64,
        entry_price: Price,
        entry_date: Timestamp,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            instrument: Instrument::Stock,
            strategy: String::new(),
            action,
            quantity,
            entry_price,
            entry_date,
            option_type: None,
            strike_price: None,
            expiry_date: None,
            client_order_id: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn with_client_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }

    /// Attach option contract details; switches the instrument to OPTION
    pub fn with_option(mut self, option_type: OptionType, strike: Price, expiry: Timestamp) -> Self {
        self.instrument = Instrument::Option;
        self.option_type = Some(option_type);
        self.strike_price = Some(strike);
        self.expiry_date = Some(expiry);
        self
    }
}

/// Editable fields of a trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub symbol: Symbol,
    pub strategy: String,
    pub action: Action,
    pub quantity: i64,
    pub entry_price: Price,
    pub entry_date: Timestamp,
}

/// Persisted trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub quantity: i64,
    pub instrument: Instrument,
    pub strategy: String,
    pub action: Action,
    pub entry_date: Timestamp,
    pub entry_price: Price,
    pub is_closed: bool,
    pub exit_date: Option<Timestamp>,
    pub exit_price: Option<Price>,
    pub realized_pnl: Option<Cash>,
    pub option_type: Option<OptionType>,
    pub strike_price: Option<Price>,
    pub expiry_date: Option<Timestamp>,
    pub client_order_id: Option<String>,
}

const TRADE_COLUMNS: &str = "id, user_id, symbol, quantity, instrument, strategy, action, \
     entry_date, entry_price, is_closed, exit_date, exit_price, realized_pnl, option_type, \
     strike_price, expiry_date, client_order_id";

impl Trade {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            symbol: row.get(2)?,
            quantity: row.get(3)?,
            instrument: row.get(4)?,
            strategy: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            action: row.get(6)?,
            entry_date: row.get(7)?,
            entry_price: row.get(8)?,
            is_closed: row.get(9)?,
            exit_date: row.get(10)?,
            exit_price: row.get(11)?,
            realized_pnl: row.get(12)?,
            option_type: row.get(13)?,
            strike_price: row.get(14)?,
            expiry_date: row.get(15)?,
            client_order_id: row.get(16)?,
        })
    }

    /// Holdings delta this trade contributes while open
    pub fn signed_quantity(&self) -> Quantity {
        self.action.signed_quantity(self.quantity)
    }

    /// Whether this trade moves the holdings book
    pub fn tracks_holdings(&self) -> bool {
        self.instrument.tracks_holdings()
    }
}

/// Realized P&L of closing `quantity` units opened with `action`
///
/// BUY: (exit - entry) * qty. SELL: (entry - exit) * qty.
pub fn realized_pnl(action: Action, entry_price: Price, exit_price: Price, quantity: i64) -> Cash {
    let qty = quantity as f64;
    match action {
        Action::Buy => (exit_price - entry_price) * qty,
        Action::Sell => (entry_price - exit_price) * qty,
    }
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// A new row was written
    Created(TradeId),
    /// A row with the same client id already existed
    Existing(TradeId),
}

impl Inserted {
    pub fn id(&self) -> TradeId {
        match self {
            Inserted::Created(id) | Inserted::Existing(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Inserted::Created(_))
    }
}

/// Insert a trade, resolving a `(user_id, client_order_id)` conflict to the existing row
///
/// `trade.symbol` must already be normalized.
pub fn insert_trade(conn: &Connection, user_id: UserId, trade: &NewTrade) -> Result<Inserted> {
    let res = conn.execute(
        "INSERT INTO trades (user_id, symbol, quantity, instrument, strategy, action,
             entry_date, entry_price, is_closed, option_type, strike_price, expiry_date,
             client_order_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12)",
        params![
            user_id,
            trade.symbol,
            trade.quantity,
            trade.instrument,
            trade.strategy,
            trade.action,
            trade.entry_date,
            trade.entry_price,
            trade.option_type,
            trade.strike_price,
            trade.expiry_date,
            trade.client_order_id,
        ],
    );

    match res {
        Ok(_) => Ok(Inserted::Created(conn.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => {
            let coid = trade.client_order_id.as_deref().unwrap_or_default();
            match find_by_client_order_id(conn, user_id, coid)? {
                Some(existing) => Ok(Inserted::Existing(existing.id)),
                None => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_by_client_order_id(
    conn: &Connection,
    user_id: UserId,
    client_order_id: &str,
) -> Result<Option<Trade>> {
    let sql = format!(
        "SELECT {} FROM trades WHERE user_id = ?1 AND client_order_id = ?2",
        TRADE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![user_id, client_order_id], Trade::from_row)
        .optional()?)
}

/// Fetch a trade owned by `user_id`
pub fn get_trade(conn: &Connection, user_id: UserId, trade_id: TradeId) -> Result<Option<Trade>> {
    let sql = format!(
        "SELECT {} FROM trades WHERE id = ?1 AND user_id = ?2",
        TRADE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![trade_id, user_id], Trade::from_row)
        .optional()?)
}

/// All trades for a user, newest entry first
pub fn list_trades(conn: &Connection, user_id: UserId) -> Result<Vec<Trade>> {
    let sql = format!(
        "SELECT {} FROM trades WHERE user_id = ?1 ORDER BY entry_date DESC, id DESC",
        TRADE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], Trade::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn update_entry(conn: &Connection, trade_id: TradeId, update: &TradeUpdate) -> Result<()> {
    conn.execute(
        "UPDATE trades SET symbol = ?1, strategy = ?2, action = ?3, quantity = ?4,
             entry_price = ?5, entry_date = ?6
         WHERE id = ?7",
        params![
            update.symbol,
            update.strategy,
            update.action,
            update.quantity,
            update.entry_price,
            update.entry_date,
            trade_id,
        ],
    )?;
    Ok(())
}

pub(crate) fn set_realized_pnl(conn: &Connection, trade_id: TradeId, pnl: Cash) -> Result<()> {
    conn.execute(
        "UPDATE trades SET realized_pnl = ?1 WHERE id = ?2",
        params![pnl, trade_id],
    )?;
    Ok(())
}

/// Record the exit; only succeeds while the trade is still open
pub(crate) fn mark_closed(
    conn: &Connection,
    trade_id: TradeId,
    exit_price: Price,
    exit_date: Timestamp,
    pnl: Cash,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE trades SET is_closed = 1, exit_price = ?1, exit_date = ?2, realized_pnl = ?3
         WHERE id = ?4 AND is_closed = 0",
        params![exit_price, exit_date, pnl, trade_id],
    )?;
    Ok(changed == 1)
}

pub(crate) fn delete(conn: &Connection, trade_id: TradeId) -> Result<()> {
    conn.execute("DELETE FROM trades WHERE id = ?1", params![trade_id])?;
    Ok(())
}
