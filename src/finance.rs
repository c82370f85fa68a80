//! Portfolio and P&L views

pub mod ledger;

use crate::error::Result;
use crate::holdings::{self, Holding};
use crate::market::PriceSource;
use crate::reconcile;
use crate::types::{Cash, Price, Quantity, Symbol, UserId};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// A holding valued at the last known price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Quantity held (positive for long, negative for short)
    pub quantity: Quantity,
    /// Average cost per unit
    pub avg_cost: Option<Price>,
    /// Last known price, if any
    pub last_price: Option<Price>,
}

impl Position {
    pub fn from_holding(holding: &Holding, last_price: Option<Price>) -> Self {
        Self {
            symbol: holding.symbol.clone(),
            quantity: holding.quantity,
            avg_cost: holding.avg_cost,
            last_price,
        }
    }

    /// Signed cost of the position
    pub fn cost_basis(&self) -> Option<Cash> {
        self.avg_cost.map(|avg| avg * self.quantity)
    }

    /// Calculate current market value
    pub fn market_value(&self) -> Option<Cash> {
        self.last_price.map(|px| px * self.quantity)
    }

    /// Mark-to-market P&L; shorts gain when the price falls
    pub fn unrealized_pnl(&self) -> Option<Cash> {
        match (self.last_price, self.avg_cost) {
            (Some(px), Some(avg)) => Some((px - avg) * self.quantity),
            _ => None,
        }
    }

    pub fn is_priced(&self) -> bool {
        self.last_price.is_some()
    }

    /// Check if position is long
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    /// Check if position is short
    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }
}

/// P&L summary over closed trades
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnLSummary {
    /// Total realized P&L
    pub realized_pnl: f64,
    /// Total unrealized P&L
    pub unrealized_pnl: f64,
    /// Total P&L (realized + unrealized)
    pub total_pnl: f64,
    /// Number of winning trades
    pub winning_trades: usize,
    /// Number of losing trades
    pub losing_trades: usize,
    /// Total number of closed trades
    pub total_trades: usize,
    /// Win rate
    pub win_rate: f64,
}

impl PnLSummary {
    pub fn new() -> Self {
        Self {
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            total_pnl: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            total_trades: 0,
            win_rate: 0.0,
        }
    }

    pub fn add_trade(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
        self.total_trades += 1;

        if pnl > 0.0 {
            self.winning_trades += 1;
        } else if pnl < 0.0 {
            self.losing_trades += 1;
        }

        self.win_rate = self.winning_trades as f64 / self.total_trades as f64;
        self.total_pnl = self.realized_pnl + self.unrealized_pnl;
    }

    pub fn update_unrealized(&mut self, unrealized_pnl: f64) {
        self.unrealized_pnl = unrealized_pnl;
        self.total_pnl = self.realized_pnl + self.unrealized_pnl;
    }
}

impl Default for PnLSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Holdings, cash and P&L for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub currency: String,
    pub positions: Vec<Position>,
    /// Ledger cash balance
    pub cash: Cash,
    /// Sum of priced positions' market value
    pub positions_value: Cash,
    pub pnl: PnLSummary,
}

impl PortfolioSummary {
    /// Cash plus priced positions
    pub fn portfolio_value(&self) -> Cash {
        self.cash + self.positions_value
    }

    /// Symbols held without a known price
    pub fn unpriced(&self) -> Vec<&str> {
        self.positions
            .iter()
            .filter(|p| !p.is_priced())
            .map(|p| p.symbol.as_str())
            .collect()
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }
}

/// Value the user's holdings and attach cash and P&L
///
/// Positions without a price are listed but left out of the totals.
pub fn portfolio(
    conn: &Connection,
    user_id: UserId,
    currency: &str,
    prices: &dyn PriceSource,
) -> Result<PortfolioSummary> {
    let positions: Vec<Position> = holdings::list_holdings(conn, user_id, None)?
        .iter()
        .map(|h| Position::from_holding(h, prices.last_price(&h.symbol)))
        .collect();

    let positions_value: Cash = positions.iter().filter_map(Position::market_value).sum();
    let unrealized: Cash = positions.iter().filter_map(Position::unrealized_pnl).sum();

    let mut pnl = reconcile::pnl_summary(conn, user_id)?;
    pnl.update_unrealized(unrealized);

    Ok(PortfolioSummary {
        currency: currency.trim().to_uppercase(),
        cash: ledger::get_cash_balance(conn, user_id, currency)?,
        positions,
        positions_value,
        pnl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn position(quantity: f64, avg: f64, last: Option<f64>) -> Position {
        Position {
            symbol: "AAPL".to_string(),
            quantity,
            avg_cost: Some(avg),
            last_price: last,
        }
    }

    #[test]
    fn test_position_calculations() {
        let long = position(100.0, 100.0, Some(110.0));
        assert_eq!(long.market_value(), Some(11000.0));
        assert_eq!(long.unrealized_pnl(), Some(1000.0));
        assert!(long.is_long());

        let short = position(-2.0, 200.0, Some(150.0));
        assert_eq!(short.unrealized_pnl(), Some(100.0));
        assert_eq!(short.cost_basis(), Some(-400.0));
        assert!(short.is_short());

        let unpriced = position(1.0, 1.0, None);
        assert_eq!(unpriced.market_value(), None);
        assert_eq!(unpriced.unrealized_pnl(), None);
    }

    #[test]
    fn test_pnl_summary() {
        let mut summary = PnLSummary::new();
        summary.add_trade(100.0);
        summary.add_trade(-40.0);
        summary.add_trade(0.0);
        summary.update_unrealized(10.0);

        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
        assert_relative_eq!(summary.win_rate, 1.0 / 3.0);
        assert_relative_eq!(summary.total_pnl, 70.0);
    }
}
