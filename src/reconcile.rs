//! Trade close, edit and delete
//!
//! Each operation keeps holdings consistent with the trade book by reversing
//! or re-applying the trade's signed delta.

use crate::blotter;
use crate::error::Result;
use crate::execution::validate_trade;
use crate::finance::PnLSummary;
use crate::holdings;
use crate::trade::{self, NewTrade, TradeUpdate};
use crate::types::{validate_positive, Price, Timestamp, TradeId, UserId};
use chrono::Utc;
use rusqlite::Connection;

/// Close an open trade and book its realized P&L
///
/// Returns false when the trade is missing, foreign, or already closed.
pub fn close_trade(
    conn: &Connection,
    user_id: UserId,
    trade_id: TradeId,
    exit_price: Price,
    exit_date: Option<Timestamp>,
) -> Result<bool> {
    validate_positive("exit_price", exit_price)?;
    let Some(trade) = trade::get_trade(conn, user_id, trade_id)? else {
        return Ok(false);
    };
    if trade.is_closed {
        return Ok(false);
    }

    let pnl = trade::realized_pnl(trade.action, trade.entry_price, exit_price, trade.quantity);
    let exit_date = exit_date.unwrap_or_else(Utc::now);
    if !trade::mark_closed(conn, trade_id, exit_price, exit_date, pnl)? {
        return Ok(false);
    }

    if trade.tracks_holdings() {
        holdings::sync_best_effort(
            conn,
            user_id,
            &trade.symbol,
            -trade.signed_quantity(),
            Some(exit_price),
            &format!("close:trade:{}", trade_id),
        )?;
    }

    log::info!(
        "Closed trade {} ({} {}) at {}: realized {:.2}",
        trade_id,
        trade.action,
        trade.symbol,
        exit_price,
        pnl
    );
    Ok(true)
}

/// Delete a trade, reversing its holdings delta if it was still open
///
/// Orders pointing at the trade are unlinked, never deleted.
pub fn delete_trade(conn: &Connection, user_id: UserId, trade_id: TradeId) -> Result<bool> {
    let Some(trade) = trade::get_trade(conn, user_id, trade_id)? else {
        return Ok(false);
    };

    if !trade.is_closed && trade.tracks_holdings() {
        holdings::sync_best_effort(
            conn,
            user_id,
            &trade.symbol,
            -trade.signed_quantity(),
            Some(trade.entry_price),
            &format!("delete:trade:{}", trade_id),
        )?;
    }

    let unlinked = blotter::unlink_trade(conn, trade_id)?;
    trade::delete(conn, trade_id)?;
    log::info!(
        "Deleted trade {} for user {} ({} orders unlinked)",
        trade_id,
        user_id,
        unlinked
    );
    Ok(true)
}

/// Edit a trade's entry fields and reconcile holdings
///
/// For an open stock trade on the same symbol the net delta is applied at the
/// new entry price. When the symbol changes the old delta is removed from the
/// old symbol and the new delta applied to the new one. A closed trade gets
/// its realized P&L recomputed against the stored exit price.
pub fn update_trade(
    conn: &Connection,
    user_id: UserId,
    trade_id: TradeId,
    update: &TradeUpdate,
) -> Result<bool> {
    let Some(old) = trade::get_trade(conn, user_id, trade_id)? else {
        return Ok(false);
    };

    // Reuse the entry validation of a fresh trade
    let checked = validate_trade(&NewTrade {
        symbol: update.symbol.clone(),
        instrument: old.instrument,
        strategy: update.strategy.clone(),
        action: update.action,
        quantity: update.quantity,
        entry_price: update.entry_price,
        entry_date: update.entry_date,
        option_type: None,
        strike_price: None,
        expiry_date: None,
        client_order_id: None,
    })?;
    let update = TradeUpdate {
        symbol: checked.symbol,
        strategy: checked.strategy,
        ..update.clone()
    };

    trade::update_entry(conn, trade_id, &update)?;

    if old.is_closed {
        if let Some(exit_price) = old.exit_price {
            let pnl = trade::realized_pnl(update.action, update.entry_price, exit_price, update.quantity);
            trade::set_realized_pnl(conn, trade_id, pnl)?;
        }
        return Ok(true);
    }

    if old.tracks_holdings() {
        let source = format!("edit:trade:{}", trade_id);
        let old_signed = old.signed_quantity();
        let new_signed = update.action.signed_quantity(update.quantity);

        if old.symbol != update.symbol {
            holdings::sync_best_effort(
                conn,
                user_id,
                &old.symbol,
                -old_signed,
                Some(old.entry_price),
                &source,
            )?;
            holdings::sync_best_effort(
                conn,
                user_id,
                &update.symbol,
                new_signed,
                Some(update.entry_price),
                &source,
            )?;
        } else {
            holdings::sync_best_effort(
                conn,
                user_id,
                &update.symbol,
                new_signed - old_signed,
                Some(update.entry_price),
                &source,
            )?;
        }
    }

    log::debug!("Updated trade {} for user {}", trade_id, user_id);
    Ok(true)
}

/// Realized P&L over all closed trades
pub fn pnl_summary(conn: &Connection, user_id: UserId) -> Result<PnLSummary> {
    let mut summary = PnLSummary::new();
    for trade in trade::list_trades(conn, user_id)? {
        if let (true, Some(pnl)) = (trade.is_closed, trade.realized_pnl) {
            summary.add_trade(pnl);
        }
    }
    Ok(summary)
}
