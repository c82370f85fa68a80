//! Fill processing
//!
//! Turns an order fill, or a directly entered trade, into a Trade row, moves
//! holdings, and keeps order and trade linked. Broker-mediated fills go
//! through the venue first and then share the local path.

use crate::blotter;
use crate::broker::BrokerAdapter;
use crate::db::with_savepoint;
use crate::error::{JournalError, Result};
use crate::holdings;
use crate::order::{NewOrder, OrderEventType, OrderStatus};
use crate::trade::{self, Inserted, NewTrade};
use crate::types::{
    normalize_client_id, normalize_symbol, validate_positive, validate_quantity, OrderId, Price,
    Timestamp, TradeId, UserId,
};
use chrono::Utc;

/// Trade idempotency key derived from an order
pub fn trade_key_for_order(order_id: OrderId, client_order_id: Option<&str>) -> String {
    match client_order_id {
        Some(coid) => coid.to_string(),
        None => format!("order:{}", order_id),
    }
}

/// Client id of the order recorded for a directly saved trade
///
/// Trades with a client id map to `trade:<client id>`, the rest to
/// `trade-id:<trade id>`, so the two families never share a key.
pub fn synthesized_client_id(trade_id: TradeId, client_order_id: Option<&str>) -> String {
    match client_order_id {
        Some(coid) => format!("trade:{}", coid),
        None => format!("trade-id:{}", trade_id),
    }
}

/// Fill a PENDING order locally and return the resulting trade
///
/// If a trade already exists under the order's key it is reused and holdings
/// are left alone; the order is still marked FILLED and linked.
pub fn fill_order(
    conn: &rusqlite::Connection,
    user_id: UserId,
    order_id: OrderId,
    filled_price: Price,
    filled_at: Option<Timestamp>,
) -> Result<TradeId> {
    validate_positive("filled_price", filled_price)?;
    let order = blotter::get_order(conn, user_id, order_id)?
        .ok_or(JournalError::OrderNotFound(order_id))?;
    order.status.transition(OrderStatus::Filled).map_err(|_| {
        JournalError::OrderNotPending {
            order_id,
            status: order.status,
        }
    })?;

    let filled_at = filled_at.unwrap_or_else(Utc::now);
    let key = trade_key_for_order(order.id, order.client_order_id.as_deref());
    let new_trade = NewTrade {
        symbol: order.symbol.clone(),
        instrument: order.instrument,
        strategy: order.strategy.clone().unwrap_or_default(),
        action: order.action,
        quantity: order.quantity,
        entry_price: filled_price,
        entry_date: filled_at,
        option_type: None,
        strike_price: None,
        expiry_date: None,
        client_order_id: Some(key),
    };
    let inserted = trade::insert_trade(conn, user_id, &new_trade)?;
    let trade_id = inserted.id();

    if !blotter::mark_filled(conn, order_id, trade_id, filled_price, filled_at)? {
        return Err(JournalError::OrderNotPending {
            order_id,
            status: order.status,
        });
    }
    blotter::append_event(
        conn,
        order_id,
        user_id,
        OrderEventType::Filled,
        OrderStatus::Filled,
        order.external_status.as_deref(),
        Some(&format!("trade {}", trade_id)),
    )?;

    match inserted {
        Inserted::Created(_) if order.instrument.tracks_holdings() => {
            holdings::sync_best_effort(
                conn,
                user_id,
                &order.symbol,
                order.action.signed_quantity(order.quantity),
                Some(filled_price),
                &format!("fill:order:{}", order_id),
            )?;
        }
        Inserted::Created(_) => {}
        Inserted::Existing(_) => {
            log::warn!(
                "Order {} filled onto existing trade {}; holdings unchanged",
                order_id,
                trade_id
            );
        }
    }

    log::info!(
        "Filled order {} at {} -> trade {} (user {})",
        order_id,
        filled_price,
        trade_id,
        user_id
    );
    Ok(trade_id)
}

/// Fill at the venue, store the returned linkage, then run [`fill_order`]
pub fn fill_order_via_broker(
    conn: &rusqlite::Connection,
    broker: Option<&dyn BrokerAdapter>,
    user_id: UserId,
    order_id: OrderId,
    filled_price: Price,
    filled_at: Option<Timestamp>,
) -> Result<TradeId> {
    let broker = broker.ok_or(JournalError::BrokerDisabled)?;
    validate_positive("filled_price", filled_price)?;
    let order = blotter::get_order(conn, user_id, order_id)?
        .ok_or(JournalError::OrderNotFound(order_id))?;
    if !order.is_open() {
        return Err(JournalError::OrderNotPending {
            order_id,
            status: order.status,
        });
    }
    let ext = order
        .external_order_id
        .as_deref()
        .ok_or(JournalError::NotBrokerLinked(order_id))?;

    let resp = broker.fill_order(user_id, ext, Some(filled_price), filled_at)?;
    blotter::set_external(
        conn,
        order_id,
        Some(&resp.external_order_id),
        Some(&resp.venue),
        &resp.external_status,
        Utc::now(),
    )?;

    fill_order(
        conn,
        user_id,
        order_id,
        resp.filled_price.unwrap_or(filled_price),
        Some(resp.filled_at),
    )
}

/// Validate and normalize a directly entered trade
pub fn validate_trade(trade: &NewTrade) -> Result<NewTrade> {
    validate_quantity(trade.quantity)?;
    validate_positive("entry_price", trade.entry_price)?;
    if let Some(strike) = trade.strike_price {
        validate_positive("strike_price", strike)?;
    }
    Ok(NewTrade {
        symbol: normalize_symbol(&trade.symbol)?,
        strategy: trade.strategy.trim().to_string(),
        client_order_id: normalize_client_id(trade.client_order_id.as_deref()),
        ..trade.clone()
    })
}

/// Save a trade that did not come through an order
///
/// A repeated client id returns the existing trade with no side effects.
/// Stock trades move holdings. With `synthesize_order` a FILLED order is
/// recorded alongside; failing to do so is logged and does not abort the save.
pub fn save_trade(
    conn: &rusqlite::Connection,
    user_id: UserId,
    trade: &NewTrade,
    synthesize_order: bool,
) -> Result<TradeId> {
    let trade = validate_trade(trade)?;
    let trade_id = match trade::insert_trade(conn, user_id, &trade)? {
        Inserted::Existing(id) => {
            log::debug!("Trade with client id {:?} already saved as {}", trade.client_order_id, id);
            return Ok(id);
        }
        Inserted::Created(id) => id,
    };

    if trade.instrument.tracks_holdings() {
        holdings::sync_best_effort(
            conn,
            user_id,
            &trade.symbol,
            trade.action.signed_quantity(trade.quantity),
            Some(trade.entry_price),
            &format!("save:trade:{}", trade_id),
        )?;
    }

    if synthesize_order {
        let order = NewOrder {
            symbol: trade.symbol.clone(),
            instrument: trade.instrument,
            action: trade.action,
            strategy: Some(trade.strategy.clone()).filter(|s| !s.is_empty()),
            quantity: trade.quantity,
            limit_price: None,
            client_order_id: Some(synthesized_client_id(trade_id, trade.client_order_id.as_deref())),
        };
        let synthesized = with_savepoint(conn, "synthesize_order", |c| {
            blotter::record_filled_order(
                c,
                user_id,
                &order,
                trade_id,
                trade.entry_price,
                trade.entry_date,
            )
        });
        if let Err(e) = synthesized {
            log::warn!("Could not record order for trade {}: {}", trade_id, e);
        }
    }

    log::info!(
        "Saved trade {} for user {}: {} {} {} @ {}",
        trade_id,
        user_id,
        trade.action,
        trade.quantity,
        trade.symbol,
        trade.entry_price
    );
    Ok(trade_id)
}
