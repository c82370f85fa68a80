//! Order blotter
//!
//! Owns order rows and their transitions, delegates to the broker when one is
//! configured, and appends one event per transition. Status changes are
//! guarded in SQL by `status = 'PENDING'` so a terminal order can never move.

use crate::broker::{BrokerAdapter, SubmitOrderRequest};
use crate::db::is_unique_violation;
use crate::error::{JournalError, Result};
use crate::order::{NewOrder, Order, OrderEvent, OrderEventType, OrderStatus, ORDER_COLUMNS};
use crate::types::{
    normalize_client_id, normalize_symbol, validate_positive, validate_quantity, OrderId, Price,
    Timestamp, TradeId, UserId,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Validate and normalize an order intent
pub fn validate_order(order: &NewOrder) -> Result<NewOrder> {
    let symbol = normalize_symbol(&order.symbol)?;
    validate_quantity(order.quantity)?;
    if let Some(limit) = order.limit_price {
        validate_positive("limit_price", limit)?;
    }
    Ok(NewOrder {
        symbol,
        strategy: order
            .strategy
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        client_order_id: normalize_client_id(order.client_order_id.as_deref()),
        ..order.clone()
    })
}

/// Create a PENDING order, or return the existing id for a repeated client id
///
/// With a broker the order is submitted in the same unit of work; a broker
/// failure is returned and the caller's transaction rolls back.
pub fn create_order(
    conn: &Connection,
    broker: Option<&dyn BrokerAdapter>,
    user_id: UserId,
    order: &NewOrder,
) -> Result<OrderId> {
    let order = validate_order(order)?;

    let order_id = match insert_order(conn, user_id, &order) {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            if let Some(existing) = find_existing(conn, user_id, order.client_order_id.as_deref())? {
                log::debug!(
                    "Order with client id {:?} already exists as {}",
                    order.client_order_id,
                    existing
                );
                return Ok(existing);
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    append_event(
        conn,
        order_id,
        user_id,
        OrderEventType::Created,
        OrderStatus::Pending,
        None,
        None,
    )?;

    if let Some(broker) = broker {
        let resp = broker.submit_order(
            user_id,
            &SubmitOrderRequest {
                symbol: order.symbol.clone(),
                instrument: order.instrument,
                action: order.action,
                quantity: order.quantity,
                limit_price: order.limit_price,
                client_order_id: order.client_order_id.clone(),
            },
        )?;
        set_external(
            conn,
            order_id,
            Some(&resp.external_order_id),
            Some(&resp.venue),
            &resp.external_status,
            resp.submitted_at,
        )?;
        append_event(
            conn,
            order_id,
            user_id,
            OrderEventType::Submitted,
            OrderStatus::Pending,
            Some(&resp.external_status),
            Some(&format!("submitted to {}", broker.name())),
        )?;
    }

    log::info!(
        "Created order {} for user {}: {} {} {}",
        order_id,
        user_id,
        order.action,
        order.quantity,
        order.symbol
    );
    Ok(order_id)
}

fn insert_order(conn: &Connection, user_id: UserId, order: &NewOrder) -> rusqlite::Result<OrderId> {
    conn.execute(
        "INSERT INTO orders (user_id, symbol, instrument, action, strategy, quantity,
             limit_price, status, created_at, client_order_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            user_id,
            order.symbol,
            order.instrument,
            order.action,
            order.strategy,
            order.quantity,
            order.limit_price,
            OrderStatus::Pending,
            Utc::now(),
            order.client_order_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn find_existing(
    conn: &Connection,
    user_id: UserId,
    client_order_id: Option<&str>,
) -> Result<Option<OrderId>> {
    let Some(coid) = client_order_id else {
        return Ok(None);
    };
    Ok(conn
        .query_row(
            "SELECT id FROM orders WHERE user_id = ?1 AND client_order_id = ?2",
            params![user_id, coid],
            |row| row.get(0),
        )
        .optional()?)
}

/// Cancel a PENDING order; false when missing, foreign, or terminal
pub fn cancel_order(
    conn: &Connection,
    broker: Option<&dyn BrokerAdapter>,
    user_id: UserId,
    order_id: OrderId,
) -> Result<bool> {
    let Some(order) = get_order(conn, user_id, order_id)? else {
        return Ok(false);
    };
    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        log::debug!("Order {} not cancellable from {}", order_id, order.status);
        return Ok(false);
    }

    let venue_cancel = match (broker, order.external_order_id.as_deref()) {
        (Some(broker), Some(ext)) => Some(broker.cancel_order(user_id, ext)?),
        _ => None,
    };
    let external_status = venue_cancel
        .as_ref()
        .map(|resp| resp.external_status.clone())
        .or_else(|| order.external_status.clone());

    let changed = conn.execute(
        "UPDATE orders SET status = ?1, external_status = ?2
         WHERE id = ?3 AND user_id = ?4 AND status = ?5",
        params![
            OrderStatus::Cancelled,
            external_status,
            order_id,
            user_id,
            OrderStatus::Pending
        ],
    )?;
    if changed == 0 {
        return Ok(false);
    }
    if let Some(resp) = &venue_cancel {
        set_external(conn, order_id, None, None, &resp.external_status, resp.cancelled_at)?;
    }

    append_event(
        conn,
        order_id,
        user_id,
        OrderEventType::Cancelled,
        OrderStatus::Cancelled,
        external_status.as_deref(),
        None,
    )?;
    log::info!("Cancelled order {} for user {}", order_id, user_id);
    Ok(true)
}

/// Pull the venue's status into the external fields; local status is untouched
pub fn sync_order_status(
    conn: &Connection,
    broker: Option<&dyn BrokerAdapter>,
    user_id: UserId,
    order_id: OrderId,
) -> Result<bool> {
    let Some(broker) = broker else {
        return Ok(false);
    };
    let Some(order) = get_order(conn, user_id, order_id)? else {
        return Ok(false);
    };
    sync_one(conn, broker, &order)
}

fn sync_one(conn: &Connection, broker: &dyn BrokerAdapter, order: &Order) -> Result<bool> {
    let Some(ext) = order.external_order_id.as_deref() else {
        return Ok(false);
    };
    let resp = broker.get_order_status(order.user_id, ext)?;
    set_external(
        conn,
        order.id,
        Some(&resp.external_order_id),
        Some(&resp.venue),
        &resp.external_status,
        resp.last_synced_at,
    )?;
    append_event(
        conn,
        order.id,
        order.user_id,
        OrderEventType::Synced,
        order.status,
        Some(&resp.external_status),
        None,
    )?;
    Ok(true)
}

/// Sync every broker-linked PENDING order; returns how many were synced
pub fn sync_pending_orders(
    conn: &Connection,
    broker: Option<&dyn BrokerAdapter>,
    user_id: UserId,
) -> Result<usize> {
    let Some(broker) = broker else {
        return Ok(0);
    };
    let sql = format!(
        "SELECT {} FROM orders
         WHERE user_id = ?1 AND status = ?2 AND external_order_id IS NOT NULL
         ORDER BY created_at ASC, id ASC",
        ORDER_COLUMNS
    );
    let pending = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, OrderStatus::Pending], Order::from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut synced = 0;
    for order in &pending {
        if sync_one(conn, broker, order)? {
            synced += 1;
        }
    }
    Ok(synced)
}

/// Fetch an order owned by `user_id`
pub fn get_order(conn: &Connection, user_id: UserId, order_id: OrderId) -> Result<Option<Order>> {
    let sql = format!(
        "SELECT {} FROM orders WHERE id = ?1 AND user_id = ?2",
        ORDER_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![order_id, user_id], Order::from_row)
        .optional()?)
}

/// Newest orders first
pub fn list_orders(conn: &Connection, user_id: UserId, limit: usize) -> Result<Vec<Order>> {
    let sql = format!(
        "SELECT {} FROM orders WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2",
        ORDER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, limit as i64], Order::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Event trail of one of the user's orders, oldest first
///
/// Empty when the order does not belong to the user.
pub fn list_order_events(
    conn: &Connection,
    user_id: UserId,
    order_id: OrderId,
    limit: usize,
) -> Result<Vec<OrderEvent>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.order_id, e.user_id, e.created_at, e.event_type, e.order_status,
                e.external_status, e.note
         FROM order_events e
         JOIN orders o ON o.id = e.order_id
         WHERE e.order_id = ?1 AND o.user_id = ?2
         ORDER BY e.created_at ASC, e.id ASC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![order_id, user_id, limit as i64], OrderEvent::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Append one audit row
pub fn append_event(
    conn: &Connection,
    order_id: OrderId,
    user_id: UserId,
    event_type: OrderEventType,
    order_status: OrderStatus,
    external_status: Option<&str>,
    note: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO order_events (order_id, user_id, created_at, event_type, order_status,
             external_status, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            order_id,
            user_id,
            Utc::now(),
            event_type,
            order_status,
            external_status,
            note
        ],
    )?;
    Ok(())
}

/// Store venue linkage; `None` keeps the current value
pub(crate) fn set_external(
    conn: &Connection,
    order_id: OrderId,
    external_order_id: Option<&str>,
    venue: Option<&str>,
    external_status: &str,
    synced_at: Timestamp,
) -> Result<()> {
    conn.execute(
        "UPDATE orders SET external_order_id = COALESCE(?1, external_order_id),
             venue = COALESCE(?2, venue), external_status = ?3, last_synced_at = ?4
         WHERE id = ?5",
        params![external_order_id, venue, external_status, synced_at, order_id],
    )?;
    Ok(())
}

/// PENDING -> FILLED with trade linkage; false if the order already left PENDING
pub(crate) fn mark_filled(
    conn: &Connection,
    order_id: OrderId,
    trade_id: TradeId,
    filled_price: Price,
    filled_at: Timestamp,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET status = ?1, trade_id = ?2, filled_price = ?3, filled_at = ?4
         WHERE id = ?5 AND status = ?6",
        params![
            OrderStatus::Filled,
            trade_id,
            filled_price,
            filled_at,
            order_id,
            OrderStatus::Pending
        ],
    )?;
    Ok(changed == 1)
}

/// Insert an already-FILLED order mirroring a directly saved trade
///
/// Writes the CREATED and FILLED events. A repeated client id returns the
/// existing order only when it is linked to the same trade.
pub(crate) fn record_filled_order(
    conn: &Connection,
    user_id: UserId,
    order: &NewOrder,
    trade_id: TradeId,
    filled_price: Price,
    filled_at: Timestamp,
) -> Result<OrderId> {
    let order_id = match insert_order(conn, user_id, order) {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            let Some(existing) = find_existing(conn, user_id, order.client_order_id.as_deref())?
            else {
                return Err(e.into());
            };
            let linked: Option<TradeId> = conn.query_row(
                "SELECT trade_id FROM orders WHERE id = ?1",
                params![existing],
                |row| row.get(0),
            )?;
            if linked != Some(trade_id) {
                return Err(JournalError::validation(format!(
                    "client order id {:?} already belongs to order {}",
                    order.client_order_id, existing
                )));
            }
            return Ok(existing);
        }
        Err(e) => return Err(e.into()),
    };
    append_event(
        conn,
        order_id,
        user_id,
        OrderEventType::Created,
        OrderStatus::Pending,
        None,
        Some("synthesized from trade"),
    )?;
    mark_filled(conn, order_id, trade_id, filled_price, filled_at)?;
    append_event(
        conn,
        order_id,
        user_id,
        OrderEventType::Filled,
        OrderStatus::Filled,
        None,
        Some("synthesized from trade"),
    )?;
    Ok(order_id)
}

/// Detach orders from a trade that is about to be deleted
pub(crate) fn unlink_trade(conn: &Connection, trade_id: TradeId) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE orders SET trade_id = NULL WHERE trade_id = ?1",
        params![trade_id],
    )?)
}
