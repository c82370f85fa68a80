//! Holdings cost-basis engine
//!
//! One row per (user, account, symbol) holding a signed quantity and a
//! weighted average cost. All mutation goes through [`apply_delta`].
//!
//! Trade-driven syncs are best-effort: [`sync_best_effort`] runs the delta in
//! a savepoint and, if it fails, records the delta in the outbox so it can be
//! replayed with [`retry_pending`] instead of being lost.

use crate::db::with_savepoint;
use crate::error::{JournalError, Result};
use crate::types::{validate_positive, AccountId, Price, Quantity, Symbol, Timestamp, UserId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Deltas smaller than this are ignored
pub const DELTA_EPSILON: f64 = 1e-12;

/// Resulting quantities smaller than this are treated as flat
pub const FLAT_EPSILON: f64 = 1e-9;

/// Name of the per-user account that trade-driven holdings live in
pub const SYNC_ACCOUNT_NAME: &str = "Trade Journal";

/// Currency the sync account is opened in
pub const SYNC_ACCOUNT_CURRENCY: &str = "USD";

/// Brokerage or bookkeeping account that holdings belong to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub name: String,
    pub broker: Option<String>,
    pub currency: String,
    pub created_at: Timestamp,
}

impl Account {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            broker: row.get(3)?,
            currency: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Current position in one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub symbol: Symbol,
    /// Positive for long, negative for short
    pub quantity: Quantity,
    /// None only when flat
    pub avg_cost: Option<Price>,
    pub updated_at: Timestamp,
}

const HOLDING_COLUMNS: &str = "id, user_id, account_id, symbol, quantity, avg_cost, updated_at";

impl Holding {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_id: row.get(2)?,
            symbol: row.get(3)?,
            quantity: row.get(4)?,
            avg_cost: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }
}

/// Quantity and cost basis after a delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub quantity: Quantity,
    pub avg_cost: Option<Price>,
}

impl PositionUpdate {
    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }
}

/// Weighted-average cost update for one delta
///
/// - flat result: no cost basis
/// - opening from flat (or with no prior basis): basis = price
/// - adding in the same direction: quantity-weighted blend
/// - crossing through zero: basis resets to price
/// - anything else (reductions, price-less deltas): basis unchanged
pub fn next_position(
    old_qty: Quantity,
    old_avg: Option<Price>,
    delta_qty: Quantity,
    price: Option<Price>,
) -> PositionUpdate {
    let mut new_qty = old_qty + delta_qty;
    if new_qty.abs() < FLAT_EPSILON {
        new_qty = 0.0;
    }

    let avg_cost = if new_qty == 0.0 {
        None
    } else {
        match (old_avg, price) {
            (_, Some(px)) if old_qty == 0.0 => Some(px),
            (None, Some(px)) => Some(px),
            (Some(avg), Some(px)) if old_qty * delta_qty > 0.0 => {
                let (held, added) = (old_qty.abs(), delta_qty.abs());
                Some((held * avg + added * px) / (held + added))
            }
            (Some(_), Some(px)) if old_qty * new_qty < 0.0 => Some(px),
            (avg, _) => avg,
        }
    };

    PositionUpdate {
        quantity: new_qty,
        avg_cost,
    }
}

/// Get or create the per-user synchronization account
pub fn ensure_sync_account(conn: &Connection, user_id: UserId, currency: &str) -> Result<AccountId> {
    conn.execute(
        "INSERT INTO accounts (user_id, name, broker, currency, created_at)
         VALUES (?1, ?2, NULL, ?3, ?4)
         ON CONFLICT(user_id, name) DO NOTHING",
        params![user_id, SYNC_ACCOUNT_NAME, currency, Utc::now()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM accounts WHERE user_id = ?1 AND name = ?2",
        params![user_id, SYNC_ACCOUNT_NAME],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Apply a signed quantity delta to a user's holding in `symbol`
///
/// Returns the holding as it stands afterwards (`None` once flat).
pub fn apply_delta(
    conn: &Connection,
    user_id: UserId,
    symbol: &str,
    delta_qty: Quantity,
    price: Option<Price>,
) -> Result<Option<Holding>> {
    if !delta_qty.is_finite() {
        return Err(JournalError::validation(format!(
            "quantity delta must be finite, got {}",
            delta_qty
        )));
    }
    if let Some(px) = price {
        validate_positive("price", px)?;
    }
    if delta_qty.abs() < DELTA_EPSILON {
        return get_holding(conn, user_id, symbol);
    }

    let account_id = ensure_sync_account(conn, user_id, SYNC_ACCOUNT_CURRENCY)?;
    let existing: Option<(i64, Quantity, Option<Price>)> = conn
        .query_row(
            "SELECT id, quantity, avg_cost FROM holdings
             WHERE user_id = ?1 AND account_id = ?2 AND symbol = ?3",
            params![user_id, account_id, symbol],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (old_qty, old_avg) = existing
        .map(|(_, qty, avg)| (qty, avg))
        .unwrap_or((0.0, None));
    let update = next_position(old_qty, old_avg, delta_qty, price);

    log::debug!(
        "Holding {} for user {}: {} -> {} (avg {:?} -> {:?})",
        symbol,
        user_id,
        old_qty,
        update.quantity,
        old_avg,
        update.avg_cost
    );

    match (existing, update.is_flat()) {
        (Some((id, _, _)), true) => {
            conn.execute("DELETE FROM holdings WHERE id = ?1", params![id])?;
        }
        (None, true) => {}
        (Some((id, _, _)), false) => {
            conn.execute(
                "UPDATE holdings SET quantity = ?1, avg_cost = ?2, updated_at = ?3 WHERE id = ?4",
                params![update.quantity, update.avg_cost, Utc::now(), id],
            )?;
        }
        (None, false) => {
            conn.execute(
                "INSERT INTO holdings (user_id, account_id, symbol, quantity, avg_cost, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![user_id, account_id, symbol, update.quantity, update.avg_cost, Utc::now()],
            )?;
        }
    }

    get_holding(conn, user_id, symbol)
}

/// Apply a delta without letting a failure abort the caller's write
///
/// The delta runs in a savepoint. On failure it is rolled back, logged, and
/// appended to the outbox. Returns whether the delta was applied inline.
pub fn sync_best_effort(
    conn: &Connection,
    user_id: UserId,
    symbol: &str,
    delta_qty: Quantity,
    price: Option<Price>,
    source: &str,
) -> Result<bool> {
    let applied = with_savepoint(conn, "holdings_sync", |c| {
        apply_delta(c, user_id, symbol, delta_qty, price)
    });
    match applied {
        Ok(_) => Ok(true),
        Err(e) => {
            log::warn!(
                "Holdings sync failed for user {} {} {:+} ({}): {}; queued for retry",
                user_id,
                symbol,
                delta_qty,
                source,
                e
            );
            enqueue(conn, user_id, symbol, delta_qty, price, source, &e.to_string())?;
            Ok(false)
        }
    }
}

/// A holdings delta that could not be applied inline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingSyncTask {
    pub id: i64,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub delta_qty: Quantity,
    pub price: Option<Price>,
    /// What produced the delta, e.g. "fill:order:3"
    pub source: String,
    /// Most recent failure
    pub error: String,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl HoldingSyncTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            symbol: row.get(2)?,
            delta_qty: row.get(3)?,
            price: row.get(4)?,
            source: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            resolved_at: row.get(8)?,
        })
    }
}

fn enqueue(
    conn: &Connection,
    user_id: UserId,
    symbol: &str,
    delta_qty: Quantity,
    price: Option<Price>,
    source: &str,
    error: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO holding_sync_outbox (user_id, symbol, delta_qty, price, source, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![user_id, symbol, delta_qty, price, source, error, Utc::now()],
    )?;
    Ok(())
}

/// Unresolved outbox tasks, oldest first
pub fn list_pending(conn: &Connection, user_id: UserId) -> Result<Vec<HoldingSyncTask>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, symbol, delta_qty, price, source, error, created_at, resolved_at
         FROM holding_sync_outbox
         WHERE user_id = ?1 AND resolved_at IS NULL
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![user_id], HoldingSyncTask::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Replay pending outbox tasks in order; returns how many were applied
pub fn retry_pending(conn: &Connection, user_id: UserId) -> Result<usize> {
    let mut applied = 0;
    for task in list_pending(conn, user_id)? {
        let res = with_savepoint(conn, "holdings_retry", |c| {
            apply_delta(c, task.user_id, &task.symbol, task.delta_qty, task.price)
        });
        match res {
            Ok(_) => {
                conn.execute(
                    "UPDATE holding_sync_outbox SET resolved_at = ?1 WHERE id = ?2",
                    params![Utc::now(), task.id],
                )?;
                applied += 1;
            }
            Err(e) => {
                log::warn!("Holdings retry {} still failing: {}", task.id, e);
                conn.execute(
                    "UPDATE holding_sync_outbox SET error = ?1 WHERE id = ?2",
                    params![e.to_string(), task.id],
                )?;
            }
        }
    }
    if applied > 0 {
        log::info!("Replayed {} pending holdings syncs for user {}", applied, user_id);
    }
    Ok(applied)
}

/// Holding for `symbol` in the user's sync account
pub fn get_holding(conn: &Connection, user_id: UserId, symbol: &str) -> Result<Option<Holding>> {
    let sql = format!(
        "SELECT h.{} FROM holdings h
         JOIN accounts a ON a.id = h.account_id
         WHERE h.user_id = ?1 AND h.symbol = ?2 AND a.name = ?3",
        HOLDING_COLUMNS.replace(", ", ", h.")
    );
    Ok(conn
        .query_row(&sql, params![user_id, symbol, SYNC_ACCOUNT_NAME], Holding::from_row)
        .optional()?)
}

/// Holdings ordered by symbol, optionally restricted to one account
pub fn list_holdings(
    conn: &Connection,
    user_id: UserId,
    account_id: Option<AccountId>,
) -> Result<Vec<Holding>> {
    let sql = format!(
        "SELECT {} FROM holdings
         WHERE user_id = ?1 AND (?2 IS NULL OR account_id = ?2)
         ORDER BY symbol ASC, account_id ASC",
        HOLDING_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, account_id], Holding::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn list_accounts(conn: &Connection, user_id: UserId) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, broker, currency, created_at FROM accounts
         WHERE user_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![user_id], Account::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_open_long_from_flat() {
        let u = next_position(0.0, None, 10.0, Some(100.0));
        assert_eq!(u.quantity, 10.0);
        assert_eq!(u.avg_cost, Some(100.0));
    }

    #[test]
    fn test_blend_on_increase() {
        let u = next_position(10.0, Some(100.0), 10.0, Some(110.0));
        assert_eq!(u.quantity, 20.0);
        assert_relative_eq!(u.avg_cost.unwrap(), 105.0);
    }

    #[test]
    fn test_short_blend_uses_absolute_quantities() {
        // short 2 @ 200, sell 3 more @ 150 -> (2*200 + 3*150) / 5 = 170
        let u = next_position(-2.0, Some(200.0), -3.0, Some(150.0));
        assert_eq!(u.quantity, -5.0);
        assert_relative_eq!(u.avg_cost.unwrap(), 170.0);
    }

    #[test]
    fn test_reduction_keeps_basis() {
        let u = next_position(10.0, Some(100.0), -4.0, Some(120.0));
        assert_eq!(u.quantity, 6.0);
        assert_eq!(u.avg_cost, Some(100.0));
    }

    #[test]
    fn test_flip_resets_basis() {
        let u = next_position(5.0, Some(100.0), -8.0, Some(90.0));
        assert_eq!(u.quantity, -3.0);
        assert_eq!(u.avg_cost, Some(90.0));
    }

    #[test]
    fn test_close_clears_basis_and_noise_is_flat() {
        let u = next_position(10.0, Some(100.0), -10.0, Some(110.0));
        assert!(u.is_flat());
        assert_eq!(u.avg_cost, None);

        let u = next_position(0.3, Some(1.0), -0.3 + 1e-10, None);
        assert!(u.is_flat());
    }

    #[test]
    fn test_priceless_delta_keeps_basis() {
        let u = next_position(10.0, Some(100.0), 5.0, None);
        assert_eq!(u.quantity, 15.0);
        assert_eq!(u.avg_cost, Some(100.0));
    }

    #[test]
    fn test_apply_delta_lifecycle() {
        let conn = open_in_memory().unwrap();

        let h = apply_delta(&conn, 1, "AAPL", 10.0, Some(100.0)).unwrap().unwrap();
        assert_eq!(h.quantity, 10.0);
        assert_eq!(h.avg_cost, Some(100.0));

        apply_delta(&conn, 1, "AAPL", 10.0, Some(110.0)).unwrap();
        let h = get_holding(&conn, 1, "AAPL").unwrap().unwrap();
        assert_relative_eq!(h.avg_cost.unwrap(), 105.0);

        assert!(apply_delta(&conn, 1, "AAPL", -20.0, Some(120.0)).unwrap().is_none());
        assert!(list_holdings(&conn, 1, None).unwrap().is_empty());
    }

    #[test]
    fn test_tiny_delta_is_noop() {
        let conn = open_in_memory().unwrap();
        assert!(apply_delta(&conn, 1, "AAPL", 1e-13, Some(1.0)).unwrap().is_none());
        assert!(list_accounts(&conn, 1).unwrap().is_empty());
    }

    #[test]
    fn test_apply_delta_rejects_bad_inputs() {
        let conn = open_in_memory().unwrap();

        for price in [-50.0, 0.0, f64::NAN, f64::INFINITY] {
            let err = apply_delta(&conn, 1, "AAPL", 5.0, Some(price)).unwrap_err();
            assert!(err.is_validation(), "price {} accepted", price);
        }
        for delta in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = apply_delta(&conn, 1, "AAPL", delta, Some(10.0)).unwrap_err();
            assert!(err.is_validation(), "delta {} accepted", delta);
        }

        assert!(get_holding(&conn, 1, "AAPL").unwrap().is_none());
        assert!(list_accounts(&conn, 1).unwrap().is_empty());
    }

    #[test]
    fn test_sync_account_provisioned_once() {
        let conn = open_in_memory().unwrap();
        apply_delta(&conn, 1, "AAPL", 1.0, Some(1.0)).unwrap();
        apply_delta(&conn, 1, "MSFT", 1.0, Some(1.0)).unwrap();
        let accounts = list_accounts(&conn, 1).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, SYNC_ACCOUNT_NAME);

        let rows = list_holdings(&conn, 1, Some(accounts[0].id)).unwrap();
        assert_eq!(
            rows.iter().map(|h| h.symbol.as_str()).collect::<Vec<_>>(),
            vec!["AAPL", "MSFT"]
        );
    }

    #[test]
    fn test_best_effort_sync_queues_and_retries() {
        let conn = open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER block_holdings BEFORE INSERT ON holdings
             BEGIN SELECT RAISE(ABORT, 'holdings locked'); END;",
        )
        .unwrap();

        let applied = sync_best_effort(&conn, 1, "AAPL", 5.0, Some(10.0), "test").unwrap();
        assert!(!applied);
        let pending = list_pending(&conn, 1).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].error.contains("holdings locked"));

        // Still blocked: stays pending
        assert_eq!(retry_pending(&conn, 1).unwrap(), 0);

        conn.execute_batch("DROP TRIGGER block_holdings").unwrap();
        assert_eq!(retry_pending(&conn, 1).unwrap(), 1);
        assert!(list_pending(&conn, 1).unwrap().is_empty());
        assert_eq!(get_holding(&conn, 1, "AAPL").unwrap().unwrap().quantity, 5.0);
    }

    proptest! {
        #[test]
        fn prop_basis_present_iff_not_flat(
            old in -100i32..100,
            delta in -100i32..100,
            avg in 1.0f64..500.0,
            px in 1.0f64..500.0,
        ) {
            let old_avg = if old == 0 { None } else { Some(avg) };
            let u = next_position(old as f64, old_avg, delta as f64, Some(px));
            prop_assert_eq!(u.quantity, (old + delta) as f64);
            prop_assert_eq!(u.avg_cost.is_none(), old + delta == 0);
        }

        #[test]
        fn prop_blend_stays_between_prices(
            old in 1i32..100,
            delta in 1i32..100,
            avg in 1.0f64..500.0,
            px in 1.0f64..500.0,
        ) {
            let u = next_position(old as f64, Some(avg), delta as f64, Some(px));
            let blended = u.avg_cost.unwrap();
            prop_assert!(blended >= avg.min(px) - 1e-9);
            prop_assert!(blended <= avg.max(px) + 1e-9);
        }
    }
}
