//! Journal database with SQLite backend
//!
//! Schema creation, connection setup and the small helpers every component
//! shares: unique-conflict detection and best-effort savepoints.

use crate::error::Result;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    instrument TEXT NOT NULL,
    strategy TEXT,
    action TEXT NOT NULL,
    entry_date TEXT NOT NULL,
    entry_price REAL NOT NULL,
    is_closed INTEGER NOT NULL DEFAULT 0,
    exit_date TEXT,
    exit_price REAL,
    realized_pnl REAL,
    option_type TEXT,
    strike_price REAL,
    expiry_date TEXT,
    client_order_id TEXT
);
CREATE INDEX IF NOT EXISTS ix_trades_user_id ON trades(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS ux_trades_user_client_order_id
    ON trades(user_id, client_order_id);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    instrument TEXT NOT NULL,
    action TEXT NOT NULL,
    strategy TEXT,
    quantity INTEGER NOT NULL CHECK (quantity >= 1),
    limit_price REAL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'FILLED', 'CANCELLED')),
    created_at TEXT NOT NULL,
    filled_at TEXT,
    filled_price REAL,
    trade_id INTEGER REFERENCES trades(id),
    client_order_id TEXT,
    external_order_id TEXT,
    venue TEXT,
    external_status TEXT,
    last_synced_at TEXT
);
CREATE INDEX IF NOT EXISTS ix_orders_user_id ON orders(user_id);
CREATE INDEX IF NOT EXISTS ix_orders_status ON orders(status);
CREATE INDEX IF NOT EXISTS ix_orders_trade_id ON orders(trade_id);
CREATE INDEX IF NOT EXISTS ix_orders_external_order_id ON orders(external_order_id);
CREATE UNIQUE INDEX IF NOT EXISTS ux_orders_user_client_order_id
    ON orders(user_id, client_order_id);

CREATE TABLE IF NOT EXISTS order_events (
    id INTEGER PRIMARY KEY,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    event_type TEXT NOT NULL,
    order_status TEXT NOT NULL,
    external_status TEXT,
    note TEXT
);
CREATE INDEX IF NOT EXISTS ix_order_events_order_id ON order_events(order_id);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    broker TEXT,
    currency TEXT NOT NULL DEFAULT 'USD',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_accounts_user_name ON accounts(user_id, name);

CREATE TABLE IF NOT EXISTS holdings (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    symbol TEXT NOT NULL,
    quantity REAL NOT NULL DEFAULT 0,
    avg_cost REAL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_holdings_user_id ON holdings(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS ux_holdings_user_account_symbol
    ON holdings(user_id, account_id, symbol);

CREATE TABLE IF NOT EXISTS holding_sync_outbox (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    delta_qty REAL NOT NULL,
    price REAL,
    source TEXT NOT NULL,
    error TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);
CREATE INDEX IF NOT EXISTS ix_holding_sync_outbox_user_id ON holding_sync_outbox(user_id);

CREATE TABLE IF NOT EXISTS cash_flows (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    amount REAL NOT NULL CHECK (amount > 0),
    currency TEXT NOT NULL,
    date TEXT NOT NULL,
    notes TEXT
);
CREATE INDEX IF NOT EXISTS ix_cash_flows_user_id ON cash_flows(user_id);

CREATE TABLE IF NOT EXISTS ledger_accounts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USD',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_ledger_accounts_user_name_currency
    ON ledger_accounts(user_id, name, currency);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    entry_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    effective_at TEXT,
    description TEXT,
    idempotency_key TEXT,
    source_type TEXT,
    source_id INTEGER
);
CREATE INDEX IF NOT EXISTS ix_ledger_entries_user_id ON ledger_entries(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS ux_ledger_entries_user_idempotency_key
    ON ledger_entries(user_id, idempotency_key);

CREATE TABLE IF NOT EXISTS ledger_lines (
    id INTEGER PRIMARY KEY,
    entry_id INTEGER NOT NULL REFERENCES ledger_entries(id),
    account_id INTEGER NOT NULL REFERENCES ledger_accounts(id),
    amount REAL NOT NULL,
    memo TEXT
);
CREATE INDEX IF NOT EXISTS ix_ledger_lines_entry_id ON ledger_lines(entry_id);
CREATE INDEX IF NOT EXISTS ix_ledger_lines_account_id ON ledger_lines(account_id);
";

/// Open (or create) a journal database file
pub fn open(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    prepare(&conn)?;
    log::debug!("Opened journal database at {}", db_path.display());
    Ok(conn)
}

/// Create in-memory database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    create_tables(conn)
}

/// Create database tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// True when `err` is a UNIQUE index conflict from SQLite
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Run `f` inside a named savepoint.
///
/// On error the savepoint is rolled back, leaving the enclosing transaction
/// usable, and the error is returned to the caller to decide what to do.
pub fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}", name = name))?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JournalError;
    use tempfile::TempDir;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_schema_tables() {
        let conn = open_in_memory().unwrap();
        let names = table_names(&conn);
        for table in [
            "accounts",
            "cash_flows",
            "holding_sync_outbox",
            "holdings",
            "ledger_accounts",
            "ledger_entries",
            "ledger_lines",
            "order_events",
            "orders",
            "trades",
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("journal.db");
        let conn = open(&path).unwrap();
        drop(conn);
        assert!(path.exists());
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = open_in_memory().unwrap();
        let insert = "INSERT INTO ledger_entries (user_id, entry_type, created_at, idempotency_key)
                      VALUES (1, 'CASH_DEPOSIT', '2025-01-01', 'k1')";
        conn.execute(insert, []).unwrap();
        let err = conn.execute(insert, []).unwrap_err();
        assert!(is_unique_violation(&err));

        // CHECK failures are constraint errors too, but not conflicts
        let err = conn
            .execute(
                "INSERT INTO cash_flows (user_id, action, amount, currency, date)
                 VALUES (1, 'DEPOSIT', -1, 'USD', '2025-01-01')",
                [],
            )
            .unwrap_err();
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn test_savepoint_rollback_keeps_outer_work() {
        let mut conn = open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        tx.execute(
            "INSERT INTO accounts (user_id, name, currency, created_at) VALUES (1, 'a', 'USD', 'x')",
            [],
        )
        .unwrap();

        let res: Result<()> = with_savepoint(&tx, "sp_test", |c| {
            c.execute(
                "INSERT INTO accounts (user_id, name, currency, created_at) VALUES (1, 'b', 'USD', 'x')",
                [],
            )?;
            Err(JournalError::validation("boom"))
        });
        assert!(res.is_err());
        tx.commit().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
