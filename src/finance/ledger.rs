//! Cash Ledger - double-entry bookkeeping for cash movements
//!
//! Every posting writes one entry and two lines that sum to zero: the user's
//! "Cash (CCY)" asset account against "Owner Equity". The cash balance is the
//! sum of the cash account's lines and is never rebuilt from raw cash-flow
//! rows.

use crate::db::is_unique_violation;
use crate::error::{JournalError, Result};
use crate::types::{
    sql_text_enum, validate_positive, AccountId, Cash, EntryId, Timestamp, UserId,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const EQUITY_ACCOUNT_NAME: &str = "Owner Equity";

/// Source type stamped on entries posted by [`record_cash_flow`]
pub const CASH_FLOW_SOURCE: &str = "cash_flow";

/// Ledger account classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerAccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

sql_text_enum!(LedgerAccountType {
    Asset => "ASSET",
    Liability => "LIABILITY",
    Equity => "EQUITY",
    Income => "INCOME",
    Expense => "EXPENSE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    CashDeposit,
    CashWithdraw,
}

sql_text_enum!(LedgerEntryType {
    CashDeposit => "CASH_DEPOSIT",
    CashWithdraw => "CASH_WITHDRAW",
});

/// Direction of a manual cash movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CashAction {
    Deposit,
    Withdraw,
}

sql_text_enum!(CashAction { Deposit => "DEPOSIT", Withdraw => "WITHDRAW" });

impl CashAction {
    pub fn entry_type(&self) -> LedgerEntryType {
        match self {
            CashAction::Deposit => LedgerEntryType::CashDeposit,
            CashAction::Withdraw => LedgerEntryType::CashWithdraw,
        }
    }

    /// Signed amount on the cash account; equity takes the opposite sign
    pub fn cash_amount(&self, amount: Cash) -> Cash {
        match self {
            CashAction::Deposit => amount,
            CashAction::Withdraw => -amount,
        }
    }
}

impl FromStr for CashAction {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "DEPOSIT" | "D" => Ok(CashAction::Deposit),
            "WITHDRAW" | "WITHDRAWAL" | "W" => Ok(CashAction::Withdraw),
            other => Err(JournalError::Parse(format!("Unknown cash action: {}", other))),
        }
    }
}

/// Name of the cash account for a currency
pub fn cash_account_name(currency: &str) -> String {
    format!("Cash ({})", currency)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub id: AccountId,
    pub user_id: UserId,
    pub name: String,
    pub account_type: LedgerAccountType,
    pub currency: String,
    pub created_at: Timestamp,
}

impl LedgerAccount {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            account_type: row.get(3)?,
            currency: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLine {
    pub id: i64,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    /// Signed: positive debits, negative credits
    pub amount: Cash,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub entry_type: LedgerEntryType,
    pub created_at: Timestamp,
    pub effective_at: Option<Timestamp>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<i64>,
    pub lines: Vec<LedgerLine>,
}

impl LedgerEntry {
    /// Sum of line amounts; zero for every well-formed entry
    pub fn balance(&self) -> Cash {
        self.lines.iter().map(|l| l.amount).sum()
    }
}

/// A cash movement to post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashPosting {
    pub action: CashAction,
    pub amount: Cash,
    pub currency: String,
    pub effective_at: Option<Timestamp>,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<i64>,
}

impl CashPosting {
    pub fn new(action: CashAction, amount: Cash, currency: impl Into<String>) -> Self {
        Self {
            action,
            amount,
            currency: currency.into(),
            effective_at: None,
            notes: None,
            idempotency_key: None,
            source_type: None,
            source_id: None,
        }
    }

    pub fn deposit(amount: Cash, currency: impl Into<String>) -> Self {
        Self::new(CashAction::Deposit, amount, currency)
    }

    pub fn withdraw(amount: Cash, currency: impl Into<String>) -> Self {
        Self::new(CashAction::Withdraw, amount, currency)
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn effective(mut self, at: Timestamp) -> Self {
        self.effective_at = Some(at);
        self
    }
}

/// Result of [`post_cash_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOutcome {
    pub entry_id: EntryId,
    /// False when the idempotency key had already been posted
    pub created: bool,
}

fn normalize_currency(currency: &str) -> Result<String> {
    let ccy = currency.trim().to_uppercase();
    if ccy.is_empty() {
        return Err(JournalError::validation("currency is required"));
    }
    Ok(ccy)
}

/// Get or create a ledger account
pub fn ensure_account(
    conn: &Connection,
    user_id: UserId,
    name: &str,
    account_type: LedgerAccountType,
    currency: &str,
) -> Result<AccountId> {
    conn.execute(
        "INSERT INTO ledger_accounts (user_id, name, type, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id, name, currency) DO NOTHING",
        params![user_id, name, account_type, currency, Utc::now()],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM ledger_accounts WHERE user_id = ?1 AND name = ?2 AND currency = ?3",
        params![user_id, name, currency],
        |row| row.get(0),
    )?)
}

fn find_by_idempotency_key(conn: &Connection, user_id: UserId, key: &str) -> Result<Option<EntryId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM ledger_entries WHERE user_id = ?1 AND idempotency_key = ?2",
            params![user_id, key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Post a balanced two-line cash entry
///
/// A repeated idempotency key posts nothing and returns the first entry.
pub fn post_cash_entry(conn: &Connection, user_id: UserId, posting: &CashPosting) -> Result<PostOutcome> {
    validate_positive("amount", posting.amount)?;
    let currency = normalize_currency(&posting.currency)?;
    let key = posting
        .idempotency_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let inserted = conn.execute(
        "INSERT INTO ledger_entries (user_id, entry_type, created_at, effective_at, description,
             idempotency_key, source_type, source_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user_id,
            posting.action.entry_type(),
            Utc::now(),
            posting.effective_at,
            posting.notes,
            key,
            posting.source_type,
            posting.source_id,
        ],
    );
    let entry_id = match inserted {
        Ok(_) => conn.last_insert_rowid(),
        Err(e) if is_unique_violation(&e) => {
            let existing = match key {
                Some(k) => find_by_idempotency_key(conn, user_id, k)?,
                None => None,
            };
            return match existing {
                Some(entry_id) => {
                    log::debug!("Ledger key {:?} already posted as entry {}", key, entry_id);
                    Ok(PostOutcome {
                        entry_id,
                        created: false,
                    })
                }
                None => Err(e.into()),
            };
        }
        Err(e) => return Err(e.into()),
    };

    let cash = ensure_account(
        conn,
        user_id,
        &cash_account_name(&currency),
        LedgerAccountType::Asset,
        &currency,
    )?;
    let equity = ensure_account(conn, user_id, EQUITY_ACCOUNT_NAME, LedgerAccountType::Equity, &currency)?;

    let cash_amount = posting.action.cash_amount(posting.amount);
    let mut line = conn.prepare(
        "INSERT INTO ledger_lines (entry_id, account_id, amount, memo) VALUES (?1, ?2, ?3, ?4)",
    )?;
    line.execute(params![entry_id, cash, cash_amount, posting.notes])?;
    line.execute(params![entry_id, equity, -cash_amount, posting.notes])?;

    log::info!(
        "Posted {} {} {} for user {} (entry {})",
        posting.action,
        posting.amount,
        currency,
        user_id,
        entry_id
    );
    Ok(PostOutcome {
        entry_id,
        created: true,
    })
}

/// Sum of the user's cash account lines; zero before the first posting
pub fn get_cash_balance(conn: &Connection, user_id: UserId, currency: &str) -> Result<Cash> {
    let currency = normalize_currency(currency)?;
    let balance: Option<Cash> = conn.query_row(
        "SELECT SUM(l.amount) FROM ledger_lines l
         JOIN ledger_accounts a ON a.id = l.account_id
         WHERE a.user_id = ?1 AND a.name = ?2 AND a.currency = ?3",
        params![user_id, cash_account_name(&currency), currency],
        |row| row.get(0),
    )?;
    Ok(balance.unwrap_or(0.0))
}

/// Raw journal row for a manual deposit or withdrawal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlow {
    pub id: i64,
    pub user_id: UserId,
    pub action: CashAction,
    pub amount: Cash,
    pub currency: String,
    pub date: Timestamp,
    pub notes: Option<String>,
}

/// Record a cash flow and post its ledger entry
pub fn record_cash_flow(
    conn: &Connection,
    user_id: UserId,
    action: CashAction,
    amount: Cash,
    currency: &str,
    date: Option<Timestamp>,
    notes: Option<&str>,
) -> Result<(CashFlow, PostOutcome)> {
    validate_positive("amount", amount)?;
    let currency = normalize_currency(currency)?;
    let date = date.unwrap_or_else(Utc::now);
    let notes = notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);

    conn.execute(
        "INSERT INTO cash_flows (user_id, action, amount, currency, date, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, action, amount, currency, date, notes],
    )?;
    let flow = CashFlow {
        id: conn.last_insert_rowid(),
        user_id,
        action,
        amount,
        currency,
        date,
        notes,
    };

    let mut posting = CashPosting::new(action, amount, flow.currency.clone())
        .effective(date)
        .with_idempotency_key(format!("{}:{}", CASH_FLOW_SOURCE, flow.id));
    if let Some(notes) = &flow.notes {
        posting = posting.with_notes(notes.clone());
    }
    posting.source_type = Some(CASH_FLOW_SOURCE.to_string());
    posting.source_id = Some(flow.id);
    let outcome = post_cash_entry(conn, user_id, &posting)?;
    Ok((flow, outcome))
}

pub fn list_cash_flows(conn: &Connection, user_id: UserId) -> Result<Vec<CashFlow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, action, amount, currency, date, notes FROM cash_flows
         WHERE user_id = ?1 ORDER BY date DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(CashFlow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            action: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            date: row.get(5)?,
            notes: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn list_ledger_accounts(conn: &Connection, user_id: UserId) -> Result<Vec<LedgerAccount>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, type, currency, created_at FROM ledger_accounts
         WHERE user_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![user_id], LedgerAccount::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Newest entries first, each with its lines
pub fn list_ledger_entries(conn: &Connection, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, entry_type, created_at, effective_at, description,
                idempotency_key, source_type, source_id
         FROM ledger_entries WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit as i64], |row| {
        Ok(LedgerEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            entry_type: row.get(2)?,
            created_at: row.get(3)?,
            effective_at: row.get(4)?,
            description: row.get(5)?,
            idempotency_key: row.get(6)?,
            source_type: row.get(7)?,
            source_id: row.get(8)?,
            lines: Vec::new(),
        })
    })?;
    let mut entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;

    let mut lines = conn.prepare(
        "SELECT id, entry_id, account_id, amount, memo FROM ledger_lines
         WHERE entry_id = ?1 ORDER BY id ASC",
    )?;
    for entry in &mut entries {
        entry.lines = lines
            .query_map(params![entry.id], |row| {
                Ok(LedgerLine {
                    id: row.get(0)?,
                    entry_id: row.get(1)?,
                    account_id: row.get(2)?,
                    amount: row.get(3)?,
                    memo: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }
    Ok(entries)
}
