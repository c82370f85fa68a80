//! Core types and constants

use crate::error::{JournalError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// Symbol identifier for instruments
pub type Symbol = String;

/// Price type (using f64 for precision)
pub type Price = f64;

/// Signed quantity (holdings can be short)
pub type Quantity = f64;

/// Money/cash type
pub type Cash = f64;

/// Authenticated user identifier, supplied by the auth collaborator
pub type UserId = i64;

/// Row identifiers
pub type OrderId = i64;
pub type TradeId = i64;
pub type AccountId = i64;
pub type EntryId = i64;

/// Implements text round-tripping for a closed enum stored as its upper-case name.
macro_rules! sql_text_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Canonical upper-case name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                match text {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(rusqlite::types::FromSqlError::Other(
                        format!("unknown {} value: {}", stringify!($ty), text).into(),
                    )),
                }
            }
        }
    };
}

pub(crate) use sql_text_enum;

/// Traded instrument kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    Stock,
    Option,
}

sql_text_enum!(Instrument { Stock => "STOCK", Option => "OPTION" });

impl Instrument {
    /// Only stock fills move holdings
    pub fn tracks_holdings(&self) -> bool {
        matches!(self, Instrument::Stock)
    }
}

impl FromStr for Instrument {
    type Err = JournalError;

    /// Accepts "Stock", "stock", "OPTION", "opt", ...; empty means stock.
    fn from_str(s: &str) -> Result<Self> {
        let up = s.trim().to_uppercase();
        if up.is_empty() || up.starts_with("ST") {
            Ok(Instrument::Stock)
        } else if up.starts_with("OPT") {
            Ok(Instrument::Option)
        } else {
            Err(JournalError::Parse(format!("Unknown instrument: {}", s)))
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

sql_text_enum!(Action { Buy => "BUY", Sell => "SELL" });

impl Action {
    /// Sign applied to a quantity: +1 for buys, -1 for sells
    pub fn sign(&self) -> f64 {
        match self {
            Action::Buy => 1.0,
            Action::Sell => -1.0,
        }
    }

    /// Signed holdings delta for `quantity` units
    pub fn signed_quantity(&self, quantity: i64) -> Quantity {
        self.sign() * quantity as f64
    }
}

impl FromStr for Action {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        let up = s.trim().to_uppercase();
        if up.starts_with('B') {
            Ok(Action::Buy)
        } else if up.starts_with('S') {
            Ok(Action::Sell)
        } else {
            Err(JournalError::Parse(format!("Unknown action: {}", s)))
        }
    }
}

/// Option right, recorded on option trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

sql_text_enum!(OptionType { Call => "CALL", Put => "PUT" });

impl FromStr for OptionType {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        let up = s.trim().to_uppercase();
        if up.starts_with('C') {
            Ok(OptionType::Call)
        } else if up.starts_with('P') {
            Ok(OptionType::Put)
        } else {
            Err(JournalError::Parse(format!("Unknown option type: {}", s)))
        }
    }
}

/// Trim and upper-case a symbol, rejecting empty input
pub fn normalize_symbol(symbol: &str) -> Result<Symbol> {
    let s = symbol.trim().to_uppercase();
    if s.is_empty() {
        return Err(JournalError::validation("symbol is required"));
    }
    Ok(s)
}

/// Empty or whitespace-only client ids count as absent
pub fn normalize_client_id(client_order_id: Option<&str>) -> Option<String> {
    client_order_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Order and trade quantities are whole units, at least one
pub fn validate_quantity(quantity: i64) -> Result<()> {
    if quantity < 1 {
        return Err(JournalError::validation(format!(
            "quantity must be >= 1, got {}",
            quantity
        )));
    }
    Ok(())
}

/// Prices and cash amounts must be positive finite numbers
pub fn validate_positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(JournalError::validation(format!(
            "{} must be a positive number, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Parse `YYYY-MM-DD` or RFC 3339 into a UTC timestamp (dates map to midnight)
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| JournalError::Parse(format!("Invalid date: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_lenient_enum_parsing() {
        assert_eq!("Buy".parse::<Action>().unwrap(), Action::Buy);
        assert_eq!(" sell ".parse::<Action>().unwrap(), Action::Sell);
        assert!("hold".parse::<Action>().is_err());

        assert_eq!("Stock".parse::<Instrument>().unwrap(), Instrument::Stock);
        assert_eq!("".parse::<Instrument>().unwrap(), Instrument::Stock);
        assert_eq!("option".parse::<Instrument>().unwrap(), Instrument::Option);
        assert!("future".parse::<Instrument>().is_err());

        assert_eq!("put".parse::<OptionType>().unwrap(), OptionType::Put);
    }

    #[test]
    fn test_signed_quantity() {
        assert_eq!(Action::Buy.signed_quantity(10), 10.0);
        assert_eq!(Action::Sell.signed_quantity(2), -2.0);
    }

    #[test]
    fn test_normalizers() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert!(normalize_symbol("   ").unwrap_err().is_validation());
        assert_eq!(normalize_client_id(Some("  ")), None);
        assert_eq!(normalize_client_id(Some(" x1 ")), Some("x1".to_string()));
        assert!(validate_quantity(0).is_err());
        assert!(validate_positive("price", f64::NAN).is_err());
        assert!(validate_positive("price", -1.0).is_err());
        assert!(validate_positive("price", 0.01).is_ok());
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2025-01-02").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day(), ts.hour()), (2025, 1, 2, 0));
        let ts = parse_timestamp("2025-01-02T15:30:00Z").unwrap();
        assert_eq!(ts.hour(), 15);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
