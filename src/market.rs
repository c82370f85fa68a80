//! Last-price lookup consumed by portfolio valuation

use crate::error::{JournalError, Result};
use crate::types::{normalize_symbol, Price};
use std::collections::HashMap;

/// Source of the most recent traded price for a symbol
pub trait PriceSource: Send + Sync {
    /// `None` when no price is known
    fn last_price(&self, symbol: &str) -> Option<Price>;
}

/// In-memory price table
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: HashMap<String, Price>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a price; symbols are stored upper-cased
    pub fn set(&mut self, symbol: &str, price: Price) {
        self.prices.insert(symbol.trim().to_uppercase(), price);
    }

    pub fn with_price(mut self, symbol: &str, price: Price) -> Self {
        self.set(symbol, price);
        self
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Parse `SYMBOL=PRICE` pairs
    pub fn parse_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut prices = Self::new();
        for pair in pairs {
            let (symbol, price) = pair
                .split_once('=')
                .ok_or_else(|| JournalError::Parse(format!("Expected SYMBOL=PRICE, got {}", pair)))?;
            let price: Price = price
                .trim()
                .parse()
                .map_err(|_| JournalError::Parse(format!("Invalid price in {}", pair)))?;
            prices.set(&normalize_symbol(symbol)?, price);
        }
        Ok(prices)
    }
}

impl PriceSource for StaticPrices {
    fn last_price(&self, symbol: &str) -> Option<Price> {
        self.prices.get(&symbol.trim().to_uppercase()).copied()
    }
}
