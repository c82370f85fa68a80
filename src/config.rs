//! Journal configuration
//!
//! Defaults, then an optional TOML file, then environment overrides.

use crate::error::{JournalError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Broker execution switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_paper_state_file")]
    pub paper_state_file: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            paper_state_file: default_paper_state_file(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Currency for cash postings
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Record a FILLED order for trades saved without one
    #[serde(default = "default_true")]
    pub synthesize_orders: bool,
    #[serde(default)]
    pub broker: BrokerConfig,
}

fn default_provider() -> String {
    "paper".to_string()
}

fn default_paper_state_file() -> PathBuf {
    PathBuf::from(".paper_broker_state.json")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("trading_journal.db")
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            currency: default_currency(),
            synthesize_orders: true,
            broker: BrokerConfig::default(),
        }
    }
}

/// "1", "true", "yes", "on" (any case) are true
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl JournalConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: JournalConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process env in production)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("JOURNAL_DATABASE") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("JOURNAL_CURRENCY") {
            self.currency = v.trim().to_uppercase();
        }
        if let Some(v) = lookup("BROKER_ENABLED") {
            self.broker.enabled = parse_flag(&v);
        }
        if let Some(v) = lookup("BROKER_PROVIDER") {
            self.broker.provider = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("PAPER_BROKER_STATE_FILE") {
            self.broker.paper_state_file = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency.trim().is_empty() {
            return Err(JournalError::Config("currency must not be empty".to_string()));
        }
        if self.broker.enabled && self.broker.provider.trim().is_empty() {
            return Err(JournalError::Config(
                "broker provider required when broker is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
