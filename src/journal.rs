//! Journal facade
//!
//! Owns the database connection and the optional broker. Every mutating call
//! runs in its own transaction: the component functions receive the
//! transaction as a `&Connection`, and any error drops it uncommitted.

use crate::blotter;
use crate::broker::{self, BrokerAdapter};
use crate::config::JournalConfig;
use crate::db;
use crate::error::Result;
use crate::execution;
use crate::finance::ledger::{
    self, CashAction, CashFlow, CashPosting, LedgerAccount, LedgerEntry, PostOutcome,
};
use crate::finance::{self, PnLSummary, PortfolioSummary};
use crate::holdings::{self, Account, Holding, HoldingSyncTask};
use crate::market::PriceSource;
use crate::order::{NewOrder, Order, OrderEvent};
use crate::reconcile;
use crate::trade::{self, NewTrade, Trade, TradeUpdate};
use crate::types::{AccountId, Cash, OrderId, Price, Quantity, Timestamp, TradeId, UserId};
use rusqlite::Connection;

pub struct Journal {
    conn: Connection,
    broker: Option<Box<dyn BrokerAdapter>>,
    currency: String,
    synthesize_orders: bool,
}

impl Journal {
    /// Open the configured database and broker
    pub fn open(config: &JournalConfig) -> Result<Self> {
        config.validate()?;
        let conn = db::open(&config.database_path)?;
        let broker = broker::from_config(&config.broker)?;
        log::info!(
            "Journal opened at {} (broker: {})",
            config.database_path.display(),
            broker.as_ref().map(|b| b.name()).unwrap_or("disabled")
        );
        Ok(Self {
            conn,
            broker,
            currency: config.currency.trim().to_uppercase(),
            synthesize_orders: config.synthesize_orders,
        })
    }

    /// Isolated in-memory journal with default settings and no broker
    pub fn in_memory() -> Result<Self> {
        let config = JournalConfig::default();
        Ok(Self {
            conn: db::open_in_memory()?,
            broker: None,
            currency: config.currency,
            synthesize_orders: config.synthesize_orders,
        })
    }

    pub fn with_broker(mut self, broker: Box<dyn BrokerAdapter>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_order_synthesis(mut self, enabled: bool) -> Self {
        self.synthesize_orders = enabled;
        self
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker.is_some()
    }

    /// Default ledger currency
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Underlying connection, for reporting queries
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn unit_of_work<T>(
        &mut self,
        f: impl FnOnce(&Connection, Option<&dyn BrokerAdapter>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&tx, self.broker.as_deref())?;
        tx.commit()?;
        Ok(value)
    }

    // Orders

    pub fn create_order(&mut self, user_id: UserId, order: &NewOrder) -> Result<OrderId> {
        self.unit_of_work(|c, b| blotter::create_order(c, b, user_id, order))
    }

    pub fn cancel_order(&mut self, user_id: UserId, order_id: OrderId) -> Result<bool> {
        self.unit_of_work(|c, b| blotter::cancel_order(c, b, user_id, order_id))
    }

    pub fn sync_order_status(&mut self, user_id: UserId, order_id: OrderId) -> Result<bool> {
        self.unit_of_work(|c, b| blotter::sync_order_status(c, b, user_id, order_id))
    }

    pub fn sync_pending_orders(&mut self, user_id: UserId) -> Result<usize> {
        self.unit_of_work(|c, b| blotter::sync_pending_orders(c, b, user_id))
    }

    pub fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>> {
        blotter::get_order(&self.conn, user_id, order_id)
    }

    pub fn list_orders(&self, user_id: UserId, limit: usize) -> Result<Vec<Order>> {
        blotter::list_orders(&self.conn, user_id, limit)
    }

    pub fn list_order_events(
        &self,
        user_id: UserId,
        order_id: OrderId,
        limit: usize,
    ) -> Result<Vec<OrderEvent>> {
        blotter::list_order_events(&self.conn, user_id, order_id, limit)
    }

    // Fills and trades

    pub fn fill_order(
        &mut self,
        user_id: UserId,
        order_id: OrderId,
        filled_price: Price,
        filled_at: Option<Timestamp>,
    ) -> Result<TradeId> {
        self.unit_of_work(|c, _| execution::fill_order(c, user_id, order_id, filled_price, filled_at))
    }

    pub fn fill_order_via_broker(
        &mut self,
        user_id: UserId,
        order_id: OrderId,
        filled_price: Price,
        filled_at: Option<Timestamp>,
    ) -> Result<TradeId> {
        self.unit_of_work(|c, b| {
            execution::fill_order_via_broker(c, b, user_id, order_id, filled_price, filled_at)
        })
    }

    pub fn save_trade(&mut self, user_id: UserId, trade: &NewTrade) -> Result<TradeId> {
        let synthesize = self.synthesize_orders;
        self.unit_of_work(|c, _| execution::save_trade(c, user_id, trade, synthesize))
    }

    pub fn close_trade(
        &mut self,
        user_id: UserId,
        trade_id: TradeId,
        exit_price: Price,
        exit_date: Option<Timestamp>,
    ) -> Result<bool> {
        self.unit_of_work(|c, _| reconcile::close_trade(c, user_id, trade_id, exit_price, exit_date))
    }

    pub fn update_trade(
        &mut self,
        user_id: UserId,
        trade_id: TradeId,
        update: &TradeUpdate,
    ) -> Result<bool> {
        self.unit_of_work(|c, _| reconcile::update_trade(c, user_id, trade_id, update))
    }

    pub fn delete_trade(&mut self, user_id: UserId, trade_id: TradeId) -> Result<bool> {
        self.unit_of_work(|c, _| reconcile::delete_trade(c, user_id, trade_id))
    }

    pub fn get_trade(&self, user_id: UserId, trade_id: TradeId) -> Result<Option<Trade>> {
        trade::get_trade(&self.conn, user_id, trade_id)
    }

    pub fn list_trades(&self, user_id: UserId) -> Result<Vec<Trade>> {
        trade::list_trades(&self.conn, user_id)
    }

    pub fn pnl_summary(&self, user_id: UserId) -> Result<PnLSummary> {
        reconcile::pnl_summary(&self.conn, user_id)
    }

    // Holdings

    /// Apply a manual holdings adjustment
    pub fn apply_delta(
        &mut self,
        user_id: UserId,
        symbol: &str,
        delta_qty: Quantity,
        price: Option<Price>,
    ) -> Result<Option<Holding>> {
        let symbol = crate::types::normalize_symbol(symbol)?;
        self.unit_of_work(|c, _| holdings::apply_delta(c, user_id, &symbol, delta_qty, price))
    }

    pub fn get_holding(&self, user_id: UserId, symbol: &str) -> Result<Option<Holding>> {
        holdings::get_holding(&self.conn, user_id, &symbol.trim().to_uppercase())
    }

    pub fn list_holdings(&self, user_id: UserId, account_id: Option<AccountId>) -> Result<Vec<Holding>> {
        holdings::list_holdings(&self.conn, user_id, account_id)
    }

    pub fn list_accounts(&self, user_id: UserId) -> Result<Vec<Account>> {
        holdings::list_accounts(&self.conn, user_id)
    }

    pub fn list_pending_holding_syncs(&self, user_id: UserId) -> Result<Vec<HoldingSyncTask>> {
        holdings::list_pending(&self.conn, user_id)
    }

    pub fn retry_holding_syncs(&mut self, user_id: UserId) -> Result<usize> {
        self.unit_of_work(|c, _| holdings::retry_pending(c, user_id))
    }

    // Cash

    pub fn post_cash_entry(&mut self, user_id: UserId, posting: &CashPosting) -> Result<PostOutcome> {
        self.unit_of_work(|c, _| ledger::post_cash_entry(c, user_id, posting))
    }

    /// Record a deposit or withdrawal in the journal currency
    pub fn record_cash_flow(
        &mut self,
        user_id: UserId,
        action: CashAction,
        amount: Cash,
        date: Option<Timestamp>,
        notes: Option<&str>,
    ) -> Result<CashFlow> {
        let currency = self.currency.clone();
        self.unit_of_work(|c, _| {
            ledger::record_cash_flow(c, user_id, action, amount, &currency, date, notes)
                .map(|(flow, _)| flow)
        })
    }

    pub fn deposit(&mut self, user_id: UserId, amount: Cash) -> Result<CashFlow> {
        self.record_cash_flow(user_id, CashAction::Deposit, amount, None, None)
    }

    pub fn withdraw(&mut self, user_id: UserId, amount: Cash) -> Result<CashFlow> {
        self.record_cash_flow(user_id, CashAction::Withdraw, amount, None, None)
    }

    pub fn get_cash_balance(&self, user_id: UserId, currency: &str) -> Result<Cash> {
        ledger::get_cash_balance(&self.conn, user_id, currency)
    }

    /// Balance in the journal currency
    pub fn cash_balance(&self, user_id: UserId) -> Result<Cash> {
        self.get_cash_balance(user_id, &self.currency)
    }

    pub fn list_ledger_entries(&self, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>> {
        ledger::list_ledger_entries(&self.conn, user_id, limit)
    }

    pub fn list_ledger_accounts(&self, user_id: UserId) -> Result<Vec<LedgerAccount>> {
        ledger::list_ledger_accounts(&self.conn, user_id)
    }

    pub fn list_cash_flows(&self, user_id: UserId) -> Result<Vec<CashFlow>> {
        ledger::list_cash_flows(&self.conn, user_id)
    }

    // Views

    pub fn portfolio(&self, user_id: UserId, prices: &dyn PriceSource) -> Result<PortfolioSummary> {
        finance::portfolio(&self.conn, user_id, &self.currency, prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::error::JournalError;
    use crate::types::Action;
    use tempfile::TempDir;

    #[test]
    fn test_open_from_config_with_broker() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig {
            database_path: dir.path().join("journal.db"),
            broker: BrokerConfig {
                enabled: true,
                provider: "paper".to_string(),
                paper_state_file: dir.path().join("paper.json"),
            },
            ..JournalConfig::default()
        };
        let mut journal = Journal::open(&config).unwrap();
        assert!(journal.broker_enabled());

        let id = journal
            .create_order(1, &NewOrder::market("AAPL", Action::Buy, 1).with_client_id("k"))
            .unwrap();
        drop(journal);

        // Reopen: the order and its venue linkage persisted
        let journal = Journal::open(&config).unwrap();
        let order = journal.get_order(1, id).unwrap().unwrap();
        assert_eq!(order.external_order_id.as_deref(), Some("paper:1:k"));
    }

    #[test]
    fn test_failed_operation_rolls_back() {
        struct FailingBroker;
        impl BrokerAdapter for FailingBroker {
            fn name(&self) -> &str {
                "failing"
            }
            fn submit_order(
                &self,
                _: UserId,
                _: &crate::broker::SubmitOrderRequest,
            ) -> Result<crate::broker::SubmitOrderResponse> {
                Err(JournalError::Broker("venue down".to_string()))
            }
            fn cancel_order(&self, _: UserId, _: &str) -> Result<crate::broker::CancelOrderResponse> {
                Err(JournalError::Broker("venue down".to_string()))
            }
            fn get_order_status(
                &self,
                _: UserId,
                _: &str,
            ) -> Result<crate::broker::OrderStatusResponse> {
                Err(JournalError::Broker("venue down".to_string()))
            }
            fn fill_order(
                &self,
                _: UserId,
                _: &str,
                _: Option<Price>,
                _: Option<Timestamp>,
            ) -> Result<crate::broker::FillOrderResponse> {
                Err(JournalError::Broker("venue down".to_string()))
            }
        }

        let mut journal = Journal::in_memory().unwrap().with_broker(Box::new(FailingBroker));
        let err = journal
            .create_order(1, &NewOrder::market("AAPL", Action::Buy, 1))
            .unwrap_err();
        assert!(matches!(err, JournalError::Broker(_)));
        assert!(journal.list_orders(1, 10).unwrap().is_empty());

        let events: i64 = journal
            .connection()
            .query_row("SELECT COUNT(*) FROM order_events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(events, 0);
    }

    #[test]
    fn test_cash_helpers_use_journal_currency() {
        let mut journal = Journal::in_memory().unwrap();
        journal.deposit(1, 100.0).unwrap();
        journal.withdraw(1, 40.0).unwrap();
        assert_eq!(journal.cash_balance(1).unwrap(), 60.0);
        assert_eq!(journal.list_cash_flows(1).unwrap().len(), 2);
        assert!(journal.withdraw(1, -1.0).unwrap_err().is_validation());
        assert_eq!(journal.list_cash_flows(1).unwrap().len(), 2);
    }
}
