//! Integration tests for rusty-ledger
//!
//! End-to-end flows through the `Journal` facade, one isolated in-memory
//! database per test.

use approx::assert_relative_eq;
use rusty_ledger::finance::ledger::CashPosting;
use rusty_ledger::order::{OrderEventType, OrderStatus};
use rusty_ledger::prelude::*;
use rusty_ledger::types::parse_timestamp;

const USER: i64 = 1;

fn journal() -> Journal {
    Journal::in_memory().unwrap()
}

fn stock(symbol: &str, action: Action, qty: i64, price: f64) -> NewTrade {
    NewTrade::stock(symbol, action, qty, price, parse_timestamp("2025-01-02").unwrap())
}

fn holding_qty(journal: &Journal, symbol: &str) -> f64 {
    journal
        .get_holding(USER, symbol)
        .unwrap()
        .map(|h| h.quantity)
        .unwrap_or(0.0)
}

#[test]
fn test_every_ledger_entry_balances() {
    let mut journal = journal();
    journal.deposit(USER, 1_000.0).unwrap();
    journal.withdraw(USER, 250.25).unwrap();
    journal
        .post_cash_entry(USER, &CashPosting::deposit(0.1, "USD").with_idempotency_key("a"))
        .unwrap();

    let entries = journal.list_ledger_entries(USER, 100).unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries {
        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.lines.iter().map(|l| l.amount).sum::<f64>(), 0.0);
    }
}

#[test]
fn test_deposit_withdraw_balance() {
    let mut journal = journal();
    journal.deposit(USER, 100.0).unwrap();
    journal.withdraw(USER, 40.0).unwrap();
    assert_eq!(journal.get_cash_balance(USER, "USD").unwrap(), 60.0);
}

#[test]
fn test_create_order_is_idempotent() {
    let mut journal = journal();
    let order = NewOrder::market("AAPL", Action::Buy, 10).with_client_id("retry-me");
    let first = journal.create_order(USER, &order).unwrap();
    let second = journal.create_order(USER, &order).unwrap();
    assert_eq!(first, second);
    assert_eq!(journal.list_orders(USER, 100).unwrap().len(), 1);
}

#[test]
fn test_save_trade_is_idempotent() {
    let mut journal = journal();
    let trade = stock("AAPL", Action::Buy, 10, 100.0).with_client_id("t-1");
    let first = journal.save_trade(USER, &trade).unwrap();
    let second = journal.save_trade(USER, &trade).unwrap();
    assert_eq!(first, second);
    assert_eq!(journal.list_trades(USER).unwrap().len(), 1);
    // Holdings moved once
    assert_eq!(holding_qty(&journal, "AAPL"), 10.0);
}

#[test]
fn test_realized_pnl_long_and_short() {
    let mut journal = journal();
    let long = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();
    let short = journal.save_trade(USER, &stock("TSLA", Action::Sell, 2, 200.0)).unwrap();

    assert!(journal.close_trade(USER, long, 110.0, None).unwrap());
    assert!(journal.close_trade(USER, short, 150.0, None).unwrap());

    assert_eq!(journal.get_trade(USER, long).unwrap().unwrap().realized_pnl, Some(100.0));
    assert_eq!(journal.get_trade(USER, short).unwrap().unwrap().realized_pnl, Some(100.0));
}

#[test]
fn test_close_twice_returns_false() {
    let mut journal = journal();
    let id = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();
    assert!(journal.close_trade(USER, id, 110.0, None).unwrap());
    assert!(!journal.close_trade(USER, id, 200.0, None).unwrap());
    assert_eq!(journal.get_trade(USER, id).unwrap().unwrap().realized_pnl, Some(100.0));
}

#[test]
fn test_save_then_close_clears_holding() {
    let mut journal = journal();
    let id = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();

    let holding = journal.get_holding(USER, "AAPL").unwrap().unwrap();
    assert_eq!(holding.quantity, 10.0);
    assert_eq!(holding.avg_cost, Some(100.0));

    journal.close_trade(USER, id, 110.0, None).unwrap();
    assert!(journal.get_holding(USER, "AAPL").unwrap().is_none());
}

#[test]
fn test_short_blend_and_flip() {
    let mut journal = journal();
    journal.save_trade(USER, &stock("XYZ", Action::Sell, 2, 200.0)).unwrap();
    let h = journal.get_holding(USER, "XYZ").unwrap().unwrap();
    assert_eq!(h.quantity, -2.0);
    assert!(h.is_short());

    journal.save_trade(USER, &stock("XYZ", Action::Sell, 3, 150.0)).unwrap();
    let h = journal.get_holding(USER, "XYZ").unwrap().unwrap();
    assert_eq!(h.quantity, -5.0);
    assert_relative_eq!(h.avg_cost.unwrap(), (2.0 * 200.0 + 3.0 * 150.0) / 5.0);

    journal.save_trade(USER, &stock("XYZ", Action::Buy, 8, 120.0)).unwrap();
    let h = journal.get_holding(USER, "XYZ").unwrap().unwrap();
    assert_eq!(h.quantity, 3.0);
    assert_eq!(h.avg_cost, Some(120.0));
}

#[test]
fn test_cancel_order_rules() {
    let mut journal = journal();
    let filled = journal
        .create_order(USER, &NewOrder::market("AAPL", Action::Buy, 1))
        .unwrap();
    journal.fill_order(USER, filled, 10.0, None).unwrap();
    assert!(!journal.cancel_order(USER, filled).unwrap());

    let pending = journal
        .create_order(USER, &NewOrder::market("AAPL", Action::Buy, 1))
        .unwrap();
    assert!(journal.cancel_order(USER, pending).unwrap());
    assert!(!journal.cancel_order(USER, pending).unwrap());
    assert_eq!(
        journal.get_order(USER, pending).unwrap().unwrap().status,
        OrderStatus::Cancelled
    );
}

#[test]
fn test_delete_open_vs_closed_trade() {
    let mut journal = journal();
    journal.save_trade(USER, &stock("AAPL", Action::Buy, 4, 90.0)).unwrap();
    let open = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();
    assert!(journal.delete_trade(USER, open).unwrap());
    assert_eq!(holding_qty(&journal, "AAPL"), 4.0);

    let closed = journal.save_trade(USER, &stock("AAPL", Action::Buy, 6, 95.0)).unwrap();
    journal.close_trade(USER, closed, 99.0, None).unwrap();
    assert_eq!(holding_qty(&journal, "AAPL"), 4.0);
    assert!(journal.delete_trade(USER, closed).unwrap());
    assert_eq!(holding_qty(&journal, "AAPL"), 4.0);
    assert!(journal.get_trade(USER, closed).unwrap().is_none());
}

#[test]
fn test_order_to_trade_pipeline() {
    let mut journal = journal();
    journal.deposit(USER, 5_000.0).unwrap();
    let order_id = journal
        .create_order(
            USER,
            &NewOrder::market("msft", Action::Buy, 5)
                .with_limit(300.0)
                .with_strategy("Breakout"),
        )
        .unwrap();
    let trade_id = journal.fill_order(USER, order_id, 299.5, None).unwrap();

    let order = journal.get_order(USER, order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.trade_id, Some(trade_id));
    let kinds: Vec<_> = journal
        .list_order_events(USER, order_id, 10)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(kinds, vec![OrderEventType::Created, OrderEventType::Filled]);

    let trade = journal.get_trade(USER, trade_id).unwrap().unwrap();
    assert_eq!(trade.symbol, "MSFT");
    assert_eq!(trade.strategy, "Breakout");

    let prices = StaticPrices::new().with_price("MSFT", 310.0);
    let summary = journal.portfolio(USER, &prices).unwrap();
    assert_eq!(summary.num_positions(), 1);
    assert_relative_eq!(summary.positions_value, 1550.0);
    assert_relative_eq!(summary.pnl.unrealized_pnl, 52.5);
    assert_eq!(summary.cash, 5_000.0);
    assert!(summary.unpriced().is_empty());
}

#[test]
fn test_portfolio_reports_unpriced_positions() {
    let mut journal = journal();
    journal.save_trade(USER, &stock("AAA", Action::Buy, 1, 10.0)).unwrap();
    journal.save_trade(USER, &stock("BBB", Action::Buy, 2, 20.0)).unwrap();

    let prices = StaticPrices::new().with_price("AAA", 12.0);
    let summary = journal.portfolio(USER, &prices).unwrap();
    assert_eq!(summary.unpriced(), vec!["BBB"]);
    assert_relative_eq!(summary.positions_value, 12.0);
    assert_relative_eq!(summary.pnl.unrealized_pnl, 2.0);
}

#[test]
fn test_users_are_isolated() {
    let mut journal = journal();
    let id = journal.save_trade(1, &stock("AAPL", Action::Buy, 1, 1.0)).unwrap();
    journal.deposit(1, 10.0).unwrap();

    assert!(journal.get_trade(2, id).unwrap().is_none());
    assert!(!journal.close_trade(2, id, 2.0, None).unwrap());
    assert!(!journal.delete_trade(2, id).unwrap());
    assert!(journal.list_holdings(2, None).unwrap().is_empty());
    assert_eq!(journal.cash_balance(2).unwrap(), 0.0);
}

#[test]
fn test_disabled_order_synthesis() {
    let mut journal = journal().with_order_synthesis(false);
    journal.save_trade(USER, &stock("AAPL", Action::Buy, 1, 1.0)).unwrap();
    assert!(journal.list_orders(USER, 10).unwrap().is_empty());
}
