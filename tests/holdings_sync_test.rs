//! Holdings reconciliation: outbox replay, edits, and book invariants

use approx::assert_relative_eq;
use proptest::prelude::*;
use rusty_ledger::prelude::*;
use rusty_ledger::types::parse_timestamp;

const USER: i64 = 1;

fn stock(symbol: &str, action: Action, qty: i64, price: f64) -> NewTrade {
    NewTrade::stock(symbol, action, qty, price, parse_timestamp("2025-06-01").unwrap())
}

fn block_holdings(journal: &Journal) {
    journal
        .connection()
        .execute_batch(
            "CREATE TRIGGER block_holdings BEFORE INSERT ON holdings
             BEGIN SELECT RAISE(ABORT, 'holdings unavailable'); END;",
        )
        .unwrap();
}

fn unblock_holdings(journal: &Journal) {
    journal
        .connection()
        .execute_batch("DROP TRIGGER block_holdings")
        .unwrap();
}

#[test]
fn test_failed_sync_keeps_trade_and_queues_delta() {
    let mut journal = Journal::in_memory().unwrap();
    block_holdings(&journal);

    let id = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();
    assert!(journal.get_trade(USER, id).unwrap().is_some());
    assert!(journal.get_holding(USER, "AAPL").unwrap().is_none());

    let pending = journal.list_pending_holding_syncs(USER).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].symbol, "AAPL");
    assert_eq!(pending[0].delta_qty, 10.0);
    assert_eq!(pending[0].price, Some(100.0));
    assert!(pending[0].error.contains("holdings unavailable"));

    assert_eq!(journal.retry_holding_syncs(USER).unwrap(), 0);
    assert_eq!(journal.list_pending_holding_syncs(USER).unwrap().len(), 1);

    unblock_holdings(&journal);
    assert_eq!(journal.retry_holding_syncs(USER).unwrap(), 1);
    assert!(journal.list_pending_holding_syncs(USER).unwrap().is_empty());

    let holding = journal.get_holding(USER, "AAPL").unwrap().unwrap();
    assert_eq!(holding.quantity, 10.0);
    assert_eq!(holding.avg_cost, Some(100.0));
}

#[test]
fn test_queued_deltas_replay_in_order() {
    let mut journal = Journal::in_memory().unwrap();
    block_holdings(&journal);
    let id = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();
    journal.close_trade(USER, id, 120.0, None).unwrap();
    assert_eq!(journal.list_pending_holding_syncs(USER).unwrap().len(), 2);

    unblock_holdings(&journal);
    assert_eq!(journal.retry_holding_syncs(USER).unwrap(), 2);
    assert!(journal.list_holdings(USER, None).unwrap().is_empty());
}

#[test]
fn test_edit_moves_position_between_symbols() {
    let mut journal = Journal::in_memory().unwrap();
    let id = journal.save_trade(USER, &stock("AAPL", Action::Buy, 10, 100.0)).unwrap();
    journal.save_trade(USER, &stock("MSFT", Action::Buy, 1, 300.0)).unwrap();

    let update = TradeUpdate {
        symbol: "MSFT".to_string(),
        strategy: "Moved".to_string(),
        action: Action::Buy,
        quantity: 3,
        entry_price: 310.0,
        entry_date: parse_timestamp("2025-06-02").unwrap(),
    };
    assert!(journal.update_trade(USER, id, &update).unwrap());

    assert!(journal.get_holding(USER, "AAPL").unwrap().is_none());
    let msft = journal.get_holding(USER, "MSFT").unwrap().unwrap();
    assert_eq!(msft.quantity, 4.0);
    assert_relative_eq!(msft.avg_cost.unwrap(), (300.0 + 3.0 * 310.0) / 4.0);
}

#[test]
fn test_edit_flipping_direction_in_place() {
    let mut journal = Journal::in_memory().unwrap();
    let id = journal.save_trade(USER, &stock("AAPL", Action::Buy, 5, 100.0)).unwrap();

    let update = TradeUpdate {
        symbol: "AAPL".to_string(),
        strategy: String::new(),
        action: Action::Sell,
        quantity: 5,
        entry_price: 95.0,
        entry_date: parse_timestamp("2025-06-01").unwrap(),
    };
    journal.update_trade(USER, id, &update).unwrap();

    // Net delta -10 takes +5 through zero to -5 at the new price
    let h = journal.get_holding(USER, "AAPL").unwrap().unwrap();
    assert_eq!(h.quantity, -5.0);
    assert_eq!(h.avg_cost, Some(95.0));
}

#[test]
fn test_manual_delta_adjustment() {
    let mut journal = Journal::in_memory().unwrap();
    journal.apply_delta(USER, "gld", 2.0, Some(180.0)).unwrap();
    let h = journal.apply_delta(USER, "GLD", 0.5, None).unwrap().unwrap();
    assert_eq!(h.quantity, 2.5);
    assert_eq!(h.avg_cost, Some(180.0));
    assert_eq!(journal.list_accounts(USER).unwrap().len(), 1);
    assert!(journal.apply_delta(USER, " ", 1.0, None).is_err());
}

#[test]
fn test_manual_delta_rejects_bad_price() {
    let mut journal = Journal::in_memory().unwrap();
    assert!(journal
        .apply_delta(USER, "AAPL", 5.0, Some(-50.0))
        .unwrap_err()
        .is_validation());
    assert!(journal.apply_delta(USER, "AAPL", f64::NAN, Some(50.0)).is_err());
    assert!(journal.get_holding(USER, "AAPL").unwrap().is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The holding always equals the signed sum of open trades
    #[test]
    fn prop_holdings_match_open_trades(
        ops in prop::collection::vec((any::<bool>(), 1i64..20, 1u32..500, 0u8..4), 1..12)
    ) {
        let mut journal = Journal::in_memory().unwrap();
        let mut ids = Vec::new();

        for (buy, qty, price, op) in ops {
            let action = if buy { Action::Buy } else { Action::Sell };
            let id = journal.save_trade(USER, &stock("SYM", action, qty, price as f64)).unwrap();
            ids.push(id);
            match op {
                0 => { journal.close_trade(USER, ids[0], price as f64, None).unwrap(); }
                1 => { journal.delete_trade(USER, *ids.last().unwrap()).unwrap(); }
                _ => {}
            }
        }

        let expected: f64 = journal
            .list_trades(USER)
            .unwrap()
            .iter()
            .filter(|t| !t.is_closed)
            .map(|t| t.signed_quantity())
            .sum();
        let actual = journal
            .get_holding(USER, "SYM")
            .unwrap()
            .map(|h| h.quantity)
            .unwrap_or(0.0);
        prop_assert_eq!(actual, expected);

        if let Some(h) = journal.get_holding(USER, "SYM").unwrap() {
            prop_assert!(h.avg_cost.is_some());
        }
    }
}
