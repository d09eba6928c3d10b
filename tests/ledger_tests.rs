// tests/ledger_tests.rs
//
// Trade engine behavior: PnL bookkeeping, protective triggers, ownership
// checks and on-the-fly enrollment, all through the public service facade.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use trade_arena::config::EngineConfig;
use trade_arena::errors::EngineError;
use trade_arena::market::{MarketService, OrderOutcome};
use trade_arena::types::{ClosedBy, OrderKind, TradeStatus};

fn test_market() -> Arc<MarketService> {
    let config = EngineConfig {
        closing_grace: Duration::from_millis(200),
        logs_dir: "target/test_logs".to_string(),
        ..EngineConfig::default()
    };
    MarketService::new(config)
}

fn open_room(market: &Arc<MarketService>) -> String {
    let summary = market
        .create_room(
            "Test Cup".to_string(),
            10.0,
            None,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            "00:00".to_string(),
            "23:59".to_string(),
            None,
        )
        .unwrap();
    market.scheduler.reconcile_minutes(720);
    summary.id
}

fn set_price(market: &Arc<MarketService>, price: f64) {
    market.generator.lock().last_price = price;
}

fn capital_of(market: &Arc<MarketService>, room_id: &str, user_id: &str) -> f64 {
    let room = market.room_detail(room_id).unwrap();
    room.participant(user_id).unwrap().current_capital
}

#[tokio::test]
async fn long_close_books_profit() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Long, 2.0)
        .unwrap();
    assert_eq!(trade.entry_price, 100.0);

    set_price(&market, 110.0);
    let (closed, capital) = market.close_trade(&trade.id, "u1").unwrap();

    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(closed.profit, Some(20.0));
    assert_eq!(closed.closed_by, Some(ClosedBy::User));
    assert_eq!(capital, 100_020.0);
    assert_eq!(capital_of(&market, &room_id, "u1"), 100_020.0);
}

#[tokio::test]
async fn short_close_mirrors_long() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Short, 2.0)
        .unwrap();

    set_price(&market, 90.0);
    let (closed, capital) = market.close_trade(&trade.id, "u1").unwrap();
    assert_eq!(closed.profit, Some(20.0));
    assert_eq!(capital, 100_020.0);
}

#[tokio::test]
async fn close_is_guarded_by_ownership_and_status() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Long, 1.0)
        .unwrap();

    assert!(matches!(
        market.close_trade(&trade.id, "intruder"),
        Err(EngineError::Forbidden)
    ));
    assert!(matches!(
        market.close_trade("missing-trade", "u1"),
        Err(EngineError::TradeNotFound)
    ));

    market.close_trade(&trade.id, "u1").unwrap();
    assert!(matches!(
        market.close_trade(&trade.id, "u1"),
        Err(EngineError::AlreadyClosed)
    ));
}

#[tokio::test]
async fn orders_require_an_active_room() {
    let market = test_market();
    // Room stays PENDING: window in the future relative to the reconcile pass.
    let summary = market
        .create_room(
            "Evening Cup".to_string(),
            10.0,
            None,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            "20:00".to_string(),
            "22:00".to_string(),
            None,
        )
        .unwrap();
    market.scheduler.reconcile_minutes(600);

    let result = market.place_order("u1", "alice", &summary.id, OrderKind::Long, 1.0);
    assert!(matches!(result, Err(EngineError::RoomNotActive)));

    let result = market.place_order("u1", "alice", "no-such-room", OrderKind::Long, 1.0);
    assert!(matches!(result, Err(EngineError::RoomNotFound)));
}

#[tokio::test]
async fn placing_an_order_enrolls_unknown_users() {
    let market = test_market();
    let room_id = open_room(&market);

    assert!(market.room_detail(&room_id).unwrap().participant("u9").is_none());

    set_price(&market, 100.0);
    market
        .place_order("u9", "newcomer", &room_id, OrderKind::Long, 1.0)
        .unwrap();

    let room = market.room_detail(&room_id).unwrap();
    let participant = room.participant("u9").unwrap();
    assert_eq!(participant.initial_capital, 100_000.0);
    assert_eq!(participant.current_capital, 100_000.0);
    assert_eq!(participant.username, "newcomer");
    assert_eq!(participant.open_positions.len(), 1);
}

#[tokio::test]
async fn stop_loss_trigger_closes_long() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Long, 1.0)
        .unwrap();
    market.set_stop_loss(&trade.id, "u1", 95.0).unwrap();

    // Above the stop: nothing happens.
    assert!(market.ledger.evaluate_triggers(96.0).is_empty());
    assert_eq!(market.trades.get(&trade.id).unwrap().status, TradeStatus::Open);

    // At the stop: closed with STOP_LOSS.
    let closed = market.ledger.evaluate_triggers(95.0);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].closed_by, Some(ClosedBy::StopLoss));
    assert_eq!(closed[0].profit, Some(-5.0));
    assert_eq!(capital_of(&market, &room_id, "u1"), 99_995.0);

    // Mirrored position is gone from the open list.
    let room = market.room_detail(&room_id).unwrap();
    assert!(room.participant("u1").unwrap().open_positions.is_empty());

    // A second pass at the same price finds nothing to do.
    assert!(market.ledger.evaluate_triggers(95.0).is_empty());
}

#[tokio::test]
async fn take_profit_only_fires_at_its_level() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Long, 1.0)
        .unwrap();
    market.set_take_profit(&trade.id, "u1", 110.0).unwrap();

    for price in [101.0, 105.0, 109.0] {
        assert!(market.ledger.evaluate_triggers(price).is_empty());
    }

    let closed = market.ledger.evaluate_triggers(110.0);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].closed_by, Some(ClosedBy::TakeProfit));
    assert_eq!(closed[0].profit, Some(10.0));
}

#[tokio::test]
async fn short_triggers_are_mirrored() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Short, 1.0)
        .unwrap();
    market.set_stop_loss(&trade.id, "u1", 105.0).unwrap();

    assert!(market.ledger.evaluate_triggers(104.0).is_empty());
    let closed = market.ledger.evaluate_triggers(105.0);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].closed_by, Some(ClosedBy::StopLoss));
}

#[tokio::test]
async fn protective_levels_update_trade_and_position_together() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Long, 1.0)
        .unwrap();

    market.set_stop_loss(&trade.id, "u1", 95.0).unwrap();
    market.set_take_profit(&trade.id, "u1", 112.0).unwrap();

    let stored = market.trades.get(&trade.id).unwrap();
    assert_eq!(stored.stop_loss, Some(95.0));
    assert_eq!(stored.take_profit, Some(112.0));

    let room = market.room_detail(&room_id).unwrap();
    let position = &room.participant("u1").unwrap().open_positions[0];
    assert_eq!(position.stop_loss, Some(95.0));
    assert_eq!(position.take_profit, Some(112.0));

    assert!(matches!(
        market.set_stop_loss(&trade.id, "intruder", 90.0),
        Err(EngineError::Forbidden)
    ));
    assert!(matches!(
        market.set_stop_loss(&trade.id, "u1", -5.0),
        Err(EngineError::Validation(_))
    ));

    market.close_trade(&trade.id, "u1").unwrap();
    assert!(matches!(
        market.set_stop_loss(&trade.id, "u1", 90.0),
        Err(EngineError::AlreadyClosed)
    ));
}

#[tokio::test]
async fn close_order_flattens_the_whole_book() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    market
        .place_order("u1", "alice", &room_id, OrderKind::Long, 2.0)
        .unwrap();
    market
        .place_order("u1", "alice", &room_id, OrderKind::Short, 1.0)
        .unwrap();

    set_price(&market, 110.0);
    let outcome = market
        .place_order("u1", "alice", &room_id, OrderKind::Close, 1.0)
        .unwrap();

    // Long made +20, short lost -10.
    match outcome {
        OrderOutcome::Flattened(summary) => {
            assert_eq!(summary.closed, 2);
            assert_eq!(summary.profit, 10.0);
            assert_eq!(summary.current_capital, 100_010.0);
        }
        OrderOutcome::Opened(_) => panic!("CLOSE order must return a summary"),
    }

    let room = market.room_detail(&room_id).unwrap();
    assert!(room.participant("u1").unwrap().open_positions.is_empty());
    assert!(market.trades.open_trades_for_user("u1", &room_id).is_empty());

    // Nothing left: a repeat CLOSE is a harmless no-op.
    let outcome = market
        .place_order("u1", "alice", &room_id, OrderKind::Close, 1.0)
        .unwrap();
    match outcome {
        OrderOutcome::Flattened(summary) => assert_eq!(summary.closed, 0),
        OrderOutcome::Opened(_) => panic!("CLOSE order must return a summary"),
    }
}

#[tokio::test]
async fn mark_to_market_values_open_trades() {
    let market = test_market();
    let room_id = open_room(&market);

    set_price(&market, 100.0);
    let trade = market
        .ledger
        .open_position("u1", "alice", &room_id, trade_arena::types::TradeSide::Long, 3.0)
        .unwrap();

    assert_eq!(trade.unrealized_pnl(104.0), 12.0);
    assert_eq!(trade.unrealized_pnl(97.0), -9.0);

    set_price(&market, 104.0);
    let (closed, _) = market.close_trade(&trade.id, "u1").unwrap();
    // Realized profit wins over any later price.
    assert_eq!(closed.unrealized_pnl(50.0), 12.0);
}
