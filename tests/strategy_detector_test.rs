use std::collections::HashSet;
use tradeledger::engine::{
    build_manual_strategy, detect_strategies, match_trades, LegType, StrategyType,
};
use tradeledger::{AccountId, Action, Decimal, InstrumentType, LedgerError, StrategyError, Symbol, TimeMs, Trade};

const WINDOW: i64 = 60_000;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn option(id: &str, account: &str, symbol: &str, action: Action, qty: &str, px: &str, t: i64) -> Trade {
    Trade::new(
        id,
        AccountId::new(account),
        Symbol::new(symbol),
        InstrumentType::Option,
        action,
        d(qty),
        d(px),
        TimeMs::new(t),
    )
}

fn none_grouped() -> HashSet<String> {
    HashSet::new()
}

#[test]
fn test_bear_call_credit_spread_detected() {
    let trades = vec![
        option("1", "a", "SPY   240315C00500000", Action::SellToOpen, "2", "6.00", 1_000),
        option("2", "a", "SPY   240315C00510000", Action::BuyToOpen, "2", "2.50", 1_200),
    ];
    let found = detect_strategies(&trades, &none_grouped(), WINDOW).unwrap();

    assert_eq!(found.len(), 1);
    let s = &found[0];
    assert_eq!(s.strategy_type, StrategyType::BearCallSpread);
    assert_eq!(s.underlying, "SPY");
    assert_eq!(s.account_id.as_str(), "a");
    assert_eq!(s.opened_at, TimeMs::new(1_000));
    // (6.00 - 2.50) * 2 * 100
    assert_eq!(s.net_premium, d("700"));
    assert_eq!(s.max_profit, Some(d("700")));
    // width 10 * 2 * 100 - credit
    assert_eq!(s.max_loss, Some(d("1300")));
    assert_eq!(s.legs[0].leg_type, LegType::ShortCall);
    assert_eq!(s.legs[1].leg_type, LegType::LongCall);
    assert_eq!(s.legs[0].strike, Some(d("500")));
}

#[test]
fn test_legs_must_share_account_and_underlying() {
    let trades = vec![
        option("1", "a", "SPY   240315C00500000", Action::BuyToOpen, "1", "6", 1_000),
        option("2", "b", "SPY   240315C00510000", Action::SellToOpen, "1", "2", 1_000),
        option("3", "a", "QQQ   240315C00510000", Action::SellToOpen, "1", "2", 1_000),
    ];
    assert!(detect_strategies(&trades, &none_grouped(), WINDOW)
        .unwrap()
        .is_empty());
}

#[test]
fn test_closing_and_stock_trades_are_not_candidates() {
    let trades = vec![
        option("1", "a", "SPY   240315C00500000", Action::BuyToClose, "1", "6", 1_000),
        option("2", "a", "SPY   240315C00510000", Action::SellToClose, "1", "2", 1_000),
        Trade::new(
            "3",
            AccountId::new("a"),
            Symbol::new("SPY"),
            InstrumentType::Stock,
            Action::Buy,
            d("100"),
            d("500"),
            TimeMs::new(1_000),
        ),
    ];
    assert!(detect_strategies(&trades, &none_grouped(), WINDOW)
        .unwrap()
        .is_empty());
}

#[test]
fn test_calendar_spread() {
    let trades = vec![
        option("near", "a", "XYZ   240119C00100000", Action::SellToOpen, "1", "2", 1_000),
        option("far", "a", "XYZ   240216C00100000", Action::BuyToOpen, "1", "3.5", 1_000),
    ];
    let found = detect_strategies(&trades, &none_grouped(), WINDOW).unwrap();
    assert_eq!(found[0].strategy_type, StrategyType::CalendarSpread);
    assert_eq!(found[0].net_premium, d("-150"));
    assert_eq!(found[0].max_profit, None);
    assert_eq!(found[0].max_loss, None);
}

#[test]
fn test_realized_attribution_and_close() {
    let trades = vec![
        option("1", "a", "XYZ   240119C00100000", Action::BuyToOpen, "1", "5", 1_000),
        option("2", "a", "XYZ   240119C00110000", Action::SellToOpen, "1", "2", 1_000),
        option("3", "a", "XYZ   240119C00100000", Action::SellToClose, "1", "7", 5_000),
    ];
    let mut s = detect_strategies(&trades, &none_grouped(), WINDOW)
        .unwrap()
        .remove(0);
    let closed = match_trades(&trades).unwrap().closed_trades;

    s.attribute_realized(&closed).unwrap();
    assert_eq!(s.realized_pnl, d("200"));
    assert_eq!(s.legs[0].exit_price, Some(d("7")));
    assert_eq!(s.legs[1].exit_price, None);
    assert_eq!(s.closed_at, None);

    let mut all = trades.clone();
    all.push(option("4", "a", "XYZ   240119C00110000", Action::BuyToClose, "1", "0.5", 6_000));
    let closed = match_trades(&all).unwrap().closed_trades;
    s.attribute_realized(&closed).unwrap();
    assert_eq!(s.realized_pnl, d("350"));
    assert_eq!(s.closed_at, Some(TimeMs::new(6_000)));
}

#[test]
fn test_manual_strategy_matches_detected_economics() {
    let trades = vec![
        option("1", "a", "XYZ   240119P00100000", Action::SellToOpen, "1", "4", 1_000),
        // Outside the detection window, so only a manual grouping catches it.
        option("2", "a", "XYZ   240119P00090000", Action::BuyToOpen, "1", "1", 900_000),
    ];
    assert!(detect_strategies(&trades, &none_grouped(), WINDOW)
        .unwrap()
        .is_empty());

    let manual = build_manual_strategy(&trades, &none_grouped()).unwrap();
    assert_eq!(manual.strategy_type, StrategyType::BullPutSpread);
    assert_eq!(manual.net_premium, d("300"));
    assert_eq!(manual.max_profit, Some(d("300")));
    assert_eq!(manual.max_loss, Some(d("700")));
}

#[test]
fn test_manual_unrecognised_shape_is_manual() {
    let trades = vec![
        option("1", "a", "XYZ   240119C00100000", Action::BuyToOpen, "1", "4", 1_000),
        option("2", "a", "XYZ   240119C00110000", Action::BuyToOpen, "3", "1", 1_000),
    ];
    let manual = build_manual_strategy(&trades, &none_grouped()).unwrap();
    assert_eq!(manual.strategy_type, StrategyType::Manual);
    assert_eq!(manual.net_premium, d("-700"));
    assert_eq!(manual.max_profit, None);
    assert_eq!(manual.max_loss, None);
}

#[test]
fn test_manual_rejects_grouped_and_corporate_actions() {
    let a = option("1", "a", "XYZ   240119C00100000", Action::BuyToOpen, "1", "4", 1_000);
    let b = option("2", "a", "XYZ   240119C00110000", Action::SellToOpen, "1", "1", 1_000);
    let grouped: HashSet<String> = ["1".to_string()].into_iter().collect();
    assert!(matches!(
        build_manual_strategy(&[a.clone(), b.clone()], &grouped),
        Err(LedgerError::Strategy(StrategyError::AlreadyGrouped(_)))
    ));

    let split = option("3", "a", "XYZ   240119C00110000", Action::Split, "0", "0", 1_000);
    assert!(matches!(
        build_manual_strategy(&[a, split], &none_grouped()),
        Err(LedgerError::Strategy(StrategyError::NotALeg(_)))
    ));
}
