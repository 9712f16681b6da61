use tradeledger::config::AuditConfig;
use tradeledger::engine::{aggregate_positions, audit_user, match_trades};
use tradeledger::{AccountId, Action, Decimal, InstrumentType, PhantomPolicy, Symbol, TimeMs, Trade, UserId};

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn stock(id: &str, symbol: &str, action: Action, qty: &str, t: i64) -> Trade {
    Trade::new(
        id,
        AccountId::new("acct-1"),
        Symbol::new(symbol),
        InstrumentType::Stock,
        action,
        d(qty),
        d("25"),
        TimeMs::new(t),
    )
}

fn ledger() -> Vec<Trade> {
    vec![
        stock("1", "REAL", Action::Buy, "10", 1_000),
        stock("2", "GHOST", Action::Sell, "30", 2_000),
        stock("3", "GHOST", Action::Sell, "20", 3_000),
        stock("4", "REAL", Action::Sell, "4", 4_000),
    ]
}

#[test]
fn test_phantom_short_is_flagged() {
    let trades = ledger();
    let report = audit_user(
        &UserId::new("u1"),
        &trades,
        &[],
        TimeMs::new(10_000),
        &AuditConfig::default(),
    )
    .unwrap();

    assert_eq!(report.phantom_positions.len(), 1);
    let phantom = &report.phantom_positions[0];
    assert_eq!(phantom.symbol.as_str(), "GHOST");
    assert_eq!(phantom.net_quantity, d("-50"));
    assert_eq!(phantom.trade_count, 2);
    assert!(!report.is_clean());
}

#[test]
fn test_phantom_policy_controls_position_output() {
    let out = match_trades(&ledger()).unwrap();

    let included = aggregate_positions(&out, PhantomPolicy::Include).unwrap();
    let ghost = included
        .iter()
        .find(|p| p.symbol.as_str() == "GHOST")
        .unwrap();
    assert!(ghost.phantom);
    assert_eq!(ghost.net_quantity, d("-50"));

    let excluded = aggregate_positions(&out, PhantomPolicy::Exclude).unwrap();
    let symbols: Vec<_> = excluded.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["REAL"]);
}

#[test]
fn test_audit_never_mutates_input() {
    let trades = ledger();
    let snapshot = trades.clone();
    audit_user(
        &UserId::new("u1"),
        &trades,
        &[],
        TimeMs::new(10_000),
        &AuditConfig::default(),
    )
    .unwrap();
    assert_eq!(trades, snapshot);
}

#[test]
fn test_over_close_surfaces_as_anomaly() {
    let trades = vec![
        Trade::new(
            "o1",
            AccountId::new("acct-1"),
            Symbol::new("XYZ   240119C00100000"),
            InstrumentType::Option,
            Action::BuyToOpen,
            d("1"),
            d("2"),
            TimeMs::new(1_000),
        ),
        Trade::new(
            "o2",
            AccountId::new("acct-1"),
            Symbol::new("XYZ   240119C00100000"),
            InstrumentType::Option,
            Action::SellToClose,
            d("3"),
            d("2.5"),
            TimeMs::new(2_000),
        ),
    ];
    let report = audit_user(
        &UserId::new("u1"),
        &trades,
        &[],
        TimeMs::new(10_000),
        &AuditConfig::default(),
    )
    .unwrap();

    assert_eq!(report.match_anomalies.len(), 1);
    assert_eq!(report.match_anomalies[0].trade_id, "o2");
    assert_eq!(report.match_anomalies[0].unmatched_quantity, d("2"));
    // An opening trade exists on the key, so the residual short is not phantom.
    assert!(report.phantom_positions.is_empty());
}

#[test]
fn test_assignment_counts_as_opening_history() {
    let trades = vec![
        Trade::new(
            "assigned",
            AccountId::new("acct-1"),
            Symbol::new("XYZ"),
            InstrumentType::Stock,
            Action::Assignment,
            d("100"),
            d("50"),
            TimeMs::new(1_000),
        ),
        Trade::new(
            "sold",
            AccountId::new("acct-1"),
            Symbol::new("XYZ"),
            InstrumentType::Stock,
            Action::Sell,
            d("150"),
            d("55"),
            TimeMs::new(2_000),
        ),
    ];
    let report = audit_user(
        &UserId::new("u1"),
        &trades,
        &[],
        TimeMs::new(10_000),
        &AuditConfig::default(),
    )
    .unwrap();
    assert!(report.phantom_positions.is_empty());

    let positions = aggregate_positions(&match_trades(&trades).unwrap(), PhantomPolicy::Exclude).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].net_quantity, d("-50"));
    assert!(!positions[0].phantom);
}
