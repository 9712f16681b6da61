//! Stable trade ordering for deterministic processing.

use crate::domain::Trade;

/// Stable ordering key for trades.
///
/// Ordering: executed_at -> ingested_at -> id. Lot matching is
/// order-dependent, so ties must resolve identically on every run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TradeOrderingKey<'a> {
    pub executed_at: i64,
    pub ingested_at: i64,
    pub id: &'a str,
}

impl<'a> TradeOrderingKey<'a> {
    pub fn from_trade(trade: &'a Trade) -> Self {
        TradeOrderingKey {
            executed_at: trade.executed_at.as_ms(),
            ingested_at: trade.ingested_at.as_ms(),
            id: &trade.id,
        }
    }

    /// Returns true if `a` should be processed before `b`.
    pub fn should_come_before(a: &Trade, b: &Trade) -> bool {
        TradeOrderingKey::from_trade(a) < TradeOrderingKey::from_trade(b)
    }
}

/// Sort trades deterministically.
pub fn sort_trades_deterministic(trades: &mut [Trade]) {
    trades.sort_by(|a, b| TradeOrderingKey::from_trade(a).cmp(&TradeOrderingKey::from_trade(b)));
}

/// True if the slice is already in canonical order.
pub fn is_canonically_ordered(trades: &[Trade]) -> bool {
    trades
        .windows(2)
        .all(|w| TradeOrderingKey::from_trade(&w[0]) <= TradeOrderingKey::from_trade(&w[1]))
}
