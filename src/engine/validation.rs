//! Per-trade sanity checks (the input-rejected error class).
//!
//! A rejected trade is excluded from matching with a logged reason. It
//! never fails the scope.

use serde::Serialize;
use tracing::warn;

use crate::config::ValidationConfig;
use crate::domain::{Action, TimeMs, Trade};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum RejectReason {
    FutureDated { executed_at: i64 },
    TooOld { executed_at: i64 },
    NonPositivePrice,
    ZeroQuantity,
    NonPositiveMultiplier,
    UnknownAction(String),
    UnknownInstrument(String),
    Malformed(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::FutureDated { executed_at } => {
                write!(f, "executed_at {} is in the future", executed_at)
            }
            RejectReason::TooOld { executed_at } => {
                write!(f, "executed_at {} is implausibly old", executed_at)
            }
            RejectReason::NonPositivePrice => write!(f, "non-positive price"),
            RejectReason::ZeroQuantity => write!(f, "zero quantity"),
            RejectReason::NonPositiveMultiplier => write!(f, "non-positive multiplier"),
            RejectReason::UnknownAction(a) => write!(f, "unrecognized action {}", a),
            RejectReason::UnknownInstrument(i) => write!(f, "unrecognized instrument {}", i),
            RejectReason::Malformed(m) => write!(f, "malformed record: {}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub trade_id: String,
    pub reason: RejectReason,
}

impl Rejection {
    pub fn new(trade_id: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            trade_id: trade_id.into(),
            reason,
        }
    }
}

/// Check a single trade against the sanity rules.
pub fn check_trade(trade: &Trade, now: TimeMs, config: &ValidationConfig) -> Option<RejectReason> {
    let executed_at = trade.executed_at.as_ms();
    if trade.executed_at > now.saturating_add_ms(config.future_tolerance_ms) {
        return Some(RejectReason::FutureDated { executed_at });
    }
    if trade.executed_at < now.saturating_sub_ms(config.max_trade_age_ms) {
        return Some(RejectReason::TooOld { executed_at });
    }
    // Expirations close at zero; corporate actions carry no execution price.
    let price_exempt = matches!(trade.action, Action::OptionExpiration) || trade.action.is_corporate_action();
    if !price_exempt && !trade.price.is_positive() {
        return Some(RejectReason::NonPositivePrice);
    }
    if price_exempt && trade.price.is_negative() {
        return Some(RejectReason::NonPositivePrice);
    }
    if !trade.action.is_corporate_action() && trade.quantity.is_zero() {
        return Some(RejectReason::ZeroQuantity);
    }
    if !trade.multiplier.is_positive() {
        return Some(RejectReason::NonPositiveMultiplier);
    }
    None
}

/// Split a loaded trade sequence into accepted trades (order preserved) and
/// rejections.
pub fn validate_trades(
    trades: Vec<Trade>,
    now: TimeMs,
    config: &ValidationConfig,
) -> (Vec<Trade>, Vec<Rejection>) {
    let mut accepted = Vec::with_capacity(trades.len());
    let mut rejected = Vec::new();

    for trade in trades {
        match check_trade(&trade, now, config) {
            None => accepted.push(trade),
            Some(reason) => {
                warn!(trade_id = %trade.id, account = %trade.account_id, symbol = %trade.symbol, %reason, "trade rejected");
                rejected.push(Rejection::new(trade.id, reason));
            }
        }
    }

    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, Decimal, InstrumentType, Symbol};

    const NOW: i64 = 1_700_000_000_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn trade(action: Action, qty: &str, px: &str, t: i64) -> Trade {
        Trade::new(
            "t",
            AccountId::new("acct"),
            Symbol::new("XYZ"),
            InstrumentType::Stock,
            action,
            d(qty),
            d(px),
            TimeMs::new(t),
        )
    }

    fn check(t: &Trade) -> Option<RejectReason> {
        check_trade(t, TimeMs::new(NOW), &ValidationConfig::default())
    }

    #[test]
    fn test_accepts_ordinary_trade() {
        assert_eq!(check(&trade(Action::Buy, "1", "10", NOW)), None);
    }

    #[test]
    fn test_future_dated_beyond_tolerance() {
        let tolerance = ValidationConfig::default().future_tolerance_ms;
        assert_eq!(check(&trade(Action::Buy, "1", "10", NOW + tolerance)), None);
        assert!(matches!(
            check(&trade(Action::Buy, "1", "10", NOW + tolerance + 1)),
            Some(RejectReason::FutureDated { .. })
        ));
    }

    #[test]
    fn test_absurdly_old() {
        let config = ValidationConfig {
            future_tolerance_ms: 0,
            max_trade_age_ms: 1_000,
        };
        let old = trade(Action::Buy, "1", "10", NOW - 1_001);
        assert!(matches!(
            check_trade(&old, TimeMs::new(NOW), &config),
            Some(RejectReason::TooOld { .. })
        ));
    }

    #[test]
    fn test_price_rules() {
        assert_eq!(
            check(&trade(Action::Sell, "1", "0", NOW)),
            Some(RejectReason::NonPositivePrice)
        );
        assert_eq!(check(&trade(Action::OptionExpiration, "-1", "0", NOW)), None);
        assert_eq!(
            check(&trade(Action::OptionExpiration, "-1", "-1", NOW)),
            Some(RejectReason::NonPositivePrice)
        );
    }

    #[test]
    fn test_zero_quantity_only_allowed_for_corporate_actions() {
        assert_eq!(
            check(&trade(Action::Buy, "0", "10", NOW)),
            Some(RejectReason::ZeroQuantity)
        );
        assert_eq!(check(&trade(Action::Split, "0", "0", NOW)), None);
    }

    #[test]
    fn test_validate_preserves_order() {
        let mut a = trade(Action::Buy, "1", "10", NOW);
        a.id = "a".into();
        let mut bad = trade(Action::Buy, "0", "10", NOW);
        bad.id = "bad".into();
        let mut b = trade(Action::Sell, "1", "11", NOW);
        b.id = "b".into();

        let (ok, rejected) =
            validate_trades(vec![a, bad, b], TimeMs::new(NOW), &ValidationConfig::default());
        let ids: Vec<_> = ok.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(rejected, vec![Rejection::new("bad", RejectReason::ZeroQuantity)]);
    }
}
