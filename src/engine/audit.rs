//! Read-only data-quality audit.
//!
//! Runs the same matching primitive as the recompute path and reports
//! what looks wrong. Nothing here writes anywhere.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use super::positions::PHANTOM_TOLERANCE;
use super::{match_trades, MatchAnomaly, Rejection};
use crate::config::AuditConfig;
use crate::domain::{AccountId, Decimal, Symbol, TimeMs, Trade, UserId};
use crate::error::LedgerError;

/// Sell/close activity with no opening history, net short beyond tolerance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhantomPosition {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub net_quantity: Decimal,
    pub trade_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalePosition {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub net_quantity: Decimal,
    pub epoch: TimeMs,
    pub last_activity: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtremePositionCount {
    pub open_symbols: usize,
    pub threshold: usize,
}

/// Distinct trade ids carrying identical economic content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateImport {
    pub fingerprint: String,
    pub trade_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub user_id: UserId,
    pub generated_at: TimeMs,
    pub trades_examined: usize,
    pub rejected_trades: usize,
    pub phantom_positions: Vec<PhantomPosition>,
    pub stale_positions: Vec<StalePosition>,
    pub extreme_position_count: Option<ExtremePositionCount>,
    pub duplicate_imports: Vec<DuplicateImport>,
    pub match_anomalies: Vec<MatchAnomaly>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.rejected_trades == 0
            && self.phantom_positions.is_empty()
            && self.stale_positions.is_empty()
            && self.extreme_position_count.is_none()
            && self.duplicate_imports.is_empty()
            && self.match_anomalies.is_empty()
    }
}

/// Audit one user's accepted trades (canonical order) plus the rejections
/// produced while loading and validating them.
pub fn audit_user(
    user_id: &UserId,
    trades: &[Trade],
    rejections: &[Rejection],
    now: TimeMs,
    config: &AuditConfig,
) -> Result<AuditReport, LedgerError> {
    let tolerance = Decimal::from_str_canonical(PHANTOM_TOLERANCE)
        .map_err(|e| LedgerError::Recompute(e.to_string()))?;
    let stale_cutoff = now.saturating_sub_ms(config.stale_after_ms);

    let output = match_trades(trades)?;

    let mut phantom_positions = Vec::new();
    let mut stale_positions = Vec::new();
    let mut open_symbols = BTreeSet::new();

    for (key, book) in &output.books {
        let net = book.net_quantity()?;
        if net.is_zero() {
            continue;
        }
        open_symbols.insert(&key.symbol);

        if book.opening_trades == 0 && net.is_negative() && net.abs() > tolerance {
            phantom_positions.push(PhantomPosition {
                account_id: key.account_id.clone(),
                symbol: key.symbol.clone(),
                net_quantity: net,
                trade_count: book.trade_count,
            });
        }

        if let (Some(epoch), Some(last_activity)) = (book.epoch, book.last_activity) {
            if epoch < stale_cutoff && last_activity < stale_cutoff {
                stale_positions.push(StalePosition {
                    account_id: key.account_id.clone(),
                    symbol: key.symbol.clone(),
                    net_quantity: net,
                    epoch,
                    last_activity,
                });
            }
        }
    }

    let extreme_position_count = (open_symbols.len() > config.extreme_position_count).then(|| {
        ExtremePositionCount {
            open_symbols: open_symbols.len(),
            threshold: config.extreme_position_count,
        }
    });

    let mut by_fingerprint: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for trade in trades {
        by_fingerprint
            .entry(trade.fingerprint())
            .or_default()
            .push(trade.id.clone());
    }
    let duplicate_imports: Vec<DuplicateImport> = by_fingerprint
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(fingerprint, trade_ids)| DuplicateImport {
            fingerprint,
            trade_ids,
        })
        .collect();

    let report = AuditReport {
        user_id: user_id.clone(),
        generated_at: now,
        trades_examined: trades.len(),
        rejected_trades: rejections.len(),
        phantom_positions,
        stale_positions,
        extreme_position_count,
        duplicate_imports,
        match_anomalies: output.anomalies,
    };

    if report.is_clean() {
        info!(user = %user_id, trades = report.trades_examined, "audit clean");
    } else {
        warn!(
            user = %user_id,
            phantoms = report.phantom_positions.len(),
            stale = report.stale_positions.len(),
            duplicates = report.duplicate_imports.len(),
            anomalies = report.match_anomalies.len(),
            rejected = report.rejected_trades,
            extreme = report.extreme_position_count.is_some(),
            "audit found data-quality issues"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, InstrumentType};
    use crate::engine::RejectReason;

    const DAY: i64 = 86_400_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn stock(id: &str, symbol: &str, action: Action, qty: &str, t: i64) -> Trade {
        Trade::new(
            id,
            AccountId::new("acct"),
            Symbol::new(symbol),
            InstrumentType::Stock,
            action,
            d(qty),
            d("10"),
            TimeMs::new(t),
        )
    }

    fn user() -> UserId {
        UserId::new("u1")
    }

    #[test]
    fn test_clean_ledger() {
        let trades = vec![
            stock("1", "XYZ", Action::Buy, "10", 1_000),
            stock("2", "XYZ", Action::Sell, "10", 2_000),
        ];
        let report =
            audit_user(&user(), &trades, &[], TimeMs::new(3_000), &AuditConfig::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.trades_examined, 2);
    }

    #[test]
    fn test_phantom_within_tolerance_is_ignored() {
        let trades = vec![stock("1", "DUST", Action::Sell, "0.0005", 1_000)];
        let report =
            audit_user(&user(), &trades, &[], TimeMs::new(2_000), &AuditConfig::default()).unwrap();
        assert!(report.phantom_positions.is_empty());
    }

    #[test]
    fn test_stale_position() {
        let now = 1_000 * DAY;
        let config = AuditConfig {
            stale_after_ms: 30 * DAY,
            extreme_position_count: 500,
        };
        let trades = vec![
            stock("1", "OLD", Action::Buy, "1", now - 100 * DAY),
            stock("2", "NEW", Action::Buy, "1", now - DAY),
            // Topped up recently, so not stale even though the epoch is old.
            stock("3", "ACTIVE", Action::Buy, "1", now - 100 * DAY),
            stock("4", "ACTIVE", Action::Buy, "1", now - 2 * DAY),
        ];
        let report = audit_user(&user(), &trades, &[], TimeMs::new(now), &config).unwrap();
        let stale: Vec<_> = report.stale_positions.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(stale, vec!["OLD"]);
    }

    #[test]
    fn test_extreme_position_count() {
        let config = AuditConfig {
            stale_after_ms: 365 * DAY,
            extreme_position_count: 2,
        };
        let trades: Vec<Trade> = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, s)| stock(&i.to_string(), s, Action::Buy, "1", 1_000))
            .collect();
        let report = audit_user(&user(), &trades, &[], TimeMs::new(2_000), &config).unwrap();
        assert_eq!(
            report.extreme_position_count,
            Some(ExtremePositionCount {
                open_symbols: 3,
                threshold: 2
            })
        );
    }

    #[test]
    fn test_duplicate_imports_and_rejections_are_reported() {
        let trades = vec![
            stock("a", "XYZ", Action::Buy, "5", 1_000),
            stock("b", "XYZ", Action::Buy, "5", 1_000),
        ];
        let rejections = vec![Rejection::new("c", RejectReason::ZeroQuantity)];
        let report = audit_user(
            &user(),
            &trades,
            &rejections,
            TimeMs::new(2_000),
            &AuditConfig::default(),
        )
        .unwrap();
        assert_eq!(report.duplicate_imports.len(), 1);
        assert_eq!(report.duplicate_imports[0].trade_ids, vec!["a", "b"]);
        assert_eq!(report.rejected_trades, 1);
        assert!(!report.is_clean());
    }
}
