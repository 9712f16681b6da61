//! Pure computation engine(s) for deterministic ledger logic.
//!
//! Nothing in here performs I/O or keeps state between runs: every
//! function takes an ordered trade sequence (or the output of a previous
//! stage) and returns freshly derived collections.

use crate::domain::{AccountId, Action, Decimal, Side, Symbol, TimeMs};
use serde::Serialize;

pub mod audit;
pub mod lot_matcher;
pub mod positions;
pub mod strategy;
pub mod validation;

pub use audit::{audit_user, AuditReport, DuplicateImport, ExtremePositionCount, PhantomPosition, StalePosition};
pub use lot_matcher::{match_trades, LotBook, LotMatcher, MatchOutput};
pub use positions::{aggregate_positions, enrich_positions, Position};
pub use strategy::{
    build_manual_strategy, detect_strategies, Leg, LegType, Strategy, StrategyMetrics,
    StrategyType,
};
pub use validation::{validate_trades, RejectReason, Rejection};

/// Partition key for lot matching. Books with different keys never interact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookKey {
    pub account_id: AccountId,
    pub symbol: Symbol,
}

impl BookKey {
    pub fn new(account_id: AccountId, symbol: Symbol) -> Self {
        Self { account_id, symbol }
    }
}

/// A slice of an opening trade's quantity not yet matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub trade_id: String,
    pub price: Decimal,
    /// Decreases monotonically while the lot is matched.
    pub remaining: Decimal,
    pub multiplier: Decimal,
    pub opened_at: TimeMs,
}

/// Realized P&L for one lot-consumption event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub account_id: AccountId,
    pub symbol: Symbol,
    /// Side of the lot that was closed: `Buy` for a long, `Sell` for a short.
    pub lot_side: Side,
    pub pnl: Decimal,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub opened_at: TimeMs,
    pub closed_at: TimeMs,
    pub multiplier: Decimal,
    pub opening_trade_id: String,
    pub closing_trade_id: String,
}

/// A closing trade that found less opposite quantity than it closes.
///
/// The remainder is opened as a new lot instead of failing the scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAnomaly {
    pub trade_id: String,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub action: Action,
    pub unmatched_quantity: Decimal,
}

/// Realized totals for a set of closed trades, rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedSummary {
    pub total_pnl: Decimal,
    pub closed_count: usize,
    pub winners: usize,
    pub losers: usize,
}

impl RealizedSummary {
    pub fn from_closed(closed: &[ClosedTrade]) -> Result<Self, crate::error::LedgerError> {
        let mut total = Decimal::zero();
        let mut winners = 0;
        let mut losers = 0;
        for ct in closed {
            total = total
                .checked_add(ct.pnl)
                .ok_or_else(|| crate::error::LedgerError::overflow("realized total"))?;
            if ct.pnl.is_positive() {
                winners += 1;
            } else if ct.pnl.is_negative() {
                losers += 1;
            }
        }
        Ok(RealizedSummary {
            total_pnl: total.round_cents(),
            closed_count: closed.len(),
            winners,
            losers,
        })
    }
}
