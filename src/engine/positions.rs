//! Reduce residual lot books into positions, then optionally mark them to
//! market through the quote collaborator.

use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use super::{Lot, MatchOutput};
use crate::config::PhantomPolicy;
use crate::datasource::QuoteSource;
use crate::domain::{AccountId, Decimal, InstrumentType, PositionKey, Symbol, TimeMs};
use crate::error::LedgerError;

/// Net quantities within this band of zero are not treated as phantom shorts.
pub const PHANTOM_TOLERANCE: &str = "0.001";

/// A currently open position. Zero-net books produce no Position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub key: PositionKey,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub instrument_type: InstrumentType,
    /// Long positive, short negative.
    pub net_quantity: Decimal,
    pub lots: Vec<Lot>,
    /// Start of the current continuously-open period.
    pub epoch: TimeMs,
    pub oldest_lot_opened_at: TimeMs,
    pub last_activity: TimeMs,
    /// Negative position with no opening trade ever recorded for the key.
    pub phantom: bool,
    pub market_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub quote_error: bool,
}

impl Position {
    /// Unrealized P&L of the open lots at `mark`, using each lot's own
    /// multiplier.
    pub fn unrealized_at(&self, mark: Decimal) -> Result<Decimal, LedgerError> {
        let long = self.net_quantity.is_positive();
        let mut total = Decimal::zero();
        for lot in &self.lots {
            let per_unit = if long {
                mark.checked_sub(lot.price)
            } else {
                lot.price.checked_sub(mark)
            };
            let value = per_unit
                .and_then(|p| p.checked_mul(lot.remaining))
                .and_then(|p| p.checked_mul(lot.multiplier))
                .and_then(|p| total.checked_add(p))
                .ok_or_else(|| LedgerError::overflow(format!("unrealized pnl for {}", self.symbol)))?;
            total = value;
        }
        Ok(total)
    }
}

/// One Position per book with non-zero net quantity, ordered by book key.
pub fn aggregate_positions(
    output: &MatchOutput,
    phantom_policy: PhantomPolicy,
) -> Result<Vec<Position>, LedgerError> {
    let tolerance = Decimal::from_str_canonical(PHANTOM_TOLERANCE)
        .map_err(|e| LedgerError::Recompute(e.to_string()))?;

    let mut positions = Vec::new();
    for (key, book) in &output.books {
        let net = book.net_quantity()?;
        if net.is_zero() {
            continue;
        }

        let lots: Vec<Lot> = book.open_lots().iter().cloned().collect();
        let Some(oldest) = lots.first().map(|l| l.opened_at) else {
            continue;
        };
        let epoch = book.epoch.unwrap_or(oldest);

        let phantom = book.opening_trades == 0 && net.is_negative() && net.abs() > tolerance;
        if phantom && phantom_policy == PhantomPolicy::Exclude {
            warn!(account = %key.account_id, symbol = %key.symbol, net = %net, "phantom position excluded");
            continue;
        }

        positions.push(Position {
            key: PositionKey::new(key.account_id.clone(), key.symbol.clone(), epoch),
            account_id: key.account_id.clone(),
            symbol: key.symbol.clone(),
            instrument_type: book.instrument_type,
            net_quantity: net,
            lots,
            epoch,
            oldest_lot_opened_at: oldest,
            last_activity: book.last_activity.unwrap_or(oldest),
            phantom,
            market_price: None,
            unrealized_pnl: None,
            quote_error: false,
        });
    }
    Ok(positions)
}

/// Attach live prices and unrealized P&L.
///
/// A failed quote never drops a position: the unrealized fields stay `None`
/// and `quote_error` is set.
pub async fn enrich_positions(mut positions: Vec<Position>, quotes: &dyn QuoteSource) -> Vec<Position> {
    let symbols: Vec<Symbol> = positions
        .iter()
        .map(|p| p.symbol.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let results = join_all(symbols.iter().map(|s| quotes.fetch_price(s))).await;
    let prices: HashMap<&Symbol, _> = symbols.iter().zip(results).collect();

    for position in &mut positions {
        match prices.get(&position.symbol) {
            Some(Ok(price)) => match position.unrealized_at(*price) {
                Ok(unrealized) => {
                    position.market_price = Some(*price);
                    position.unrealized_pnl = Some(unrealized);
                }
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "unrealized pnl not computable");
                    position.quote_error = true;
                }
            },
            Some(Err(e)) => {
                warn!(symbol = %position.symbol, error = %e, "quote lookup failed");
                position.quote_error = true;
            }
            None => position.quote_error = true,
        }
    }
    positions
}
