//! FIFO lot matching.
//!
//! One [`LotBook`] per (account, symbol). Each book holds two FIFO queues of
//! open lots; by construction at most one of them is non-empty. A trade
//! first closes against the opposite queue, oldest lot first, and only then
//! opens its leftover quantity on its own side.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use super::{BookKey, ClosedTrade, Lot, MatchAnomaly};
use crate::domain::{Decimal, InstrumentType, Side, TimeMs, Trade};
use crate::error::LedgerError;

/// Open-lot state for one (account, symbol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotBook {
    pub instrument_type: InstrumentType,
    pub long_lots: VecDeque<Lot>,
    pub short_lots: VecDeque<Lot>,
    /// Start of the current continuously-open period; `None` while flat.
    pub epoch: Option<TimeMs>,
    pub last_activity: Option<TimeMs>,
    /// Trades whose action establishes exposure (BUY, BUY_TO_OPEN, SELL_TO_OPEN).
    pub opening_trades: usize,
    pub trade_count: usize,
}

impl LotBook {
    pub fn new(instrument_type: InstrumentType) -> Self {
        Self {
            instrument_type,
            long_lots: VecDeque::new(),
            short_lots: VecDeque::new(),
            epoch: None,
            last_activity: None,
            opening_trades: 0,
            trade_count: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.long_lots.is_empty() && self.short_lots.is_empty()
    }

    /// Σ long remaining − Σ short remaining.
    pub fn net_quantity(&self) -> Result<Decimal, LedgerError> {
        let mut net = Decimal::zero();
        for lot in &self.long_lots {
            net = net
                .checked_add(lot.remaining)
                .ok_or_else(|| LedgerError::overflow("net quantity"))?;
        }
        for lot in &self.short_lots {
            net = net
                .checked_sub(lot.remaining)
                .ok_or_else(|| LedgerError::overflow("net quantity"))?;
        }
        Ok(net)
    }

    /// Lots on whichever side is currently open, oldest first.
    pub fn open_lots(&self) -> &VecDeque<Lot> {
        if self.long_lots.is_empty() {
            &self.short_lots
        } else {
            &self.long_lots
        }
    }

    /// Apply one trade. Closed trades and anomalies are appended to the
    /// caller's buffers.
    pub fn apply(
        &mut self,
        key: &BookKey,
        trade: &Trade,
        closed: &mut Vec<ClosedTrade>,
        anomalies: &mut Vec<MatchAnomaly>,
    ) -> Result<(), LedgerError> {
        self.trade_count += 1;
        self.last_activity = Some(trade.executed_at);
        if trade.records_opening() {
            self.opening_trades += 1;
        }

        let Some(side) = trade.side() else {
            debug!(trade_id = %trade.id, action = %trade.action, "non-matching action skipped");
            return Ok(());
        };

        let remaining = self.close_against_opposite(key, trade, side, closed)?;

        if remaining.is_positive() {
            if trade.action.is_explicit_close() {
                warn!(
                    trade_id = %trade.id,
                    account = %key.account_id,
                    symbol = %key.symbol,
                    action = %trade.action,
                    unmatched = %remaining,
                    "closing trade exceeds open quantity; opening remainder"
                );
                anomalies.push(MatchAnomaly {
                    trade_id: trade.id.clone(),
                    account_id: key.account_id.clone(),
                    symbol: key.symbol.clone(),
                    action: trade.action,
                    unmatched_quantity: remaining,
                });
            }
            self.open_lot(trade, side, remaining);
        } else if self.is_flat() {
            self.epoch = None;
        }

        Ok(())
    }

    fn close_against_opposite(
        &mut self,
        key: &BookKey,
        trade: &Trade,
        side: Side,
        closed: &mut Vec<ClosedTrade>,
    ) -> Result<Decimal, LedgerError> {
        let mut remaining = trade.abs_quantity();
        let exit_price = trade.closing_price();
        let opposite = match side {
            Side::Buy => &mut self.short_lots,
            Side::Sell => &mut self.long_lots,
        };

        while remaining.is_positive() {
            let Some(lot) = opposite.front_mut() else {
                break;
            };

            let match_qty = remaining.min(lot.remaining);
            let per_unit = match side {
                // Covering a short: profit when bought back cheaper.
                Side::Buy => lot.price.checked_sub(exit_price),
                // Closing a long.
                Side::Sell => exit_price.checked_sub(lot.price),
            };
            let pnl = per_unit
                .and_then(|p| p.checked_mul(match_qty))
                .and_then(|p| p.checked_mul(lot.multiplier))
                .ok_or_else(|| LedgerError::overflow(format!("pnl for {}", key.symbol)))?;

            closed.push(ClosedTrade {
                account_id: key.account_id.clone(),
                symbol: key.symbol.clone(),
                lot_side: side.opposite(),
                pnl,
                quantity: match_qty,
                entry_price: lot.price,
                exit_price,
                opened_at: lot.opened_at,
                closed_at: trade.executed_at,
                multiplier: lot.multiplier,
                opening_trade_id: lot.trade_id.clone(),
                closing_trade_id: trade.id.clone(),
            });

            lot.remaining = lot
                .remaining
                .checked_sub(match_qty)
                .ok_or_else(|| LedgerError::overflow("lot remaining"))?;
            remaining = remaining
                .checked_sub(match_qty)
                .ok_or_else(|| LedgerError::overflow("trade remaining"))?;

            if lot.remaining.is_zero() {
                opposite.pop_front();
            }
        }

        Ok(remaining)
    }

    fn open_lot(&mut self, trade: &Trade, side: Side, quantity: Decimal) {
        if self.is_flat() {
            self.epoch = Some(trade.executed_at);
        }
        let lot = Lot {
            trade_id: trade.id.clone(),
            price: trade.closing_price(),
            remaining: quantity,
            multiplier: trade.multiplier,
            opened_at: trade.executed_at,
        };
        match side {
            Side::Buy => self.long_lots.push_back(lot),
            Side::Sell => self.short_lots.push_back(lot),
        }
    }
}

/// Result of matching a whole scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchOutput {
    /// Residual books, including flat ones (the auditor needs their history).
    pub books: BTreeMap<BookKey, LotBook>,
    /// Ordered by close time, then book key, then emission order.
    pub closed_trades: Vec<ClosedTrade>,
    pub anomalies: Vec<MatchAnomaly>,
}

/// Routes trades to their per-(account, symbol) book.
pub struct LotMatcher {
    books: BTreeMap<BookKey, LotBook>,
    closed_trades: Vec<ClosedTrade>,
    anomalies: Vec<MatchAnomaly>,
}

impl LotMatcher {
    pub fn new() -> Self {
        Self {
            books: BTreeMap::new(),
            closed_trades: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Process a single trade. Callers must feed trades in canonical order.
    pub fn process_trade(&mut self, trade: &Trade) -> Result<(), LedgerError> {
        let key = BookKey::new(trade.account_id.clone(), trade.symbol.clone());
        let book = self
            .books
            .entry(key.clone())
            .or_insert_with(|| LotBook::new(trade.instrument_type));
        book.apply(&key, trade, &mut self.closed_trades, &mut self.anomalies)
    }

    pub fn into_output(mut self) -> MatchOutput {
        // Stable sort keeps per-book emission order for equal close times.
        self.closed_trades.sort_by(|a, b| {
            a.closed_at
                .cmp(&b.closed_at)
                .then_with(|| a.account_id.cmp(&b.account_id))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        MatchOutput {
            books: self.books,
            closed_trades: self.closed_trades,
            anomalies: self.anomalies,
        }
    }
}

impl Default for LotMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Run FIFO matching over an ordered trade sequence.
///
/// Books are independent, so trades are partitioned per key first and each
/// partition is matched on its own before the outputs are merged.
pub fn match_trades(trades: &[Trade]) -> Result<MatchOutput, LedgerError> {
    let mut partitions: BTreeMap<BookKey, Vec<&Trade>> = BTreeMap::new();
    for trade in trades {
        partitions
            .entry(BookKey::new(trade.account_id.clone(), trade.symbol.clone()))
            .or_default()
            .push(trade);
    }

    let mut matcher = LotMatcher::new();
    for (key, partition) in partitions {
        debug!(account = %key.account_id, symbol = %key.symbol, trades = partition.len(), "matching partition");
        for trade in partition {
            matcher.process_trade(trade)?;
        }
    }
    Ok(matcher.into_output())
}
