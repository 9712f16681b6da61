//! Multi-leg strategy detection and strategy economics.
//!
//! Legs are grouped by account, underlying and an "opened together" time
//! window. The leg shape is classified into a closed set of
//! [`StrategyType`]s; max profit/loss is a finite table over that set.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::ClosedTrade;
use crate::domain::{
    underlying_of, AccountId, Decimal, InstrumentType, OccSymbol, OptionType, Side, TimeMs, Trade,
};
use crate::error::{LedgerError, StrategyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    BullCallSpread,
    BearCallSpread,
    BullPutSpread,
    BearPutSpread,
    LongStraddle,
    ShortStraddle,
    LongStrangle,
    ShortStrangle,
    CalendarSpread,
    IronCondor,
    /// User-assembled group whose shape matches no known pattern.
    Manual,
}

impl StrategyType {
    pub const ALL: [StrategyType; 11] = [
        StrategyType::BullCallSpread,
        StrategyType::BearCallSpread,
        StrategyType::BullPutSpread,
        StrategyType::BearPutSpread,
        StrategyType::LongStraddle,
        StrategyType::ShortStraddle,
        StrategyType::LongStrangle,
        StrategyType::ShortStrangle,
        StrategyType::CalendarSpread,
        StrategyType::IronCondor,
        StrategyType::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::BullCallSpread => "BULL_CALL_SPREAD",
            StrategyType::BearCallSpread => "BEAR_CALL_SPREAD",
            StrategyType::BullPutSpread => "BULL_PUT_SPREAD",
            StrategyType::BearPutSpread => "BEAR_PUT_SPREAD",
            StrategyType::LongStraddle => "LONG_STRADDLE",
            StrategyType::ShortStraddle => "SHORT_STRADDLE",
            StrategyType::LongStrangle => "LONG_STRANGLE",
            StrategyType::ShortStrangle => "SHORT_STRANGLE",
            StrategyType::CalendarSpread => "CALENDAR_SPREAD",
            StrategyType::IronCondor => "IRON_CONDOR",
            StrategyType::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        StrategyType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegType {
    LongCall,
    ShortCall,
    LongPut,
    ShortPut,
    LongStock,
    ShortStock,
}

impl LegType {
    fn from_parts(option_type: Option<OptionType>, side: Side) -> Self {
        match (option_type, side) {
            (Some(OptionType::Call), Side::Buy) => LegType::LongCall,
            (Some(OptionType::Call), Side::Sell) => LegType::ShortCall,
            (Some(OptionType::Put), Side::Buy) => LegType::LongPut,
            (Some(OptionType::Put), Side::Sell) => LegType::ShortPut,
            (None, Side::Buy) => LegType::LongStock,
            (None, Side::Sell) => LegType::ShortStock,
        }
    }

    pub fn side(&self) -> Side {
        match self {
            LegType::LongCall | LegType::LongPut | LegType::LongStock => Side::Buy,
            LegType::ShortCall | LegType::ShortPut | LegType::ShortStock => Side::Sell,
        }
    }

    pub fn option_type(&self) -> Option<OptionType> {
        match self {
            LegType::LongCall | LegType::ShortCall => Some(OptionType::Call),
            LegType::LongPut | LegType::ShortPut => Some(OptionType::Put),
            LegType::LongStock | LegType::ShortStock => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub trade_id: String,
    pub leg_type: LegType,
    pub strike: Option<Decimal>,
    pub expiration: Option<NaiveDate>,
    /// Absolute quantity.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub multiplier: Decimal,
    pub opened_at: TimeMs,
    /// Set once the leg's full quantity has been closed.
    pub exit_price: Option<Decimal>,
}

impl Leg {
    pub fn from_trade(trade: &Trade) -> Result<Self, StrategyError> {
        let not_a_leg = || StrategyError::NotALeg(trade.id.clone());
        let side = trade.side().ok_or_else(not_a_leg)?;
        let occ = match trade.instrument_type {
            InstrumentType::Option => {
                Some(OccSymbol::parse(trade.symbol.as_str()).ok_or_else(not_a_leg)?)
            }
            InstrumentType::Stock => None,
        };

        Ok(Leg {
            trade_id: trade.id.clone(),
            leg_type: LegType::from_parts(occ.as_ref().map(|o| o.option_type), side),
            strike: occ.as_ref().map(|o| o.strike),
            expiration: occ.as_ref().map(|o| o.expiration),
            quantity: trade.abs_quantity(),
            entry_price: trade.price,
            multiplier: trade.multiplier,
            opened_at: trade.executed_at,
            exit_price: None,
        })
    }
}

/// Premium and risk bounds for a group of legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMetrics {
    /// Credit positive, debit negative.
    pub net_premium: Decimal,
    pub max_profit: Option<Decimal>,
    pub max_loss: Option<Decimal>,
}

impl StrategyMetrics {
    pub fn compute(strategy_type: StrategyType, legs: &[Leg]) -> Result<Self, LedgerError> {
        let overflow = || LedgerError::overflow("strategy premium");

        let mut net_premium = Decimal::zero();
        for leg in legs {
            let cash = leg
                .entry_price
                .checked_mul(leg.quantity)
                .and_then(|c| c.checked_mul(leg.multiplier))
                .ok_or_else(overflow)?;
            net_premium = match leg.leg_type.side() {
                Side::Buy => net_premium.checked_sub(cash),
                Side::Sell => net_premium.checked_add(cash),
            }
            .ok_or_else(overflow)?;
        }

        let (max_profit, max_loss) = match strategy_type {
            // Debit verticals.
            StrategyType::BullCallSpread | StrategyType::BearPutSpread => {
                let width = spread_width(legs)?;
                (
                    Some(width.checked_add(net_premium).ok_or_else(overflow)?),
                    Some(-net_premium),
                )
            }
            // Credit verticals.
            StrategyType::BearCallSpread | StrategyType::BullPutSpread => {
                let width = spread_width(legs)?;
                (
                    Some(net_premium),
                    Some(width.checked_sub(net_premium).ok_or_else(overflow)?),
                )
            }
            StrategyType::LongStraddle | StrategyType::LongStrangle => (None, Some(-net_premium)),
            StrategyType::ShortStraddle | StrategyType::ShortStrangle => (Some(net_premium), None),
            StrategyType::IronCondor => {
                let (puts, calls): (Vec<Leg>, Vec<Leg>) = legs
                    .iter()
                    .cloned()
                    .partition(|l| l.leg_type.option_type() == Some(OptionType::Put));
                let wing = spread_width(&puts)?.max(spread_width(&calls)?);
                (
                    Some(net_premium),
                    Some(wing.checked_sub(net_premium).ok_or_else(overflow)?),
                )
            }
            StrategyType::CalendarSpread | StrategyType::Manual => (None, None),
        };

        Ok(StrategyMetrics {
            net_premium,
            max_profit,
            max_loss,
        })
    }
}

/// Strike distance × quantity × multiplier for a two-leg vertical.
fn spread_width(legs: &[Leg]) -> Result<Decimal, LedgerError> {
    let strikes: Vec<Decimal> = legs.iter().filter_map(|l| l.strike).collect();
    let (Some(first), Some(last)) = (strikes.first(), strikes.last()) else {
        return Ok(Decimal::zero());
    };
    let qty = legs.iter().map(|l| l.quantity).min().unwrap_or_else(Decimal::zero);
    let multiplier = legs.first().map(|l| l.multiplier).unwrap_or_else(Decimal::one);
    first
        .checked_sub(*last)
        .map(|w| w.abs())
        .and_then(|w| w.checked_mul(qty))
        .and_then(|w| w.checked_mul(multiplier))
        .ok_or_else(|| LedgerError::overflow("spread width"))
}

/// Classify a leg shape. Anything unrecognised is [`StrategyType::Manual`].
pub fn classify_legs(legs: &[Leg]) -> StrategyType {
    if legs.iter().any(|l| l.leg_type.option_type().is_none()) {
        return StrategyType::Manual;
    }
    let same_qty = legs.windows(2).all(|w| w[0].quantity == w[1].quantity);
    if !same_qty {
        return StrategyType::Manual;
    }

    match legs {
        [a, b] => classify_pair(a, b),
        [_, _, _, _] => classify_condor(legs),
        _ => StrategyType::Manual,
    }
}

fn classify_pair(a: &Leg, b: &Leg) -> StrategyType {
    let same_type = a.leg_type.option_type() == b.leg_type.option_type();
    let same_side = a.leg_type.side() == b.leg_type.side();
    let same_exp = a.expiration == b.expiration;
    let same_strike = a.strike == b.strike;

    if same_type && !same_side && same_exp && !same_strike {
        let (low, high) = if a.strike < b.strike { (a, b) } else { (b, a) };
        return match (low.leg_type, high.leg_type) {
            (LegType::LongCall, LegType::ShortCall) => StrategyType::BullCallSpread,
            (LegType::ShortCall, LegType::LongCall) => StrategyType::BearCallSpread,
            (LegType::ShortPut, LegType::LongPut) => StrategyType::BearPutSpread,
            (LegType::LongPut, LegType::ShortPut) => StrategyType::BullPutSpread,
            _ => StrategyType::Manual,
        };
    }
    if same_type && !same_side && !same_exp && same_strike {
        return StrategyType::CalendarSpread;
    }
    if !same_type && same_side && same_exp {
        let long = a.leg_type.side() == Side::Buy;
        return match (same_strike, long) {
            (true, true) => StrategyType::LongStraddle,
            (true, false) => StrategyType::ShortStraddle,
            (false, true) => StrategyType::LongStrangle,
            (false, false) => StrategyType::ShortStrangle,
        };
    }
    StrategyType::Manual
}

fn classify_condor(legs: &[Leg]) -> StrategyType {
    let same_exp = legs.windows(2).all(|w| w[0].expiration == w[1].expiration);
    if !same_exp {
        return StrategyType::Manual;
    }
    let mut sorted: Vec<&Leg> = legs.iter().collect();
    sorted.sort_by(|a, b| a.strike.cmp(&b.strike));
    let shape: Vec<LegType> = sorted.iter().map(|l| l.leg_type).collect();
    let distinct_middle = sorted[1].strike < sorted[2].strike;
    match shape.as_slice() {
        [LegType::LongPut, LegType::ShortPut, LegType::ShortCall, LegType::LongCall]
            if distinct_middle =>
        {
            StrategyType::IronCondor
        }
        _ => StrategyType::Manual,
    }
}

/// A group of legs treated as one composite position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: Uuid,
    pub account_id: AccountId,
    pub underlying: String,
    pub strategy_type: StrategyType,
    pub opened_at: TimeMs,
    pub closed_at: Option<TimeMs>,
    pub net_premium: Decimal,
    pub realized_pnl: Decimal,
    pub max_profit: Option<Decimal>,
    pub max_loss: Option<Decimal>,
    pub legs: Vec<Leg>,
}

impl Strategy {
    fn from_legs(
        id: Uuid,
        account_id: AccountId,
        underlying: String,
        strategy_type: StrategyType,
        legs: Vec<Leg>,
    ) -> Result<Self, LedgerError> {
        let metrics = StrategyMetrics::compute(strategy_type, &legs)?;
        let opened_at = legs
            .iter()
            .map(|l| l.opened_at)
            .min()
            .unwrap_or(TimeMs::new(0));
        Ok(Strategy {
            id,
            account_id,
            underlying,
            strategy_type,
            opened_at,
            closed_at: None,
            net_premium: metrics.net_premium,
            realized_pnl: Decimal::zero(),
            max_profit: metrics.max_profit,
            max_loss: metrics.max_loss,
            legs,
        })
    }

    /// Rebuild a strategy from persisted leg trades, keeping its stored type.
    pub fn rehydrate(
        id: Uuid,
        strategy_type: StrategyType,
        trades: &[Trade],
    ) -> Result<Self, LedgerError> {
        let legs = trades
            .iter()
            .map(Leg::from_trade)
            .collect::<Result<Vec<_>, _>>()?;
        let first = trades
            .first()
            .ok_or_else(|| LedgerError::Recompute(format!("strategy {} has no legs", id)))?;
        Strategy::from_legs(
            id,
            first.account_id.clone(),
            underlying_of(&first.symbol, first.instrument_type),
            strategy_type,
            legs,
        )
    }

    /// Attribute realized P&L and exit prices from the lot-matching output.
    ///
    /// A leg's exit price is the quantity-weighted exit of the closed trades
    /// that consumed its lot, set only once the whole leg is closed.
    pub fn attribute_realized(&mut self, closed: &[ClosedTrade]) -> Result<(), LedgerError> {
        let overflow = || LedgerError::overflow("strategy realized pnl");

        let mut by_opening: HashMap<&str, Vec<&ClosedTrade>> = HashMap::new();
        for ct in closed {
            by_opening.entry(ct.opening_trade_id.as_str()).or_default().push(ct);
        }

        let mut realized = Decimal::zero();
        let mut all_closed = !self.legs.is_empty();
        let mut last_close: Option<TimeMs> = None;

        for leg in &mut self.legs {
            let matches = by_opening.get(leg.trade_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let mut qty = Decimal::zero();
            let mut exit_value = Decimal::zero();
            for ct in matches {
                realized = realized.checked_add(ct.pnl).ok_or_else(overflow)?;
                qty = qty.checked_add(ct.quantity).ok_or_else(overflow)?;
                exit_value = ct
                    .exit_price
                    .checked_mul(ct.quantity)
                    .and_then(|v| exit_value.checked_add(v))
                    .ok_or_else(overflow)?;
                last_close = last_close.max(Some(ct.closed_at));
            }

            if !qty.is_zero() && qty >= leg.quantity {
                leg.exit_price = Some(exit_value.checked_div(qty).ok_or_else(overflow)?);
            } else {
                leg.exit_price = None;
                all_closed = false;
            }
        }

        self.realized_pnl = realized;
        self.closed_at = if all_closed { last_close } else { None };
        Ok(())
    }

    pub fn trade_ids(&self) -> impl Iterator<Item = &str> {
        self.legs.iter().map(|l| l.trade_id.as_str())
    }
}

/// Group ungrouped option openings into strategies.
///
/// `trades` must be in canonical order. Trades in `already_grouped` are
/// never considered. Only recognised patterns are returned.
pub fn detect_strategies(
    trades: &[Trade],
    already_grouped: &HashSet<String>,
    window_ms: i64,
) -> Result<Vec<Strategy>, LedgerError> {
    let mut by_underlying: BTreeMap<(AccountId, String), Vec<(&Trade, Leg)>> = BTreeMap::new();
    for trade in trades {
        if trade.instrument_type != InstrumentType::Option
            || !trade.action.is_opening()
            || already_grouped.contains(&trade.id)
        {
            continue;
        }
        let Ok(leg) = Leg::from_trade(trade) else {
            debug!(trade_id = %trade.id, symbol = %trade.symbol, "unparseable option symbol skipped");
            continue;
        };
        by_underlying
            .entry((
                trade.account_id.clone(),
                underlying_of(&trade.symbol, trade.instrument_type),
            ))
            .or_default()
            .push((trade, leg));
    }

    let mut strategies = Vec::new();
    for ((account_id, underlying), candidates) in by_underlying {
        let mut cluster: Vec<Leg> = Vec::new();
        let mut cluster_start: Option<TimeMs> = None;

        for (trade, leg) in candidates {
            let starts_new = cluster_start
                .map(|start| trade.executed_at.as_ms().saturating_sub(start.as_ms()) > window_ms)
                .unwrap_or(true);
            if starts_new {
                flush_cluster(&account_id, &underlying, &mut cluster, &mut strategies)?;
                cluster_start = Some(trade.executed_at);
            }
            cluster.push(leg);
        }
        flush_cluster(&account_id, &underlying, &mut cluster, &mut strategies)?;
    }

    Ok(strategies)
}

fn flush_cluster(
    account_id: &AccountId,
    underlying: &str,
    cluster: &mut Vec<Leg>,
    out: &mut Vec<Strategy>,
) -> Result<(), LedgerError> {
    let legs = std::mem::take(cluster);
    if legs.len() < 2 {
        return Ok(());
    }
    let strategy_type = classify_legs(&legs);
    if strategy_type != StrategyType::Manual {
        out.push(Strategy::from_legs(
            Uuid::new_v4(),
            account_id.clone(),
            underlying.to_string(),
            strategy_type,
            legs,
        )?);
        return Ok(());
    }

    // Whole cluster has no shape: pair off recognisable two-leg patterns in
    // execution order and leave the rest ungrouped.
    let mut used = vec![false; legs.len()];
    for i in 0..legs.len() {
        for j in (i + 1)..legs.len() {
            if used[i] || used[j] {
                continue;
            }
            let pair = [legs[i].clone(), legs[j].clone()];
            let pair_type = classify_legs(&pair);
            if pair_type == StrategyType::Manual {
                continue;
            }
            used[i] = true;
            used[j] = true;
            out.push(Strategy::from_legs(
                Uuid::new_v4(),
                account_id.clone(),
                underlying.to_string(),
                pair_type,
                pair.to_vec(),
            )?);
        }
    }
    let leftover = used.iter().filter(|u| !**u).count();
    if leftover > 0 {
        debug!(account = %account_id, underlying, leftover, "opened-together legs left ungrouped");
    }
    Ok(())
}

/// Build a user-selected strategy. Same netting and bounds as detection;
/// only the grouping step is skipped.
pub fn build_manual_strategy(
    selected: &[Trade],
    already_grouped: &HashSet<String>,
) -> Result<Strategy, LedgerError> {
    if selected.len() < 2 {
        return Err(StrategyError::TooFewLegs(selected.len()).into());
    }
    let mut seen = HashSet::new();
    for trade in selected {
        if !seen.insert(trade.id.as_str()) {
            return Err(StrategyError::DuplicateLeg(trade.id.clone()).into());
        }
        if already_grouped.contains(&trade.id) {
            return Err(StrategyError::AlreadyGrouped(trade.id.clone()).into());
        }
    }
    let account_id = selected[0].account_id.clone();
    if selected.iter().any(|t| t.account_id != account_id) {
        return Err(StrategyError::MixedAccounts.into());
    }

    let legs = selected
        .iter()
        .map(Leg::from_trade)
        .collect::<Result<Vec<_>, _>>()?;
    let strategy_type = classify_legs(&legs);
    Strategy::from_legs(
        Uuid::new_v4(),
        account_id,
        underlying_of(&selected[0].symbol, selected[0].instrument_type),
        strategy_type,
        legs,
    )
}

/// Every trade may appear in at most one group, at most once.
///
/// A violation means the stored grouping is self-referential and the scope
/// cannot be computed.
pub fn verify_group_integrity<'a>(
    groups: impl IntoIterator<Item = (Uuid, &'a [String])>,
) -> Result<HashSet<String>, LedgerError> {
    let mut owner: HashMap<&'a str, Uuid> = HashMap::new();
    for (group_id, trade_ids) in groups {
        for trade_id in trade_ids {
            if let Some(previous) = owner.insert(trade_id.as_str(), group_id) {
                return Err(LedgerError::CyclicGroup(format!(
                    "trade {} referenced by groups {} and {}",
                    trade_id, previous, group_id
                )));
            }
        }
    }
    Ok(owner.into_keys().map(str::to_string).collect())
}
