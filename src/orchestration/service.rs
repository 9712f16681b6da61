//! Ledger pipeline: load → validate → match → aggregate → enrich.
//!
//! Every entry point rebuilds its derived state from the stored trades.
//! Nothing is written until a run has fully succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::single_flight::SingleFlight;
use crate::config::{AuditConfig, Config, PhantomPolicy, ValidationConfig};
use crate::datasource::QuoteSource;
use crate::db::{Repository, StoredGroup, TradeScope};
use crate::domain::{is_canonically_ordered, sort_trades_deterministic, TimeMs, Trade, UserId};
use crate::engine::strategy::verify_group_integrity;
use crate::engine::{
    aggregate_positions, audit_user, build_manual_strategy, detect_strategies, enrich_positions,
    match_trades, validate_trades, AuditReport, ClosedTrade, MatchAnomaly, Position,
    RealizedSummary, Rejection, Strategy,
};
use crate::error::{LedgerError, StrategyError};

/// Everything one recompute of a scope derives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeOutcome {
    pub computed_at: TimeMs,
    /// Accepted trades in canonical order.
    pub trades: Vec<Trade>,
    pub rejections: Vec<Rejection>,
    pub closed_trades: Vec<ClosedTrade>,
    pub positions: Vec<Position>,
    pub anomalies: Vec<MatchAnomaly>,
    pub summary: RealizedSummary,
}

type FlightResult = Result<Arc<ScopeOutcome>, LedgerError>;

/// Knobs the recompute future needs, detached from the service so the
/// future can be `'static`.
#[derive(Debug, Clone, Copy)]
struct PipelineSettings {
    validation: ValidationConfig,
    phantom_policy: PhantomPolicy,
}

pub struct LedgerService {
    repo: Arc<Repository>,
    quotes: Option<Arc<dyn QuoteSource>>,
    settings: PipelineSettings,
    strategy_window_ms: i64,
    audit: AuditConfig,
    flights: SingleFlight<TradeScope, FlightResult>,
}

impl LedgerService {
    pub fn new(repo: Arc<Repository>, quotes: Option<Arc<dyn QuoteSource>>, config: &Config) -> Self {
        Self {
            repo,
            quotes,
            settings: PipelineSettings {
                validation: config.validation,
                phantom_policy: config.phantom_policy,
            },
            strategy_window_ms: config.strategy_window_ms,
            audit: config.audit,
            flights: SingleFlight::new(),
        }
    }

    /// Recompute a scope from scratch.
    ///
    /// Concurrent calls for an equal scope share one run and its result.
    /// Any scope-fatal error aborts the run with no partial output.
    pub async fn recompute(&self, scope: &TradeScope) -> Result<Arc<ScopeOutcome>, LedgerError> {
        let repo = self.repo.clone();
        let quotes = self.quotes.clone();
        let settings = self.settings;
        let owned_scope = scope.clone();

        self.flights
            .run(scope.clone(), move || async move {
                compute_scope(&repo, quotes.as_deref(), settings, &owned_scope)
                    .await
                    .map(Arc::new)
            })
            .await
    }

    /// Recompute and atomically replace the scope's stored closed trades
    /// and positions.
    pub async fn recompute_and_persist(
        &self,
        scope: &TradeScope,
    ) -> Result<Arc<ScopeOutcome>, LedgerError> {
        if !scope.is_full_history() {
            return Err(LedgerError::Recompute(
                "date-ranged scopes are not persisted".to_string(),
            ));
        }
        let outcome = self.recompute(scope).await?;
        self.repo
            .replace_derived_outputs(scope, &outcome.closed_trades, &outcome.positions)
            .await?;
        Ok(outcome)
    }

    /// Detect new strategies among the user's ungrouped trades and store
    /// them. Returns only the newly stored strategies.
    pub async fn detect_and_store_strategies(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Strategy>, LedgerError> {
        let outcome = self.recompute(&TradeScope::user(user_id.clone())).await?;
        let grouped = self.grouped_trade_ids(user_id).await?;

        let mut detected = detect_strategies(&outcome.trades, &grouped, self.strategy_window_ms)?;
        for strategy in &mut detected {
            strategy.attribute_realized(&outcome.closed_trades)?;
            self.repo.insert_trade_group(user_id, strategy).await?;
        }

        info!(user = %user_id, detected = detected.len(), "strategy detection complete");
        Ok(detected)
    }

    /// Group user-selected trades into a strategy.
    ///
    /// Uses the same netting and bounds as detection; an unrecognised
    /// shape is stored as MANUAL.
    pub async fn create_manual_strategy(
        &self,
        user_id: &UserId,
        trade_ids: &[String],
    ) -> Result<Strategy, LedgerError> {
        if trade_ids.len() < 2 {
            return Err(StrategyError::TooFewLegs(trade_ids.len()).into());
        }
        let mut seen = HashSet::new();
        for id in trade_ids {
            if !seen.insert(id.as_str()) {
                return Err(StrategyError::DuplicateLeg(id.clone()).into());
            }
        }

        let found = self.repo.get_trades_by_ids(user_id, trade_ids).await?;
        let mut by_id: HashMap<&str, &Trade> = found.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut selected = Vec::with_capacity(trade_ids.len());
        for id in trade_ids {
            let trade = by_id
                .remove(id.as_str())
                .ok_or_else(|| StrategyError::UnknownTrade(id.clone()))?;
            selected.push(trade.clone());
        }

        let grouped = self.grouped_trade_ids(user_id).await?;
        let mut strategy = build_manual_strategy(&selected, &grouped)?;

        let outcome = self.recompute(&TradeScope::user(user_id.clone())).await?;
        strategy.attribute_realized(&outcome.closed_trades)?;
        self.repo.insert_trade_group(user_id, &strategy).await?;
        Ok(strategy)
    }

    /// Stored strategies with economics and realized P&L rebuilt from the
    /// current trade set.
    pub async fn strategies_for_user(&self, user_id: &UserId) -> Result<Vec<Strategy>, LedgerError> {
        let outcome = self.recompute(&TradeScope::user(user_id.clone())).await?;
        let groups = self.repo.load_trade_groups(user_id).await?;

        let leg_ids: Vec<String> = groups
            .iter()
            .flat_map(|g| g.trade_ids.iter().cloned())
            .collect();
        let trades = self.repo.get_trades_by_ids(user_id, &leg_ids).await?;
        let by_id: HashMap<&str, &Trade> = trades.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut strategies = Vec::with_capacity(groups.len());
        for group in &groups {
            let legs = group
                .trade_ids
                .iter()
                .map(|id| {
                    by_id.get(id.as_str()).map(|t| (*t).clone()).ok_or_else(|| {
                        LedgerError::Recompute(format!(
                            "group {} references missing trade {}",
                            group.id, id
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut strategy = Strategy::rehydrate(group.id, group.strategy_type, &legs)?;
            strategy.attribute_realized(&outcome.closed_trades)?;
            strategies.push(strategy);
        }
        Ok(strategies)
    }

    /// Read-only data-quality report for one user.
    pub async fn audit(&self, user_id: &UserId) -> Result<AuditReport, LedgerError> {
        let outcome = self.recompute(&TradeScope::user(user_id.clone())).await?;
        audit_user(
            user_id,
            &outcome.trades,
            &outcome.rejections,
            TimeMs::now(),
            &self.audit,
        )
    }

    async fn grouped_trade_ids(&self, user_id: &UserId) -> Result<HashSet<String>, LedgerError> {
        let groups = self.repo.load_trade_groups(user_id).await?;
        check_groups(&groups)
    }
}

fn check_groups(groups: &[StoredGroup]) -> Result<HashSet<String>, LedgerError> {
    verify_group_integrity(groups.iter().map(|g| (g.id, g.trade_ids.as_slice())))
}

async fn compute_scope(
    repo: &Repository,
    quotes: Option<&dyn QuoteSource>,
    settings: PipelineSettings,
    scope: &TradeScope,
) -> Result<ScopeOutcome, LedgerError> {
    let now = TimeMs::now();

    let (mut loaded, mut rejections) = repo.load_trades(scope).await?;
    if !is_canonically_ordered(&loaded) {
        warn!(user = %scope.user_id, "loader returned trades out of order, re-sorting");
        sort_trades_deterministic(&mut loaded);
    }
    check_groups(&repo.load_trade_groups(&scope.user_id).await?)?;

    let (trades, rejected) = validate_trades(loaded, now, &settings.validation);
    rejections.extend(rejected);

    let output = match_trades(&trades)?;
    let mut positions = aggregate_positions(&output, settings.phantom_policy)?;
    if let Some(quotes) = quotes {
        positions = enrich_positions(positions, quotes).await;
    }
    let summary = RealizedSummary::from_closed(&output.closed_trades)?;

    if !output.anomalies.is_empty() {
        warn!(user = %scope.user_id, anomalies = output.anomalies.len(), "match anomalies in scope");
    }
    info!(
        user = %scope.user_id,
        trades = trades.len(),
        rejected = rejections.len(),
        closed = output.closed_trades.len(),
        positions = positions.len(),
        realized = %summary.total_pnl,
        "scope recomputed"
    );

    Ok(ScopeOutcome {
        computed_at: now,
        trades,
        rejections,
        closed_trades: output.closed_trades,
        positions,
        anomalies: output.anomalies,
        summary,
    })
}
