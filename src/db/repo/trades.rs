//! Accounts, trade ingestion and the scope loader.

use crate::domain::{AccountId, Action, InstrumentType, Symbol, TimeMs, Trade, UserId};
use crate::engine::{RejectReason, Rejection};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, warn};

use super::{decimal_column, Repository, TradeScope};

const TRADE_COLUMNS: &str = r#"
    SELECT t.id, t.account_id, t.symbol, t.instrument_type, t.action,
           t.quantity, t.price, t.multiplier, t.executed_at, t.ingested_at
    FROM trades t
    JOIN accounts a ON a.account_id = t.account_id
    WHERE a.user_id = "#;

impl Repository {
    /// Register (or re-own) a brokerage account.
    pub async fn upsert_account(
        &self,
        account_id: &AccountId,
        user_id: &UserId,
        broker: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, user_id, broker)
            VALUES (?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                user_id = excluded.user_id,
                broker = excluded.broker
            "#,
        )
        .bind(account_id.as_str())
        .bind(user_id.as_str())
        .bind(broker)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert trades in a single transaction.
    ///
    /// Returns the number of newly inserted trades. Re-delivered ids are
    /// ignored, so repeated ingestion of the same records is a no-op.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_trades_batch(&self, trades: &[Trade]) -> Result<usize, sqlx::Error> {
        if trades.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for trade in trades {
            let result = sqlx::query(
                r#"
                INSERT INTO trades (
                    id, account_id, symbol, instrument_type, action,
                    quantity, price, multiplier, executed_at, ingested_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(trade.id.as_str())
            .bind(trade.account_id.as_str())
            .bind(trade.symbol.as_str())
            .bind(trade.instrument_type.as_str())
            .bind(trade.action.as_str())
            .bind(trade.quantity.to_canonical_string())
            .bind(trade.price.to_canonical_string())
            .bind(trade.multiplier.to_canonical_string())
            .bind(trade.executed_at.as_i64())
            .bind(trade.ingested_at.as_i64())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Load the position-affecting trades of a scope in canonical order
    /// (executed_at, ingested_at, id).
    ///
    /// Rows that cannot be turned into a [`Trade`] are returned as
    /// rejections rather than dropped. A query failure fails the whole
    /// load; there is no partial result.
    pub async fn load_trades(
        &self,
        scope: &TradeScope,
    ) -> Result<(Vec<Trade>, Vec<Rejection>), sqlx::Error> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(TRADE_COLUMNS);
        qb.push_bind(scope.user_id.as_str().to_string());
        scope.push_account_filter(&mut qb, "t.account_id");
        if let Some(from) = scope.from {
            qb.push(" AND t.executed_at >= ").push_bind(from.as_i64());
        }
        if let Some(to) = scope.to {
            qb.push(" AND t.executed_at <= ").push_bind(to.as_i64());
        }
        qb.push(" ORDER BY t.executed_at ASC, t.ingested_at ASC, t.id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut trades = Vec::with_capacity(rows.len());
        let mut rejections = Vec::new();
        for row in &rows {
            match trade_from_row(row)? {
                Ok(trade) if trade.action.is_position_affecting() => trades.push(trade),
                Ok(trade) => {
                    debug!(trade_id = %trade.id, action = %trade.action, "non position-affecting trade skipped");
                }
                Err(rejection) => {
                    warn!(trade_id = %rejection.trade_id, reason = %rejection.reason, "stored trade unreadable");
                    rejections.push(rejection);
                }
            }
        }

        debug!(
            user = %scope.user_id,
            trades = trades.len(),
            rejected = rejections.len(),
            "scope loaded"
        );
        Ok((trades, rejections))
    }

    /// Fetch specific trades owned by `user_id`, in canonical order.
    ///
    /// Unknown ids and unreadable rows are simply absent from the result.
    pub async fn get_trades_by_ids(
        &self,
        user_id: &UserId,
        ids: &[String],
    ) -> Result<Vec<Trade>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let unique: HashSet<&String> = ids.iter().collect();

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(TRADE_COLUMNS);
        qb.push_bind(user_id.as_str().to_string());
        qb.push(" AND t.id IN (");
        let mut separated = qb.separated(", ");
        for id in unique {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
        qb.push(" ORDER BY t.executed_at ASC, t.ingested_at ASC, t.id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in &rows {
            match trade_from_row(row)? {
                Ok(trade) => trades.push(trade),
                Err(rejection) => {
                    warn!(trade_id = %rejection.trade_id, reason = %rejection.reason, "stored trade unreadable");
                }
            }
        }
        Ok(trades)
    }
}

/// Outer error: the row itself could not be read. Inner error: the row was
/// read but its content is not a valid trade.
fn trade_from_row(row: &SqliteRow) -> Result<Result<Trade, Rejection>, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let action_str: String = row.try_get("action")?;
    let instrument_str: String = row.try_get("instrument_type")?;

    let action = match Action::from_str(&action_str) {
        Ok(a) => a,
        Err(_) => return Ok(Err(Rejection::new(id, RejectReason::UnknownAction(action_str)))),
    };
    let instrument_type = match InstrumentType::from_str(&instrument_str) {
        Ok(i) => i,
        Err(_) => {
            return Ok(Err(Rejection::new(
                id,
                RejectReason::UnknownInstrument(instrument_str),
            )))
        }
    };

    let numbers = (
        decimal_column(row, "quantity"),
        decimal_column(row, "price"),
        decimal_column(row, "multiplier"),
    );
    let (quantity, price, multiplier) = match numbers {
        (Ok(q), Ok(p), Ok(m)) => (q, p, m),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            return Ok(Err(Rejection::new(id, RejectReason::Malformed(e.to_string()))))
        }
    };

    let trade = Trade::new(
        id,
        AccountId::new(row.try_get::<String, _>("account_id")?),
        Symbol::new(row.try_get::<String, _>("symbol")?),
        instrument_type,
        action,
        quantity,
        price,
        TimeMs::new(row.try_get("executed_at")?),
    )
    .with_multiplier(multiplier)
    .with_ingested_at(TimeMs::new(row.try_get("ingested_at")?));

    Ok(Ok(trade))
}
