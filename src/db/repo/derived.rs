//! Closed trades and positions produced by recomputation.

use crate::domain::{AccountId, InstrumentType, PositionKey, Side, Symbol, TimeMs, UserId};
use crate::engine::{ClosedTrade, Lot, Position};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

use super::{decimal_column, optional_decimal_column, Repository, TradeScope};

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

impl Repository {
    /// Replace the scope's closed trades and positions in one transaction.
    ///
    /// Rows for the scope's accounts (all of the user's accounts when the
    /// scope names none) are deleted and re-inserted; a failure anywhere
    /// rolls the whole replacement back.
    pub async fn replace_derived_outputs(
        &self,
        scope: &TradeScope,
        closed_trades: &[ClosedTrade],
        positions: &[Position],
    ) -> Result<(), sqlx::Error> {
        let user = scope.user_id.as_str();
        let computed_at = TimeMs::now().as_i64();
        let mut tx = self.pool.begin().await?;

        for table in ["position_lots", "positions", "closed_trades"] {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new(format!("DELETE FROM {} WHERE user_id = ", table));
            qb.push_bind(user.to_string());
            if table == "position_lots" {
                // Lots carry no account column; go through their position.
                if scope.account_ids.is_some() {
                    qb.push(
                        " AND position_key IN (SELECT position_key FROM positions WHERE user_id = ",
                    );
                    qb.push_bind(user.to_string());
                    scope.push_account_filter(&mut qb, "account_id");
                    qb.push(")");
                }
            } else {
                scope.push_account_filter(&mut qb, "account_id");
            }
            qb.build().execute(&mut *tx).await?;
        }

        for ct in closed_trades {
            sqlx::query(
                r#"
                INSERT INTO closed_trades (
                    user_id, account_id, symbol, lot_side, pnl, quantity,
                    entry_price, exit_price, multiplier, opened_at, closed_at,
                    opening_trade_id, closing_trade_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user)
            .bind(ct.account_id.as_str())
            .bind(ct.symbol.as_str())
            .bind(ct.lot_side.as_str())
            .bind(ct.pnl.to_canonical_string())
            .bind(ct.quantity.to_canonical_string())
            .bind(ct.entry_price.to_canonical_string())
            .bind(ct.exit_price.to_canonical_string())
            .bind(ct.multiplier.to_canonical_string())
            .bind(ct.opened_at.as_i64())
            .bind(ct.closed_at.as_i64())
            .bind(ct.opening_trade_id.as_str())
            .bind(ct.closing_trade_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for position in positions {
            let key = position.key.to_string();
            sqlx::query(
                r#"
                INSERT INTO positions (
                    user_id, position_key, account_id, symbol, instrument_type,
                    net_quantity, epoch, oldest_lot_opened_at, last_activity,
                    phantom, market_price, unrealized_pnl, quote_error, computed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user)
            .bind(key.as_str())
            .bind(position.account_id.as_str())
            .bind(position.symbol.as_str())
            .bind(position.instrument_type.as_str())
            .bind(position.net_quantity.to_canonical_string())
            .bind(position.epoch.as_i64())
            .bind(position.oldest_lot_opened_at.as_i64())
            .bind(position.last_activity.as_i64())
            .bind(position.phantom)
            .bind(position.market_price.map(|d| d.to_canonical_string()))
            .bind(position.unrealized_pnl.map(|d| d.to_canonical_string()))
            .bind(position.quote_error)
            .bind(computed_at)
            .execute(&mut *tx)
            .await?;

            for (seq, lot) in position.lots.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO position_lots (
                        user_id, position_key, seq, trade_id, price, remaining, multiplier, opened_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(user)
                .bind(key.as_str())
                .bind(seq as i64)
                .bind(lot.trade_id.as_str())
                .bind(lot.price.to_canonical_string())
                .bind(lot.remaining.to_canonical_string())
                .bind(lot.multiplier.to_canonical_string())
                .bind(lot.opened_at.as_i64())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        info!(
            user = %scope.user_id,
            closed_trades = closed_trades.len(),
            positions = positions.len(),
            "derived outputs replaced"
        );
        Ok(())
    }

    /// Persisted closed trades for a user, filtered on `closed_at`
    /// (inclusive), in emission order.
    pub async fn query_closed_trades(
        &self,
        user_id: &UserId,
        from: Option<TimeMs>,
        to: Option<TimeMs>,
    ) -> Result<Vec<ClosedTrade>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, symbol, lot_side, pnl, quantity, entry_price, exit_price,
                   multiplier, opened_at, closed_at, opening_trade_id, closing_trade_id
            FROM closed_trades
            WHERE user_id = ? AND closed_at >= ? AND closed_at <= ?
            ORDER BY id ASC
            "#,
        )
        .bind(user_id.as_str())
        .bind(from.unwrap_or(TimeMs::new(i64::MIN)).as_i64())
        .bind(to.unwrap_or(TimeMs::new(i64::MAX)).as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(closed_trade_from_row).collect()
    }

    /// Persisted positions for a user, ordered by account then symbol.
    pub async fn query_positions(&self, user_id: &UserId) -> Result<Vec<Position>, sqlx::Error> {
        let lot_rows = sqlx::query(
            r#"
            SELECT position_key, trade_id, price, remaining, multiplier, opened_at
            FROM position_lots
            WHERE user_id = ?
            ORDER BY position_key ASC, seq ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut lots: HashMap<String, Vec<Lot>> = HashMap::new();
        for row in &lot_rows {
            let key: String = row.try_get("position_key")?;
            lots.entry(key).or_default().push(Lot {
                trade_id: row.try_get("trade_id")?,
                price: decimal_column(row, "price")?,
                remaining: decimal_column(row, "remaining")?,
                multiplier: decimal_column(row, "multiplier")?,
                opened_at: TimeMs::new(row.try_get("opened_at")?),
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT position_key, account_id, symbol, instrument_type, net_quantity, epoch,
                   oldest_lot_opened_at, last_activity, phantom, market_price,
                   unrealized_pnl, quote_error
            FROM positions
            WHERE user_id = ?
            ORDER BY account_id ASC, symbol ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw_key: String = row.try_get("position_key")?;
            let key = PositionKey::from_str(&raw_key)
                .map_err(|e| decode_error("position_key", e.to_string()))?;
            let instrument: String = row.try_get("instrument_type")?;
            positions.push(Position {
                lots: lots.remove(&raw_key).unwrap_or_default(),
                key,
                account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
                symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
                instrument_type: InstrumentType::from_str(&instrument)
                    .map_err(|e| decode_error("instrument_type", e.to_string()))?,
                net_quantity: decimal_column(row, "net_quantity")?,
                epoch: TimeMs::new(row.try_get("epoch")?),
                oldest_lot_opened_at: TimeMs::new(row.try_get("oldest_lot_opened_at")?),
                last_activity: TimeMs::new(row.try_get("last_activity")?),
                phantom: row.try_get("phantom")?,
                market_price: optional_decimal_column(row, "market_price")?,
                unrealized_pnl: optional_decimal_column(row, "unrealized_pnl")?,
                quote_error: row.try_get("quote_error")?,
            });
        }
        Ok(positions)
    }
}

fn closed_trade_from_row(row: &SqliteRow) -> Result<ClosedTrade, sqlx::Error> {
    let lot_side = match row.try_get::<String, _>("lot_side")?.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => return Err(decode_error("lot_side", format!("unknown side {}", other))),
    };
    Ok(ClosedTrade {
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        lot_side,
        pnl: decimal_column(row, "pnl")?,
        quantity: decimal_column(row, "quantity")?,
        entry_price: decimal_column(row, "entry_price")?,
        exit_price: decimal_column(row, "exit_price")?,
        opened_at: TimeMs::new(row.try_get("opened_at")?),
        closed_at: TimeMs::new(row.try_get("closed_at")?),
        multiplier: decimal_column(row, "multiplier")?,
        opening_trade_id: row.try_get("opening_trade_id")?,
        closing_trade_id: row.try_get("closing_trade_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{setup_test_db, trade};
    use super::*;
    use crate::config::PhantomPolicy;
    use crate::domain::Action;
    use crate::engine::{aggregate_positions, match_trades};

    fn scope() -> TradeScope {
        TradeScope::user(UserId::new("u1"))
    }

    #[tokio::test]
    async fn test_replace_and_query_round_trip() {
        let (repo, _temp) = setup_test_db().await;
        let output = match_trades(&[
            trade("1", "acct", Action::Buy, "100", "10", 1_000),
            trade("2", "acct", Action::Sell, "60", "12", 2_000),
            trade("3", "acct", Action::Sell, "10", "9.5", 3_000),
        ])
        .unwrap();
        let positions = aggregate_positions(&output, PhantomPolicy::Include).unwrap();

        repo.replace_derived_outputs(&scope(), &output.closed_trades, &positions)
            .await
            .unwrap();

        let closed = repo
            .query_closed_trades(&UserId::new("u1"), None, None)
            .await
            .unwrap();
        assert_eq!(closed, output.closed_trades);

        let stored = repo.query_positions(&UserId::new("u1")).await.unwrap();
        assert_eq!(stored, positions);
    }

    #[tokio::test]
    async fn test_closed_trades_filtered_on_closed_at() {
        let (repo, _temp) = setup_test_db().await;
        let output = match_trades(&[
            trade("1", "acct", Action::Buy, "3", "10", 1_000),
            trade("2", "acct", Action::Sell, "1", "11", 2_000),
            trade("3", "acct", Action::Sell, "1", "12", 3_000),
            trade("4", "acct", Action::Sell, "1", "13", 4_000),
        ])
        .unwrap();
        repo.replace_derived_outputs(&scope(), &output.closed_trades, &[])
            .await
            .unwrap();

        let window = repo
            .query_closed_trades(
                &UserId::new("u1"),
                Some(TimeMs::new(2_500)),
                Some(TimeMs::new(4_000)),
            )
            .await
            .unwrap();
        let closing: Vec<_> = window.iter().map(|c| c.closing_trade_id.as_str()).collect();
        assert_eq!(closing, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_replace_is_scoped_to_accounts() {
        let (repo, _temp) = setup_test_db().await;
        let both = match_trades(&[
            trade("1", "a", Action::Buy, "1", "10", 1_000),
            trade("2", "b", Action::Buy, "1", "10", 1_000),
        ])
        .unwrap();
        let positions = aggregate_positions(&both, PhantomPolicy::Include).unwrap();
        repo.replace_derived_outputs(&scope(), &[], &positions)
            .await
            .unwrap();

        // Recompute only account "a", which is now flat.
        let only_a = scope().with_accounts(vec![AccountId::new("a")]);
        repo.replace_derived_outputs(&only_a, &[], &[]).await.unwrap();

        let remaining = repo.query_positions(&UserId::new("u1")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].account_id.as_str(), "b");
        assert_eq!(remaining[0].lots.len(), 1);
    }
}
