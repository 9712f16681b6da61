//! Trade groups (strategies) and their legs.

use crate::domain::{AccountId, TimeMs, UserId};
use crate::engine::{Strategy, StrategyType};
use crate::error::{LedgerError, StrategyError};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use super::Repository;

/// A persisted group: identity and leg references only. Economics are
/// recomputed from the referenced trades on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGroup {
    pub id: Uuid,
    pub account_id: AccountId,
    pub underlying: String,
    pub strategy_type: StrategyType,
    /// Leg trade ids in leg order.
    pub trade_ids: Vec<String>,
}

impl Repository {
    /// Persist a strategy and its legs in one transaction.
    ///
    /// Fails with [`StrategyError::AlreadyGrouped`] if any leg's trade is
    /// already part of another group; nothing is written in that case.
    pub async fn insert_trade_group(
        &self,
        user_id: &UserId,
        strategy: &Strategy,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT trade_id FROM trade_group_legs WHERE trade_id IN (");
        let mut separated = qb.separated(", ");
        for trade_id in strategy.trade_ids() {
            separated.push_bind(trade_id.to_string());
        }
        separated.push_unseparated(") ORDER BY trade_id LIMIT 1");
        if let Some(row) = qb.build().fetch_optional(&mut *tx).await? {
            let taken: String = row.try_get("trade_id")?;
            return Err(StrategyError::AlreadyGrouped(taken).into());
        }

        sqlx::query(
            r#"
            INSERT INTO trade_groups (id, user_id, account_id, underlying, strategy_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(strategy.id.to_string())
        .bind(user_id.as_str())
        .bind(strategy.account_id.as_str())
        .bind(strategy.underlying.as_str())
        .bind(strategy.strategy_type.as_str())
        .bind(TimeMs::now().as_i64())
        .execute(&mut *tx)
        .await?;

        for (index, trade_id) in strategy.trade_ids().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO trade_group_legs (group_id, leg_index, trade_id)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(strategy.id.to_string())
            .bind(index as i64)
            .bind(trade_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            user = %user_id,
            group = %strategy.id,
            strategy_type = strategy.strategy_type.as_str(),
            legs = strategy.legs.len(),
            "trade group stored"
        );
        Ok(())
    }

    /// All groups for a user, ordered by creation time then id.
    pub async fn load_trade_groups(&self, user_id: &UserId) -> Result<Vec<StoredGroup>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.account_id, g.underlying, g.strategy_type, g.created_at,
                   l.leg_index, l.trade_id
            FROM trade_groups g
            JOIN trade_group_legs l ON l.group_id = g.id
            WHERE g.user_id = ?
            ORDER BY g.created_at ASC, g.id ASC, l.leg_index ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut order: Vec<Uuid> = Vec::new();
        let mut groups: BTreeMap<Uuid, StoredGroup> = BTreeMap::new();
        for row in &rows {
            let raw_id: String = row.try_get("id")?;
            let id = Uuid::parse_str(&raw_id)
                .map_err(|_| LedgerError::Recompute(format!("corrupt trade group id {}", raw_id)))?;
            let raw_type: String = row.try_get("strategy_type")?;
            let strategy_type = StrategyType::parse(&raw_type).ok_or_else(|| {
                LedgerError::Recompute(format!("unknown strategy type {} on group {}", raw_type, id))
            })?;
            let trade_id: String = row.try_get("trade_id")?;

            if !groups.contains_key(&id) {
                order.push(id);
                groups.insert(
                    id,
                    StoredGroup {
                        id,
                        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
                        underlying: row.try_get("underlying")?,
                        strategy_type,
                        trade_ids: Vec::new(),
                    },
                );
            }
            if let Some(group) = groups.get_mut(&id) {
                group.trade_ids.push(trade_id);
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{d, setup_test_db};
    use super::*;
    use crate::domain::{Action, InstrumentType, Symbol, Trade};
    use crate::engine::build_manual_strategy;
    use std::collections::HashSet;

    fn option(id: &str, symbol: &str, action: Action, px: &str) -> Trade {
        Trade::new(
            id,
            AccountId::new("acct"),
            Symbol::new(symbol),
            InstrumentType::Option,
            action,
            d("1"),
            d(px),
            TimeMs::new(1_000),
        )
    }

    async fn seeded() -> (Repository, tempfile::TempDir, Vec<Trade>) {
        let (repo, temp) = setup_test_db().await;
        repo.upsert_account(&AccountId::new("acct"), &UserId::new("u1"), "schwab")
            .await
            .unwrap();
        let trades = vec![
            option("1", "XYZ   240119C00100000", Action::BuyToOpen, "5"),
            option("2", "XYZ   240119C00110000", Action::SellToOpen, "2"),
            option("3", "XYZ   240119P00090000", Action::SellToOpen, "1"),
        ];
        repo.insert_trades_batch(&trades).await.unwrap();
        (repo, temp, trades)
    }

    #[tokio::test]
    async fn test_insert_and_load_group() {
        let (repo, _temp, trades) = seeded().await;
        let user = UserId::new("u1");

        let strategy = build_manual_strategy(&trades[..2], &HashSet::new()).unwrap();
        repo.insert_trade_group(&user, &strategy).await.unwrap();

        let groups = repo.load_trade_groups(&user).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, strategy.id);
        assert_eq!(groups[0].strategy_type, StrategyType::BullCallSpread);
        assert_eq!(groups[0].underlying, "XYZ");
        assert_eq!(groups[0].trade_ids, vec!["1", "2"]);

        assert!(repo.load_trade_groups(&UserId::new("u2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trade_cannot_join_two_groups() {
        let (repo, _temp, trades) = seeded().await;
        let user = UserId::new("u1");

        let first = build_manual_strategy(&trades[..2], &HashSet::new()).unwrap();
        repo.insert_trade_group(&user, &first).await.unwrap();

        let second = build_manual_strategy(&trades[1..], &HashSet::new()).unwrap();
        let err = repo.insert_trade_group(&user, &second).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Strategy(StrategyError::AlreadyGrouped(ref id)) if id == "2"
        ));

        // Nothing from the rejected group was written.
        assert_eq!(repo.load_trade_groups(&user).await.unwrap().len(), 1);
    }
}
