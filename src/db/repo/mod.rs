//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `trades.rs` - accounts, trade ingestion and the scope loader
//! - `strategies.rs` - trade groups and their legs
//! - `derived.rs` - closed trades and positions written by recomputation

mod derived;
mod strategies;
mod trades;

pub use strategies::StoredGroup;

use crate::domain::{AccountId, Decimal, TimeMs, UserId};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;

/// The unit of recomputation: one user, optionally narrowed to a set of
/// accounts and an inclusive execution-time range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeScope {
    pub user_id: UserId,
    pub account_ids: Option<Vec<AccountId>>,
    pub from: Option<TimeMs>,
    pub to: Option<TimeMs>,
}

impl TradeScope {
    /// Every account, full history.
    pub fn user(user_id: UserId) -> Self {
        TradeScope {
            user_id,
            account_ids: None,
            from: None,
            to: None,
        }
    }

    pub fn with_accounts(mut self, mut account_ids: Vec<AccountId>) -> Self {
        // Normalized so equal scopes share one single-flight slot.
        account_ids.sort();
        account_ids.dedup();
        self.account_ids = Some(account_ids);
        self
    }

    pub fn with_range(mut self, from: Option<TimeMs>, to: Option<TimeMs>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Date-ranged scopes see truncated history and are never persisted.
    pub fn is_full_history(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Append ` AND {column} IN (...)` when the scope names accounts.
    fn push_account_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>, column: &str) {
        if let Some(ids) = &self.account_ids {
            if ids.is_empty() {
                qb.push(" AND 0");
                return;
            }
            qb.push(format!(" AND {} IN (", column));
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id.as_str().to_string());
            }
            separated.push_unseparated(")");
        }
    }
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Read a canonical decimal string column. A corrupt value fails the read.
fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn optional_decimal_column(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Action, InstrumentType, Symbol, Trade};
    use tempfile::TempDir;

    pub async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    pub fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    pub fn trade(id: &str, account: &str, action: Action, qty: &str, px: &str, t: i64) -> Trade {
        Trade::new(
            id,
            AccountId::new(account),
            Symbol::new("XYZ"),
            InstrumentType::Stock,
            action,
            d(qty),
            d(px),
            TimeMs::new(t),
        )
    }
}
