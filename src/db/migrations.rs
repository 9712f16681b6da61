//! Connection setup and schema application.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info, warn};

const SCHEMA: &str = include_str!("schema.sql");

/// Open (creating if needed) the ledger database, apply pragmas and schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(dir) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "could not create database directory");
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { apply_pragmas(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    apply_schema(&pool).await?;

    info!(path = db_path, "ledger database ready");
    Ok(pool)
}

/// Statements in `schema.sql`, in file order. The file holds no `;` other
/// than statement terminators.
fn schema_statements() -> impl Iterator<Item = &'static str> {
    SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Every statement is `IF NOT EXISTS`, so reruns are no-ops.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut applied = 0usize;
    for statement in schema_statements() {
        sqlx::query(statement).execute(pool).await?;
        applied += 1;
    }
    debug!(statements = applied, "schema applied");
    Ok(())
}

/// Foreign keys back the leg and lot cascades; WAL keeps readers off the
/// recompute's write transaction.
async fn apply_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // Returns the mode actually in effect.
    let mode: String = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    if mode != "wal" {
        debug!(journal_mode = %mode, "WAL unavailable");
    }

    for pragma in ["PRAGMA busy_timeout = 5000", "PRAGMA synchronous = NORMAL"] {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("nested")
            .join("ledger.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());
        (pool, temp_dir)
    }

    #[test]
    fn test_schema_has_no_empty_or_partial_statements() {
        for statement in schema_statements() {
            let body = statement
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty() && !l.starts_with("--"))
                .unwrap_or_default();
            assert!(body.starts_with("CREATE"), "unexpected statement: {}", statement);
        }
    }

    #[tokio::test]
    async fn test_all_ledger_tables_exist() {
        let (pool, _dir) = open_temp().await;

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        for table in [
            "accounts",
            "closed_trades",
            "position_lots",
            "positions",
            "trade_group_legs",
            "trade_groups",
            "trades",
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_reapplying_schema_keeps_rows() {
        let (pool, _dir) = open_temp().await;
        sqlx::query("INSERT INTO accounts (account_id, user_id, broker) VALUES ('a', 'u', 'b')")
            .execute(&pool)
            .await
            .unwrap();

        apply_schema(&pool).await.expect("second schema run failed");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let (pool, _dir) = open_temp().await;

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);

        // A leg may not point at a group that does not exist.
        let orphan = sqlx::query(
            "INSERT INTO trade_group_legs (group_id, leg_index, trade_id) VALUES ('nope', 0, 't1')",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err());
    }
}
