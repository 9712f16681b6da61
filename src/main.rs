use anyhow::Context;
use std::sync::Arc;
use tradeledger::{
    config::Config, db::init_db, HttpQuoteSource, LedgerService, QuoteSource, Repository,
    TradeScope, UserId,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    if config.users.is_empty() {
        tracing::warn!("no users configured (set LEDGER_USERS or LEDGER_USERS_FILE)");
        return Ok(());
    }

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    let quotes: Option<Arc<dyn QuoteSource>> = config
        .quote_api_url
        .clone()
        .map(|url| Arc::new(HttpQuoteSource::new(url)) as Arc<dyn QuoteSource>);

    let service = LedgerService::new(repo, quotes, &config);

    let mut failed = 0usize;
    for user in &config.users {
        let user_id = UserId::new(user.as_str());
        if let Err(e) = run_user(&service, &user_id).await {
            failed += 1;
            tracing::error!(user = %user_id, error = %e, "ledger run failed");
        }
    }

    tracing::info!(users = config.users.len(), failed, "batch complete");
    if failed > 0 {
        anyhow::bail!("{} of {} users failed", failed, config.users.len());
    }
    Ok(())
}

async fn run_user(service: &LedgerService, user_id: &UserId) -> anyhow::Result<()> {
    let outcome = service
        .recompute_and_persist(&TradeScope::user(user_id.clone()))
        .await?;
    let detected = service.detect_and_store_strategies(user_id).await?;
    let report = service.audit(user_id).await?;

    tracing::info!(
        user = %user_id,
        realized = %outcome.summary.total_pnl,
        positions = outcome.positions.len(),
        new_strategies = detected.len(),
        audit_clean = report.is_clean(),
        "user processed"
    );
    if !report.is_clean() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
