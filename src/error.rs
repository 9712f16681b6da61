use std::sync::Arc;
use thiserror::Error;

/// Scope-fatal failures. Any of these aborts the whole scope's computation;
/// no partial results are returned or written.
///
/// Cloneable so every caller sharing one recompute sees the same variant.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Db(Arc<sqlx::Error>),
    #[error("numeric overflow while computing {context}")]
    Overflow { context: String },
    #[error("cyclic or self-referential trade group: {0}")]
    CyclicGroup(String),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error("recompute failed: {0}")]
    Recompute(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Db(Arc::new(err))
    }
}

impl LedgerError {
    pub fn overflow(context: impl Into<String>) -> Self {
        LedgerError::Overflow {
            context: context.into(),
        }
    }
}

/// Reasons a manual strategy creation request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("a strategy needs at least two trades, got {0}")]
    TooFewLegs(usize),
    #[error("trade not found: {0}")]
    UnknownTrade(String),
    #[error("trade listed more than once: {0}")]
    DuplicateLeg(String),
    #[error("trades span more than one account")]
    MixedAccounts,
    #[error("trade {0} already belongs to a strategy")]
    AlreadyGrouped(String),
    #[error("trade {0} cannot be a strategy leg")]
    NotALeg(String),
}
