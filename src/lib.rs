pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::{Config, PhantomPolicy};
pub use datasource::{DataSourceError, HttpQuoteSource, MockQuoteSource, QuoteSource};
pub use db::{init_db, Repository, TradeScope};
pub use domain::{
    AccountId, Action, Decimal, InstrumentType, PositionKey, Side, Symbol, TimeMs, Trade, UserId,
};
pub use engine::{ClosedTrade, Position, Strategy, StrategyType};
pub use error::{LedgerError, StrategyError};
pub use orchestration::{LedgerService, ScopeOutcome};
