//! Domain types and determinism layer for the trade ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, UserId, AccountId, Symbol
//! - Trade with the closed Action vocabulary and side classification
//! - Stable trade ordering key for deterministic processing
//! - OCC option symbol parsing and the versioned PositionKey

pub mod decimal;
pub mod occ;
pub mod ordering;
pub mod position_key;
pub mod primitives;
pub mod trade;

pub use decimal::Decimal;
pub use occ::{underlying_of, OccSymbol, OptionType};
pub use ordering::{is_canonically_ordered, sort_trades_deterministic, TradeOrderingKey};
pub use position_key::{PositionKey, PositionKeyParseError};
pub use primitives::{AccountId, Symbol, TimeMs, UserId};
pub use trade::{Action, InstrumentType, ParseActionError, Side, Trade};
