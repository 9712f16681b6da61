//! Quote collaborator used to mark open positions to market.

use crate::domain::{Decimal, Symbol};
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpQuoteSource;
pub use mock::MockQuoteSource;

/// Live price lookup for a single symbol.
///
/// Implementations must handle retry/backoff and rate limiting. A failure
/// here never fails a recompute; the position is returned unpriced.
#[async_trait]
pub trait QuoteSource: Send + Sync + fmt::Debug {
    /// Last price for `symbol`, per share or per contract.
    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, DataSourceError>;
}

/// Why a quote lookup failed. Only `NetworkError`, `RateLimited` and 5xx
/// `HttpError`s are retried.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    NetworkError(String),
    HttpError { status: u16, message: String },
    /// The response body had no usable price.
    ParseError(String),
    RateLimited,
    NotFound(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "quote request failed: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "quote service returned {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "unreadable quote: {}", msg),
            DataSourceError::RateLimited => write!(f, "quote service rate limit hit"),
            DataSourceError::NotFound(symbol) => write!(f, "no quote for {}", symbol),
        }
    }
}

impl std::error::Error for DataSourceError {}
