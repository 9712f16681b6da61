//! Mock quote source for testing without network calls.

use super::{DataSourceError, QuoteSource};
use crate::domain::{Decimal, Symbol};
use async_trait::async_trait;
use std::collections::HashMap;

/// Returns predefined prices; unknown symbols yield `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct MockQuoteSource {
    prices: HashMap<String, Decimal>,
    failing: Option<DataSourceError>,
}

impl MockQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    /// Make every lookup fail with `error`.
    pub fn with_failure(mut self, error: DataSourceError) -> Self {
        self.failing = Some(error);
        self
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, DataSourceError> {
        if let Some(err) = &self.failing {
            return Err(err.clone());
        }
        self.prices
            .get(symbol.as_str())
            .copied()
            .ok_or_else(|| DataSourceError::NotFound(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_quote_lookup() {
        let price = Decimal::from_str_canonical("12.5").unwrap();
        let mock = MockQuoteSource::new().with_price("XYZ", price);
        assert_eq!(mock.fetch_price(&Symbol::new("XYZ")).await.unwrap(), price);
        assert!(matches!(
            mock.fetch_price(&Symbol::new("ABC")).await,
            Err(DataSourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockQuoteSource::new()
            .with_price("XYZ", Decimal::one())
            .with_failure(DataSourceError::RateLimited);
        assert!(matches!(
            mock.fetch_price(&Symbol::new("XYZ")).await,
            Err(DataSourceError::RateLimited)
        ));
    }
}
