//! HTTP quote client.
//!
//! Expects `GET {base_url}/quote/{symbol}` to answer `{"symbol": .., "price": ".."}`.
//! Prices may be JSON strings or numbers.

use super::{DataSourceError, QuoteSource};
use crate::domain::{Decimal, Symbol};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpQuoteSource {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpQuoteSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(10),
        }
    }

    async fn get_quote(&self, symbol: &Symbol) -> Result<serde_json::Value, DataSourceError> {
        // OCC symbols contain padding spaces.
        let url = format!(
            "{}/quote/{}",
            self.base_url,
            symbol.as_str().replace(' ', "%20")
        );
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self.client.get(&url).send().await.map_err(|e| {
                backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status == StatusCode::NOT_FOUND {
                return Err(backoff::Error::permanent(DataSourceError::NotFound(
                    symbol.to_string(),
                )));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, DataSourceError> {
        debug!(symbol = %symbol, "fetching quote");
        let body = self.get_quote(symbol).await?;
        parse_price(&body)
    }
}

fn parse_price(body: &serde_json::Value) -> Result<Decimal, DataSourceError> {
    let raw = body
        .get("price")
        .ok_or_else(|| DataSourceError::ParseError("Missing price field".to_string()))?;

    let text = match raw {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(DataSourceError::ParseError(format!(
                "Invalid price: {}",
                raw
            )))
        }
    };
    let price = Decimal::from_str_canonical(&text)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid price: {}", e)))?;
    if price.is_negative() {
        return Err(DataSourceError::ParseError(format!(
            "Negative price: {}",
            price
        )));
    }
    Ok(price)
}
