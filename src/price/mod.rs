//! Market price collaborator.
//!
//! The engine only needs one operation: the current price for a ticker.
//! Failures are recoverable per position; the trading sweep skips and
//! continues rather than aborting.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current market price for `ticker`.
    ///
    /// Unknown ticker or upstream outage yields `EngineError::Price`.
    async fn current_price(&self, ticker: &str) -> Result<Decimal>;
}

/// HTTP quote client: `GET {base_url}/quote/{ticker}`.
pub struct QuoteClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[allow(dead_code)]
    ticker: String,
    price: Decimal,
}

impl QuoteClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for QuoteClient {
    async fn current_price(&self, ticker: &str) -> Result<Decimal> {
        let url = format!("{}/quote/{}", self.base_url, ticker);
        debug!(%url, "fetching quote");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Price {
                ticker: ticker.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Price {
                ticker: ticker.to_string(),
                reason: format!("quote service returned {}", response.status()),
            });
        }

        let quote: QuoteResponse = response.json().await.map_err(|e| EngineError::Price {
            ticker: ticker.to_string(),
            reason: format!("malformed quote body: {e}"),
        })?;

        if quote.price <= Decimal::ZERO {
            return Err(EngineError::Price {
                ticker: ticker.to_string(),
                reason: format!("non-positive price {}", quote.price),
            });
        }

        Ok(quote.price)
    }
}

/// Fixed price table for tests and dry runs. Tickers not in the table fail
/// the same way an unknown symbol fails upstream.
#[derive(Debug, Default, Clone)]
pub struct StaticPrices {
    prices: HashMap<String, Decimal>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, ticker: &str, price: Decimal) -> Self {
        self.prices.insert(ticker.to_string(), price);
        self
    }

    pub fn set(&mut self, ticker: &str, price: Decimal) {
        self.prices.insert(ticker.to_string(), price);
    }
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn current_price(&self, ticker: &str) -> Result<Decimal> {
        self.prices
            .get(ticker)
            .copied()
            .ok_or_else(|| EngineError::Price {
                ticker: ticker.to_string(),
                reason: "ticker not found".to_string(),
            })
    }
}
