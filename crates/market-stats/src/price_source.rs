// Copyright 2024 Veil Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;

use veil_relay_config::PriceApiConfig;
use veil_relay_types::PriceChange;
use veil_relay_utils::{Error, Result};

/// A trait for the external market data API: last prices for the oracle
/// feed, and 24h change summaries for the price feed broadcasts.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// The last traded price of a pair.
    async fn last_price(&self, pair: &str) -> Result<f64>;
    /// The 24h change summary of a pair.
    async fn summary(&self, pair: &str) -> Result<PriceChange>;
}

#[derive(Debug, Deserialize)]
struct PriceEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct LastPrice {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct PairSummary {
    price: SummaryPrice,
}

#[derive(Debug, Deserialize)]
struct SummaryPrice {
    last: f64,
    change: SummaryChange,
}

#[derive(Debug, Deserialize)]
struct SummaryChange {
    percentage: f64,
    absolute: f64,
}

/// The production price backend, one GET per query against the configured
/// market data API.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: reqwest::Client,
    config: PriceApiConfig,
}

impl HttpPriceSource {
    /// Creates a source against the configured API.
    pub fn new(config: PriceApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, pair: &str, resource: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match &self.config.api_key {
            Some(key) => {
                format!("{base}/{pair}/{resource}?apikey={key}")
            }
            None => format!("{base}/{pair}/{resource}"),
        }
    }
}

#[async_trait::async_trait]
impl PriceSource for HttpPriceSource {
    async fn last_price(&self, pair: &str) -> Result<f64> {
        let url = self.endpoint(pair, "price");
        let envelope: PriceEnvelope<LastPrice> =
            self.client.get(url).send().await?.json().await?;
        Ok(envelope.result.price)
    }

    async fn summary(&self, pair: &str) -> Result<PriceChange> {
        let url = self.endpoint(pair, "summary");
        let envelope: PriceEnvelope<PairSummary> =
            self.client.get(url).send().await?.json().await?;
        Ok(PriceChange {
            percentage: envelope.result.price.change.percentage,
            absolute: envelope.result.price.change.absolute,
            price: envelope.result.price.last,
        })
    }
}

/// An in-memory price source for tests: fixed prices per pair, anything
/// else errors like an unavailable feed.
#[derive(Debug, Default)]
pub struct MockedPriceSource {
    prices: Mutex<HashMap<String, f64>>,
}

impl MockedPriceSource {
    /// Creates an empty source; every query fails until prices are set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the price served for a pair.
    pub fn set_price(&self, pair: &str, price: f64) {
        self.prices
            .lock()
            .expect("mock prices lock")
            .insert(pair.to_owned(), price);
    }

    /// Removes a pair, making its queries fail again.
    pub fn clear_price(&self, pair: &str) {
        self.prices.lock().expect("mock prices lock").remove(pair);
    }
}

#[async_trait::async_trait]
impl PriceSource for MockedPriceSource {
    async fn last_price(&self, pair: &str) -> Result<f64> {
        self.prices
            .lock()
            .expect("mock prices lock")
            .get(pair)
            .copied()
            .ok_or(Error::Generic("pair not available"))
    }

    async fn summary(&self, pair: &str) -> Result<PriceChange> {
        let price = self.last_price(pair).await?;
        Ok(PriceChange {
            percentage: 1.5,
            absolute: price * 0.015,
            price,
        })
    }
}
