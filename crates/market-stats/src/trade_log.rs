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

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use veil_relay_config::TradeLogConfig;
use veil_relay_types::TokenId;
use veil_relay_utils::Result;

/// One historical fill as recorded by the trade log service. Spot fills
/// carry `base_token`, perpetual fills `synthetic_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    /// The traded base token, for spot fills.
    #[serde(default)]
    pub base_token: Option<TokenId>,
    /// The traded synthetic token, for perpetual fills.
    #[serde(default)]
    pub synthetic_token: Option<TokenId>,
    /// Filled amount.
    pub amount: u64,
    /// Fill unix timestamp, seconds.
    pub timestamp: u64,
}

impl TradeFill {
    /// The token the fill is counted under: base for spot, synthetic for
    /// perpetuals.
    pub fn stat_token(&self, perp: bool) -> Option<TokenId> {
        if perp {
            self.synthetic_token
        } else {
            self.base_token
        }
    }
}

/// A trait for the historical trade log the 24h statistics fold over.
/// The log itself (a document store of fills) is an external
/// collaborator.
#[async_trait::async_trait]
pub trait TradeLogBackend: Send + Sync {
    /// All fills with a timestamp at or after `since`, partitioned by
    /// spot vs. perpetual.
    async fn fills_since(&self, since: u64, perp: bool)
        -> Result<Vec<TradeFill>>;
}

/// The production trade log backend, querying the log service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTradeLog {
    client: reqwest::Client,
    config: TradeLogConfig,
}

impl HttpTradeLog {
    /// Creates a backend against the configured trade log service.
    pub fn new(config: TradeLogConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait::async_trait]
impl TradeLogBackend for HttpTradeLog {
    async fn fills_since(
        &self,
        since: u64,
        perp: bool,
    ) -> Result<Vec<TradeFill>> {
        let class = if perp { "perp" } else { "spot" };
        let url = format!(
            "{}?since={}&class={}",
            self.config.base_url.trim_end_matches('/'),
            since,
            class
        );
        let fills = self.client.get(url).send().await?.json().await?;
        Ok(fills)
    }
}

/// An in-memory trade log for tests.
#[derive(Debug, Default)]
pub struct MockedTradeLog {
    spot: Mutex<Vec<TradeFill>>,
    perp: Mutex<Vec<TradeFill>>,
}

impl MockedTradeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a spot fill.
    pub fn push_spot(&self, fill: TradeFill) {
        self.spot.lock().expect("mock trade log lock").push(fill);
    }

    /// Records a perpetual fill.
    pub fn push_perp(&self, fill: TradeFill) {
        self.perp.lock().expect("mock trade log lock").push(fill);
    }
}

#[async_trait::async_trait]
impl TradeLogBackend for MockedTradeLog {
    async fn fills_since(
        &self,
        since: u64,
        perp: bool,
    ) -> Result<Vec<TradeFill>> {
        let fills = if perp { &self.perp } else { &self.spot };
        Ok(fills
            .lock()
            .expect("mock trade log lock")
            .iter()
            .filter(|fill| fill.timestamp >= since)
            .cloned()
            .collect())
    }
}
