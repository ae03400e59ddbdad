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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::TokenId;

/// Aggregated market statistics served by `get_market_info` and refreshed
/// wholesale by the periodic loops: no field is ever merged incrementally,
/// each refresh replaces its whole section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Trailing-24h spot volume per token.
    pub spot_volumes: HashMap<TokenId, u64>,
    /// Trailing-24h spot trade count per token.
    pub spot_trades: HashMap<TokenId, u64>,
    /// Trailing-24h perpetual volume per token.
    pub perp_volumes: HashMap<TokenId, u64>,
    /// Trailing-24h perpetual trade count per token.
    pub perp_trades: HashMap<TokenId, u64>,
    /// Funding rate history per token.
    pub funding_rates: HashMap<TokenId, Vec<i64>>,
    /// Funding price history per token.
    pub funding_prices: HashMap<TokenId, Vec<u64>>,
}

impl StatsSnapshot {
    /// Replaces the spot section.
    pub fn replace_spot(
        &mut self,
        volumes: HashMap<TokenId, u64>,
        trades: HashMap<TokenId, u64>,
    ) {
        self.spot_volumes = volumes;
        self.spot_trades = trades;
    }

    /// Replaces the perpetual section.
    pub fn replace_perp(
        &mut self,
        volumes: HashMap<TokenId, u64>,
        trades: HashMap<TokenId, u64>,
    ) {
        self.perp_volumes = volumes;
        self.perp_trades = trades;
    }

    /// Replaces the funding section.
    pub fn replace_funding(
        &mut self,
        rates: HashMap<TokenId, Vec<i64>>,
        prices: HashMap<TokenId, Vec<u64>>,
    ) {
        self.funding_rates = rates;
        self.funding_prices = prices;
    }
}
