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

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::AppState;
use veil_relay_types::TokenId;

/// Aggregated market info response, shaped the way the front end already
/// consumes it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarketInfoResponse {
    funding_prices: HashMap<TokenId, Vec<u64>>,
    funding_rates: HashMap<TokenId, Vec<i64>>,
    spot24h_volumes: HashMap<TokenId, u64>,
    spot24h_trades: HashMap<TokenId, u64>,
    perp24h_volumes: HashMap<TokenId, u64>,
    perp24h_trades: HashMap<TokenId, u64>,
}

/// Answers straight from the stats caches; the queue and the engine are
/// not involved.
pub async fn handle_market_info(
    State(state): State<AppState>,
) -> Json<Value> {
    let stats = state.ctx.stats();
    let stats = stats.lock().await;
    let response = MarketInfoResponse {
        funding_prices: stats.funding_prices.clone(),
        funding_rates: stats.funding_rates.clone(),
        spot24h_volumes: stats.spot_volumes.clone(),
        spot24h_trades: stats.spot_trades.clone(),
        perp24h_volumes: stats.perp_volumes.clone(),
        perp24h_trades: stats.perp_trades.clone(),
    };
    Json(json!({ "response": response }))
}
