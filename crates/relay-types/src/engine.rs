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

use crate::{LiquidityEntry, MarketClass, MarketId, TokenId};

/// Handshake sent once per connection on the engine push stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHandshake {
    /// Identifies this relay to the engine.
    pub subscriber_id: String,
    /// Shared configuration code expected by the engine.
    pub config_code: String,
}

/// One market's full liquidity snapshot inside a `LIQUIDITY_UPDATE` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketLiquidityUpdate {
    /// The market the snapshot is for.
    pub market: MarketId,
    /// Spot or perpetual; decides which order table evictions touch.
    #[serde(rename = "type")]
    pub class: MarketClass,
    /// The full bid side, best first.
    pub bid_liquidity: Vec<LiquidityEntry>,
    /// The full ask side, best first.
    pub ask_liquidity: Vec<LiquidityEntry>,
}

/// A new-position tuple from a `NEW_POSITIONS` frame:
/// `[position_address, position_index, synthetic_token, is_long,
/// liquidation_price]`.
pub type PositionTuple = (String, u64, TokenId, bool, u64);

/// Typed response to an order submission call. Field names follow the
/// engine's wire format; anything beyond these three is passed to the
/// client untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    /// Whether the engine accepted the submission.
    #[serde(default)]
    pub successful: bool,
    /// The assigned order id, present on acceptance.
    #[serde(default)]
    pub order_id: Option<u64>,
    /// The engine's rejection reason, present on failure.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SubmitResponse {
    /// Parses the submission fields out of a raw engine reply. A reply
    /// without them parses as unsuccessful, which only means nothing gets
    /// persisted.
    pub fn from_reply(reply: &serde_json::Value) -> Self {
        serde_json::from_value(reply.clone()).unwrap_or_default()
    }
}

/// Funding rates and prices for one token, as returned by
/// `get_funding_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingInfo {
    /// The token the funding applies to.
    pub token: TokenId,
    /// Funding rate history, most recent last.
    pub funding_rates: Vec<i64>,
    /// Funding price history, most recent last.
    pub funding_prices: Vec<u64>,
}

/// The engine's `get_funding_info` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingInfoResponse {
    /// Whether the query succeeded.
    #[serde(default)]
    pub successful: bool,
    /// Per-token funding histories.
    #[serde(default)]
    pub fundings: Vec<FundingInfo>,
}

/// One `(order_id, price, amount, timestamp, order)` element of a restore
/// payload. `order` is the persisted submission payload; entries whose
/// order record went missing are dropped before this is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreEntry {
    /// The resting order's id.
    pub order_id: u64,
    /// Its price in the book.
    pub price: u64,
    /// Its remaining amount.
    pub amount: u64,
    /// Its queue arrival timestamp.
    pub timestamp: u64,
    /// The full order payload as originally submitted.
    pub order: serde_json::Value,
}

/// One market's restore payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRestore {
    /// The market being rebuilt.
    pub market_id: MarketId,
    /// The bid side, in persisted order.
    pub bid_order_restore_messages: Vec<RestoreEntry>,
    /// The ask side, in persisted order.
    pub ask_order_restore_messages: Vec<RestoreEntry>,
}

/// The single bulk `restore_orderbook` request covering every market, so
/// the engine rebuilds its whole book atomically relative to the relay's
/// view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreOrderBookRequest {
    /// Spot markets to rebuild.
    pub spot_order_restore_messages: Vec<MarketRestore>,
    /// Perpetual markets to rebuild.
    pub perp_order_restore_messages: Vec<MarketRestore>,
}

/// One observer's signed price observation for a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleUpdate {
    /// The token being priced.
    pub token: TokenId,
    /// Observation unix timestamp, seconds.
    pub timestamp: u64,
    /// Ids of the observers contributing to this update.
    pub observer_ids: Vec<u32>,
    /// Scaled prices, one per observer.
    pub prices: Vec<u64>,
    /// Signatures, one per observer.
    pub signatures: Vec<OracleSignature>,
}

/// An observer signature split into its `(R, s)` halves, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleSignature {
    /// First half of the signature.
    pub r: String,
    /// Second half of the signature.
    pub s: String,
}

/// The `update_index_price` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OraclePriceUpdateRequest {
    /// One entry per token that was successfully observed this tick.
    pub oracle_price_updates: Vec<OracleUpdate>,
}

/// 24-hour change summary for one token's external reference price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    /// Percentage change over the trailing 24 hours.
    pub percentage: f64,
    /// Absolute change over the trailing 24 hours.
    pub absolute: f64,
    /// Last traded price.
    pub price: f64,
}

/// The outbound `LIQUIDITY_UPDATE` broadcast: only markets with a changed
/// side appear, and only their changed sides are populated.
#[derive(Debug, Clone, Serialize)]
pub struct LiquidityBroadcast {
    /// Constant `"LIQUIDITY_UPDATE"`.
    pub message_id: &'static str,
    /// Per-market deltas.
    pub liquidity_updates: Vec<MarketDelta>,
}

/// The changed side(s) of one market since the previous broadcast tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDelta {
    /// Whether the market is perpetual.
    pub is_perp: bool,
    /// The market the delta is for.
    pub market_id: MarketId,
    /// The new bid side, or `null` when bids did not change.
    pub bid_queue: Option<Vec<LiquidityEntry>>,
    /// The new ask side, or `null` when asks did not change.
    pub ask_queue: Option<Vec<LiquidityEntry>>,
}

/// The outbound `SWAP_FILLED` broadcast, carrying the fill events buffered
/// since the previous tick.
#[derive(Debug, Clone, Serialize)]
pub struct FillBroadcast {
    /// Constant `"SWAP_FILLED"`.
    pub message_id: &'static str,
    /// Raw fill events, in arrival order.
    #[serde(rename = "fillUpdates")]
    pub fill_updates: Vec<serde_json::Value>,
}

/// The outbound `24H_PRICE_UPDATE` broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct PriceBroadcast {
    /// Constant `"24H_PRICE_UPDATE"`.
    pub message_id: &'static str,
    /// Token symbol to its current 24h change summary.
    pub price_changes: HashMap<String, PriceChange>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn market_liquidity_update_parses_engine_frames() {
        let frame = json!({
            "market": 11,
            "type": "spot",
            "bid_liquidity": [[100, 2, 1_700_000_000u64, 1]],
            "ask_liquidity": [],
        });
        let update: MarketLiquidityUpdate =
            serde_json::from_value(frame).unwrap();
        assert_eq!(update.market, 11);
        assert_eq!(update.class, MarketClass::Spot);
        assert_eq!(update.bid_liquidity[0].order_id, 1);
    }

    #[test]
    fn submit_response_defaults_to_unsuccessful_on_foreign_replies() {
        let reply = json!({"some": "other", "shape": true});
        let parsed = SubmitResponse::from_reply(&reply);
        assert!(!parsed.successful);
        assert!(parsed.order_id.is_none());
    }

    #[test]
    fn market_delta_serializes_unchanged_sides_as_null() {
        let delta = MarketDelta {
            is_perp: false,
            market_id: 11,
            bid_queue: Some(vec![(100, 2, 0, 1).into()]),
            ask_queue: None,
        };
        let v = serde_json::to_value(&delta).unwrap();
        assert!(v["ask_queue"].is_null());
        assert_eq!(v["bid_queue"][0][3], 1);
    }
}
