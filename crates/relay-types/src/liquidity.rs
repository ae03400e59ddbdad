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

/// One resting order's contribution to a side of an order book.
///
/// On the wire (engine push stream, persisted snapshots, subscriber
/// broadcasts) an entry is a `[price, size, timestamp, order_id]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u64, u64, u64)", into = "(u64, u64, u64, u64)")]
pub struct LiquidityEntry {
    /// Limit price, in the market's price decimals.
    pub price: u64,
    /// Remaining size at this price.
    pub size: u64,
    /// Engine timestamp of the order's arrival in the queue.
    pub timestamp: u64,
    /// The engine-assigned id of the resting order.
    pub order_id: u64,
}

impl From<(u64, u64, u64, u64)> for LiquidityEntry {
    fn from((price, size, timestamp, order_id): (u64, u64, u64, u64)) -> Self {
        Self {
            price,
            size,
            timestamp,
            order_id,
        }
    }
}

impl From<LiquidityEntry> for (u64, u64, u64, u64) {
    fn from(e: LiquidityEntry) -> Self {
        (e.price, e.size, e.timestamp, e.order_id)
    }
}

/// The persisted bid/ask snapshot of one market, one row per market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySnapshot {
    /// Resting bids, best first.
    pub bid: Vec<LiquidityEntry>,
    /// Resting asks, best first.
    pub ask: Vec<LiquidityEntry>,
}

impl LiquiditySnapshot {
    /// The set of order ids referenced by either side of the snapshot.
    pub fn active_order_ids(&self) -> std::collections::HashSet<u64> {
        self.bid
            .iter()
            .chain(self.ask.iter())
            .map(|e| e.order_id)
            .collect()
    }
}

/// Whether a market trades spot pairs or perpetual contracts.
///
/// The engine tags each liquidity update with this, and it decides which
/// order table an eviction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketClass {
    /// Spot market.
    Spot,
    /// Perpetual futures market.
    Perpetual,
}

impl MarketClass {
    /// Whether this is the perpetual class.
    pub fn is_perp(&self) -> bool {
        matches!(self, Self::Perpetual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_entry_wire_format_is_a_four_tuple() {
        let entry = LiquidityEntry {
            price: 64_250_000_000,
            size: 5_000_000,
            timestamp: 1_700_000_000,
            order_id: 42,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, "[64250000000,5000000,1700000000,42]");
        let back: LiquidityEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn active_order_ids_unions_both_sides() {
        let snapshot = LiquiditySnapshot {
            bid: vec![(100, 1, 0, 1).into(), (99, 1, 0, 2).into()],
            ask: vec![(101, 1, 0, 3).into()],
        };
        let ids = snapshot.active_order_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&1) && ids.contains(&2) && ids.contains(&3));
    }
}
