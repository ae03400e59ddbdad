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

/// Every kind of request the relay can delegate to the engine.
///
/// The wire name doubles as the correlation id prefix, so a worker (or the
/// reply pump) can recover the kind from the id alone, without a side
/// lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// On-chain deposit into the exchange.
    Deposit,
    /// Withdrawal back to the chain.
    Withdrawal,
    /// Spot limit order submission.
    SpotOrder,
    /// Perpetual order submission.
    PerpOrder,
    /// Forced liquidation order submission.
    LiquidationOrder,
    /// Cancel an open order.
    Cancel,
    /// Amend an open order in place.
    Amend,
    /// Restructure owned notes.
    SplitNotes,
    /// Change the margin backing a position.
    ChangeMargin,
    /// Open an order tab.
    OpenOrderTab,
    /// Modify an order tab.
    ModifyOrderTab,
    /// Close an order tab.
    CloseOrderTab,
    /// Register an on-chain market maker.
    RegisterOnchainMm,
    /// Add market-maker liquidity.
    AddLiquidityMm,
    /// Remove market-maker liquidity.
    RemoveLiquidityMm,
    /// Query a user's open orders.
    GetOrders,
    /// Query a market's liquidity.
    GetLiquidity,
    /// Query funding rates and prices.
    GetFundingInfo,
    /// Submit a signed index price update.
    UpdateIndexPrice,
    /// Finalize the current transaction batch.
    FinalizeBatch,
}

impl RequestKind {
    /// All kinds, in routing order. Longer names come before their prefixes
    /// so the longest-prefix match in [`RequestKind::from_correlation_id`]
    /// is unambiguous.
    pub const ALL: [RequestKind; 20] = [
        RequestKind::LiquidationOrder,
        RequestKind::SpotOrder,
        RequestKind::PerpOrder,
        RequestKind::Deposit,
        RequestKind::Withdrawal,
        RequestKind::Cancel,
        RequestKind::Amend,
        RequestKind::SplitNotes,
        RequestKind::ChangeMargin,
        RequestKind::OpenOrderTab,
        RequestKind::ModifyOrderTab,
        RequestKind::CloseOrderTab,
        RequestKind::RegisterOnchainMm,
        RequestKind::AddLiquidityMm,
        RequestKind::RemoveLiquidityMm,
        RequestKind::GetOrders,
        RequestKind::GetLiquidity,
        RequestKind::GetFundingInfo,
        RequestKind::UpdateIndexPrice,
        RequestKind::FinalizeBatch,
    ];

    /// The snake_case wire name, also used as the correlation id prefix.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::SpotOrder => "spot_order",
            Self::PerpOrder => "perp_order",
            Self::LiquidationOrder => "liquidation_order",
            Self::Cancel => "cancel",
            Self::Amend => "amend",
            Self::SplitNotes => "split_notes",
            Self::ChangeMargin => "change_margin",
            Self::OpenOrderTab => "open_order_tab",
            Self::ModifyOrderTab => "modify_order_tab",
            Self::CloseOrderTab => "close_order_tab",
            Self::RegisterOnchainMm => "register_onchain_mm",
            Self::AddLiquidityMm => "add_liquidity_mm",
            Self::RemoveLiquidityMm => "remove_liquidity_mm",
            Self::GetOrders => "get_orders",
            Self::GetLiquidity => "get_liquidity",
            Self::GetFundingInfo => "get_funding_info",
            Self::UpdateIndexPrice => "update_index_price",
            Self::FinalizeBatch => "finalize_batch",
        }
    }

    /// Parses a wire name back into a kind.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.wire_name() == name)
    }

    /// Recovers the kind encoded as the prefix of a correlation id.
    pub fn from_correlation_id(correlation_id: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| correlation_id.starts_with(k.wire_name()))
    }

    /// Generates a correlation id for this kind: the wire name followed by
    /// three independently drawn random suffixes, so ids cannot collide
    /// among items simultaneously in flight.
    pub fn new_correlation_id(&self) -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        format!(
            "{}{}{}{}",
            self.wire_name(),
            rng.gen::<f64>(),
            rng.gen::<f64>(),
            rng.gen::<f64>(),
        )
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// A unit of work travelling through the durable queue: the payload a
/// client submitted, tagged with its kind and correlation id.
///
/// The kind is kept as a raw string so that an item whose kind has no
/// registered handler is still representable after a dequeue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Correlation id tying this item to a pending client reply.
    pub correlation_id: String,
    /// The request kind, as its wire name.
    pub kind: String,
    /// The raw request payload, forwarded to the engine untouched.
    pub payload: serde_json::Value,
}

impl WorkItem {
    /// Builds a work item for `kind`, assigning it a fresh correlation id.
    pub fn new(kind: RequestKind, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: kind.new_correlation_id(),
            kind: kind.wire_name().to_owned(),
            payload,
        }
    }
}

/// A worker's answer to one work item, published on the reply queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyItem {
    /// The correlation id of the originating work item.
    pub correlation_id: String,
    /// The serialized engine response, or a terminal error payload.
    pub payload: serde_json::Value,
}
