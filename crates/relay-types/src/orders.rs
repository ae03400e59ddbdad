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

use crate::TokenId;

/// A persisted spot order: the submission payload plus the id the engine
/// assigned on acceptance. Upserted by id, so a partial fill that changes
/// remaining amounts overwrites the previous row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotOrderRecord {
    /// Engine-assigned order id; the storage key.
    #[serde(default)]
    pub order_id: u64,
    /// Unix timestamp after which the order is void.
    pub expiration_timestamp: u64,
    /// Token the owner spends.
    pub token_spent: TokenId,
    /// Token the owner receives.
    pub token_received: TokenId,
    /// Amount of `token_spent` offered.
    pub amount_spent: u64,
    /// Amount of `token_received` expected.
    pub amount_received: u64,
    /// Maximum fee the owner will pay.
    pub fee_limit: u64,
    /// Note addresses and blindings backing the order; opaque to the relay.
    #[serde(default)]
    pub spot_note_info: Option<serde_json::Value>,
    /// Order tab reference, when the order trades out of a tab.
    #[serde(default)]
    pub order_tab: Option<serde_json::Value>,
    /// The owner's signature over the order; opaque to the relay.
    pub signature: serde_json::Value,
    /// Owning user.
    #[serde(default)]
    pub user_id: u64,
}

/// A persisted perpetual (or liquidation) order, keyed like
/// [`SpotOrderRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpOrderRecord {
    /// Engine-assigned order id; the storage key.
    #[serde(default)]
    pub order_id: u64,
    /// Unix timestamp after which the order is void.
    pub expiration_timestamp: u64,
    /// The position this order modifies or closes, if any.
    #[serde(default)]
    pub position: Option<serde_json::Value>,
    /// Open / modify / close effect discriminant.
    pub position_effect_type: u32,
    /// Long (0) or short (1).
    pub order_side: u32,
    /// The synthetic token being traded.
    pub synthetic_token: TokenId,
    /// Amount of synthetic exposure.
    pub synthetic_amount: u64,
    /// Collateral amount backing the order.
    pub collateral_amount: u64,
    /// Maximum fee the owner will pay.
    pub fee_limit: u64,
    /// Fields needed only when opening a position.
    #[serde(default)]
    pub open_order_fields: Option<serde_json::Value>,
    /// Fields needed only when closing a position.
    #[serde(default)]
    pub close_order_fields: Option<serde_json::Value>,
    /// The owner's signature over the order; opaque to the relay.
    pub signature: serde_json::Value,
    /// Owning user.
    #[serde(default)]
    pub user_id: u64,
}

impl SpotOrderRecord {
    /// Builds the stored record from the original submission payload and
    /// the id the engine assigned.
    pub fn from_request(
        order_id: u64,
        payload: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_value(payload.clone())?;
        record.order_id = order_id;
        Ok(record)
    }
}

impl PerpOrderRecord {
    /// Builds the stored record from the original submission payload and
    /// the id the engine assigned.
    pub fn from_request(
        order_id: u64,
        payload: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_value(payload.clone())?;
        record.order_id = order_id;
        Ok(record)
    }
}

/// Liquidation tracking row, upserted from `NEW_POSITIONS` push events and
/// scanned by liquidation tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRow {
    /// Position index; the storage key.
    pub position_index: u64,
    /// The position's stealth address.
    pub position_address: String,
    /// The synthetic token of the position.
    pub synthetic_token: TokenId,
    /// Long position when true.
    pub is_long: bool,
    /// Price below (long) or above (short) which the position liquidates.
    pub liquidation_price: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spot_record_carries_the_submission_payload_plus_the_assigned_id() {
        let payload = json!({
            "expiration_timestamp": 1_700_100_000u64,
            "token_spent": 12345,
            "token_received": 54321,
            "amount_spent": 1_000_000u64,
            "amount_received": 15_000_000u64,
            "fee_limit": 500u64,
            "spot_note_info": {"notes_in": [], "refund_note": null},
            "signature": ["0xabc", "0xdef"],
            "user_id": 7u64,
        });
        let record = SpotOrderRecord::from_request(42, &payload).unwrap();
        assert_eq!(record.order_id, 42);
        assert_eq!(record.token_spent, 12345);
        assert_eq!(record.amount_received, 15_000_000);
        assert!(record.order_tab.is_none());
    }

    #[test]
    fn perp_record_tolerates_absent_optional_fields() {
        let payload = json!({
            "expiration_timestamp": 1_700_100_000u64,
            "position_effect_type": 0,
            "order_side": 1,
            "synthetic_token": 12345,
            "synthetic_amount": 2_000_000u64,
            "collateral_amount": 80_000_000u64,
            "fee_limit": 500u64,
            "open_order_fields": {"initial_margin": 80_000_000u64},
            "signature": ["0xabc", "0xdef"],
        });
        let record = PerpOrderRecord::from_request(7, &payload).unwrap();
        assert_eq!(record.order_id, 7);
        assert!(record.position.is_none());
        assert!(record.close_order_fields.is_none());
    }
}
