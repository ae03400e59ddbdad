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
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;
use veil_relay_types::RequestKind;
use veil_relay_utils::{Error, HandlerError};

/// Delegates one request body onto the durable queue and wraps the
/// engine's eventual reply as `{"response": ...}`. A reply timeout maps
/// to 504; everything else the engine said comes back verbatim.
async fn delegate(
    state: AppState,
    kind: RequestKind,
    payload: Value,
) -> Result<Json<Value>, HandlerError> {
    if !state.ctx.config.features.request_relay {
        tracing::warn!("Request relaying is not enabled..!");
        return Err(HandlerError(
            StatusCode::FORBIDDEN,
            "Request relaying is not enabled.".to_string(),
        ));
    }
    match state.relay.submit(kind, payload).await {
        Ok(reply) => Ok(Json(json!({ "response": reply }))),
        Err(Error::ReplyTimeout) => Err(HandlerError(
            StatusCode::GATEWAY_TIMEOUT,
            Error::ReplyTimeout.to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

macro_rules! delegate_route {
    ($(#[$doc:meta])* $name:ident => $kind:expr) => {
        $(#[$doc])*
        pub async fn $name(
            State(state): State<AppState>,
            Json(payload): Json<Value>,
        ) -> Result<Json<Value>, HandlerError> {
            delegate(state, $kind, payload).await
        }
    };
}

delegate_route!(
    /// Handles on-chain deposit execution requests.
    execute_deposit => RequestKind::Deposit
);
delegate_route!(
    /// Handles withdrawal execution requests.
    execute_withdrawal => RequestKind::Withdrawal
);
delegate_route!(
    /// Handles spot limit order submissions.
    submit_limit_order => RequestKind::SpotOrder
);
delegate_route!(
    /// Handles perpetual order submissions.
    submit_perpetual_order => RequestKind::PerpOrder
);
delegate_route!(
    /// Handles forced liquidation order submissions.
    submit_liquidation_order => RequestKind::LiquidationOrder
);
delegate_route!(
    /// Handles order cancellations.
    cancel_order => RequestKind::Cancel
);
delegate_route!(
    /// Handles in-place order amendments.
    amend_order => RequestKind::Amend
);
delegate_route!(
    /// Handles note restructuring requests.
    split_notes => RequestKind::SplitNotes
);
delegate_route!(
    /// Handles position margin changes.
    change_position_margin => RequestKind::ChangeMargin
);
delegate_route!(
    /// Handles order tab opening.
    open_order_tab => RequestKind::OpenOrderTab
);
delegate_route!(
    /// Handles order tab modification.
    modify_order_tab => RequestKind::ModifyOrderTab
);
delegate_route!(
    /// Handles order tab closing.
    close_order_tab => RequestKind::CloseOrderTab
);
delegate_route!(
    /// Handles on-chain market maker registration.
    register_onchain_mm => RequestKind::RegisterOnchainMm
);
delegate_route!(
    /// Handles market maker liquidity additions.
    add_liquidity_mm => RequestKind::AddLiquidityMm
);
delegate_route!(
    /// Handles market maker liquidity removals.
    remove_liquidity_mm => RequestKind::RemoveLiquidityMm
);
delegate_route!(
    /// Handles open order queries.
    get_orders => RequestKind::GetOrders
);
delegate_route!(
    /// Handles market liquidity queries.
    get_liquidity => RequestKind::GetLiquidity
);
delegate_route!(
    /// Handles signed index price updates.
    update_index_price => RequestKind::UpdateIndexPrice
);
delegate_route!(
    /// Handles transaction batch finalization.
    finalize_batch => RequestKind::FinalizeBatch
);
