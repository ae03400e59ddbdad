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

//! # Engine Client Module
//!
//! The request/response interface to the matching/settlement engine. The
//! engine itself is an external collaborator; everything behind the
//! [`EngineRpc`] trait is opaque typed requests going out and JSON replies
//! coming back. The worker, the restore protocol and the oracle feed all
//! talk to the engine exclusively through this seam, which is also what
//! makes them testable against the mocked backend.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::Value;

use veil_relay_types::{
    FundingInfoResponse, OraclePriceUpdateRequest, RequestKind,
    RestoreOrderBookRequest,
};
use veil_relay_utils::Result;

/// HTTP/JSON backend.
mod http;
/// Mocked backend for tests.
pub mod mocked;

pub use http::HttpEngineClient;
pub use mocked::MockedEngineClient;

/// Every method the engine exposes. The first twenty mirror the client
/// request kinds one to one; the rest are relay-internal calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineMethod {
    /// `execute_deposit`
    ExecuteDeposit,
    /// `execute_withdrawal`
    ExecuteWithdrawal,
    /// `submit_limit_order`
    SubmitLimitOrder,
    /// `submit_perpetual_order`
    SubmitPerpetualOrder,
    /// `submit_liquidation_order`
    SubmitLiquidationOrder,
    /// `cancel_order`
    CancelOrder,
    /// `amend_order`
    AmendOrder,
    /// `split_notes`
    SplitNotes,
    /// `change_position_margin`
    ChangePositionMargin,
    /// `open_order_tab`
    OpenOrderTab,
    /// `modify_order_tab`
    ModifyOrderTab,
    /// `close_order_tab`
    CloseOrderTab,
    /// `register_onchain_mm`
    RegisterOnchainMm,
    /// `add_liquidity_mm`
    AddLiquidityMm,
    /// `remove_liquidity_mm`
    RemoveLiquidityMm,
    /// `get_orders`
    GetOrders,
    /// `get_liquidity`
    GetLiquidity,
    /// `get_funding_info`
    GetFundingInfo,
    /// `update_index_price`
    UpdateIndexPrice,
    /// `finalize_batch`
    FinalizeBatch,
    /// `restore_orderbook`, the bulk startup rebuild call.
    RestoreOrderbook,
}

impl EngineMethod {
    /// The engine-side method name, which the HTTP backend uses as the
    /// request path.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecuteDeposit => "execute_deposit",
            Self::ExecuteWithdrawal => "execute_withdrawal",
            Self::SubmitLimitOrder => "submit_limit_order",
            Self::SubmitPerpetualOrder => "submit_perpetual_order",
            Self::SubmitLiquidationOrder => "submit_liquidation_order",
            Self::CancelOrder => "cancel_order",
            Self::AmendOrder => "amend_order",
            Self::SplitNotes => "split_notes",
            Self::ChangePositionMargin => "change_position_margin",
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
            Self::RestoreOrderbook => "restore_orderbook",
        }
    }

    /// The engine method a client request kind dispatches to.
    pub fn for_kind(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Deposit => Self::ExecuteDeposit,
            RequestKind::Withdrawal => Self::ExecuteWithdrawal,
            RequestKind::SpotOrder => Self::SubmitLimitOrder,
            RequestKind::PerpOrder => Self::SubmitPerpetualOrder,
            RequestKind::LiquidationOrder => Self::SubmitLiquidationOrder,
            RequestKind::Cancel => Self::CancelOrder,
            RequestKind::Amend => Self::AmendOrder,
            RequestKind::SplitNotes => Self::SplitNotes,
            RequestKind::ChangeMargin => Self::ChangePositionMargin,
            RequestKind::OpenOrderTab => Self::OpenOrderTab,
            RequestKind::ModifyOrderTab => Self::ModifyOrderTab,
            RequestKind::CloseOrderTab => Self::CloseOrderTab,
            RequestKind::RegisterOnchainMm => Self::RegisterOnchainMm,
            RequestKind::AddLiquidityMm => Self::AddLiquidityMm,
            RequestKind::RemoveLiquidityMm => Self::RemoveLiquidityMm,
            RequestKind::GetOrders => Self::GetOrders,
            RequestKind::GetLiquidity => Self::GetLiquidity,
            RequestKind::GetFundingInfo => Self::GetFundingInfo,
            RequestKind::UpdateIndexPrice => Self::UpdateIndexPrice,
            RequestKind::FinalizeBatch => Self::FinalizeBatch,
        }
    }
}

impl std::fmt::Display for EngineMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A trait for the engine's request/response interface.
#[async_trait::async_trait]
pub trait EngineRpc: Send + Sync {
    /// Dispatches one call to the engine and returns its raw JSON reply.
    async fn call(&self, method: EngineMethod, payload: Value) -> Result<Value>;

    /// Ships the bulk order book rebuild payload in a single call, so the
    /// engine restores every market atomically relative to the relay's
    /// persisted view.
    async fn restore_orderbook(
        &self,
        request: RestoreOrderBookRequest,
    ) -> Result<Value> {
        self.call(
            EngineMethod::RestoreOrderbook,
            serde_json::to_value(request)?,
        )
        .await
    }

    /// Fetches the engine's current funding rates and prices.
    async fn get_funding_info(&self) -> Result<FundingInfoResponse> {
        let reply = self
            .call(EngineMethod::GetFundingInfo, Value::Object(Default::default()))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Submits a signed index price update.
    async fn update_index_price(
        &self,
        request: OraclePriceUpdateRequest,
    ) -> Result<Value> {
        self.call(
            EngineMethod::UpdateIndexPrice,
            serde_json::to_value(request)?,
        )
        .await
    }
}

#[async_trait::async_trait]
impl<T: EngineRpc + ?Sized> EngineRpc for std::sync::Arc<T> {
    async fn call(&self, method: EngineMethod, payload: Value) -> Result<Value> {
        T::call(self, method, payload).await
    }
}
