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

//! Relay handlers for HTTP/Socket calls
//!
//! One POST route per client request kind, each a thin delegation into
//! [`RequestRelay`] answering `{"response": <engine reply>}`; a
//! `get_market_info` route served straight from the in-memory caches; the
//! subscriber WebSocket endpoint; and the metrics endpoint.

#![warn(missing_docs)]

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use veil_liquidity::SubscriberRegistry;
use veil_relay_context::RelayerContext;
use veil_relay_queue::RequestRelay;

/// Module handles relay API
pub mod routes;
/// Module handles the subscriber push channel
pub mod ws;

/// Everything the handlers need, threaded through axum state.
#[derive(Clone)]
pub struct AppState {
    /// The relay context.
    pub ctx: Arc<RelayerContext>,
    /// The client request delegation path.
    pub relay: RequestRelay,
    /// The push subscriber set fed by the broadcast pump.
    pub subscribers: SubscriberRegistry,
}

/// Builds the full client-facing router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/execute_deposit", post(routes::requests::execute_deposit))
        .route(
            "/execute_withdrawal",
            post(routes::requests::execute_withdrawal),
        )
        .route(
            "/submit_limit_order",
            post(routes::requests::submit_limit_order),
        )
        .route(
            "/submit_perpetual_order",
            post(routes::requests::submit_perpetual_order),
        )
        .route(
            "/submit_liquidation_order",
            post(routes::requests::submit_liquidation_order),
        )
        .route("/cancel_order", post(routes::requests::cancel_order))
        .route("/amend_order", post(routes::requests::amend_order))
        .route("/split_notes", post(routes::requests::split_notes))
        .route(
            "/change_position_margin",
            post(routes::requests::change_position_margin),
        )
        .route("/open_order_tab", post(routes::requests::open_order_tab))
        .route(
            "/modify_order_tab",
            post(routes::requests::modify_order_tab),
        )
        .route("/close_order_tab", post(routes::requests::close_order_tab))
        .route(
            "/register_onchain_mm",
            post(routes::requests::register_onchain_mm),
        )
        .route(
            "/add_liquidity_mm",
            post(routes::requests::add_liquidity_mm),
        )
        .route(
            "/remove_liquidity_mm",
            post(routes::requests::remove_liquidity_mm),
        )
        .route("/get_orders", post(routes::requests::get_orders))
        .route("/get_liquidity", post(routes::requests::get_liquidity))
        .route(
            "/update_index_price",
            post(routes::requests::update_index_price),
        )
        .route("/finalize_batch", post(routes::requests::finalize_batch))
        .route(
            "/get_market_info",
            post(routes::market_info::handle_market_info),
        )
        .route("/metrics", get(routes::metric::handle_metric_info))
        .route("/ws", get(ws::handle_subscriber_socket))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
