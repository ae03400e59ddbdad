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

//! # Market Stats Module
//!
//! The relay's periodic aggregation pipelines:
//! - [`StatsAggregator`] recomputes trailing-24h volume and trade counts
//!   from the historical trade log and keeps the funding snapshot fresh by
//!   delegating `get_funding_info` requests through the durable queue.
//! - [`PriceFeedPoller`] keeps the 24h price change cache warm from the
//!   external market data API, for the `24H_PRICE_UPDATE` broadcasts.
//! - [`OracleFeed`] fetches external reference prices, packs and signs a
//!   per-token index price observation, and submits it to the engine.
//!
//! External sources sit behind the [`PriceSource`] and
//! [`TradeLogBackend`] traits so every loop is testable against mocked
//! backends.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregator;
mod feeds;
mod oracle;
/// External price API backends.
pub mod price_source;
/// Historical trade log backends.
pub mod trade_log;

pub use aggregator::StatsAggregator;
pub use feeds::PriceFeedPoller;
pub use oracle::OracleFeed;
pub use price_source::{HttpPriceSource, MockedPriceSource, PriceSource};
pub use trade_log::{HttpTradeLog, MockedTradeLog, TradeFill, TradeLogBackend};
