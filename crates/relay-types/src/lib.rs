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

//! # Relay Types Module
//!
//! Domain types shared across the relay workspace: request kinds and
//! correlation ids, persisted order records, order book liquidity entries,
//! and the wire messages exchanged with the engine and with push
//! subscribers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Engine and subscriber wire messages.
pub mod engine;
/// Request kinds and correlation ids.
pub mod kind;
/// Order book liquidity entries and snapshots.
pub mod liquidity;
/// Persisted order records.
pub mod orders;
/// Aggregated market statistics.
pub mod stats;

pub use engine::*;
pub use kind::*;
pub use liquidity::*;
pub use orders::*;
pub use stats::*;

/// Identifier of a spot or perpetual market.
pub type MarketId = u32;

/// Numeric code of a token known to the engine.
pub type TokenId = u32;
