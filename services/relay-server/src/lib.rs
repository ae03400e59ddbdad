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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Veil Relay Crate
//!
//! The off-chain relay layer of the exchange. It sits between untrusted
//! HTTP clients and the authoritative matching/settlement engine:
//!
//! 1. Client requests become durably queued work items, processed one at
//!    a time against the engine and matched back to the waiting client by
//!    correlation id.
//! 2. The engine's push stream feeds a locally cached view of per-market
//!    liquidity; only the deltas are re-broadcast to subscribers.
//! 3. Open orders and liquidity snapshots are persisted locally: the
//!    relay, not the engine, is the durable source of truth across
//!    restarts, and the startup restore protocol re-seeds the engine's
//!    book from that state.
//! 4. Periodic loops refresh 24h market statistics and funding data, and
//!    submit signed external index prices to the engine.

/// Startup order book restore protocol.
pub mod restore;
/// A module for starting the long-running relay services.
pub mod service;

pub use veil_relay_utils::{Error, Result};
