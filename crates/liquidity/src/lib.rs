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

//! # Liquidity Module
//!
//! The relay's locally cached view of per-market order book liquidity.
//!
//! [`LiquidityIngest`] holds the one long-lived subscription to the
//! engine's push stream: full bid/ask snapshots replace the cached books,
//! are persisted, and evict orders whose ids vanished from a market's
//! active set. [`BroadcastPump`] ticks on a fixed period, asks every book
//! for the side(s) that changed since the previous tick, and fans the
//! compact deltas (plus buffered fill and price feed events) out to every
//! connected subscriber.
//!
//! Both halves mutate the same book registry behind one async mutex, so a
//! pump tick never observes a market's snapshot mid-update.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod book;
mod broadcast;
mod ingest;

pub use book::{OrderBook, OrderBookRegistry};
pub use broadcast::{BroadcastPump, SubscriberRegistry};
pub use ingest::LiquidityIngest;
