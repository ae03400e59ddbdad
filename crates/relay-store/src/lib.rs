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

//! # Relay Store Module
//!
//! Durable storage for the relay. The relay, not the engine, is the source
//! of truth for open orders across restarts: accepted submissions are
//! persisted here, evicted when they vanish from the engine's live
//! liquidity, and re-shipped to the engine by the startup restore
//! protocol. The same database backs the durable work/reply queues that
//! decouple client requests from engine dispatch.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use veil_relay_types::{
    LiquidationRow, LiquiditySnapshot, MarketClass, MarketId, PerpOrderRecord,
    SpotOrderRecord, WorkItem,
};
use veil_relay_utils::Result;

/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
pub use self::sled::SledStore;

/// Keyed access to the persisted open-order tables, one per order class.
///
/// Writes are upserts: re-inserting an id the engine re-reported (partial
/// fill, duplicate queue delivery) overwrites the previous row, which is
/// what makes the at-least-once delivery of the work queue safe.
pub trait OrderStore: Clone + Send + Sync {
    /// Upserts a spot order under its engine-assigned id.
    fn insert_spot_order(&self, order: &SpotOrderRecord) -> Result<()>;
    /// Fetches a spot order by id.
    fn get_spot_order(&self, order_id: u64) -> Result<Option<SpotOrderRecord>>;
    /// Deletes a spot order by id. Deleting an absent id is a no-op.
    fn delete_spot_order(&self, order_id: u64) -> Result<()>;
    /// Scans the whole spot order table.
    fn spot_orders(&self) -> Result<HashMap<u64, SpotOrderRecord>>;

    /// Upserts a perpetual order under its engine-assigned id.
    fn insert_perp_order(&self, order: &PerpOrderRecord) -> Result<()>;
    /// Fetches a perpetual order by id.
    fn get_perp_order(&self, order_id: u64) -> Result<Option<PerpOrderRecord>>;
    /// Deletes a perpetual order by id. Deleting an absent id is a no-op.
    fn delete_perp_order(&self, order_id: u64) -> Result<()>;
    /// Scans the whole perpetual order table.
    fn perp_orders(&self) -> Result<HashMap<u64, PerpOrderRecord>>;

    /// Deletes an order id from the table matching the market class.
    fn delete_order(&self, class: MarketClass, order_id: u64) -> Result<()> {
        match class {
            MarketClass::Spot => self.delete_spot_order(order_id),
            MarketClass::Perpetual => self.delete_perp_order(order_id),
        }
    }
}

/// One liquidity snapshot row per market, replaced wholesale on every
/// engine push.
pub trait LiquidityStore: Clone + Send + Sync {
    /// Replaces a market's persisted snapshot.
    fn insert_liquidity(
        &self,
        class: MarketClass,
        market_id: MarketId,
        snapshot: &LiquiditySnapshot,
    ) -> Result<()>;
    /// Fetches a market's persisted snapshot.
    fn get_liquidity(
        &self,
        class: MarketClass,
        market_id: MarketId,
    ) -> Result<Option<LiquiditySnapshot>>;
    /// Scans all snapshots of a class, ordered by market id.
    fn liquidity_snapshots(
        &self,
        class: MarketClass,
    ) -> Result<BTreeMap<MarketId, LiquiditySnapshot>>;
    /// Inserts an empty snapshot row unless the market already has one, so
    /// restore and ingest always find a row for configured markets.
    fn seed_liquidity(
        &self,
        class: MarketClass,
        market_id: MarketId,
    ) -> Result<()>;
}

/// The liquidation tracking table, fed by `NEW_POSITIONS` push events.
pub trait LiquidationStore: Clone + Send + Sync {
    /// Upserts a liquidation row under its position index.
    fn upsert_liquidation(&self, row: &LiquidationRow) -> Result<()>;
    /// Fetches a liquidation row by position index.
    fn get_liquidation(
        &self,
        position_index: u64,
    ) -> Result<Option<LiquidationRow>>;
    /// Scans the whole liquidation table.
    fn liquidations(&self) -> Result<Vec<LiquidationRow>>;
}

/// A work item that ended in a terminal failure, kept for forensics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The failed work item, verbatim.
    pub item: WorkItem,
    /// Why processing failed.
    pub reason: String,
}

/// A sink for work items that failed terminally and were not requeued.
pub trait DeadLetterStore: Clone + Send + Sync {
    /// Appends a failed item with its failure reason.
    fn record_dead_letter(&self, item: &WorkItem, reason: &str) -> Result<()>;
    /// Scans the dead letter sink in failure order.
    fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
}

/// A trait for retrieving queue keys
pub trait QueueKey {
    /// The Queue name, used as a prefix for the keys.
    fn queue_name(&self) -> String;
}

/// A Queue Store is a simple trait that help storing items in a queue.
/// The queue is a FIFO queue, that can be used to store anything that can
/// be serialized.
///
/// There is a simple API to get the items from the queue, from a
/// background task for example.
pub trait QueueStore<Item>
where
    Item: Serialize + DeserializeOwned + Clone,
{
    /// The type of the queue key.
    type Key: QueueKey;
    /// Insert an item into the queue.
    fn enqueue_item(&self, key: Self::Key, item: Item) -> Result<()>;
    /// Get an item from the queue, and removes it.
    fn dequeue_item(&self, key: Self::Key) -> Result<Option<Item>>;
    /// Get an item from the queue, without removing it.
    fn peek_item(&self, key: Self::Key) -> Result<Option<Item>>;
    /// The number of items waiting in the queue.
    fn queue_len(&self, key: Self::Key) -> Result<usize>;
}

impl<S, T> QueueStore<T> for Arc<S>
where
    S: QueueStore<T>,
    T: Serialize + DeserializeOwned + Clone,
{
    type Key = S::Key;

    fn enqueue_item(&self, key: Self::Key, item: T) -> Result<()> {
        S::enqueue_item(self, key, item)
    }

    fn dequeue_item(&self, key: Self::Key) -> Result<Option<T>> {
        S::dequeue_item(self, key)
    }

    fn peek_item(&self, key: Self::Key) -> Result<Option<T>> {
        S::peek_item(self, key)
    }

    fn queue_len(&self, key: Self::Key) -> Result<usize> {
        S::queue_len(self, key)
    }
}
