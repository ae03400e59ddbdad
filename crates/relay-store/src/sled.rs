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

use core::fmt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{
    DeadLetter, DeadLetterStore, LiquidationStore, LiquidityStore, OrderStore,
    QueueKey, QueueStore,
};
use veil_relay_types::{
    LiquidationRow, LiquiditySnapshot, MarketClass, MarketId, PerpOrderRecord,
    SpotOrderRecord, WorkItem,
};

/// SledStore is the relay's durable store, backed by a
/// [Sled](https://sled.rs)-based database.
///
/// Logical tables, one sled tree each:
/// - `spot_orders` / `perp_orders`: open orders keyed by big-endian
///   `order_id` bytes.
/// - `spot_liquidity` / `perp_liquidity`: one snapshot row per market,
///   keyed by big-endian `market_id` bytes.
/// - `liquidations`: liquidation tracking rows keyed by position index.
/// - `dead_letter`: terminally failed work items, in failure order.
/// - `queue_*`: the durable FIFO work and reply queues.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = ::sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(::sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> crate::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn order_tree(&self, class: MarketClass) -> crate::Result<sled::Tree> {
        let name = match class {
            MarketClass::Spot => "spot_orders",
            MarketClass::Perpetual => "perp_orders",
        };
        Ok(self.db.open_tree(name)?)
    }

    fn liquidity_tree(&self, class: MarketClass) -> crate::Result<sled::Tree> {
        let name = match class {
            MarketClass::Spot => "spot_liquidity",
            MarketClass::Perpetual => "perp_liquidity",
        };
        Ok(self.db.open_tree(name)?)
    }

    fn insert_order<T: Serialize>(
        &self,
        class: MarketClass,
        order_id: u64,
        order: &T,
    ) -> crate::Result<()> {
        let tree = self.order_tree(class)?;
        let bytes = serde_json::to_vec(order)?;
        tree.insert(order_id.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn get_order<T: DeserializeOwned>(
        &self,
        class: MarketClass,
        order_id: u64,
    ) -> crate::Result<Option<T>> {
        let tree = self.order_tree(class)?;
        match tree.get(order_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_orders<T: DeserializeOwned>(
        &self,
        class: MarketClass,
    ) -> crate::Result<HashMap<u64, T>> {
        let tree = self.order_tree(class)?;
        let mut orders = HashMap::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let id_bytes: [u8; 8] = match key.as_ref().try_into() {
                Ok(b) => b,
                Err(_) => continue,
            };
            let order_id = u64::from_be_bytes(id_bytes);
            let order = serde_json::from_slice(&value)?;
            orders.insert(order_id, order);
        }
        Ok(orders)
    }
}

impl OrderStore for SledStore {
    #[tracing::instrument(skip(self, order), fields(order_id = order.order_id))]
    fn insert_spot_order(&self, order: &SpotOrderRecord) -> crate::Result<()> {
        self.insert_order(MarketClass::Spot, order.order_id, order)
    }

    fn get_spot_order(
        &self,
        order_id: u64,
    ) -> crate::Result<Option<SpotOrderRecord>> {
        self.get_order(MarketClass::Spot, order_id)
    }

    #[tracing::instrument(skip(self))]
    fn delete_spot_order(&self, order_id: u64) -> crate::Result<()> {
        let tree = self.order_tree(MarketClass::Spot)?;
        tree.remove(order_id.to_be_bytes())?;
        Ok(())
    }

    fn spot_orders(&self) -> crate::Result<HashMap<u64, SpotOrderRecord>> {
        self.scan_orders(MarketClass::Spot)
    }

    #[tracing::instrument(skip(self, order), fields(order_id = order.order_id))]
    fn insert_perp_order(&self, order: &PerpOrderRecord) -> crate::Result<()> {
        self.insert_order(MarketClass::Perpetual, order.order_id, order)
    }

    fn get_perp_order(
        &self,
        order_id: u64,
    ) -> crate::Result<Option<PerpOrderRecord>> {
        self.get_order(MarketClass::Perpetual, order_id)
    }

    #[tracing::instrument(skip(self))]
    fn delete_perp_order(&self, order_id: u64) -> crate::Result<()> {
        let tree = self.order_tree(MarketClass::Perpetual)?;
        tree.remove(order_id.to_be_bytes())?;
        Ok(())
    }

    fn perp_orders(&self) -> crate::Result<HashMap<u64, PerpOrderRecord>> {
        self.scan_orders(MarketClass::Perpetual)
    }
}

impl LiquidityStore for SledStore {
    #[tracing::instrument(skip(self, snapshot))]
    fn insert_liquidity(
        &self,
        class: MarketClass,
        market_id: MarketId,
        snapshot: &LiquiditySnapshot,
    ) -> crate::Result<()> {
        let tree = self.liquidity_tree(class)?;
        let bytes = serde_json::to_vec(snapshot)?;
        tree.insert(market_id.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn get_liquidity(
        &self,
        class: MarketClass,
        market_id: MarketId,
    ) -> crate::Result<Option<LiquiditySnapshot>> {
        let tree = self.liquidity_tree(class)?;
        match tree.get(market_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn liquidity_snapshots(
        &self,
        class: MarketClass,
    ) -> crate::Result<BTreeMap<MarketId, LiquiditySnapshot>> {
        let tree = self.liquidity_tree(class)?;
        let mut snapshots = BTreeMap::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let id_bytes: [u8; 4] = match key.as_ref().try_into() {
                Ok(b) => b,
                Err(_) => continue,
            };
            let market_id = MarketId::from_be_bytes(id_bytes);
            let snapshot = serde_json::from_slice(&value)?;
            snapshots.insert(market_id, snapshot);
        }
        Ok(snapshots)
    }

    fn seed_liquidity(
        &self,
        class: MarketClass,
        market_id: MarketId,
    ) -> crate::Result<()> {
        let tree = self.liquidity_tree(class)?;
        if tree.contains_key(market_id.to_be_bytes())? {
            return Ok(());
        }
        let empty = serde_json::to_vec(&LiquiditySnapshot::default())?;
        tree.insert(market_id.to_be_bytes(), empty)?;
        Ok(())
    }
}

impl LiquidationStore for SledStore {
    #[tracing::instrument(skip(self, row), fields(position_index = row.position_index))]
    fn upsert_liquidation(&self, row: &LiquidationRow) -> crate::Result<()> {
        let tree = self.db.open_tree("liquidations")?;
        let bytes = serde_json::to_vec(row)?;
        tree.insert(row.position_index.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn get_liquidation(
        &self,
        position_index: u64,
    ) -> crate::Result<Option<LiquidationRow>> {
        let tree = self.db.open_tree("liquidations")?;
        match tree.get(position_index.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn liquidations(&self) -> crate::Result<Vec<LiquidationRow>> {
        let tree = self.db.open_tree("liquidations")?;
        let mut rows = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }
}

impl DeadLetterStore for SledStore {
    #[tracing::instrument(skip_all, fields(correlation_id = %item.correlation_id))]
    fn record_dead_letter(
        &self,
        item: &WorkItem,
        reason: &str,
    ) -> crate::Result<()> {
        let tree = self.db.open_tree("dead_letter")?;
        let letter = DeadLetter {
            item: item.clone(),
            reason: reason.to_owned(),
        };
        let bytes = serde_json::to_vec(&letter)?;
        let idx = self.db.generate_id()?;
        tree.insert(idx.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn dead_letters(&self) -> crate::Result<Vec<DeadLetter>> {
        let tree = self.db.open_tree("dead_letter")?;
        let mut letters = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            letters.push(serde_json::from_slice(&value)?);
        }
        Ok(letters)
    }
}

/// SledQueueKey is a key for a queue in Sled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SledQueueKey {
    /// The durable work item queue consumed by the worker. A single
    /// partition, so submission order is preserved end to end.
    WorkItems,
    /// The reply queue carrying worker results back to the request relay.
    Replies,
}

impl fmt::Display for SledQueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkItems => write!(f, "WorkItems"),
            Self::Replies => write!(f, "Replies"),
        }
    }
}

impl QueueKey for SledQueueKey {
    fn queue_name(&self) -> String {
        match self {
            Self::WorkItems => String::from("work_items"),
            Self::Replies => String::from("replies"),
        }
    }
}

/// Queue entries live under this prefix followed by a monotonically
/// increasing big-endian index, so a prefix scan yields FIFO order.
const QUEUE_ITEM_PREFIX: &[u8; 4] = b"item";
/// The tree-local key holding the index handed to the last enqueued item.
const QUEUE_TAIL_KEY: &[u8] = b"last_item_idx";

fn queue_item_key(idx: u64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(QUEUE_ITEM_PREFIX);
    key[4..].copy_from_slice(&idx.to_be_bytes());
    key
}

impl<T> QueueStore<T> for SledStore
where
    T: Serialize + DeserializeOwned + Clone,
{
    type Key = SledQueueKey;

    #[tracing::instrument(skip_all, fields(key = %key))]
    fn enqueue_item(&self, key: Self::Key, item: T) -> crate::Result<()> {
        let tree = self.db.open_tree(format!("queue_{}", key.queue_name()))?;
        let bytes = serde_json::to_vec(&item)?;
        // the tail bump and the item insert commit together, so a crash
        // cannot leave a gap or hand out the same index twice.
        tree.transaction::<_, _, std::io::Error>(|tx| {
            let next_idx = match tx.get(QUEUE_TAIL_KEY)? {
                Some(raw) => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&raw);
                    u64::from_be_bytes(buf) + 1
                }
                None => 1u64,
            };
            tx.insert(QUEUE_TAIL_KEY, &next_idx.to_be_bytes())?;
            tx.insert(&queue_item_key(next_idx), bytes.as_slice())?;
            tracing::trace!("enqueue item under key = {}", key);
            Ok(())
        })?;
        // queued work must survive a process restart.
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key = %key))]
    fn dequeue_item(&self, key: Self::Key) -> crate::Result<Option<T>> {
        let tree = self.db.open_tree(format!("queue_{}", key.queue_name()))?;
        let head = tree.scan_prefix(QUEUE_ITEM_PREFIX).next().transpose()?;
        let Some((head_key, value)) = head else {
            return Ok(None);
        };
        let item = serde_json::from_slice(&value)?;
        tree.remove(head_key)?;
        self.db.flush()?;
        Ok(Some(item))
    }

    #[tracing::instrument(skip_all, fields(key = %key))]
    fn peek_item(&self, key: Self::Key) -> crate::Result<Option<T>> {
        let tree = self.db.open_tree(format!("queue_{}", key.queue_name()))?;
        let head = tree.scan_prefix(QUEUE_ITEM_PREFIX).next().transpose()?;
        match head {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn queue_len(&self, key: Self::Key) -> crate::Result<usize> {
        let tree = self.db.open_tree(format!("queue_{}", key.queue_name()))?;
        Ok(tree.scan_prefix(QUEUE_ITEM_PREFIX).count())
    }
}
