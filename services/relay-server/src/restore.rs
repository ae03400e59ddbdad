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

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;

use veil_engine_client::EngineRpc;
use veil_relay_context::RelayerContext;
use veil_relay_store::{LiquidityStore, OrderStore, SledStore};
use veil_relay_types::{
    LiquidityEntry, LiquiditySnapshot, MarketClass, MarketId, MarketRestore,
    RestoreEntry, RestoreOrderBookRequest,
};
use veil_relay_utils::retry::FixedInterval;
use veil_relay_utils::{probe, Error, Result};

/// How long to wait between attempts of the bulk restore call.
const RESTORE_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// How many times the bulk restore call is retried before giving up.
const RESTORE_RETRY_COUNT: usize = 3;

/// Re-seeds the engine's in-memory book from relay-held persistent state.
///
/// Runs once at startup, before the background services ignite: the four
/// persisted tables are scanned concurrently (a scan failure aborts the
/// restore instead of hanging it), each market's liquidity entries are
/// joined to their order records, and the whole payload ships in a single
/// `restore_orderbook` call so the engine rebuilds atomically relative to
/// the relay's view. Entries whose order record is missing are dropped,
/// never an error. The engine's answer is logged and not otherwise
/// validated.
pub struct RestoreProtocol {
    ctx: RelayerContext,
}

impl RestoreProtocol {
    /// Creates the protocol runner.
    pub fn new(ctx: RelayerContext) -> Self {
        Self { ctx }
    }

    /// Scans, assembles and ships the restore payload.
    pub async fn run(&self) -> Result<()> {
        let request = self.collect().await?;
        let spot_markets = request.spot_order_restore_messages.len();
        let perp_markets = request.perp_order_restore_messages.len();

        let engine = self.ctx.engine();
        let policy =
            FixedInterval::new(RESTORE_RETRY_INTERVAL, RESTORE_RETRY_COUNT);
        let response = backoff::future::retry(policy, || {
            let engine = engine.clone();
            let request = request.clone();
            async move {
                engine
                    .restore_orderbook(request)
                    .await
                    .map_err(backoff::Error::transient)
            }
        })
        .await?;

        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Restore,
            spot_markets,
            perp_markets,
            response = %response,
        );
        tracing::info!("order book restore submitted");
        Ok(())
    }

    /// Runs the four table scans concurrently and joins them into the
    /// bulk restore request. The first scan error propagates.
    pub async fn collect(&self) -> Result<RestoreOrderBookRequest> {
        let store = self.ctx.store();
        let (spot_orders, perp_orders, spot_liquidity, perp_liquidity) = tokio::try_join!(
            scan(store.clone(), |s| {
                s.spot_orders().map(order_payloads_by_id)
            }),
            scan(store.clone(), |s| {
                s.perp_orders().map(order_payloads_by_id)
            }),
            scan(store.clone(), |s| {
                s.liquidity_snapshots(MarketClass::Spot)
            }),
            scan(store.clone(), |s| {
                s.liquidity_snapshots(MarketClass::Perpetual)
            }),
        )?;

        Ok(RestoreOrderBookRequest {
            spot_order_restore_messages: market_restores(
                spot_liquidity,
                &spot_orders,
            ),
            perp_order_restore_messages: market_restores(
                perp_liquidity,
                &perp_orders,
            ),
        })
    }
}

/// Runs one blocking table scan off the async runtime.
async fn scan<T, F>(store: SledStore, scan_fn: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SledStore) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || scan_fn(&store))
        .await
        .map_err(|e| Error::RestoreFailed(format!("scan task failed: {e}")))?
}

/// Serializes order records to their original submission payloads. The
/// assigned id travels at the top of each restore entry, not inside the
/// payload.
fn order_payloads_by_id<R: serde::Serialize>(
    orders: HashMap<u64, R>,
) -> HashMap<u64, Value> {
    orders
        .into_iter()
        .filter_map(|(order_id, record)| {
            let mut payload = serde_json::to_value(record).ok()?;
            if let Some(fields) = payload.as_object_mut() {
                fields.remove("order_id");
            }
            Some((order_id, payload))
        })
        .collect()
}

/// Builds one restore message per persisted market, in market id order.
fn market_restores(
    liquidity: BTreeMap<MarketId, LiquiditySnapshot>,
    orders: &HashMap<u64, Value>,
) -> Vec<MarketRestore> {
    liquidity
        .into_iter()
        .map(|(market_id, snapshot)| MarketRestore {
            market_id,
            bid_order_restore_messages: restore_side(&snapshot.bid, orders),
            ask_order_restore_messages: restore_side(&snapshot.ask, orders),
        })
        .collect()
}

/// Joins one side's liquidity entries to their order payloads, dropping
/// entries whose record went missing.
fn restore_side(
    entries: &[LiquidityEntry],
    orders: &HashMap<u64, Value>,
) -> Vec<RestoreEntry> {
    entries
        .iter()
        .filter_map(|entry| {
            let order = orders.get(&entry.order_id)?;
            Some(RestoreEntry {
                order_id: entry.order_id,
                price: entry.price,
                amount: entry.size,
                timestamp: entry.timestamp,
                order: order.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use veil_engine_client::{EngineMethod, MockedEngineClient};
    use veil_relay_queue::Worker;
    use veil_relay_store::sled::SledQueueKey;
    use veil_relay_store::QueueStore;
    use veil_relay_types::{RequestKind, SpotOrderRecord, WorkItem};

    fn test_context(engine: Arc<MockedEngineClient>) -> RelayerContext {
        let toml = r#"
            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"
        "#;
        let config: veil_relay_config::RelayConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        RelayerContext::new(config, SledStore::temporary().unwrap(), engine)
            .unwrap()
    }

    fn spot_order(order_id: u64) -> SpotOrderRecord {
        SpotOrderRecord {
            order_id,
            expiration_timestamp: 1_700_100_000,
            token_spent: 12345,
            token_received: 54321,
            amount_spent: 1_000_000,
            amount_received: 15_000_000,
            fee_limit: 500,
            spot_note_info: None,
            order_tab: None,
            signature: json!(["0xaa", "0xbb"]),
            user_id: 7,
        }
    }

    #[tokio::test]
    async fn restore_joins_liquidity_to_records_and_drops_unknown_ids() {
        let engine = Arc::new(MockedEngineClient::new());
        let ctx = test_context(engine.clone());
        let store = ctx.store();
        store.insert_spot_order(&spot_order(1)).unwrap();
        store.insert_spot_order(&spot_order(2)).unwrap();
        store
            .insert_liquidity(
                MarketClass::Spot,
                11,
                &LiquiditySnapshot {
                    // id 9 has no record and must be dropped, not fail
                    bid: vec![(100, 5, 10, 1).into(), (99, 5, 10, 9).into()],
                    ask: vec![(101, 5, 10, 2).into()],
                },
            )
            .unwrap();

        RestoreProtocol::new(ctx).run().await.unwrap();

        let calls = engine.calls_to(EngineMethod::RestoreOrderbook);
        assert_eq!(calls.len(), 1);
        let spot = calls[0]["spot_order_restore_messages"].as_array().unwrap();
        assert_eq!(spot.len(), 1);
        let market = &spot[0];
        assert_eq!(market["market_id"], 11);
        let bids = market["bid_order_restore_messages"].as_array().unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0]["order_id"], 1);
        assert_eq!(bids[0]["price"], 100);
        assert_eq!(bids[0]["amount"], 5);
        // the payload is the original submission, without the id
        assert_eq!(bids[0]["order"]["token_spent"], 12345);
        assert!(bids[0]["order"].get("order_id").is_none());
        let asks = market["ask_order_restore_messages"].as_array().unwrap();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0]["order_id"], 2);
    }

    #[tokio::test]
    async fn empty_markets_restore_with_empty_sides() {
        let engine = Arc::new(MockedEngineClient::new());
        let ctx = test_context(engine.clone());
        ctx.store().seed_liquidity(MarketClass::Perpetual, 21).unwrap();

        RestoreProtocol::new(ctx).run().await.unwrap();

        let calls = engine.calls_to(EngineMethod::RestoreOrderbook);
        let perp = calls[0]["perp_order_restore_messages"].as_array().unwrap();
        assert_eq!(perp.len(), 1);
        assert_eq!(perp[0]["market_id"], 21);
        assert_eq!(
            perp[0]["bid_order_restore_messages"].as_array().unwrap().len(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restore_gives_up_after_the_retry_budget() {
        let engine = Arc::new(MockedEngineClient::new());
        for _ in 0..4 {
            engine.script_failure(
                EngineMethod::RestoreOrderbook,
                "engine not ready",
            );
        }
        let ctx = test_context(engine.clone());
        let result = RestoreProtocol::new(ctx).run().await;
        assert!(result.is_err());
        assert_eq!(engine.calls_to(EngineMethod::RestoreOrderbook).len(), 4);
    }

    #[tokio::test]
    async fn accepted_order_survives_into_the_next_restore() {
        // the end to end path: a submission is accepted and persisted, the
        // market's snapshot references it, and the next restore ships it
        // back to the engine with the original payload.
        let engine = Arc::new(MockedEngineClient::new());
        engine.script_reply(
            EngineMethod::SubmitLimitOrder,
            json!({"successful": true, "order_id": 42}),
        );
        let ctx = test_context(engine.clone());

        let payload = json!({
            "expiration_timestamp": 1_700_100_000u64,
            "token_spent": 12345,
            "token_received": 54321,
            "amount_spent": 1_000_000u64,
            "amount_received": 15_000_000u64,
            "fee_limit": 500u64,
            "signature": ["0xaa", "0xbb"],
            "user_id": 7u64,
        });
        ctx.store()
            .enqueue_item(
                SledQueueKey::WorkItems,
                WorkItem::new(RequestKind::SpotOrder, payload.clone()),
            )
            .unwrap();
        Worker::new(ctx.clone()).process_next().await.unwrap();

        // the engine's next liquidity push persists a snapshot holding 42
        ctx.store()
            .insert_liquidity(
                MarketClass::Spot,
                11,
                &LiquiditySnapshot {
                    bid: vec![(100, 1_000_000, 99, 42).into()],
                    ask: vec![],
                },
            )
            .unwrap();

        RestoreProtocol::new(ctx).run().await.unwrap();

        let calls = engine.calls_to(EngineMethod::RestoreOrderbook);
        let bids = calls[0]["spot_order_restore_messages"][0]
            ["bid_order_restore_messages"]
            .as_array()
            .unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0]["order_id"], 42);
        assert_eq!(bids[0]["order"]["amount_spent"], 1_000_000);
        assert_eq!(bids[0]["order"]["user_id"], 7);
    }
}
