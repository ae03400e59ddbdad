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

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use crate::OrderBookRegistry;
use veil_relay_context::RelayerContext;
use veil_relay_store::{LiquidationStore, LiquidityStore, OrderStore};
use veil_relay_types::{
    LiquidationRow, LiquiditySnapshot, MarketLiquidityUpdate, PositionTuple,
    StreamHandshake,
};
use veil_relay_utils::probe;

/// The one long-lived subscriber to the engine's push stream.
///
/// Owns the connection exclusively: the reconnect loop is the only place a
/// new connection is attempted, and the identifying handshake is re-sent
/// exactly once per (re)connect. Until a reconnect succeeds the broadcast
/// pump keeps ticking on the stale cached snapshot.
pub struct LiquidityIngest {
    ctx: RelayerContext,
    books: Arc<Mutex<OrderBookRegistry>>,
}

impl LiquidityIngest {
    /// Creates the ingest over the shared book registry.
    pub fn new(
        ctx: RelayerContext,
        books: Arc<Mutex<OrderBookRegistry>>,
    ) -> Self {
        Self { ctx, books }
    }

    /// Runs the subscription, reconnecting with exponential backoff
    /// (100ms doubling to a 30s ceiling) whenever the stream drops.
    pub async fn run(self) -> veil_relay_utils::Result<()> {
        let stream_url = self.ctx.config.engine.stream_url.clone();
        let mut backoff = Duration::from_millis(100);
        let max_backoff = Duration::from_secs(30);
        loop {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::LiquidityIngest,
                connecting = %stream_url,
            );
            let stream =
                match tokio_tungstenite::connect_async(stream_url.as_str()).await
                {
                    Ok((stream, _)) => {
                        backoff = Duration::from_millis(100);
                        tracing::info!("connected to engine push stream");
                        stream
                    }
                    Err(e) => {
                        tracing::error!(
                            "push stream connect failed: {}, retrying in {:?}",
                            e,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(max_backoff);
                        continue;
                    }
                };
            let (mut write, mut read) = stream.split();

            // identify ourselves before the engine sends anything.
            let handshake = StreamHandshake {
                subscriber_id: self.ctx.config.engine.subscriber_id.clone(),
                config_code: self.ctx.config.engine.config_code.clone(),
            };
            let handshake = match serde_json::to_string(&handshake) {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!("handshake serialization failed: {}", e);
                    return Err(e.into());
                }
            };
            if let Err(e) = write.send(Message::Text(handshake)).await {
                tracing::error!("handshake send failed: {}", e);
                continue;
            }

            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        self.handle_frame(&text).await;
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(_)) => {
                        tracing::warn!("engine closed the push stream");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("push stream read error: {}", e);
                        break;
                    }
                }
            }

            tracing::warn!(
                "push stream disconnected, reconnecting in {:?}",
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Handles one frame from the engine, branching on its `message_id`.
    /// Malformed frames are logged and skipped.
    pub async fn handle_frame(&self, text: &str) {
        let message: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("unparseable push frame: {}", e);
                return;
            }
        };
        match message["message_id"].as_str() {
            Some("LIQUIDITY_UPDATE") => {
                self.handle_liquidity_update(&message).await;
            }
            Some("SWAP_FILLED") => {
                self.ctx.fill_events().lock().await.push(message);
            }
            Some("NEW_POSITIONS") => {
                self.handle_new_positions(&message);
            }
            other => {
                tracing::trace!(message_id = ?other, "ignoring push frame");
            }
        }
    }

    /// A liquidity snapshot: replace the cached book, persist the
    /// snapshot row, and evict orders that vanished from the market's
    /// active set, in the same update cycle.
    async fn handle_liquidity_update(&self, message: &serde_json::Value) {
        let updates: Vec<MarketLiquidityUpdate> =
            match serde_json::from_value(message["liquidity"].clone()) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!("malformed liquidity update: {}", e);
                    return;
                }
            };
        let store = self.ctx.store();
        let mut books = self.books.lock().await;
        for update in updates {
            let Some(book) = books.book_mut(update.market) else {
                tracing::warn!(
                    market = update.market,
                    "liquidity update for unconfigured market"
                );
                continue;
            };
            let evicted = book.apply_snapshot(
                update.bid_liquidity.clone(),
                update.ask_liquidity.clone(),
            );
            let snapshot = LiquiditySnapshot {
                bid: update.bid_liquidity,
                ask: update.ask_liquidity,
            };
            // persistence failures leave the in-memory path running; the
            // next restore resynchronizes.
            if let Err(e) =
                store.insert_liquidity(update.class, update.market, &snapshot)
            {
                tracing::error!(
                    market = update.market,
                    "failed to persist liquidity snapshot: {}",
                    e
                );
            }
            for order_id in evicted {
                if let Err(e) = store.delete_order(update.class, order_id) {
                    tracing::error!(
                        order_id,
                        "failed to evict stale order: {}",
                        e
                    );
                }
            }
        }
        drop(books);
        self.ctx
            .metrics
            .lock()
            .await
            .liquidity_updates_received
            .inc();
    }

    /// Up to two new positions per frame, upserted into the liquidation
    /// tracking table.
    fn handle_new_positions(&self, message: &serde_json::Value) {
        for key in ["position1", "position2"] {
            let value = &message[key];
            if value.is_null() {
                continue;
            }
            let tuple: PositionTuple =
                match serde_json::from_value(value.clone()) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!("malformed {} tuple: {}", key, e);
                        continue;
                    }
                };
            let (address, index, synthetic_token, is_long, liquidation_price) =
                tuple;
            let row = LiquidationRow {
                position_index: index,
                position_address: address,
                synthetic_token,
                is_long,
                liquidation_price,
            };
            if let Err(e) = self.ctx.store().upsert_liquidation(&row) {
                tracing::error!(
                    position_index = index,
                    "failed to upsert liquidation row: {}",
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veil_engine_client::MockedEngineClient;
    use veil_relay_store::SledStore;
    use veil_relay_types::{MarketClass, SpotOrderRecord};

    fn test_context() -> RelayerContext {
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
        RelayerContext::new(
            config,
            SledStore::temporary().unwrap(),
            Arc::new(MockedEngineClient::new()),
        )
        .unwrap()
    }

    fn ingest_for(ctx: &RelayerContext) -> LiquidityIngest {
        let books = Arc::new(Mutex::new(OrderBookRegistry::new(
            ctx.config.all_markets().collect::<Vec<_>>(),
        )));
        LiquidityIngest::new(ctx.clone(), books)
    }

    fn spot_order(order_id: u64) -> SpotOrderRecord {
        SpotOrderRecord {
            order_id,
            expiration_timestamp: 1_700_100_000,
            token_spent: 12345,
            token_received: 54321,
            amount_spent: 1,
            amount_received: 1,
            fee_limit: 1,
            spot_note_info: None,
            order_tab: None,
            signature: json!([]),
            user_id: 1,
        }
    }

    #[tokio::test]
    async fn snapshot_updates_cache_store_and_evicts_vanished_orders() {
        let ctx = test_context();
        let ingest = ingest_for(&ctx);
        for id in [1, 2, 3] {
            ctx.store().insert_spot_order(&spot_order(id)).unwrap();
        }

        let first = json!({
            "message_id": "LIQUIDITY_UPDATE",
            "liquidity": [{
                "market": 11,
                "type": "spot",
                "bid_liquidity": [[100, 1, 0, 1], [99, 1, 0, 2]],
                "ask_liquidity": [[101, 1, 0, 3]],
            }],
        });
        ingest.handle_frame(&first.to_string()).await;

        // snapshot persisted
        let stored = ctx
            .store()
            .get_liquidity(MarketClass::Spot, 11)
            .unwrap()
            .unwrap();
        assert_eq!(stored.bid.len(), 2);
        assert_eq!(stored.ask.len(), 1);
        // nothing evicted yet
        assert_eq!(ctx.store().spot_orders().unwrap().len(), 3);

        // id 1 drops out of the active set
        let second = json!({
            "message_id": "LIQUIDITY_UPDATE",
            "liquidity": [{
                "market": 11,
                "type": "spot",
                "bid_liquidity": [[99, 1, 0, 2]],
                "ask_liquidity": [[101, 1, 0, 3]],
            }],
        });
        ingest.handle_frame(&second.to_string()).await;

        let remaining = ctx.store().spot_orders().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains_key(&1));
    }

    #[tokio::test]
    async fn fills_are_buffered_until_the_next_tick() {
        let ctx = test_context();
        let ingest = ingest_for(&ctx);
        let fill = json!({
            "message_id": "SWAP_FILLED",
            "type": "spot",
            "asset": 12345,
            "amount": 10,
            "price": 64_000,
        });
        ingest.handle_frame(&fill.to_string()).await;
        let buffered = ctx.fill_events();
        let buffered = buffered.lock().await;
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0]["asset"], 12345);
    }

    #[tokio::test]
    async fn new_positions_upsert_liquidation_rows() {
        let ctx = test_context();
        let ingest = ingest_for(&ctx);
        let frame = json!({
            "message_id": "NEW_POSITIONS",
            "position1": ["0xaddr1", 3, 12345, true, 52_000],
            "position2": null,
        });
        ingest.handle_frame(&frame.to_string()).await;

        let rows = ctx.store().liquidations().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position_index, 3);
        assert!(rows[0].is_long);

        // the same index is replaced, not duplicated
        let frame = json!({
            "message_id": "NEW_POSITIONS",
            "position1": ["0xaddr1", 3, 12345, true, 50_000],
        });
        ingest.handle_frame(&frame.to_string()).await;
        let rows = ctx.store().liquidations().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].liquidation_price, 50_000);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let ctx = test_context();
        let ingest = ingest_for(&ctx);
        ingest.handle_frame("not json at all").await;
        ingest
            .handle_frame(&json!({"message_id": "LIQUIDITY_UPDATE", "liquidity": "nope"}).to_string())
            .await;
        ingest
            .handle_frame(&json!({"message_id": "SOMETHING_ELSE"}).to_string())
            .await;
        // no state was touched
        assert!(ctx.store().spot_orders().unwrap().is_empty());
        assert!(ctx.fill_events().lock().await.is_empty());
    }
}
