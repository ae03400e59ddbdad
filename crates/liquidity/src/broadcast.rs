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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::OrderBookRegistry;
use veil_relay_context::RelayerContext;
use veil_relay_types::{FillBroadcast, LiquidityBroadcast, PriceBroadcast};
use veil_relay_utils::probe;

/// How many outbound messages a slow subscriber may have in flight before
/// it is considered dead and dropped.
const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    id: usize,
    sender: mpsc::Sender<String>,
}

/// The set of currently connected push subscribers.
///
/// Each subscriber is an mpsc sender whose receiving half is forwarded to
/// a websocket by its connection task. A subscriber that cannot accept a
/// message (gone, or persistently slow) is dropped from the set here, not
/// retried.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicUsize>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber, returning its id and the stream of outbound
    /// messages to forward into its connection.
    pub async fn subscribe(&self) -> (usize, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .await
            .push(Subscriber { id, sender });
        (id, receiver)
    }

    /// Removes a subscriber, typically when its connection closes.
    pub async fn unsubscribe(&self, id: usize) {
        self.subscribers.lock().await.retain(|s| s.id != id);
    }

    /// The number of live subscribers.
    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Whether no subscriber is connected.
    pub async fn is_empty(&self) -> bool {
        self.subscribers.lock().await.is_empty()
    }

    /// Fans a batch of messages out to every subscriber, dropping the
    /// ones that cannot accept them.
    async fn broadcast(&self, messages: &[String]) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|subscriber| {
            for message in messages {
                if subscriber.sender.try_send(message.clone()).is_err() {
                    tracing::debug!(
                        subscriber = subscriber.id,
                        "dropping unresponsive subscriber"
                    );
                    return false;
                }
            }
            true
        });
    }
}

/// The fixed-period broadcast loop.
///
/// Each tick diffs every cached book against its previous snapshot,
/// composes the compact `LIQUIDITY_UPDATE` message (changed sides only),
/// attaches buffered `SWAP_FILLED` events and the current
/// `24H_PRICE_UPDATE` summary, and fans everything out to the
/// subscribers.
pub struct BroadcastPump {
    ctx: RelayerContext,
    books: Arc<Mutex<OrderBookRegistry>>,
    subscribers: SubscriberRegistry,
}

impl BroadcastPump {
    /// Creates the pump over the shared book registry and subscriber set.
    pub fn new(
        ctx: RelayerContext,
        books: Arc<Mutex<OrderBookRegistry>>,
        subscribers: SubscriberRegistry,
    ) -> Self {
        Self {
            ctx,
            books,
            subscribers,
        }
    }

    /// Runs the pump until shutdown.
    pub async fn run(self) -> veil_relay_utils::Result<()> {
        let period =
            Duration::from_millis(self.ctx.config.intervals.broadcast_ms);
        let mut ticker = tokio::time::interval(period);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Broadcast,
            starting = true,
            period_ms = period.as_millis() as u64,
        );
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One broadcast cycle. Public so tests can drive the pump without
    /// the timer.
    pub async fn tick(&self) {
        let deltas = self.books.lock().await.poll_deltas();
        let fills = {
            let fill_events = self.ctx.fill_events();
            let mut fill_events = fill_events.lock().await;
            std::mem::take(&mut *fill_events)
        };
        let price_changes = {
            let feeds = self.ctx.price_feeds();
            let feeds = feeds.lock().await;
            feeds.clone()
        };

        let had_changes = !deltas.is_empty();
        let mut messages = Vec::with_capacity(3);
        let liquidity = LiquidityBroadcast {
            message_id: "LIQUIDITY_UPDATE",
            liquidity_updates: deltas,
        };
        match serde_json::to_string(&liquidity) {
            Ok(m) => messages.push(m),
            Err(e) => tracing::error!("broadcast serialization failed: {}", e),
        }
        if !fills.is_empty() {
            let fill_message = FillBroadcast {
                message_id: "SWAP_FILLED",
                fill_updates: fills,
            };
            match serde_json::to_string(&fill_message) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    tracing::error!("fill serialization failed: {}", e)
                }
            }
        }
        if !price_changes.is_empty() {
            let price_message = PriceBroadcast {
                message_id: "24H_PRICE_UPDATE",
                price_changes,
            };
            match serde_json::to_string(&price_message) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    tracing::error!("price feed serialization failed: {}", e)
                }
            }
        }

        self.subscribers.broadcast(&messages).await;

        let metrics = self.ctx.metrics.lock().await;
        metrics
            .connected_subscribers
            .set(self.subscribers.len().await as f64);
        if had_changes {
            metrics.broadcasts_sent.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use veil_engine_client::MockedEngineClient;
    use veil_relay_store::SledStore;
    use veil_relay_types::PriceChange;

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

    fn pump_for(ctx: &RelayerContext) -> (BroadcastPump, Arc<Mutex<OrderBookRegistry>>, SubscriberRegistry) {
        let books = Arc::new(Mutex::new(OrderBookRegistry::new(
            ctx.config.all_markets().collect::<Vec<_>>(),
        )));
        let subscribers = SubscriberRegistry::new();
        let pump = BroadcastPump::new(
            ctx.clone(),
            books.clone(),
            subscribers.clone(),
        );
        (pump, books, subscribers)
    }

    #[tokio::test]
    async fn a_tick_sends_changed_sides_and_drains_the_fill_buffer() {
        let ctx = test_context();
        let (pump, books, subscribers) = pump_for(&ctx);
        let (_id, mut rx) = subscribers.subscribe().await;

        books
            .lock()
            .await
            .book_mut(11)
            .unwrap()
            .apply_snapshot(vec![(100, 1, 0, 1).into()], vec![]);
        ctx.fill_events()
            .lock()
            .await
            .push(json!({"message_id": "SWAP_FILLED", "amount": 5}));

        pump.tick().await;

        let liquidity: Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(liquidity["message_id"], "LIQUIDITY_UPDATE");
        let update = &liquidity["liquidity_updates"][0];
        assert_eq!(update["market_id"], 11);
        assert_eq!(update["bid_queue"][0][3], 1);
        assert!(update["ask_queue"].is_null());

        let fills: Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(fills["message_id"], "SWAP_FILLED");
        assert_eq!(fills["fillUpdates"][0]["amount"], 5);

        // buffer was cleared by the tick
        assert!(ctx.fill_events().lock().await.is_empty());

        // a quiet second tick carries no market deltas and no fills
        pump.tick().await;
        let quiet: Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(quiet["message_id"], "LIQUIDITY_UPDATE");
        assert_eq!(quiet["liquidity_updates"].as_array().unwrap().len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn price_changes_ride_along_when_present() {
        let ctx = test_context();
        let (pump, _books, subscribers) = pump_for(&ctx);
        let (_id, mut rx) = subscribers.subscribe().await;

        ctx.price_feeds().lock().await.insert(
            "BTC".into(),
            PriceChange {
                percentage: 2.5,
                absolute: 1_500.0,
                price: 64_000.0,
            },
        );
        pump.tick().await;

        // first the liquidity frame, then the price frame
        let _liquidity = rx.recv().await.unwrap();
        let prices: Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(prices["message_id"], "24H_PRICE_UPDATE");
        assert_eq!(prices["price_changes"]["BTC"]["percentage"], 2.5);
    }

    #[tokio::test]
    async fn a_gone_subscriber_is_dropped_at_the_transport_layer() {
        let ctx = test_context();
        let (pump, _books, subscribers) = pump_for(&ctx);
        let (_id, rx) = subscribers.subscribe().await;
        assert_eq!(subscribers.len().await, 1);

        drop(rx);
        pump.tick().await;
        assert!(subscribers.is_empty().await);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_named_connection() {
        let subscribers = SubscriberRegistry::new();
        let (first, _rx1) = subscribers.subscribe().await;
        let (_second, _rx2) = subscribers.subscribe().await;
        subscribers.unsubscribe(first).await;
        assert_eq!(subscribers.len().await, 1);
    }
}
