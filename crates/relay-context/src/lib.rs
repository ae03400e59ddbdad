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

#![warn(missing_docs)]
//! # Relay Context Module
//!
//! A module for managing the context of the relay: the configuration, the
//! durable store, the engine client handle, the shared in-memory caches,
//! and the graceful shutdown channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use veil_engine_client::EngineRpc;
use veil_relay_config::RelayConfig;
use veil_relay_store::SledStore;
use veil_relay_types::{PriceChange, StatsSnapshot};
use veil_relay_utils::metric::{self, Metrics};

/// RelayerContext contains the relay's configuration, handles to its
/// collaborators, and its shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relay.
    pub config: RelayConfig,
    /// Broadcasts the shutdown signal to every long-lived task.
    ///
    /// Each spawned service holds a receiver cloned from this sender and
    /// races it against its own work; when `shutdown` fires, every service
    /// drives itself to a safe terminal state and completes.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the relay
    pub metrics: Arc<Mutex<metric::Metrics>>,
    store: SledStore,
    engine: Arc<dyn EngineRpc>,
    /// Aggregated market statistics, replaced wholesale by the refresh
    /// loops and read by `get_market_info`.
    stats: Arc<Mutex<StatsSnapshot>>,
    /// Latest 24h price change summaries from the external feed.
    price_feeds: Arc<Mutex<HashMap<String, PriceChange>>>,
    /// Fill events buffered between broadcast ticks.
    fill_events: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(
        config: RelayConfig,
        store: SledStore,
        engine: Arc<dyn EngineRpc>,
    ) -> veil_relay_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Mutex::new(Metrics::new()?));
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
            store,
            engine,
            stats: Arc::new(Mutex::new(StatsSnapshot::default())),
            price_feeds: Arc::new(Mutex::new(HashMap::new())),
            fill_events: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Returns the [Sled](https://sled.rs)-based database store.
    pub fn store(&self) -> &SledStore {
        &self.store
    }

    /// Returns the engine RPC client handle.
    pub fn engine(&self) -> Arc<dyn EngineRpc> {
        self.engine.clone()
    }

    /// Returns the shared market statistics snapshot.
    pub fn stats(&self) -> Arc<Mutex<StatsSnapshot>> {
        self.stats.clone()
    }

    /// Returns the shared external price feed cache.
    pub fn price_feeds(&self) -> Arc<Mutex<HashMap<String, PriceChange>>> {
        self.price_feeds.clone()
    }

    /// Returns the shared fill event buffer.
    pub fn fill_events(&self) -> Arc<Mutex<Vec<serde_json::Value>>> {
        self.fill_events.clone()
    }
}

/// The receive half of the shutdown broadcast, with the received state
/// latched: once the single `()` value has been observed, every later
/// `recv` returns immediately.
#[derive(Debug)]
pub struct Shutdown {
    /// Whether the signal has already been observed.
    received: bool,
    /// The receive half of the shutdown broadcast channel.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            received: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        if self.received {
            return;
        }
        // only one value is ever sent, so a lag error is impossible.
        let _ = self.notify.recv().await;
        self.received = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_engine_client::MockedEngineClient;

    fn test_config() -> RelayConfig {
        let toml = r#"
            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"
        "#;
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_every_subscriber() {
        let ctx = RelayerContext::new(
            test_config(),
            SledStore::temporary().unwrap(),
            Arc::new(MockedEngineClient::new()),
        )
        .unwrap();
        let mut first = ctx.shutdown_signal();
        let mut second = ctx.shutdown_signal();
        ctx.shutdown();
        first.recv().await;
        second.recv().await;
    }
}
