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

use crate::PriceSource;
use veil_relay_context::RelayerContext;
use veil_relay_utils::probe;

/// Keeps the 24h price change cache warm from the external market data
/// API. Best effort: a pair that fails to fetch keeps its previous cached
/// summary and the rest of the pairs still refresh.
pub struct PriceFeedPoller {
    ctx: RelayerContext,
    source: Arc<dyn PriceSource>,
}

impl PriceFeedPoller {
    /// Creates the poller.
    pub fn new(ctx: RelayerContext, source: Arc<dyn PriceSource>) -> Self {
        Self { ctx, source }
    }

    /// Polls immediately, then on the configured fixed interval.
    pub async fn run(self) -> veil_relay_utils::Result<()> {
        let period =
            Duration::from_secs(self.ctx.config.intervals.price_feed_secs);
        let mut ticker = tokio::time::interval(period);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Stats,
            price_feed_starting = true,
        );
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One refresh pass over every configured token.
    pub async fn poll_once(&self) {
        for token in &self.ctx.config.tokens {
            match self.source.summary(&token.feed_pair).await {
                Ok(change) => {
                    self.ctx
                        .price_feeds()
                        .lock()
                        .await
                        .insert(token.symbol.clone(), change);
                }
                Err(e) => {
                    tracing::warn!(
                        pair = %token.feed_pair,
                        "price feed fetch failed: {}",
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockedPriceSource;
    use veil_engine_client::MockedEngineClient;
    use veil_relay_store::SledStore;

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

    #[tokio::test]
    async fn failing_pairs_keep_their_previous_summary() {
        let ctx = test_context();
        let source = Arc::new(MockedPriceSource::new());
        source.set_price("BTCUSDT", 64_000.0);
        source.set_price("ETHUSDT", 3_000.0);
        let poller = PriceFeedPoller::new(ctx.clone(), source.clone());

        poller.poll_once().await;
        {
            let feeds = ctx.price_feeds();
            let feeds = feeds.lock().await;
            assert_eq!(feeds["BTC"].price, 64_000.0);
            assert_eq!(feeds["ETH"].price, 3_000.0);
        }

        // the ETH feed goes dark; BTC still refreshes, ETH stays cached
        source.clear_price("ETHUSDT");
        source.set_price("BTCUSDT", 65_000.0);
        poller.poll_once().await;
        let feeds = ctx.price_feeds();
        let feeds = feeds.lock().await;
        assert_eq!(feeds["BTC"].price, 65_000.0);
        assert_eq!(feeds["ETH"].price, 3_000.0);
    }
}
