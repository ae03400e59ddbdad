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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::{TradeFill, TradeLogBackend};
use veil_relay_context::RelayerContext;
use veil_relay_queue::RequestRelay;
use veil_relay_types::{RequestKind, TokenId};
use veil_relay_utils::probe;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Recomputes the 24h volume/trade counters from the trade log and keeps
/// the funding snapshot fresh.
///
/// Both refreshes replace their section of the shared snapshot wholesale;
/// nothing is merged incrementally, so re-running a refresh with no new
/// trades is a no-op. The funding refresh rides the durable work queue
/// like any client request; its tagged reply is intercepted by the reply
/// pump rather than resolved against a waiter.
pub struct StatsAggregator {
    ctx: RelayerContext,
    trade_log: Arc<dyn TradeLogBackend>,
    relay: RequestRelay,
}

impl StatsAggregator {
    /// Creates the aggregator.
    pub fn new(
        ctx: RelayerContext,
        trade_log: Arc<dyn TradeLogBackend>,
        relay: RequestRelay,
    ) -> Self {
        Self {
            ctx,
            trade_log,
            relay,
        }
    }

    /// Runs both refresh loops: an immediate pass at startup, then the
    /// configured fixed intervals.
    pub async fn run(self) -> veil_relay_utils::Result<()> {
        let stats_period =
            Duration::from_secs(self.ctx.config.intervals.stats_refresh_secs);
        let funding_period =
            Duration::from_secs(self.ctx.config.intervals.funding_refresh_secs);
        let mut stats_ticker = tokio::time::interval(stats_period);
        let mut funding_ticker = tokio::time::interval(funding_period);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Stats,
            starting = true,
        );
        loop {
            tokio::select! {
                // interval fires immediately on the first tick, which is
                // the startup refresh.
                _ = stats_ticker.tick() => {
                    if let Err(e) = self.refresh_24h().await {
                        tracing::warn!("24h stats refresh failed: {}", e);
                    }
                }
                _ = funding_ticker.tick() => {
                    if let Err(e) = self.request_funding_refresh() {
                        tracing::warn!("funding refresh request failed: {}", e);
                    }
                }
            }
        }
    }

    /// Replaces the 24h spot and perpetual sections of the snapshot from
    /// the trade log.
    pub async fn refresh_24h(&self) -> veil_relay_utils::Result<()> {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .saturating_sub(DAY)
            .as_secs();

        let spot_fills = self.trade_log.fills_since(since, false).await?;
        let (spot_volumes, spot_trades) = fold_fills(&spot_fills, false);
        let perp_fills = self.trade_log.fills_since(since, true).await?;
        let (perp_volumes, perp_trades) = fold_fills(&perp_fills, true);

        let stats = self.ctx.stats();
        let mut stats = stats.lock().await;
        stats.replace_spot(spot_volumes, spot_trades);
        stats.replace_perp(perp_volumes, perp_trades);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Stats,
            spot_fills = spot_fills.len(),
            perp_fills = perp_fills.len(),
            refreshed = true,
        );
        Ok(())
    }

    /// Delegates a `get_funding_info` request onto the durable queue. The
    /// reply pump folds the tagged reply into the snapshot.
    pub fn request_funding_refresh(&self) -> veil_relay_utils::Result<()> {
        self.relay
            .submit_detached(RequestKind::GetFundingInfo, json!({}))
    }
}

/// Folds fills into per-token `(volume, count)` pairs.
fn fold_fills(
    fills: &[TradeFill],
    perp: bool,
) -> (HashMap<TokenId, u64>, HashMap<TokenId, u64>) {
    let mut volumes: HashMap<TokenId, u64> = HashMap::new();
    let mut trades: HashMap<TokenId, u64> = HashMap::new();
    for fill in fills {
        let Some(token) = fill.stat_token(perp) else {
            continue;
        };
        *volumes.entry(token).or_default() += fill.amount;
        *trades.entry(token).or_default() += 1;
    }
    (volumes, trades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockedTradeLog;
    use veil_engine_client::MockedEngineClient;
    use veil_relay_queue::PendingReplies;
    use veil_relay_store::sled::SledQueueKey;
    use veil_relay_store::{QueueStore, SledStore};
    use veil_relay_types::WorkItem;

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

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn aggregator_for(
        ctx: &RelayerContext,
        log: Arc<MockedTradeLog>,
    ) -> StatsAggregator {
        let pending = PendingReplies::new(Duration::from_secs(30));
        let relay = RequestRelay::new(ctx.clone(), pending);
        StatsAggregator::new(ctx.clone(), log, relay)
    }

    #[tokio::test]
    async fn refresh_folds_last_day_fills_per_token() {
        let ctx = test_context();
        let log = Arc::new(MockedTradeLog::new());
        log.push_spot(TradeFill {
            base_token: Some(12345),
            synthetic_token: None,
            amount: 100,
            timestamp: now() - 60,
        });
        log.push_spot(TradeFill {
            base_token: Some(12345),
            synthetic_token: None,
            amount: 50,
            timestamp: now() - 120,
        });
        // too old to count
        log.push_spot(TradeFill {
            base_token: Some(12345),
            synthetic_token: None,
            amount: 999,
            timestamp: now() - 25 * 60 * 60,
        });
        log.push_perp(TradeFill {
            base_token: None,
            synthetic_token: Some(54321),
            amount: 70,
            timestamp: now() - 30,
        });

        let aggregator = aggregator_for(&ctx, log);
        aggregator.refresh_24h().await.unwrap();

        let stats = ctx.stats();
        let stats = stats.lock().await;
        assert_eq!(stats.spot_volumes[&12345], 150);
        assert_eq!(stats.spot_trades[&12345], 2);
        assert_eq!(stats.perp_volumes[&54321], 70);
        assert_eq!(stats.perp_trades[&54321], 1);
    }

    #[tokio::test]
    async fn refresh_is_idempotent_without_new_trades() {
        let ctx = test_context();
        let log = Arc::new(MockedTradeLog::new());
        log.push_spot(TradeFill {
            base_token: Some(12345),
            synthetic_token: None,
            amount: 42,
            timestamp: now() - 10,
        });
        let aggregator = aggregator_for(&ctx, log);

        aggregator.refresh_24h().await.unwrap();
        let first = ctx.stats().lock().await.clone();
        aggregator.refresh_24h().await.unwrap();
        let second = ctx.stats().lock().await.clone();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn funding_refresh_rides_the_work_queue() {
        let ctx = test_context();
        let aggregator =
            aggregator_for(&ctx, Arc::new(MockedTradeLog::new()));
        aggregator.request_funding_refresh().unwrap();

        let item: WorkItem = ctx
            .store()
            .dequeue_item(SledQueueKey::WorkItems)
            .unwrap()
            .unwrap();
        assert_eq!(item.kind, "get_funding_info");
        assert!(item.correlation_id.starts_with("get_funding_info"));
    }
}
