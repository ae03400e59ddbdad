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

use std::time::Duration;

use serde_json::{json, Value};

use veil_engine_client::{EngineMethod, EngineRpc};
use veil_relay_context::RelayerContext;
use veil_relay_store::sled::SledQueueKey;
use veil_relay_store::{DeadLetterStore, OrderStore, QueueStore};
use veil_relay_types::{
    PerpOrderRecord, ReplyItem, RequestKind, SpotOrderRecord, SubmitResponse,
    WorkItem,
};
use veil_relay_utils::probe;

/// The single consumer of the durable work queue.
///
/// One worker per queue keeps the engine seeing order submissions,
/// cancellations and administrative commands in client submission order;
/// running several concurrently is a correctness risk at the engine, not a
/// throughput knob.
///
/// Processing one item: route its kind to the matching engine call, on an
/// accepted order submission upsert the order record, then publish the
/// result on the reply queue. Failures produce a terminal error reply plus
/// a dead letter record and are never requeued. The queue head is removed
/// only after the reply is durably enqueued, so a crash mid-item replays
/// it (at-least-once); the upsert and the reply resolution both tolerate
/// the replay.
pub struct Worker {
    ctx: RelayerContext,
}

impl Worker {
    /// Creates a new Worker instance.
    pub fn new(ctx: RelayerContext) -> Self {
        Self { ctx }
    }

    /// Starts the worker loop.
    ///
    /// Returns a future that resolves `Ok(())` on shutdown, otherwise
    /// restarts its inner loop on errors with an exponential backoff.
    pub async fn run(self) -> veil_relay_utils::Result<()> {
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::WorkQueue,
            starting = true,
        );
        let task = || async {
            loop {
                let processed = self.process_next().await?;
                if !processed {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        };
        backoff::future::retry::<(), _, _, _, _>(backoff, task).await?;
        Ok(())
    }

    /// Processes at most one queued item. Returns whether an item was
    /// found.
    pub async fn process_next(&self) -> veil_relay_utils::Result<bool> {
        let store = self.ctx.store();
        // peek, do the work, publish the reply, and only then remove the
        // head: the reply being enqueued is the ack.
        let maybe_item: Option<WorkItem> =
            store.peek_item(SledQueueKey::WorkItems)?;
        let Some(item) = maybe_item else {
            return Ok(false);
        };
        tracing::trace!(
            correlation_id = %item.correlation_id,
            kind = %item.kind,
            "processing work item"
        );
        let payload = self.process(&item).await;
        store.enqueue_item(
            SledQueueKey::Replies,
            ReplyItem {
                correlation_id: item.correlation_id.clone(),
                payload,
            },
        )?;
        let _: Option<WorkItem> = store.dequeue_item(SledQueueKey::WorkItems)?;
        Ok(true)
    }

    /// Runs one item against the engine and shapes the reply payload. A
    /// terminal failure becomes an error payload so the waiting client is
    /// answered instead of left hanging.
    async fn process(&self, item: &WorkItem) -> Value {
        let Some(kind) = RequestKind::from_wire_name(&item.kind) else {
            return self.fail_unroutable(item).await;
        };
        let method = EngineMethod::for_kind(kind);
        match self.ctx.engine().call(method, item.payload.clone()).await {
            Ok(reply) => {
                self.persist_accepted_order(kind, item, &reply).await;
                self.ctx.metrics.lock().await.work_items_processed.inc();
                reply
            }
            Err(e) => {
                tracing::warn!(
                    correlation_id = %item.correlation_id,
                    kind = %item.kind,
                    "engine call failed: {}",
                    e
                );
                self.fail_terminally(item, &e.to_string()).await
            }
        }
    }

    /// An accepted spot/perp/liquidation submission is persisted under the
    /// engine-assigned id, with the original payload as the stored record.
    /// A store failure here is logged and swallowed: the in-memory path
    /// continues and the next restore resynchronizes.
    async fn persist_accepted_order(
        &self,
        kind: RequestKind,
        item: &WorkItem,
        reply: &Value,
    ) {
        let accepted = SubmitResponse::from_reply(reply);
        let order_id = match (accepted.successful, accepted.order_id) {
            (true, Some(order_id)) => order_id,
            _ => return,
        };
        let store = self.ctx.store();
        let stored = match kind {
            RequestKind::SpotOrder => {
                SpotOrderRecord::from_request(order_id, &item.payload)
                    .map_err(Into::into)
                    .and_then(|record| store.insert_spot_order(&record))
            }
            RequestKind::PerpOrder | RequestKind::LiquidationOrder => {
                PerpOrderRecord::from_request(order_id, &item.payload)
                    .map_err(Into::into)
                    .and_then(|record| store.insert_perp_order(&record))
            }
            _ => return,
        };
        if let Err(e) = stored {
            tracing::error!(
                order_id,
                kind = %kind,
                "failed to persist accepted order: {}",
                e
            );
        }
    }

    /// No handler matches the item's kind: hold it for the grace period,
    /// then answer with a timeout error. Slow-engine and no-handler cases
    /// are deliberately indistinguishable to the client.
    async fn fail_unroutable(&self, item: &WorkItem) -> Value {
        let grace = Duration::from_secs(
            self.ctx.config.intervals.unroutable_grace_secs,
        );
        tokio::time::sleep(grace).await;
        tracing::error!(
            correlation_id = %item.correlation_id,
            kind = %item.kind,
            "no handler for work item kind"
        );
        self.fail_terminally(item, "request timed out").await
    }

    /// Records the failed item for forensics and shapes the terminal error
    /// reply.
    async fn fail_terminally(&self, item: &WorkItem, reason: &str) -> Value {
        if let Err(e) = self.ctx.store().record_dead_letter(item, reason) {
            tracing::error!("failed to record dead letter: {}", e);
        }
        self.ctx.metrics.lock().await.work_items_failed.inc();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::WorkQueue,
            errored = true,
            correlation_id = %item.correlation_id,
        );
        json!({
            "successful": false,
            "error_message": reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PendingReplies, ReplyPump, RequestRelay};
    use std::sync::Arc;
    use veil_engine_client::MockedEngineClient;
    use veil_relay_store::SledStore;

    fn test_config() -> veil_relay_config::RelayConfig {
        let toml = r#"
            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"

            [intervals]
            unroutable-grace-secs = 0
        "#;
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    fn test_context(engine: Arc<MockedEngineClient>) -> RelayerContext {
        RelayerContext::new(
            test_config(),
            SledStore::temporary().unwrap(),
            engine,
        )
        .unwrap()
    }

    fn spot_payload() -> Value {
        json!({
            "expiration_timestamp": 1_700_100_000u64,
            "token_spent": 12345,
            "token_received": 54321,
            "amount_spent": 1_000_000u64,
            "amount_received": 15_000_000u64,
            "fee_limit": 500u64,
            "signature": ["0xaa", "0xbb"],
            "user_id": 7u64,
        })
    }

    #[tokio::test]
    async fn accepted_spot_order_is_persisted_and_replied() {
        let engine = Arc::new(MockedEngineClient::new());
        engine.script_reply(
            EngineMethod::SubmitLimitOrder,
            json!({"successful": true, "order_id": 42}),
        );
        let ctx = test_context(engine);
        let worker = Worker::new(ctx.clone());

        let item = WorkItem::new(RequestKind::SpotOrder, spot_payload());
        ctx.store()
            .enqueue_item(SledQueueKey::WorkItems, item.clone())
            .unwrap();
        assert!(worker.process_next().await.unwrap());

        // order persisted under the engine-assigned id
        let order = ctx.store().get_spot_order(42).unwrap().unwrap();
        assert_eq!(order.order_id, 42);
        assert_eq!(order.amount_spent, 1_000_000);

        // reply published under the original correlation id
        let reply: ReplyItem = ctx
            .store()
            .dequeue_item(SledQueueKey::Replies)
            .unwrap()
            .unwrap();
        assert_eq!(reply.correlation_id, item.correlation_id);
        assert_eq!(reply.payload["order_id"], 42);

        // the work item was consumed
        assert!(!worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn rejected_submission_is_not_persisted() {
        let engine = Arc::new(MockedEngineClient::new());
        engine.script_reply(
            EngineMethod::SubmitLimitOrder,
            json!({"successful": false, "error_message": "insufficient funds"}),
        );
        let ctx = test_context(engine);
        let worker = Worker::new(ctx.clone());

        let item = WorkItem::new(RequestKind::SpotOrder, spot_payload());
        ctx.store()
            .enqueue_item(SledQueueKey::WorkItems, item)
            .unwrap();
        worker.process_next().await.unwrap();

        assert!(ctx.store().spot_orders().unwrap().is_empty());
        // the rejection still reaches the client verbatim
        let reply: ReplyItem = ctx
            .store()
            .dequeue_item(SledQueueKey::Replies)
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload["error_message"], "insufficient funds");
    }

    #[tokio::test]
    async fn engine_failure_is_terminal_with_a_dead_letter() {
        let engine = Arc::new(MockedEngineClient::new());
        engine.script_failure(EngineMethod::CancelOrder, "engine unreachable");
        let ctx = test_context(engine);
        let worker = Worker::new(ctx.clone());

        let item = WorkItem::new(RequestKind::Cancel, json!({"order_id": 1}));
        ctx.store()
            .enqueue_item(SledQueueKey::WorkItems, item.clone())
            .unwrap();
        worker.process_next().await.unwrap();

        // not requeued
        assert_eq!(
            QueueStore::<WorkItem>::queue_len(
                ctx.store(),
                SledQueueKey::WorkItems
            )
            .unwrap(),
            0
        );
        // terminal error reply instead of a silent drop
        let reply: ReplyItem = ctx
            .store()
            .dequeue_item(SledQueueKey::Replies)
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload["successful"], false);
        // and a dead letter for forensics
        let letters = ctx.store().dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].item, item);
    }

    #[tokio::test]
    async fn unroutable_kind_fails_with_a_timeout_error() {
        let engine = Arc::new(MockedEngineClient::new());
        let ctx = test_context(engine.clone());
        let worker = Worker::new(ctx.clone());

        let item = WorkItem {
            correlation_id: "mystery_kind0.123".into(),
            kind: "mystery_kind".into(),
            payload: json!({}),
        };
        ctx.store()
            .enqueue_item(SledQueueKey::WorkItems, item)
            .unwrap();
        worker.process_next().await.unwrap();

        // nothing reached the engine
        assert!(engine.calls().is_empty());
        let reply: ReplyItem = ctx
            .store()
            .dequeue_item(SledQueueKey::Replies)
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload["error_message"], "request timed out");
    }

    #[tokio::test]
    async fn replayed_item_keeps_the_store_consistent() {
        // a crash between the reply enqueue and the head removal replays
        // the item; the upsert keyed by order id keeps one row.
        let engine = Arc::new(MockedEngineClient::new());
        let scripted = json!({"successful": true, "order_id": 42});
        engine.script_reply(EngineMethod::SubmitLimitOrder, scripted.clone());
        engine.script_reply(EngineMethod::SubmitLimitOrder, scripted);
        let ctx = test_context(engine);
        let worker = Worker::new(ctx.clone());

        let item = WorkItem::new(RequestKind::SpotOrder, spot_payload());
        ctx.store()
            .enqueue_item(SledQueueKey::WorkItems, item.clone())
            .unwrap();
        ctx.store()
            .enqueue_item(SledQueueKey::WorkItems, item)
            .unwrap();
        worker.process_next().await.unwrap();
        worker.process_next().await.unwrap();

        assert_eq!(ctx.store().spot_orders().unwrap().len(), 1);
        assert_eq!(
            QueueStore::<ReplyItem>::queue_len(
                ctx.store(),
                SledQueueKey::Replies
            )
            .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn submit_round_trips_through_worker_and_pump() {
        let engine = Arc::new(MockedEngineClient::new());
        engine.script_reply(
            EngineMethod::SubmitPerpetualOrder,
            json!({"successful": true, "order_id": 7}),
        );
        let ctx = test_context(engine);
        let pending = PendingReplies::new(Duration::from_secs(30));
        let relay = RequestRelay::new(ctx.clone(), pending.clone());
        let worker = Worker::new(ctx.clone());
        let pump = ReplyPump::new(ctx.clone(), pending);

        let perp_payload = json!({
            "expiration_timestamp": 1_700_100_000u64,
            "position_effect_type": 0,
            "order_side": 0,
            "synthetic_token": 12345,
            "synthetic_amount": 1_000u64,
            "collateral_amount": 50_000u64,
            "fee_limit": 10u64,
            "signature": ["0xaa", "0xbb"],
        });
        let submit = tokio::spawn({
            let relay = relay.clone();
            async move { relay.submit(RequestKind::PerpOrder, perp_payload).await }
        });
        // drive the queue by hand instead of spawning the loops
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.process_next().await.unwrap();
        let reply: ReplyItem = ctx
            .store()
            .dequeue_item(SledQueueKey::Replies)
            .unwrap()
            .unwrap();
        pump.dispatch(reply).await;

        let response = submit.await.unwrap().unwrap();
        assert_eq!(response["order_id"], 7);
        // perp submission landed in the perp table
        assert!(ctx.store().get_perp_order(7).unwrap().is_some());
    }

    #[tokio::test]
    async fn funding_info_reply_is_intercepted_into_the_stats_cache() {
        let engine = Arc::new(MockedEngineClient::new());
        engine.script_reply(
            EngineMethod::GetFundingInfo,
            json!({
                "successful": true,
                "fundings": [
                    {
                        "token": 12345,
                        "funding_rates": [12, -4],
                        "funding_prices": [64_000_000_000u64, 63_900_000_000u64],
                    }
                ]
            }),
        );
        let ctx = test_context(engine);
        let pending = PendingReplies::new(Duration::from_secs(30));
        let relay = RequestRelay::new(ctx.clone(), pending.clone());
        let worker = Worker::new(ctx.clone());
        let pump = ReplyPump::new(ctx.clone(), pending);

        relay
            .submit_detached(RequestKind::GetFundingInfo, json!({}))
            .unwrap();
        worker.process_next().await.unwrap();
        let reply: ReplyItem = ctx
            .store()
            .dequeue_item(SledQueueKey::Replies)
            .unwrap()
            .unwrap();
        pump.dispatch(reply).await;

        let stats = ctx.stats();
        let stats = stats.lock().await;
        assert_eq!(stats.funding_rates[&12345], vec![12, -4]);
        assert_eq!(stats.funding_prices[&12345].len(), 2);
    }
}
