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
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::PendingReplies;
use veil_relay_context::RelayerContext;
use veil_relay_store::sled::SledQueueKey;
use veil_relay_store::QueueStore;
use veil_relay_types::{
    FundingInfoResponse, ReplyItem, RequestKind, WorkItem,
};
use veil_relay_utils::{probe, Error, Result};

/// The client-facing half of the request delegation protocol.
///
/// `submit` hands the payload to the durable work queue and parks the
/// caller on the correlation map until the worker's reply comes back, or
/// until the reply timeout expires. No retries are issued here; the
/// durable queue's own delivery guarantee is the only redelivery
/// mechanism.
#[derive(Clone)]
pub struct RequestRelay {
    ctx: RelayerContext,
    pending: PendingReplies,
}

impl RequestRelay {
    /// Creates the relay on top of a running correlation actor.
    pub fn new(ctx: RelayerContext, pending: PendingReplies) -> Self {
        Self { ctx, pending }
    }

    /// Delegates one request and waits for the engine's reply.
    #[tracing::instrument(skip(self, payload), fields(kind = %kind))]
    pub async fn submit(
        &self,
        kind: RequestKind,
        payload: Value,
    ) -> Result<Value> {
        let item = WorkItem::new(kind, payload);
        let (waiter, reply) = oneshot::channel();
        // register before enqueueing, otherwise a fast worker could answer
        // an id nobody is waiting on yet.
        self.pending
            .register(item.correlation_id.clone(), waiter)
            .await?;
        self.ctx
            .store()
            .enqueue_item(SledQueueKey::WorkItems, item)?;
        self.ctx.metrics.lock().await.requests_relayed.inc();
        // a dropped waiter means the expiry sweep collected the entry.
        reply.await.map_err(|_| Error::ReplyTimeout)
    }

    /// Enqueues a request without registering a waiter. Used for
    /// fire-and-forget delegations whose replies are intercepted by the
    /// reply pump (funding info refresh).
    pub fn submit_detached(
        &self,
        kind: RequestKind,
        payload: Value,
    ) -> Result<()> {
        let item = WorkItem::new(kind, payload);
        self.ctx
            .store()
            .enqueue_item(SledQueueKey::WorkItems, item)
    }
}

/// Drains the durable reply queue and matches replies back to waiters.
///
/// Replies tagged with the funding info prefix never had a waiter: they
/// are folded into the shared stats snapshot instead. Everything else is
/// resolved against the correlation map; an unknown id (client gave up,
/// relay restarted) is silently discarded there.
pub struct ReplyPump {
    ctx: RelayerContext,
    pending: PendingReplies,
}

impl ReplyPump {
    /// Creates the pump for the given context and correlation actor.
    pub fn new(ctx: RelayerContext, pending: PendingReplies) -> Self {
        Self { ctx, pending }
    }

    /// Starts draining replies.
    ///
    /// Returns a future that resolves `Ok(())` on shutdown, otherwise
    /// restarts its inner loop on errors with an exponential backoff.
    pub async fn run(self) -> Result<()> {
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::RequestRelay,
            reply_pump_starting = true,
        );
        let task = || async {
            loop {
                let maybe_reply: Option<ReplyItem> =
                    self.ctx.store().dequeue_item(SledQueueKey::Replies)?;
                let Some(reply) = maybe_reply else {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                };
                self.dispatch(reply).await;
            }
        };
        backoff::future::retry::<(), _, _, _, _>(backoff, task).await?;
        Ok(())
    }

    /// Routes one reply: funding info interception first, correlation map
    /// second.
    pub async fn dispatch(&self, reply: ReplyItem) {
        let funding_prefix = RequestKind::GetFundingInfo.wire_name();
        if reply.correlation_id.starts_with(funding_prefix) {
            self.absorb_funding_info(&reply.payload).await;
            return;
        }
        if let Err(e) = self
            .pending
            .resolve(reply.correlation_id, reply.payload)
            .await
        {
            tracing::warn!("failed to resolve reply: {}", e);
        }
    }

    async fn absorb_funding_info(&self, payload: &Value) {
        let response: FundingInfoResponse =
            match serde_json::from_value(payload.clone()) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("malformed funding info reply: {}", e);
                    return;
                }
            };
        if !response.successful {
            tracing::warn!("funding info query was unsuccessful");
            return;
        }
        let mut rates = HashMap::new();
        let mut prices = HashMap::new();
        for funding in response.fundings {
            rates.insert(funding.token, funding.funding_rates);
            prices.insert(funding.token, funding.funding_prices);
        }
        let stats = self.ctx.stats();
        stats.lock().await.replace_funding(rates, prices);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Stats,
            funding_info_updated = true,
        );
    }
}
