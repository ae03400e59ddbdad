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

//! # Relay Service Module
//!
//! A module for starting the relay's long-running tasks: the HTTP/WS
//! surface, the queue worker and reply pump, the liquidity ingest and
//! broadcast pump, and the periodic statistics and oracle loops. Each
//! service runs on a background task racing the shared shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use veil_liquidity::{
    BroadcastPump, LiquidityIngest, OrderBookRegistry, SubscriberRegistry,
};
use veil_market_stats::{
    HttpPriceSource, HttpTradeLog, OracleFeed, PriceFeedPoller,
    StatsAggregator,
};
use veil_relay_context::RelayerContext;
use veil_relay_handlers::AppState;
use veil_relay_queue::{PendingReplies, ReplyPump, RequestRelay, Worker};
use veil_relay_store::LiquidityStore;

/// Handles to the pieces shared between the HTTP surface and the
/// background services.
pub struct Services {
    /// The client request delegation path.
    pub relay: RequestRelay,
    /// The correlation map actor handle.
    pub pending: PendingReplies,
    /// The shared per-market book registry.
    pub books: Arc<Mutex<OrderBookRegistry>>,
    /// The push subscriber set.
    pub subscribers: SubscriberRegistry,
}

impl Services {
    /// Builds the shared service handles for a context.
    pub fn new(ctx: &RelayerContext) -> Self {
        let reply_timeout = std::time::Duration::from_secs(
            ctx.config.intervals.reply_timeout_secs,
        );
        let pending = PendingReplies::new(reply_timeout);
        let relay = RequestRelay::new(ctx.clone(), pending.clone());
        let books = Arc::new(Mutex::new(OrderBookRegistry::new(
            ctx.config.all_markets().collect::<Vec<_>>(),
        )));
        Self {
            relay,
            pending,
            books,
            subscribers: SubscriberRegistry::new(),
        }
    }
}

/// Sets up the web server for the relay: request routing, the subscriber
/// websocket and the metrics endpoint.
///
/// Returns `Ok((addr, server))` on success; the server future runs until
/// the shutdown signal fires.
pub fn build_web_services(
    ctx: RelayerContext,
    services: &Services,
) -> crate::Result<(
    SocketAddr,
    impl core::future::Future<Output = crate::Result<()>> + 'static,
)> {
    let state = AppState {
        ctx: Arc::new(ctx.clone()),
        relay: services.relay.clone(),
        subscribers: services.subscribers.clone(),
    };
    let app = veil_relay_handlers::build_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();
    let socket_addr =
        SocketAddr::new("0.0.0.0".parse().expect("valid addr"), ctx.config.port);
    let mut shutdown_signal = ctx.shutdown_signal();
    let server = axum::Server::try_bind(&socket_addr)?;
    let serving = async move {
        server
            .serve(app)
            .with_graceful_shutdown(async move {
                shutdown_signal.recv().await;
            })
            .await?;
        Ok(())
    };
    Ok((socket_addr, serving))
}

/// Starts all background services enabled in the configuration.
///
/// Returns a future that resolves when all services are started
/// successfully. This does not block: the services are fired on
/// background tasks.
pub async fn ignite(
    ctx: &RelayerContext,
    services: &Services,
) -> crate::Result<()> {
    // seed a liquidity row for every configured market so ingest and
    // restore always find one.
    for (market_id, class) in ctx.config.all_markets() {
        ctx.store().seed_liquidity(class, market_id)?;
    }

    if ctx.config.features.request_relay {
        start_worker(ctx.clone());
        start_reply_pump(ctx.clone(), services.pending.clone());
    } else {
        tracing::warn!("Request relaying disabled, not starting the worker");
    }

    if ctx.config.features.liquidity_broadcast {
        start_liquidity_ingest(ctx.clone(), services.books.clone());
        start_broadcast_pump(
            ctx.clone(),
            services.books.clone(),
            services.subscribers.clone(),
        );
    } else {
        tracing::warn!("Liquidity broadcast disabled");
    }

    if ctx.config.features.market_stats {
        start_stats_aggregator(ctx.clone(), services.relay.clone());
        start_price_feed_poller(ctx.clone());
    } else {
        tracing::warn!("Market statistics disabled");
    }

    if ctx.config.features.oracle_feed {
        start_oracle_feed(ctx.clone())?;
    } else {
        tracing::warn!("Oracle feed disabled");
    }

    Ok(())
}

fn start_worker(ctx: RelayerContext) {
    let mut shutdown_signal = ctx.shutdown_signal();
    let worker = Worker::new(ctx);
    tracing::debug!("Work queue consumer started.");
    let task = async move {
        tokio::select! {
            _ = worker.run() => {
                tracing::warn!("Work queue consumer stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the work queue consumer");
            },
        }
    };
    tokio::task::spawn(task);
}

fn start_reply_pump(ctx: RelayerContext, pending: PendingReplies) {
    let mut shutdown_signal = ctx.shutdown_signal();
    let pump = ReplyPump::new(ctx, pending);
    tracing::debug!("Reply pump started.");
    let task = async move {
        tokio::select! {
            _ = pump.run() => {
                tracing::warn!("Reply pump stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the reply pump");
            },
        }
    };
    tokio::task::spawn(task);
}

fn start_liquidity_ingest(
    ctx: RelayerContext,
    books: Arc<Mutex<OrderBookRegistry>>,
) {
    let mut shutdown_signal = ctx.shutdown_signal();
    let ingest = LiquidityIngest::new(ctx, books);
    tracing::debug!("Liquidity ingest started.");
    let task = async move {
        tokio::select! {
            _ = ingest.run() => {
                tracing::warn!("Liquidity ingest stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the liquidity ingest");
            },
        }
    };
    tokio::task::spawn(task);
}

fn start_broadcast_pump(
    ctx: RelayerContext,
    books: Arc<Mutex<OrderBookRegistry>>,
    subscribers: SubscriberRegistry,
) {
    let mut shutdown_signal = ctx.shutdown_signal();
    let pump = BroadcastPump::new(ctx, books, subscribers);
    tracing::debug!("Broadcast pump started.");
    let task = async move {
        tokio::select! {
            _ = pump.run() => {
                tracing::warn!("Broadcast pump stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the broadcast pump");
            },
        }
    };
    tokio::task::spawn(task);
}

fn start_stats_aggregator(ctx: RelayerContext, relay: RequestRelay) {
    let mut shutdown_signal = ctx.shutdown_signal();
    let trade_log =
        Arc::new(HttpTradeLog::new(ctx.config.trade_log.clone()));
    let aggregator = StatsAggregator::new(ctx, trade_log, relay);
    tracing::debug!("Stats aggregator started.");
    let task = async move {
        tokio::select! {
            _ = aggregator.run() => {
                tracing::warn!("Stats aggregator stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the stats aggregator");
            },
        }
    };
    tokio::task::spawn(task);
}

fn start_price_feed_poller(ctx: RelayerContext) {
    let mut shutdown_signal = ctx.shutdown_signal();
    let source = Arc::new(HttpPriceSource::new(ctx.config.price_api.clone()));
    let poller = PriceFeedPoller::new(ctx, source);
    tracing::debug!("Price feed poller started.");
    let task = async move {
        tokio::select! {
            _ = poller.run() => {
                tracing::warn!("Price feed poller stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the price feed poller");
            },
        }
    };
    tokio::task::spawn(task);
}

fn start_oracle_feed(ctx: RelayerContext) -> crate::Result<()> {
    let mut shutdown_signal = ctx.shutdown_signal();
    let source = Arc::new(HttpPriceSource::new(ctx.config.price_api.clone()));
    let Some(feed) = OracleFeed::new(ctx, source)? else {
        tracing::warn!("No oracle signing key configured, feed not started");
        return Ok(());
    };
    tracing::debug!("Oracle feed started.");
    let task = async move {
        tokio::select! {
            _ = feed.run() => {
                tracing::warn!("Oracle feed stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping the oracle feed");
            },
        }
    };
    tokio::task::spawn(task);
    Ok(())
}
