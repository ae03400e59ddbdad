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

//! Veil Relay Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix;
use tokio::time;

use veil_engine_client::HttpEngineClient;
use veil_relay_config::cli::{create_store, load_config, setup_logger, Opts};
use veil_relay_context::RelayerContext;
use veil_relay_server::restore::RestoreProtocol;
use veil_relay_server::service;

/// The main entry point for the relay.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose, "veil_relay")?;
    if let Err(e) = dotenv::dotenv() {
        tracing::warn!("Failed to load .env file: {}", e);
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;

    // persistent storage for the relay
    let store = create_store(&args).await?;

    let engine = Arc::new(HttpEngineClient::new(&config.engine.rpc_url)?);

    // The RelayerContext takes a configuration, and populates objects that
    // are needed throughout the lifetime of the relay.
    let ctx = RelayerContext::new(config, store.clone(), engine)?;

    // refresh the stored-data-size gauge once an hour
    let metrics_clone = ctx.metrics.clone();
    let sled_metric_task_handle = tokio::task::spawn(async move {
        let mut store_size_interval = time::interval(Duration::from_secs(3600));
        loop {
            store_size_interval.tick().await;
            metrics_clone
                .lock()
                .await
                .total_amount_of_data_stored
                .set(store.get_data_stored_size() as f64);
        }
    });

    let services = service::Services::new(&ctx);

    // re-seed the engine's book from our persisted state before anything
    // else starts feeding it. A failed restore leaves the engine empty,
    // which is also where it started; keep serving.
    if let Err(e) = RestoreProtocol::new(ctx.clone()).run().await {
        tracing::error!("order book restore failed: {}", e);
    }

    // routing (endpoint queries / requests mapped to handled code) so
    // clients can interact with the relay
    let (addr, server) = service::build_web_services(ctx.clone(), &services)?;
    tracing::info!("Starting the server on {}", addr);
    // start the server.
    let server_handle = tokio::spawn(server);
    // start all background services.
    // this does not block, will fire the services on background tasks.
    service::ignite(&ctx, &services).await?;
    tracing::event!(
        target: veil_relay_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %veil_relay_utils::probe::Kind::Lifecycle,
        started = true
    );
    // block on the termination signals
    let mut interrupt_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut terminate_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = interrupt_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
        },
        _ = terminate_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
        },
    }
    tracing::event!(
        target: veil_relay_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %veil_relay_utils::probe::Kind::Lifecycle,
        shutdown = true
    );
    // fan the shutdown out to every background service, then stop the
    // tasks the services do not own.
    ctx.shutdown();
    server_handle.abort();
    sled_metric_task_handle.abort();
    // give in-flight work a moment to reach a safe stopping point.
    time::sleep(Duration::from_millis(300)).await;
    tracing::info!("Exiting cleanly");
    Ok(())
}
