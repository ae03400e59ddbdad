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

use prometheus::core::{AtomicF64, GenericCounter, GenericGauge};
use prometheus::{Counter, Encoder, Gauge, Registry, TextEncoder};

/// A struct definition for collecting metrics in the relay.
///
/// Counters are registered against an owned registry so the struct can be
/// re-created in tests without tripping duplicate-registration errors.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total client requests delegated onto the work queue.
    pub requests_relayed: GenericCounter<AtomicF64>,
    /// Work items dequeued and completed against the engine.
    pub work_items_processed: GenericCounter<AtomicF64>,
    /// Work items that ended in a terminal failure reply.
    pub work_items_failed: GenericCounter<AtomicF64>,
    /// Liquidity snapshots received from the engine push stream.
    pub liquidity_updates_received: GenericCounter<AtomicF64>,
    /// Broadcast loop ticks that carried at least one changed market.
    pub broadcasts_sent: GenericCounter<AtomicF64>,
    /// Index price updates submitted to the engine.
    pub oracle_updates_submitted: GenericCounter<AtomicF64>,
    /// Currently connected push subscribers.
    pub connected_subscribers: GenericGauge<AtomicF64>,
    /// Total amount of data stored metric
    pub total_amount_of_data_stored: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a
    /// registry for the counters and registers the counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_relayed = Counter::new(
            "requests_relayed",
            "The total number of client requests delegated to the work queue",
        )?;
        let work_items_processed = Counter::new(
            "work_items_processed",
            "The total number of work items processed against the engine",
        )?;
        let work_items_failed = Counter::new(
            "work_items_failed",
            "The total number of work items that failed terminally",
        )?;
        let liquidity_updates_received = Counter::new(
            "liquidity_updates_received",
            "The total number of liquidity snapshots received from the engine",
        )?;
        let broadcasts_sent = Counter::new(
            "broadcasts_sent",
            "The total number of non-empty liquidity broadcasts sent",
        )?;
        let oracle_updates_submitted = Counter::new(
            "oracle_updates_submitted",
            "The total number of signed index price updates submitted",
        )?;
        let connected_subscribers = Gauge::new(
            "connected_subscribers",
            "The number of currently connected push subscribers",
        )?;
        let total_amount_of_data_stored = Gauge::new(
            "total_amount_of_data_stored",
            "The total amount of data stored on disk by the relay store",
        )?;

        registry.register(Box::new(requests_relayed.clone()))?;
        registry.register(Box::new(work_items_processed.clone()))?;
        registry.register(Box::new(work_items_failed.clone()))?;
        registry.register(Box::new(liquidity_updates_received.clone()))?;
        registry.register(Box::new(broadcasts_sent.clone()))?;
        registry.register(Box::new(oracle_updates_submitted.clone()))?;
        registry.register(Box::new(connected_subscribers.clone()))?;
        registry.register(Box::new(total_amount_of_data_stored.clone()))?;

        Ok(Self {
            registry,
            requests_relayed,
            work_items_processed,
            work_items_failed,
            liquidity_updates_received,
            broadcasts_sent,
            oracle_updates_submitted,
            connected_subscribers,
            total_amount_of_data_stored,
        })
    }

    /// Gathers the whole registry into the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
