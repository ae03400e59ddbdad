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

use derive_more::Display;

/// Target for logger
pub const TARGET: &str = "veil_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the Relay changes, like starting or shutting down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Client request delegation and reply resolution.
    #[display(fmt = "request_relay")]
    RequestRelay,
    /// Durable work queue consumer state.
    #[display(fmt = "work_queue")]
    WorkQueue,
    /// Engine push stream subscription state.
    #[display(fmt = "liquidity_ingest")]
    LiquidityIngest,
    /// Order book broadcast loop state.
    #[display(fmt = "broadcast")]
    Broadcast,
    /// Startup order book restore state.
    #[display(fmt = "restore")]
    Restore,
    /// Market statistics refresh loops.
    #[display(fmt = "stats")]
    Stats,
    /// Index price oracle feed state.
    #[display(fmt = "oracle")]
    Oracle,
    /// When the relay will retry to do something.
    #[display(fmt = "retry")]
    Retry,
}
