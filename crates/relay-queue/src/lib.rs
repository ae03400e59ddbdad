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

//! # Relay Queue Module
//!
//! Turns synchronous client requests into durably queued work items and
//! matches asynchronous engine replies back to the waiting client.
//!
//! The moving parts:
//! - [`PendingReplies`]: the correlation map, confined to one actor task so
//!   the insert-then-exactly-once-remove contract cannot race.
//! - [`RequestRelay`]: the client-facing submit API. Generates a
//!   correlation id, registers a waiter, enqueues the work item and awaits
//!   the reply.
//! - [`Worker`]: the single consumer of the durable work queue. Dispatches
//!   each item to the engine call matching its kind, persists accepted
//!   order submissions, and publishes the result on the reply queue. The
//!   queue head is only removed after the reply is durably enqueued, so
//!   delivery is at-least-once end to end; persistence and reply
//!   resolution are both idempotent to compensate.
//! - [`ReplyPump`]: drains the reply queue, intercepts funding info
//!   replies into the stats cache, and resolves everything else against
//!   the correlation map.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod correlation;
mod relay;
mod worker;

pub use correlation::PendingReplies;
pub use relay::{ReplyPump, RequestRelay};
pub use worker::Worker;
