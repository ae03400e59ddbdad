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
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use veil_relay_utils::{probe, Error, Result};

/// Commands accepted by the correlation map actor.
enum Command {
    /// A new request is in flight; remember how to answer it.
    Register {
        correlation_id: String,
        waiter: oneshot::Sender<Value>,
    },
    /// A tagged reply arrived; answer and forget the waiter.
    Resolve {
        correlation_id: String,
        payload: Value,
    },
}

struct PendingEntry {
    waiter: oneshot::Sender<Value>,
    deadline: Instant,
}

/// The correlation map: pending client replies keyed by correlation id.
///
/// The map itself is owned by a single actor task; this handle only sends
/// commands to it, so an insert and its exactly-once removal can never
/// interleave. Entries are removed either by the matching reply or by the
/// expiry sweep, whichever comes first. Resolving an id with no entry is a
/// no-op, which makes duplicate reply delivery safe.
#[derive(Clone)]
pub struct PendingReplies {
    commands: mpsc::Sender<Command>,
}

impl PendingReplies {
    /// Spawns the actor task. `reply_timeout` bounds how long an entry may
    /// wait before its client is answered with a timeout error.
    pub fn new(reply_timeout: Duration) -> Self {
        let (commands, rx) = mpsc::channel(1024);
        tokio::spawn(run_actor(rx, reply_timeout));
        Self { commands }
    }

    /// Registers the waiter for a correlation id.
    pub async fn register(
        &self,
        correlation_id: String,
        waiter: oneshot::Sender<Value>,
    ) -> Result<()> {
        self.commands
            .send(Command::Register {
                correlation_id,
                waiter,
            })
            .await
            .map_err(|_| Error::QueueClosed)
    }

    /// Resolves a correlation id with the given reply payload.
    pub async fn resolve(
        &self,
        correlation_id: String,
        payload: Value,
    ) -> Result<()> {
        self.commands
            .send(Command::Resolve {
                correlation_id,
                payload,
            })
            .await
            .map_err(|_| Error::QueueClosed)
    }
}

async fn run_actor(
    mut commands: mpsc::Receiver<Command>,
    reply_timeout: Duration,
) {
    let mut pending: HashMap<String, PendingEntry> = HashMap::new();
    let sweep_period = (reply_timeout / 4).max(Duration::from_secs(1));
    let mut sweep = tokio::time::interval(sweep_period);
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    // every handle dropped; nothing can register anymore.
                    return;
                };
                match command {
                    Command::Register { correlation_id, waiter } => {
                        let deadline = Instant::now() + reply_timeout;
                        pending.insert(
                            correlation_id,
                            PendingEntry { waiter, deadline },
                        );
                    }
                    Command::Resolve { correlation_id, payload } => {
                        match pending.remove(&correlation_id) {
                            Some(entry) => {
                                // the waiter may have hung up already; a
                                // reply for a gone client is discarded.
                                let _ = entry.waiter.send(payload);
                            }
                            None => {
                                tracing::trace!(
                                    %correlation_id,
                                    "reply with no registered waiter, discarding"
                                );
                            }
                        }
                    }
                }
            }
            _ = sweep.tick() => {
                let now = Instant::now();
                let before = pending.len();
                // dropping the waiter resolves the client with a timeout.
                pending.retain(|_, entry| entry.deadline > now);
                let expired = before - pending.len();
                if expired > 0 {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::RequestRelay,
                        expired_replies = expired,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replies_resolve_registered_waiters() {
        let pending = PendingReplies::new(Duration::from_secs(30));
        let (tx, rx) = oneshot::channel();
        pending.register("spot_order0.1".into(), tx).await.unwrap();
        pending
            .resolve("spot_order0.1".into(), json!({"order_id": 42}))
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap()["order_id"], 42);
    }

    #[tokio::test]
    async fn a_duplicate_reply_is_a_no_op() {
        let pending = PendingReplies::new(Duration::from_secs(30));
        let (tx, rx) = oneshot::channel();
        pending.register("cancel0.7".into(), tx).await.unwrap();
        pending
            .resolve("cancel0.7".into(), json!({"n": 1}))
            .await
            .unwrap();
        // second delivery of the same tag must not error out
        pending
            .resolve("cancel0.7".into(), json!({"n": 2}))
            .await
            .unwrap();
        // and the client saw exactly the first payload
        assert_eq!(rx.await.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn an_unknown_correlation_id_is_discarded() {
        let pending = PendingReplies::new(Duration::from_secs(30));
        pending
            .resolve("never_registered".into(), json!({}))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_time_the_client_out() {
        let pending = PendingReplies::new(Duration::from_secs(2));
        let (tx, rx) = oneshot::channel();
        pending.register("amend0.3".into(), tx).await.unwrap();
        // let the sweep pass the deadline
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.await.is_err());
    }
}
