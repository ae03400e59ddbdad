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

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::{EngineMethod, EngineRpc};
use veil_relay_utils::{Error, Result};

/// A scriptable in-memory engine used by tests across the workspace.
///
/// Every call is recorded; replies are served from per-method scripts and
/// fall back to `{"successful": true}` when no script is queued.
#[derive(Debug, Default)]
pub struct MockedEngineClient {
    calls: Mutex<Vec<(EngineMethod, Value)>>,
    scripts: Mutex<HashMap<EngineMethod, VecDeque<MockReply>>>,
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer the call with this value.
    Ok(Value),
    /// Fail the call with this engine error.
    Err(String),
}

impl MockedEngineClient {
    /// Creates an engine that answers every call with
    /// `{"successful": true}`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the next unscripted call of `method`.
    pub fn script_reply(&self, method: EngineMethod, reply: Value) {
        self.scripts
            .lock()
            .expect("mock scripts lock")
            .entry(method)
            .or_default()
            .push_back(MockReply::Ok(reply));
    }

    /// Queues a failure for the next unscripted call of `method`.
    pub fn script_failure(&self, method: EngineMethod, reason: &str) {
        self.scripts
            .lock()
            .expect("mock scripts lock")
            .entry(method)
            .or_default()
            .push_back(MockReply::Err(reason.to_owned()));
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<(EngineMethod, Value)> {
        self.calls.lock().expect("mock calls lock").clone()
    }

    /// The payloads of all calls made to `method`, in order.
    pub fn calls_to(&self, method: EngineMethod) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait::async_trait]
impl EngineRpc for MockedEngineClient {
    async fn call(&self, method: EngineMethod, payload: Value) -> Result<Value> {
        self.calls
            .lock()
            .expect("mock calls lock")
            .push((method, payload));
        let scripted = self
            .scripts
            .lock()
            .expect("mock scripts lock")
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(MockReply::Ok(value)) => Ok(value),
            Some(MockReply::Err(reason)) => Err(Error::EngineFailure(reason)),
            None => Ok(json!({ "successful": true })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_are_served_in_order_then_fall_back() {
        let engine = MockedEngineClient::new();
        engine.script_reply(
            EngineMethod::SubmitLimitOrder,
            json!({"successful": true, "order_id": 42}),
        );
        engine.script_failure(EngineMethod::SubmitLimitOrder, "book closed");

        let first = engine
            .call(EngineMethod::SubmitLimitOrder, json!({}))
            .await
            .unwrap();
        assert_eq!(first["order_id"], 42);

        let second = engine
            .call(EngineMethod::SubmitLimitOrder, json!({}))
            .await;
        assert!(second.is_err());

        let third = engine
            .call(EngineMethod::SubmitLimitOrder, json!({}))
            .await
            .unwrap();
        assert_eq!(third, json!({"successful": true}));

        assert_eq!(engine.calls_to(EngineMethod::SubmitLimitOrder).len(), 3);
    }
}
