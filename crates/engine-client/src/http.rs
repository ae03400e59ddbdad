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

use serde_json::Value;
use url::Url;

use crate::{EngineMethod, EngineRpc};
use veil_relay_utils::{Error, Result};

/// The production engine backend: one POST per call against the engine's
/// RPC endpoint, method name as the path, JSON in and out.
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpEngineClient {
    /// Creates a client against the given engine RPC base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
        })
    }

    fn method_url(&self, method: EngineMethod) -> Result<Url> {
        self.base_url
            .join(method.name())
            .map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl EngineRpc for HttpEngineClient {
    #[tracing::instrument(skip(self, payload), fields(method = %method))]
    async fn call(&self, method: EngineMethod, payload: Value) -> Result<Value> {
        let url = self.method_url(method)?;
        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                method = %method,
                %status,
                "engine rejected the call"
            );
            return Err(Error::EngineBadStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_urls_join_onto_the_base() {
        let client = HttpEngineClient::new("http://127.0.0.1:50052/").unwrap();
        let url = client.method_url(EngineMethod::SubmitLimitOrder).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:50052/submit_limit_order");
    }
}
