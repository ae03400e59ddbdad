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

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::PriceSource;
use veil_engine_client::EngineRpc;
use veil_relay_context::RelayerContext;
use veil_relay_types::{
    OraclePriceUpdateRequest, OracleSignature, OracleUpdate, TokenId,
};
use veil_relay_utils::{probe, Error, Result};

/// Fetches external reference prices, signs a per-token index price
/// observation, and submits the batch to the engine.
///
/// Best effort per tick: a token whose fetch fails is skipped, a partial
/// batch is still submitted, and a tick where every fetch failed submits
/// nothing.
pub struct OracleFeed {
    ctx: RelayerContext,
    source: Arc<dyn PriceSource>,
    signing_key: SigningKey,
}

impl OracleFeed {
    /// Creates the feed, or `None` when no signing key is configured.
    pub fn new(
        ctx: RelayerContext,
        source: Arc<dyn PriceSource>,
    ) -> Result<Option<Self>> {
        let Some(hex_key) = ctx.config.oracle.signing_key.clone() else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_key.trim_start_matches("0x"))
            .map_err(|_| Error::Generic("oracle signing key is not hex"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Generic("oracle signing key must be 32 bytes"))?;
        Ok(Some(Self {
            ctx,
            source,
            signing_key: SigningKey::from_bytes(&bytes),
        }))
    }

    /// Runs the submission loop on the configured fixed interval.
    pub async fn run(self) -> Result<()> {
        let period =
            Duration::from_secs(self.ctx.config.intervals.oracle_secs);
        let mut ticker = tokio::time::interval(period);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Oracle,
            starting = true,
            observer_id = self.ctx.config.oracle.observer_id,
        );
        loop {
            ticker.tick().await;
            if let Err(e) = self.submit_once().await {
                tracing::warn!("index price submission failed: {}", e);
            }
        }
    }

    /// One oracle tick: observe every configured token and submit
    /// whatever succeeded.
    pub async fn submit_once(&self) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs();
        let mut updates = Vec::new();
        for token in &self.ctx.config.tokens {
            match self.source.last_price(&token.feed_pair).await {
                Ok(price) => {
                    let scaled = (price
                        * 10f64.powi(token.price_decimals as i32))
                        as u64;
                    updates.push(self.observe(token.token, scaled, timestamp));
                }
                Err(e) => {
                    tracing::warn!(
                        pair = %token.feed_pair,
                        "reference price fetch failed: {}",
                        e
                    );
                }
            }
        }
        if updates.is_empty() {
            return Ok(());
        }
        self.ctx
            .engine()
            .update_index_price(OraclePriceUpdateRequest {
                oracle_price_updates: updates,
            })
            .await?;
        self.ctx
            .metrics
            .lock()
            .await
            .oracle_updates_submitted
            .inc();
        Ok(())
    }

    /// Builds one signed observation.
    fn observe(
        &self,
        token: TokenId,
        price: u64,
        timestamp: u64,
    ) -> OracleUpdate {
        let message = pack_observation(price, token, timestamp);
        let digest = Sha256::digest(message);
        let signature = self.signing_key.sign(digest.as_slice());
        let bytes = signature.to_bytes();
        OracleUpdate {
            token,
            timestamp,
            observer_ids: vec![self.ctx.config.oracle.observer_id],
            prices: vec![price],
            signatures: vec![OracleSignature {
                r: hex::encode(&bytes[..32]),
                s: hex::encode(&bytes[32..]),
            }],
        }
    }
}

/// Packs `(price << 128) | (token << 64) | timestamp` into a 32-byte
/// big-endian message, the integer form the engine verifies signatures
/// over.
pub fn pack_observation(price: u64, token: TokenId, timestamp: u64) -> [u8; 32] {
    let mut message = [0u8; 32];
    message[8..16].copy_from_slice(&price.to_be_bytes());
    message[16..24].copy_from_slice(&u64::from(token).to_be_bytes());
    message[24..32].copy_from_slice(&timestamp.to_be_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockedPriceSource;
    use ed25519_dalek::{Verifier, VerifyingKey};
    use veil_engine_client::{EngineMethod, MockedEngineClient};
    use veil_relay_store::SledStore;

    const TEST_KEY: &str =
        "0101010101010101010101010101010101010101010101010101010101010101";

    fn test_context(engine: Arc<MockedEngineClient>) -> RelayerContext {
        let toml = format!(
            r#"
            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"

            [oracle]
            observer-id = 3
            signing-key = "{TEST_KEY}"
        "#
        );
        let config: veil_relay_config::RelayConfig = config::Config::builder()
            .add_source(config::File::from_str(
                &toml,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        RelayerContext::new(config, SledStore::temporary().unwrap(), engine)
            .unwrap()
    }

    #[test]
    fn observation_packing_matches_the_integer_form() {
        let message = pack_observation(5, 7, 9);
        // (5 << 128) | (7 << 64) | 9, big endian over 32 bytes
        let mut expected = [0u8; 32];
        expected[15] = 5;
        expected[23] = 7;
        expected[31] = 9;
        assert_eq!(message, expected);
    }

    #[tokio::test]
    async fn a_failed_token_is_skipped_and_the_rest_submitted() {
        let engine = Arc::new(MockedEngineClient::new());
        let ctx = test_context(engine.clone());
        let source = Arc::new(MockedPriceSource::new());
        source.set_price("BTCUSDT", 64_123.5);
        // ETHUSDT intentionally unavailable
        let feed = OracleFeed::new(ctx, source).unwrap().unwrap();

        feed.submit_once().await.unwrap();

        let calls = engine.calls_to(EngineMethod::UpdateIndexPrice);
        assert_eq!(calls.len(), 1);
        let updates = calls[0]["oracle_price_updates"].as_array().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["token"], 12345);
        // 64_123.5 scaled by 6 decimals
        assert_eq!(updates[0]["prices"][0], 64_123_500_000u64);
        assert_eq!(updates[0]["observer_ids"][0], 3);
    }

    #[tokio::test]
    async fn nothing_is_submitted_when_every_fetch_fails() {
        let engine = Arc::new(MockedEngineClient::new());
        let ctx = test_context(engine.clone());
        let feed =
            OracleFeed::new(ctx, Arc::new(MockedPriceSource::new()))
                .unwrap()
                .unwrap();
        feed.submit_once().await.unwrap();
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn signatures_verify_against_the_observer_key() {
        let engine = Arc::new(MockedEngineClient::new());
        let ctx = test_context(engine);
        let source = Arc::new(MockedPriceSource::new());
        source.set_price("BTCUSDT", 100.0);
        let feed = OracleFeed::new(ctx, source).unwrap().unwrap();

        let update = feed.observe(12345, 100_000_000, 1_700_000_000);
        let signature = &update.signatures[0];
        let mut bytes = [0u8; 64];
        bytes[..32]
            .copy_from_slice(&hex::decode(&signature.r).unwrap());
        bytes[32..]
            .copy_from_slice(&hex::decode(&signature.s).unwrap());
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);

        let key_bytes: [u8; 32] =
            hex::decode(TEST_KEY).unwrap().try_into().unwrap();
        let verifying = VerifyingKey::from(&SigningKey::from_bytes(&key_bytes));
        let digest =
            Sha256::digest(pack_observation(100_000_000, 12345, 1_700_000_000));
        assert!(verifying.verify(digest.as_slice(), &signature).is_ok());
    }

    #[tokio::test]
    async fn feed_is_disabled_without_a_signing_key() {
        let toml = r#"
            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"
        "#;
        let config: veil_relay_config::RelayConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let ctx = RelayerContext::new(
            config,
            SledStore::temporary().unwrap(),
            Arc::new(MockedEngineClient::new()),
        )
        .unwrap();
        let feed =
            OracleFeed::new(ctx, Arc::new(MockedPriceSource::new())).unwrap();
        assert!(feed.is_none());
    }
}
