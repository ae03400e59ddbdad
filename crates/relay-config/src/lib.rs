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

#![warn(missing_docs)]

//! # Relay Configuration Module
//!
//! Configuration for the relay: the engine endpoints, the markets and
//! tokens served, the cadence of the periodic loops, and feature toggles.
//! Values are layered from TOML files in a config directory plus `VEIL_*`
//! environment variables.

/// CLI configuration
pub mod cli;
/// Utils for processing configuration
pub mod utils;

use serde::{Deserialize, Serialize};
use veil_relay_types::{MarketClass, MarketId, TokenId};

/// The default port the relay's HTTP/WS surface listens on.
const fn default_port() -> u16 {
    4000
}
/// The liquidity broadcast tick, in milliseconds.
const fn default_broadcast_interval_ms() -> u64 {
    1_000
}
/// 24h volume/trade refresh cadence, in seconds.
const fn default_stats_refresh_secs() -> u64 {
    15 * 60
}
/// Funding snapshot refresh cadence, in seconds.
const fn default_funding_refresh_secs() -> u64 {
    60 * 60
}
/// External price feed poll cadence, in seconds.
const fn default_price_feed_secs() -> u64 {
    10
}
/// Index price oracle submission cadence, in seconds.
const fn default_oracle_secs() -> u64 {
    3
}
/// How long a client request may wait for its engine reply.
const fn default_reply_timeout_secs() -> u64 {
    30
}
/// Grace period before an unroutable work item fails.
const fn default_unroutable_grace_secs() -> u64 {
    5
}
const fn enabled_default() -> bool {
    true
}

fn default_spot_markets() -> Vec<MarketId> {
    vec![11, 12]
}
fn default_perp_markets() -> Vec<MarketId> {
    vec![21, 22]
}

fn default_tokens() -> Vec<TokenConfig> {
    vec![
        TokenConfig {
            symbol: String::from("BTC"),
            token: 12345,
            price_decimals: 6,
            feed_pair: String::from("BTCUSDT"),
        },
        TokenConfig {
            symbol: String::from("ETH"),
            token: 54321,
            price_decimals: 6,
            feed_pair: String::from("ETHUSDT"),
        },
    ]
}

/// RelayConfig is the top-level configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    /// HTTP/WebSocket server port.
    ///
    /// defaults to 4000
    #[serde(default = "default_port")]
    pub port: u16,
    /// The engine endpoints and stream identity.
    pub engine: EngineConfig,
    /// Spot market ids served by this relay.
    #[serde(default = "default_spot_markets")]
    pub spot_markets: Vec<MarketId>,
    /// Perpetual market ids served by this relay.
    #[serde(default = "default_perp_markets")]
    pub perp_markets: Vec<MarketId>,
    /// Tokens known to the relay, with their feed pairs and decimals.
    #[serde(default = "default_tokens")]
    pub tokens: Vec<TokenConfig>,
    /// External market data API used for price feeds and the oracle.
    #[serde(default)]
    pub price_api: PriceApiConfig,
    /// Historical trade log used for the 24h statistics.
    #[serde(default)]
    pub trade_log: TradeLogConfig,
    /// Index price oracle identity.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Periodic loop cadences.
    #[serde(default)]
    pub intervals: IntervalsConfig,
    /// Feature toggles for the relay services.
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// How to reach the engine: the RPC endpoint and the push stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Base URL of the engine's RPC endpoint.
    pub rpc_url: String,
    /// URL of the engine's liquidity push stream.
    pub stream_url: String,
    /// Identity sent in the push stream handshake.
    #[serde(default = "default_subscriber_id")]
    pub subscriber_id: String,
    /// Shared configuration code sent in the push stream handshake.
    #[serde(default = "default_config_code")]
    pub config_code: String,
}

fn default_subscriber_id() -> String {
    String::from("43147634234")
}
fn default_config_code() -> String {
    String::from("1234567890")
}

/// A token the relay serves: engine code, decimals and external feed pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenConfig {
    /// Display symbol, also the key of price feed broadcasts.
    pub symbol: String,
    /// The engine's numeric token code.
    pub token: TokenId,
    /// Decimals used to scale external prices for the engine.
    pub price_decimals: u32,
    /// The pair queried on the external price API.
    pub feed_pair: String,
}

/// The external market data API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PriceApiConfig {
    /// Base URL of the price API.
    pub base_url: String,
    /// Optional API key appended to requests.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for PriceApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.exchange.example/markets"),
            api_key: None,
        }
    }
}

/// The historical trade log service queried for 24h statistics.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TradeLogConfig {
    /// Base URL of the trade log query endpoint.
    pub base_url: String,
}

impl Default for TradeLogConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://127.0.0.1:8080/trades"),
        }
    }
}

/// Identity used to sign index price updates.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OracleConfig {
    /// This relay's observer id in the engine's oracle set.
    #[serde(default)]
    pub observer_id: u32,
    /// Hex-encoded 32-byte signing key. When absent the oracle feed is
    /// not started.
    #[serde(default, skip_serializing)]
    pub signing_key: Option<String>,
}

/// Cadences of the relay's periodic loops.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IntervalsConfig {
    /// Liquidity broadcast tick, milliseconds.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_ms: u64,
    /// 24h volume/trade refresh, seconds.
    #[serde(default = "default_stats_refresh_secs")]
    pub stats_refresh_secs: u64,
    /// Funding snapshot refresh, seconds.
    #[serde(default = "default_funding_refresh_secs")]
    pub funding_refresh_secs: u64,
    /// External price feed poll, seconds.
    #[serde(default = "default_price_feed_secs")]
    pub price_feed_secs: u64,
    /// Index price submission, seconds.
    #[serde(default = "default_oracle_secs")]
    pub oracle_secs: u64,
    /// Client reply expiry, seconds.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
    /// Unroutable work item grace period, seconds.
    #[serde(default = "default_unroutable_grace_secs")]
    pub unroutable_grace_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            broadcast_ms: default_broadcast_interval_ms(),
            stats_refresh_secs: default_stats_refresh_secs(),
            funding_refresh_secs: default_funding_refresh_secs(),
            price_feed_secs: default_price_feed_secs(),
            oracle_secs: default_oracle_secs(),
            reply_timeout_secs: default_reply_timeout_secs(),
            unroutable_grace_secs: default_unroutable_grace_secs(),
        }
    }
}

/// Feature toggles for the relay services.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeaturesConfig {
    /// Enable the durable queue worker and client request delegation.
    #[serde(default = "enabled_default")]
    pub request_relay: bool,
    /// Enable the push stream ingest and liquidity broadcasts.
    #[serde(default = "enabled_default")]
    pub liquidity_broadcast: bool,
    /// Enable the 24h statistics and funding refresh loops.
    #[serde(default = "enabled_default")]
    pub market_stats: bool,
    /// Enable the signed index price oracle feed.
    #[serde(default = "enabled_default")]
    pub oracle_feed: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            request_relay: true,
            liquidity_broadcast: true,
            market_stats: true,
            oracle_feed: true,
        }
    }
}

impl RelayConfig {
    /// All configured markets, spot first.
    pub fn all_markets(&self) -> impl Iterator<Item = (MarketId, MarketClass)> + '_ {
        self.spot_markets
            .iter()
            .map(|m| (*m, MarketClass::Spot))
            .chain(self.perp_markets.iter().map(|m| (*m, MarketClass::Perpetual)))
    }

    /// Looks up the class of a configured market.
    pub fn market_class(&self, market_id: MarketId) -> Option<MarketClass> {
        if self.spot_markets.contains(&market_id) {
            Some(MarketClass::Spot)
        } else if self.perp_markets.contains(&market_id) {
            Some(MarketClass::Perpetual)
        } else {
            None
        }
    }

    /// Looks up a token's configuration by its engine code.
    pub fn token(&self, token: TokenId) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let toml = r#"
            [engine]
            rpc-url = "http://127.0.0.1:50052"
            stream-url = "ws://127.0.0.1:50053"
        "#;
        let config: RelayConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.spot_markets, vec![11, 12]);
        assert_eq!(config.perp_markets, vec![21, 22]);
        assert_eq!(config.intervals.broadcast_ms, 1_000);
        assert!(config.features.request_relay);
        assert_eq!(config.market_class(21), Some(MarketClass::Perpetual));
        assert_eq!(config.market_class(99), None);
        assert_eq!(config.token(12345).unwrap().symbol, "BTC");
    }
}
