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

//! # Relay Utils Module
//!
//! Common error types, probes and metrics used across the relay workspace.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Metrics functionality.
pub mod metric;
/// A module used for debugging relay lifecycle, queue and stream state.
pub mod probe;
/// Retry functionality.
pub mod retry;

/// An enum of all possible errors that could be encountered during the
/// execution of the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying Io error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Configuration loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// URL parsing error.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying Http server.
    #[error(transparent)]
    Axum(#[from] axum::Error),
    /// HTTP protocol error.
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Sled transaction error.
    #[error(transparent)]
    SledTransaction(
        #[from] sled::transaction::TransactionError<std::io::Error>,
    ),
    /// HTTP client error.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// WebSocket error on the engine push stream.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Metrics registry error.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Market not configured or not enabled.
    #[error("Market Not Found: {}", market_id)]
    MarketNotFound {
        /// The id of the market.
        market_id: u32,
    },
    /// Token not configured.
    #[error("Token Not Found: {}", token)]
    TokenNotFound {
        /// The token code.
        token: u32,
    },
    /// The engine rejected or failed a delegated request.
    #[error("Engine call failed: {}", _0)]
    EngineFailure(String),
    /// The engine answered with a non-success status code.
    #[error("Engine returned status {}: {}", status, body)]
    EngineBadStatus {
        /// HTTP status returned by the engine endpoint.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// A work item carried a kind no handler is registered for.
    #[error("No handler for request kind: {}", _0)]
    UnroutableKind(String),
    /// The durable queue or one of the internal channels is gone.
    #[error("Work queue closed")]
    QueueClosed,
    /// The client-facing request expired before a reply arrived.
    #[error("Timed out waiting for engine reply")]
    ReplyTimeout,
    /// Failed to send the response to the client.
    #[error("Failed to send response to the client")]
    FailedToSendResponse,
    /// A startup scan of the persisted tables failed.
    #[error("Order book restore failed: {}", _0)]
    RestoreFailed(String),
    /// a background task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
}

/// A type alias for the result used across the relay, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for HandlerError {
    fn from(value: Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Error type returned by the HTTP handlers: a status code plus the
/// message shown to the client.
pub struct HandlerError(
    /// HTTP status code of the response.
    pub StatusCode,
    /// Message sent as the response body.
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}
