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

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::AppState;

/// Upgrades a client connection onto the outbound-only push channel.
pub async fn handle_subscriber_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| accept_subscriber(state, socket))
}

/// Registers the connection with the broadcast pump and forwards its
/// outbound stream until either side hangs up. Inbound frames are read
/// only to notice the disconnect; subscribers have nothing to say.
async fn accept_subscriber(state: AppState, mut socket: WebSocket) {
    let (id, mut outbound) = state.subscribers.subscribe().await;
    tracing::debug!(subscriber = id, "push subscriber connected");
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // dropped by the pump for being unresponsive
                    break;
                };
                if socket.send(Message::Text(message)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
    state.subscribers.unsubscribe(id).await;
    tracing::debug!(subscriber = id, "push subscriber disconnected");
}
