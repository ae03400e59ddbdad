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

use axum::extract::State;

use crate::AppState;
use veil_relay_utils::HandlerError;

/// Handles relay metrics requests in the Prometheus text exposition
/// format.
pub async fn handle_metric_info(
    State(state): State<AppState>,
) -> Result<String, HandlerError> {
    let metrics = state.ctx.metrics.lock().await;
    metrics
        .gather()
        .map_err(|e| veil_relay_utils::Error::PrometheusError(e).into())
}
