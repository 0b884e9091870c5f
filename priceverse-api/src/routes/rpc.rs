//! RPC envelope endpoint
//!
//! One POST surface; the envelope names the service and method. Validation
//! failures come back unchanged, system internals are rewritten before they
//! reach the wire.

use axum::{extract::State, http::HeaderMap, response::Json, routing::post, Router};
use serde_json::Value;
use tracing::debug;

use priceverse_core::{CoreError, ErrorCode, RpcRequest, RpcResponse};

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/rpc", post(rpc_handler))
}

async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return Json(RpcResponse::err(
                "unknown",
                CoreError::invalid_params(format!("malformed envelope: {e}")),
            ));
        }
    };

    debug!(
        "[RPC] {} {}.{}",
        request.id, request.service, request.method
    );

    if request.version != "2.0" {
        return Json(RpcResponse::err(
            request.id,
            CoreError::invalid_params(format!(
                "unsupported envelope version: {}",
                request.version
            )),
        ));
    }

    // Per-client, per-method limiter; store trouble fails open inside
    if let Some(limiter) = &state.limiter {
        let client = headers
            .get("x-client-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous");
        let decision = limiter.check(client, Some(&request.method)).await;
        if !decision.allowed {
            let error = CoreError::new(ErrorCode::ServiceUnavailable, "rate limit exceeded")
                .with_details(serde_json::json!({
                    "retryAfter": decision.retry_after_ms,
                    "resetTime": decision.reset_time_ms,
                }));
            return Json(RpcResponse::err(request.id, error));
        }
    }

    let result = dispatch(&state, &request).await;
    Json(match result {
        Ok(data) => RpcResponse::ok(request.id, data),
        Err(error) => RpcResponse::err(request.id, error),
    })
}

async fn dispatch(state: &AppState, request: &RpcRequest) -> Result<Value, CoreError> {
    let input = request.input.clone();
    match request.service.as_str() {
        "PricesService@2.0.0" => state.prices_service.dispatch(&request.method, input).await,
        "ChartsService@2.0.0" => state.charts_service.dispatch(&request.method, input),
        "HealthService@1.0.0" => state.health_service.dispatch(&request.method, input).await,
        other => Err(CoreError::invalid_params(format!(
            "unknown service: {other}"
        ))),
    }
}
