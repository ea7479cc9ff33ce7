//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::server::AppState;
use super::transcode::{collect_completion, stream_chunks};
use super::types::{ChatCompletionRequest, ModelList};
use crate::error::{Error, Result};
use crate::upstream::{build_payload, event_stream, IdeToken};

/// Response header: the model named in the request.
pub const PROXIED_MODEL_HEADER: &str = "x-proxied-model";

/// Disables response buffering in nginx-style intermediaries.
const ACCEL_BUFFERING_HEADER: &str = "x-accel-buffering";

/// Relay the client's bearer token. A missing header relays an empty token.
///
/// Non-ASCII bytes are kept; invalid UTF-8 is replaced and logged.
fn ide_token(headers: &HeaderMap) -> IdeToken {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return IdeToken::from_authorization("");
    };

    let bytes = value.as_bytes();
    if std::str::from_utf8(bytes).is_err() {
        tracing::warn!("Authorization header is not valid UTF-8, relaying it lossily");
    }
    IdeToken::from_authorization(&String::from_utf8_lossy(bytes))
}

/// Handle POST /v1/chat/completions
///
/// The body is decoded regardless of its declared content type.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = std::time::Instant::now();

    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting malformed chat completion request");
            return Error::InvalidRequest(e.to_string()).into_response();
        }
    };

    let model = request.model.clone();
    let is_streaming = request.stream;

    let mut response = match execute_request(&state, &headers, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                model = %model,
                error = %e,
                latency_ms = start.elapsed().as_millis() as u64,
                "Chat completion request failed"
            );
            e.into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&model) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(PROXIED_MODEL_HEADER), value);
    }

    if !is_streaming && response.status().is_success() {
        tracing::info!(
            model = %model,
            latency_ms = start.elapsed().as_millis() as u64,
            "Chat completion finished"
        );
    }

    response
}

/// Translate, forward, and transcode one chat request.
async fn execute_request(
    state: &AppState,
    headers: &HeaderMap,
    request: ChatCompletionRequest,
) -> Result<Response> {
    let payload = build_payload(&request, &state.config.chat.locale, chrono::Local::now())?;

    tracing::info!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        current_turn = payload.current_turn,
        "Received chat completion request"
    );

    let upstream_response = state.upstream.chat(&ide_token(headers), &payload).await?;
    let items = event_stream(upstream_response.bytes_stream());

    if request.stream {
        Ok(streaming_response(Body::from_stream(stream_chunks(
            items,
            request.model,
        ))))
    } else {
        let completion = collect_completion(items, request.model).await?;
        Ok(Json(completion).into_response())
    }
}

/// Wrap an SSE body with headers that keep proxies from buffering it.
fn streaming_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static(ACCEL_BUFFERING_HEADER), "no"),
        ],
        body,
    )
        .into_response()
}

/// Handle GET /v1/models - the vendor's model list in OpenAI form
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ModelList>> {
    let models = state.upstream.list_models(&ide_token(&headers)).await?;
    tracing::debug!(count = models.len(), "Listed upstream models");
    Ok(Json(ModelList::new(models)))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "trae-proxy"
    }))
}
