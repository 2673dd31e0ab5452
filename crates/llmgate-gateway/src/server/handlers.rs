//! HTTP handlers for the gateway server

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    Extension,
};
use futures::Stream;
use llmgate_core::{ChatCompletionRequest, ErrorEvent};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AppState;
use crate::error::BridgeError;
use crate::live::{ChannelSender, PublishRequest, SubscribeRequest, PUBLISH_SUFFIX, SUBSCRIBE_SUFFIX};
use crate::logging::{generate_trace_id, TraceContext};

/// Buffered messages per live subscriber
const SUBSCRIBER_BUFFER: usize = 32;

/// Buffered frames per proxied completion
const PROXY_BUFFER: usize = 64;

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            BridgeError::StreamNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::StreamAlreadyActive(_) => StatusCode::CONFLICT,
            BridgeError::MissingIdToken { .. } | BridgeError::InvalidMessage { .. } => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::InitialExchange { .. } | BridgeError::TokenRefresh { .. } => {
                StatusCode::BAD_GATEWAY
            }
            BridgeError::Send { .. } => StatusCode::GONE,
            BridgeError::TokenExpired(_) | BridgeError::Cancelled(_) | BridgeError::Closed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BridgeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "[Gateway] Live request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "[Gateway] Live request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

enum SubscriberEvent {
    Message(Option<Bytes>),
    Ended(Result<Result<(), BridgeError>, tokio::task::JoinError>),
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
    pub token_exchange: bool,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.live.is_closed() { "closing" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.live.session_count(),
        token_exchange: state.live.requires_exchange(),
    })
}

/// `GET /api/live/{*channel}`: open a session and stream its messages as SSE.
///
/// The session lives as long as the SSE response: dropping the response
/// cancels the session loop, which removes the registry entry.
pub async fn live_subscribe(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, BridgeError> {
    if !channel.ends_with(SUBSCRIBE_SUFFIX) {
        return Err(BridgeError::StreamNotFound(channel));
    }

    let (sender, mut rx) = ChannelSender::pair(SUBSCRIBER_BUFFER);
    let request = SubscribeRequest {
        path: channel,
        headers,
    };
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let handle = state
        .live
        .open_session(&request, Arc::new(sender), &cancel)
        .await?;

    let path = handle.path().to_string();
    let mut session = tokio::spawn(handle.run(cancel));

    let stream = async_stream::stream! {
        let _guard = guard;
        loop {
            let next = tokio::select! {
                biased;
                ended = &mut session => SubscriberEvent::Ended(ended),
                message = rx.recv() => SubscriberEvent::Message(message),
            };

            match next {
                SubscriberEvent::Message(Some(payload)) => {
                    yield Ok::<_, Infallible>(Event::default().data(String::from_utf8_lossy(&payload)));
                }
                SubscriberEvent::Message(None) => break,
                SubscriberEvent::Ended(ended) => {
                    while let Ok(payload) = rx.try_recv() {
                        yield Ok(Event::default().data(String::from_utf8_lossy(&payload)));
                    }
                    match ended {
                        Ok(Ok(())) | Ok(Err(BridgeError::Cancelled(_))) => {}
                        Ok(Err(e)) => {
                            let frame = ErrorEvent::new(e.to_string()).to_bytes();
                            yield Ok(Event::default().event("error").data(String::from_utf8_lossy(&frame)));
                        }
                        Err(e) => warn!(path = %path, error = %e, "[Gateway] Session task panicked"),
                    }
                    break;
                }
            }
        }
        debug!(path = %path, "[Gateway] Subscriber stream ended");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `POST /api/live/{*channel}`: publish one message to a session
pub async fn live_publish(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, BridgeError> {
    if !channel.ends_with(PUBLISH_SUFFIX) {
        return Err(BridgeError::StreamNotFound(channel));
    }

    // Cancels in-flight tool calls if the caller goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state
        .live
        .publish(PublishRequest::new(channel, headers, body), cancel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /mcp`: stateless MCP over plain request/response
pub async fn mcp_http(
    State(state): State<AppState>,
    trace: Option<Extension<TraceContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, BridgeError> {
    let trace_id = trace
        .map(|Extension(t)| t.trace_id)
        .unwrap_or_else(generate_trace_id);

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let ctx = state.http_call_context(&headers, &trace_id, cancel).await?;
    let response = match state.engine.handle_message(ctx, &body).await {
        Some(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            payload,
        )
            .into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    Ok(response)
}

/// `POST /api/llm/chat/completions`
///
/// Streaming requests become an SSE stream of upstream chunks. A natural end
/// is marked with `data: [DONE]`; failures arrive as one `{"error": ..}` event.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if !request.stream {
        return match state.proxy.complete(request).await {
            Ok((status, body)) => (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(e) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("upstream request failed: {}", e) })),
            )
                .into_response(),
        };
    }

    let (sink, mut rx) = ChannelSender::pair(PROXY_BUFFER);
    let proxy = Arc::clone(&state.proxy);
    let task = tokio::spawn(async move { proxy.stream_chat(request, &sink).await });

    let stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, Infallible>(Event::default().data(String::from_utf8_lossy(&frame)));
        }
        match task.await {
            Ok(summary) if summary.is_completed() => yield Ok(Event::default().data("[DONE]")),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "[Gateway] Proxy task panicked");
                yield Ok(Event::default().data(String::from_utf8_lossy(&ErrorEvent::new("internal error").to_bytes())));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
