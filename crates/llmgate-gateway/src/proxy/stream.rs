//! Chat-completion streaming proxy
//!
//! One call owns one upstream connection. Upstream events are forwarded to the
//! sink as soon as they are decoded; every failure after the request is sent
//! becomes a single in-band `{"error": ..}` frame. `stream_chat` never returns
//! an error: its summary is for logging only.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use llmgate_core::{ChatCompletionRequest, ErrorEvent, ProviderSettings};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::provider::{upstream_error_message, DecodeState, Decoded, Provider};
use super::sse::SseDecoder;
use crate::live::StreamSender;
use crate::logging::{RequestSpan, TraceContext};

/// Longest upstream body excerpt carried in an error event
const MAX_ERROR_DETAIL: usize = 512;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Maximum silence between upstream chunks
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Upstream reached its terminal marker (or ended cleanly)
    Completed,
    /// An error event was delivered to the sink
    Failed(String),
    /// The sink went away; upstream was dropped
    SinkClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Content frames delivered to the sink
    pub forwarded: usize,
    pub outcome: StreamOutcome,
}

impl StreamSummary {
    pub fn is_completed(&self) -> bool {
        self.outcome == StreamOutcome::Completed
    }
}

pub struct StreamProxy {
    http: reqwest::Client,
    provider: Provider,
    settings: ProviderSettings,
    config: ProxyConfig,
}

impl StreamProxy {
    pub fn new(settings: &ProviderSettings, config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(http, settings, config))
    }

    pub fn with_client(http: reqwest::Client, settings: &ProviderSettings, config: ProxyConfig) -> Self {
        Self {
            http,
            provider: Provider::from_settings(settings),
            settings: settings.clone(),
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.settings.kind.as_str()
    }

    /// Stream one chat completion into `sink`
    pub async fn stream_chat(&self, request: ChatCompletionRequest, sink: &dyn StreamSender) -> StreamSummary {
        let mut request = request;
        request.stream = true;
        request.model = self.settings.resolve_model(&request.model);

        let trace = TraceContext::new("STREAM", &request.model).with_provider(self.provider_name());
        RequestSpan::log_entry(&trace);

        let response = match self.provider.build_request(&self.http, &request).send().await {
            Ok(response) => response,
            Err(e) => return fail(sink, 0, format!("upstream request failed: {}", e)).await,
        };

        let status = response.status();
        let summary = if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            fail(sink, 0, status_message(status, &body)).await
        } else {
            pump(&self.provider, response.bytes_stream(), sink, self.config.idle_timeout).await
        };

        let detail = match &summary.outcome {
            StreamOutcome::Completed => format!("completed, {} chunks", summary.forwarded),
            StreamOutcome::Failed(message) => format!("failed after {} chunks: {}", summary.forwarded, message),
            StreamOutcome::SinkClosed => format!("client gone after {} chunks", summary.forwarded),
        };
        RequestSpan::log_exit(&trace, status.as_u16(), Some(&detail));
        summary
    }

    /// Non-streaming pass-through: upstream status and body, unchanged
    pub async fn complete(&self, request: ChatCompletionRequest) -> Result<(StatusCode, Bytes), reqwest::Error> {
        let mut request = request;
        request.stream = false;
        request.model = self.settings.resolve_model(&request.model);

        debug!(provider = self.provider_name(), model = %request.model, "Forwarding completion");
        let response = self.provider.build_request(&self.http, &request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body))
    }
}

/// `"<status> <detail>"` for a non-200 upstream response
pub fn status_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| upstream_error_message(&value))
        .unwrap_or_else(|| body.trim().to_string());

    let detail: String = detail.chars().take(MAX_ERROR_DETAIL).collect();
    if detail.is_empty() {
        status.to_string()
    } else {
        format!("{} {}", status, detail)
    }
}

/// Deliver the single error event
async fn fail(sink: &dyn StreamSender, forwarded: usize, message: String) -> StreamSummary {
    warn!(error = %message, forwarded, "Upstream stream failed");
    let outcome = match sink.send(ErrorEvent::new(message.clone()).to_bytes()).await {
        Ok(()) => StreamOutcome::Failed(message),
        Err(_) => StreamOutcome::SinkClosed,
    };
    StreamSummary { forwarded, outcome }
}

/// Read, decode and forward upstream chunks until a terminal condition
pub(crate) async fn pump<S, E>(
    provider: &Provider,
    upstream: S,
    sink: &dyn StreamSender,
    idle_timeout: Duration,
) -> StreamSummary
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut decoder = SseDecoder::new();
    let mut state = DecodeState::default();
    let mut forwarded = 0;

    loop {
        let next = match tokio::time::timeout(idle_timeout, upstream.next()).await {
            Ok(next) => next,
            Err(_) => {
                let message = format!("upstream idle for more than {}s", idle_timeout.as_secs());
                return fail(sink, forwarded, message).await;
            }
        };

        let (events, ended) = match next {
            Some(Ok(bytes)) => (decoder.push(&bytes), false),
            Some(Err(e)) => {
                return fail(sink, forwarded, format!("upstream connection lost: {}", e)).await;
            }
            None => match std::mem::take(&mut decoder).finish() {
                Ok(last) => (last.into_iter().collect(), true),
                Err(truncated) => return fail(sink, forwarded, truncated.to_string()).await,
            },
        };

        for data in events {
            match provider.decode(&data, &mut state) {
                Decoded::Chunk(frame) => {
                    if sink.send(frame).await.is_err() {
                        info!(forwarded, "Sink closed, dropping upstream");
                        return StreamSummary {
                            forwarded,
                            outcome: StreamOutcome::SinkClosed,
                        };
                    }
                    forwarded += 1;
                }
                Decoded::Skip => {}
                Decoded::Done => {
                    return StreamSummary {
                        forwarded,
                        outcome: StreamOutcome::Completed,
                    };
                }
                Decoded::Error(message) => return fail(sink, forwarded, message).await,
            }
        }

        if ended {
            debug!(forwarded, "Upstream ended without a terminal marker");
            return StreamSummary {
                forwarded,
                outcome: StreamOutcome::Completed,
            };
        }
    }
}
