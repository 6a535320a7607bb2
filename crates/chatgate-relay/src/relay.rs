use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{unfold, Stream};
use futures_util::StreamExt;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use chatgate_core::{ChatBackend, ChatRequest, EventStream, Transport};
use chatgate_protocol::{ErrorKind, GatewayError, Message, StreamEvent, Usage};

use crate::sse::SseParser;
use crate::upstream::{classify_status, shared_client};

const PUBLIC_KEY_HEADER: &str = "x-api-key";
const STREAM_TERMINATOR: &str = "[DONE]";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct UpstreamBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> UpstreamBody<'a> {
    fn new(model: &'a str, messages: &'a [Message], stream: bool) -> Self {
        Self {
            model,
            messages: messages
                .iter()
                .map(|message| WireMessage { role: message.role.as_str(), content: &message.content })
                .collect(),
            stream,
        }
    }
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Usage { prompt_tokens: wire.prompt_tokens, completion_tokens: wire.completion_tokens }
    }
}

#[derive(Deserialize)]
struct ChatDelta {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: DeltaBody,
}

#[derive(Deserialize, Default)]
struct DeltaBody {
    content: Option<String>,
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    choices: Vec<BatchChoice>,
    model: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct BatchChoice {
    message: BatchMessage,
}

#[derive(Deserialize)]
struct BatchMessage {
    content: Option<String>,
}

/// Upstream transport for both provider families. One relay instance is
/// shared across requests; per-request state lives in the returned stream.
pub struct HttpRelay {
    public_key: String,
    batch_timeout: Duration,
}

impl HttpRelay {
    pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(public_key: String, batch_timeout: Duration) -> Self {
        Self { public_key, batch_timeout }
    }

    fn apply_auth(&self, builder: wreq::RequestBuilder, request: &ChatRequest) -> wreq::RequestBuilder {
        match request.credential.as_ref() {
            Some(credential) => {
                builder.header(AUTHORIZATION, format!("Bearer {}", credential.token))
            }
            None => builder.header(PUBLIC_KEY_HEADER, self.public_key.clone()),
        }
    }

    async fn execute_stream(&self, request: ChatRequest) -> Result<EventStream, GatewayError> {
        let body = UpstreamBody::new(&request.model, &request.messages, true);
        let builder = shared_client().post(&request.route.endpoint).json(&body);
        let response = self
            .apply_auth(builder, &request)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let upstream = response
            .bytes_stream()
            .map(|item| item.map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string())));
        Ok(stream_events(upstream, request.model.clone(), request.cancel.clone()))
    }

    /// Single bounded-timeout request; the batch path has no progress
    /// signal, unlike the streaming path which is allowed to run long.
    async fn execute_batch(&self, request: ChatRequest) -> Result<EventStream, GatewayError> {
        let body = UpstreamBody::new(&request.model, &request.messages, false);
        let builder = shared_client().post(&request.route.endpoint).json(&body);
        let builder = self.apply_auth(builder, &request);

        let response = tokio::time::timeout(self.batch_timeout, builder.send())
            .await
            .map_err(|_| GatewayError::UpstreamHttp { status: 408 })?
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;

        let status = response.status();
        let bytes = tokio::time::timeout(self.batch_timeout, response.bytes())
            .await
            .map_err(|_| GatewayError::UpstreamHttp { status: 408 })?
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;
        if !status.is_success() {
            return Err(classify_status(status, &bytes));
        }

        let event = match serde_json::from_slice::<BatchResponse>(&bytes) {
            Ok(parsed) => {
                let text = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .unwrap_or_default();
                if text.trim().is_empty() {
                    GatewayError::EmptyResponse.to_event()
                } else {
                    StreamEvent::Complete {
                        content: text,
                        model: parsed.model.unwrap_or(request.model),
                        usage: parsed.usage.map(Usage::from),
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "malformed batch response body");
                StreamEvent::error(ErrorKind::EmptyResponse, "malformed response body")
            }
        };
        Ok(Box::pin(futures_util::stream::iter([event])))
    }
}

#[async_trait]
impl ChatBackend for HttpRelay {
    async fn execute(&self, request: ChatRequest) -> Result<EventStream, GatewayError> {
        match request.route.transport {
            Transport::Stream => self.execute_stream(request).await,
            Transport::Batch => self.execute_batch(request).await,
        }
    }
}

struct StreamState<S> {
    upstream: Pin<Box<S>>,
    parser: SseParser,
    pending: VecDeque<StreamEvent>,
    transcript: String,
    saw_chunk: bool,
    usage: Option<Usage>,
    model: String,
    finished: bool,
    cancel: CancellationToken,
}

impl<S> StreamState<S> {
    fn absorb(&mut self, events: Vec<crate::sse::SseEvent>) {
        for event in events {
            if event.data == STREAM_TERMINATOR {
                continue;
            }
            match serde_json::from_str::<ChatDelta>(&event.data) {
                Ok(delta) => {
                    if let Some(usage) = delta.usage {
                        self.usage = Some(usage.into());
                    }
                    let content = delta.choices.into_iter().next().and_then(|c| c.delta.content);
                    if let Some(text) = content {
                        self.saw_chunk = true;
                        if !text.is_empty() {
                            self.transcript.push_str(&text);
                            self.pending.push_back(StreamEvent::chunk(text));
                        }
                    }
                }
                Err(err) => {
                    // Per-line failure: skipped, never aborts the stream.
                    warn!(error = %err, "skipping malformed stream frame");
                }
            }
        }
    }

    fn finalize(&mut self) {
        let event = if !self.saw_chunk {
            GatewayError::EmptyStream.to_event()
        } else if self.transcript.trim().is_empty() {
            GatewayError::EmptyResponse.to_event()
        } else {
            StreamEvent::Complete {
                content: self.transcript.clone(),
                model: self.model.clone(),
                usage: self.usage,
            }
        };
        self.pending.push_back(event);
        self.finished = true;
    }
}

/// Decodes an upstream byte stream into the normalized event sequence:
/// one `Chunk` per parsed delta, then exactly one terminal event. Once
/// cancelled it stops reading and emits nothing further.
pub fn stream_events<S>(upstream: S, model: String, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
{
    let state = StreamState {
        upstream: Box::pin(upstream),
        parser: SseParser::new(),
        pending: VecDeque::new(),
        transcript: String::new(),
        saw_chunk: false,
        usage: None,
        model,
        finished: false,
        cancel,
    };

    Box::pin(unfold(state, |mut state| async move {
        loop {
            if state.cancel.is_cancelled() {
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            // Also interrupts a read already in flight, so the upstream
            // connection is released as soon as the token is raised.
            let item = tokio::select! {
                _ = state.cancel.cancelled() => return None,
                item = state.upstream.next() => item,
            };
            match item {
                Some(Ok(bytes)) => {
                    let events = state.parser.push_bytes(&bytes);
                    state.absorb(events);
                }
                Some(Err(err)) => {
                    state.pending.push_back(StreamEvent::error(
                        ErrorKind::UpstreamUnavailable,
                        err.to_string(),
                    ));
                    state.finished = true;
                }
                None => {
                    let events = state.parser.finish();
                    state.absorb(events);
                    state.finalize();
                }
            }
        }
    }))
}
