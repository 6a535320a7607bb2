use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use chatgate_protocol::{GatewayError, Message, StreamEvent};

use crate::router::ProviderRoute;
use crate::session::Credential;

/// Lazy, single-pass, non-restartable event sequence. Callers needing the
/// full text accumulate chunks themselves or wait for the terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub route: ProviderRoute,
    pub credential: Option<Credential>,
    pub cancel: CancellationToken,
}

/// Seam between the orchestrator and the upstream transport.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn execute(&self, request: ChatRequest) -> Result<EventStream, GatewayError>;
}
