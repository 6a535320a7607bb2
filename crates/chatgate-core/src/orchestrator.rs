use std::sync::Arc;

use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use chatgate_protocol::{GatewayError, Message, Role, StreamEvent};

use crate::backend::{ChatBackend, ChatRequest, EventStream};
use crate::fingerprint::{identify, ClientAttributes};
use crate::flight::{FlightGuard, FlightMap};
use crate::quota::{Identity, QuotaGate};
use crate::router::ProviderRegistry;
use crate::session::SessionCache;
use crate::write::WriteJob;

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub client_id: String,
    pub user_id: Option<i64>,
    pub conversation_id: Option<Uuid>,
    /// Ordinal of the user message within the conversation; the assistant
    /// reply lands at the next one.
    pub next_ordinal: i32,
    pub model: String,
    pub messages: Vec<Message>,
    pub attributes: ClientAttributes,
    pub cancel: CancellationToken,
}

/// Single entry point: acquires the single-flight lock and drives the
/// gate -> router -> relay pipeline, retrying once on an auth failure.
pub struct Orchestrator {
    gate: QuotaGate,
    sessions: Arc<SessionCache>,
    registry: ProviderRegistry,
    backend: Arc<dyn ChatBackend>,
    flights: FlightMap,
    writer: Option<UnboundedSender<WriteJob>>,
}

impl Orchestrator {
    pub fn new(
        gate: QuotaGate,
        sessions: Arc<SessionCache>,
        registry: ProviderRegistry,
        backend: Arc<dyn ChatBackend>,
        flights: FlightMap,
        writer: Option<UnboundedSender<WriteJob>>,
    ) -> Self {
        Self { gate, sessions, registry, backend, flights, writer }
    }

    pub async fn send(&self, request: SendRequest) -> Result<EventStream, GatewayError> {
        let guard = self.flights.acquire(&request.client_id)?;

        let now = OffsetDateTime::now_utc();
        let identity = match request.user_id {
            Some(user_id) => Identity::User(user_id),
            None => Identity::Anonymous(identify(&request.attributes)),
        };
        self.gate.authorize(&identity, now).await?;
        // Budget decrements once the request is accepted, not when it
        // completes, so a later stream failure still counts.
        self.gate.record(&identity, now).await?;

        let route = self.registry.resolve(&request.model);
        let mut upstream: Option<EventStream> = None;
        for attempt in 0..2 {
            let credential = self.sessions.credential(OffsetDateTime::now_utc()).await;
            let call = ChatRequest {
                model: request.model.clone(),
                messages: request.messages.clone(),
                route: route.clone(),
                credential,
                cancel: request.cancel.clone(),
            };
            match self.backend.execute(call).await {
                Ok(stream) => {
                    upstream = Some(stream);
                    break;
                }
                Err(GatewayError::AuthExpired) if attempt == 0 => {
                    debug!(model = %request.model, "upstream rejected credential, refreshing once");
                    self.sessions.invalidate().await;
                }
                Err(err) => return Err(err),
            }
        }
        let Some(upstream) = upstream else {
            // Both attempts failed with an auth error; surfaced, not retried.
            return Err(GatewayError::AuthExpired);
        };

        Ok(self.guarded(upstream, guard, request))
    }

    /// Wraps the relay stream so the flight lock is held for its whole
    /// lifetime and the finished exchange is queued for persistence without
    /// blocking the return path.
    fn guarded(&self, mut upstream: EventStream, guard: FlightGuard, request: SendRequest) -> EventStream {
        let writer = self.writer.clone();
        let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
        let user_message = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .cloned();
        let user_id = request.user_id;
        let user_ordinal = request.next_ordinal;

        Box::pin(async_stream::stream! {
            let _guard = guard;
            while let Some(event) = upstream.next().await {
                if let StreamEvent::Complete { content, model, .. } = &event {
                    if let (Some(writer), Some(user_message)) = (writer.as_ref(), user_message.as_ref()) {
                        let job = WriteJob {
                            conversation_id,
                            user_id,
                            user_ordinal,
                            user_message: user_message.clone(),
                            assistant_message: Message::assistant(content, model),
                        };
                        if writer.send(job).is_err() {
                            warn!(%conversation_id, "persistence writer is gone, dropping exchange");
                        }
                    }
                }
                yield event;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerBook, MemorySlotStore};
    use crate::quota::{QuotaConfig, QuotaStore, RemoteQuota};
    use crate::router::{ProviderRoute, Transport};
    use crate::session::{AuthClient, Credential};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use time::Duration;

    enum Script {
        Events(Vec<StreamEvent>),
        Pending,
        Fail(GatewayError),
    }

    struct StubBackend {
        calls: AtomicU32,
        scripts: Mutex<VecDeque<Script>>,
    }

    impl StubBackend {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self { calls: AtomicU32::new(0), scripts: Mutex::new(scripts.into()) })
        }
    }

    #[async_trait]
    impl ChatBackend for StubBackend {
        async fn execute(&self, _request: ChatRequest) -> Result<EventStream, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().unwrap().pop_front() {
                Some(Script::Events(events)) => {
                    Ok(Box::pin(futures_util::stream::iter(events)))
                }
                Some(Script::Pending) => Ok(Box::pin(futures_util::stream::pending())),
                Some(Script::Fail(err)) => Err(err),
                None => Err(GatewayError::UpstreamUnavailable("script exhausted".into())),
            }
        }
    }

    struct OpenQuota;

    #[async_trait]
    impl QuotaStore for OpenQuota {
        async fn fetch(&self, _user_id: i64) -> Result<RemoteQuota, GatewayError> {
            Ok(RemoteQuota { count: 0, limit: 1000, tier: "test".to_string() })
        }

        async fn increment(&self, _user_id: i64) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    struct CountingAuth {
        refreshes: AtomicU32,
    }

    #[async_trait]
    impl AuthClient for CountingAuth {
        async fn refresh(&self) -> Result<Credential, GatewayError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                token: "token".to_string(),
                expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
            })
        }
    }

    fn orchestrator(
        backend: Arc<dyn ChatBackend>,
        writer: Option<UnboundedSender<WriteJob>>,
    ) -> (Orchestrator, Arc<CountingAuth>) {
        let auth = Arc::new(CountingAuth { refreshes: AtomicU32::new(0) });
        let gate = QuotaGate::new(
            LedgerBook::new(Arc::new(MemorySlotStore::new())),
            Arc::new(OpenQuota),
            QuotaConfig::default(),
        );
        let sessions = Arc::new(SessionCache::new(auth.clone(), SessionCache::DEFAULT_TTL));
        let registry = ProviderRegistry::new(ProviderRoute {
            family: "default".to_string(),
            transport: Transport::Stream,
            endpoint: "https://upstream.example/v1/chat".to_string(),
        });
        (
            Orchestrator::new(gate, sessions, registry, backend, FlightMap::default(), writer),
            auth,
        )
    }

    fn request(client_id: &str) -> SendRequest {
        SendRequest {
            client_id: client_id.to_string(),
            user_id: Some(7),
            conversation_id: None,
            next_ordinal: 0,
            model: "test-model".to_string(),
            messages: vec![Message::user("hello there")],
            attributes: ClientAttributes {
                user_agent: "test-agent".to_string(),
                language: "en".to_string(),
                screen: (800, 600),
                timezone_offset_minutes: 0,
                hardware_threads: 4,
                platform: "test".to_string(),
            },
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn forwards_events_and_schedules_write() {
        let backend = StubBackend::new(vec![Script::Events(vec![
            StreamEvent::chunk("hel"),
            StreamEvent::chunk("lo"),
            StreamEvent::Complete {
                content: "hello".to_string(),
                model: "test-model".to_string(),
                usage: None,
            },
        ])]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (orchestrator, _) = orchestrator(backend.clone(), Some(tx));

        let stream = orchestrator.send(request("client-a")).await.unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], StreamEvent::Complete { .. }));

        let job = rx.recv().await.unwrap();
        assert_eq!(job.user_message.content, "hello there");
        assert_eq!(job.assistant_message.content, "hello");
        assert_eq!(job.user_ordinal, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_call_is_rejected_while_streaming() {
        let backend = StubBackend::new(vec![
            Script::Pending,
            Script::Events(vec![StreamEvent::chunk("x")]),
        ]);
        let (orchestrator, _) = orchestrator(backend.clone(), None);

        let held = orchestrator.send(request("client-a")).await.unwrap();
        let denied = orchestrator.send(request("client-a")).await.err().unwrap();
        assert!(matches!(denied, GatewayError::RateLimited(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Dropping the stream releases the lock.
        drop(held);
        orchestrator.send(request("client-a")).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_failure_is_retried_exactly_once() {
        let backend = StubBackend::new(vec![
            Script::Fail(GatewayError::AuthExpired),
            Script::Fail(GatewayError::AuthExpired),
            Script::Fail(GatewayError::AuthExpired),
        ]);
        let (orchestrator, auth) = orchestrator(backend.clone(), None);

        let err = orchestrator.send(request("client-a")).await.err().unwrap();
        assert_eq!(err, GatewayError::AuthExpired);
        // One initial attempt plus one retry, no third.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 2);

        // The lock is released after the failure: the next call reaches the
        // backend instead of bouncing off the flight map.
        let err = orchestrator.send(request("client-a")).await.err().unwrap();
        assert!(!matches!(err, GatewayError::RateLimited(_)));
        assert!(backend.calls.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn auth_retry_succeeds_on_second_attempt() {
        let backend = StubBackend::new(vec![
            Script::Fail(GatewayError::AuthExpired),
            Script::Events(vec![StreamEvent::Complete {
                content: "recovered".to_string(),
                model: "test-model".to_string(),
                usage: None,
            }]),
        ]);
        let (orchestrator, _) = orchestrator(backend.clone(), None);

        let stream = orchestrator.send(request("client-a")).await.unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_auth_failure_is_not_retried() {
        let backend = StubBackend::new(vec![Script::Fail(GatewayError::UpstreamHttp {
            status: 502,
        })]);
        let (orchestrator, _) = orchestrator(backend.clone(), None);

        let err = orchestrator.send(request("client-a")).await.err().unwrap();
        assert_eq!(err, GatewayError::UpstreamHttp { status: 502 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
