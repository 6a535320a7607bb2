use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chatgate_core::{identify, ClientAttributes, Orchestrator, SendRequest};
use chatgate_protocol::{GatewayError, Message, Role};

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

#[derive(Deserialize)]
struct IncomingMessage {
    role: Role,
    content: String,
}

#[derive(Deserialize)]
struct ChatBody {
    client_id: Option<String>,
    user_id: Option<i64>,
    conversation_id: Option<Uuid>,
    #[serde(default)]
    next_ordinal: i32,
    model: String,
    messages: Vec<IncomingMessage>,
    attributes: ClientAttributes,
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Response {
    let client_id = body
        .client_id
        .unwrap_or_else(|| identify(&body.attributes).as_str().to_string());
    let messages = body
        .messages
        .iter()
        .map(|incoming| Message::new(incoming.role, &incoming.content, None))
        .collect();

    let request = SendRequest {
        client_id,
        user_id: body.user_id,
        conversation_id: body.conversation_id,
        next_ordinal: body.next_ordinal,
        model: body.model,
        messages,
        attributes: body.attributes,
        cancel: CancellationToken::new(),
    };

    match state.orchestrator.send(request).await {
        Ok(events) => {
            let frames = events.map(|event| Ok::<_, Infallible>(Bytes::from(event.to_frame())));
            let mut response = Response::new(Body::from_stream(frames));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
            response
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: GatewayError) -> Response {
    let status = match &err {
        GatewayError::AuthExpired => StatusCode::UNAUTHORIZED,
        GatewayError::QuotaExceeded { .. } | GatewayError::RateLimited(_) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        GatewayError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::UpstreamHttp { status } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        _ => StatusCode::BAD_GATEWAY,
    };

    let mut payload = json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    if let GatewayError::QuotaExceeded { limit, current, tier } = &err {
        payload["limit"] = json!(limit);
        payload["current"] = json!(current);
        payload["tier"] = json!(tier);
    }

    let body = serde_json::to_vec(&payload).unwrap_or_default();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
