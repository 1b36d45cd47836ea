use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use cabbot_core::domain::session::{Session, UserId};
use cabbot_db::DbPool;
use cabbot_slack::blocks::{self, Block};
use cabbot_slack::commands::{
    normalize_cab_command, parse_cab_command, CabCommand, SlashCommandPayload,
};
use cabbot_slack::dedup::EventDeduplicator;
use cabbot_slack::events::{
    conversation_dispatcher, parse_block_action, parse_events_request, EventContext,
    EventDispatcher, EventsApiRequest, HandlerResult, SlackEnvelope, SlackEvent,
};
use cabbot_slack::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::health;
use crate::service::{chat_body, TurnService};
use crate::slack_client::ReplySink;

const MAX_SLACK_BODY_BYTES: usize = 1024 * 1024;
const SEARCHING_TEXT: &str = "🔎 Looking for drivers…";

#[derive(Clone)]
pub struct AppState {
    turns: Arc<TurnService>,
    dispatcher: Arc<EventDispatcher>,
    dedup: Arc<EventDeduplicator>,
    verifier: Option<Arc<SignatureVerifier>>,
    reply_sink: Arc<dyn ReplySink>,
}

impl AppState {
    pub fn new(
        turns: Arc<TurnService>,
        verifier: Option<SignatureVerifier>,
        reply_sink: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(conversation_dispatcher(turns.clone())),
            turns,
            dedup: Arc::new(EventDeduplicator::default()),
            verifier: verifier.map(Arc::new),
            reply_sink,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: message.into() }))
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatResponse {
    pub response: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct SlashCommandResponse {
    pub response_type: &'static str,
    pub text: String,
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionForm {
    pub payload: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DebugResponse {
    #[serde(flatten)]
    pub session: Session,
    pub processed_events: usize,
}

pub fn router(state: AppState, db_pool: DbPool) -> Router {
    let sessions = state.turns.runtime().sessions().clone();

    let slack_routes = Router::new()
        .route("/slack/events", post(slack_events))
        .route("/slack/commands", post(slack_commands))
        .route("/slack/interactions", post(slack_interactions))
        .route_layer(middleware::from_fn_with_state(state.clone(), verify_slack_signature));

    Router::new()
        .route("/chat", post(chat))
        .route("/debug/{user_id}", get(debug_session))
        .merge(slack_routes)
        .with_state(state)
        .merge(health::router(db_pool, sessions))
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

/// Rejects Slack requests whose `X-Slack-Signature` does not match, when a signing
/// secret is configured. The buffered body is handed on unchanged.
async fn verify_slack_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(verifier) = state.verifier.clone() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_SLACK_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return api_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
                .into_response()
        }
    };

    if let Err(error) = verifier.verify(
        header_value(&parts.headers, TIMESTAMP_HEADER),
        header_value(&parts.headers, SIGNATURE_HEADER),
        &bytes,
        Utc::now().timestamp(),
    ) {
        warn!(
            event_name = "slack.signature.rejected",
            correlation_id = "ingress",
            path = %parts.uri.path(),
            error = %error,
            "rejected unsigned or tampered slack request"
        );
        return api_error(StatusCode::UNAUTHORIZED, "invalid slack signature").into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn slack_events(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let request = parse_events_request(&body).map_err(|error| {
        api_error(StatusCode::BAD_REQUEST, format!("invalid events payload: {error}"))
    })?;

    let (event_id, event) = match request {
        EventsApiRequest::UrlVerification { challenge } => {
            return Ok(Json(json!({ "challenge": challenge })));
        }
        EventsApiRequest::EventCallback { event_id, event } => (event_id, event),
        EventsApiRequest::Other => return Ok(Json(json!({ "status": "ok" }))),
    };

    let Some(envelope) = event.into_envelope(event_id) else {
        return Ok(Json(json!({ "status": "ok" })));
    };

    let correlation_id = correlation_id();
    if !state.dedup.first_delivery(envelope.dedup_keys()) {
        info!(
            event_name = "slack.event.duplicate",
            correlation_id = %correlation_id,
            envelope_id = %envelope.envelope_id,
            "dropping repeated slack delivery"
        );
        return Ok(Json(json!({ "status": "ok" })));
    }

    // Slack expects an answer within three seconds; the turn runs after the ack.
    tokio::spawn(dispatch_and_deliver(state, envelope, correlation_id));
    Ok(Json(json!({ "status": "ok" })))
}

async fn slack_commands(
    State(state): State<AppState>,
    Form(mut payload): Form<SlashCommandPayload>,
) -> Result<Json<SlashCommandResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = correlation_id();
    payload.request_id = correlation_id.clone();
    let command = normalize_cab_command(payload.clone())
        .map_err(|error| api_error(StatusCode::BAD_REQUEST, error.to_string()))?;
    let envelope = SlackEnvelope {
        envelope_id: correlation_id.clone(),
        event: SlackEvent::SlashCommand(payload),
    };

    // Engine turns can outlast Slack's three second window; the answer is posted later.
    if matches!(parse_cab_command(&command.text), CabCommand::Converse { .. }) {
        info!(
            event_name = "slack.command.deferred",
            correlation_id = %correlation_id,
            user_id = %command.user_id,
            "acknowledged /cab, reply follows"
        );
        tokio::spawn(dispatch_and_deliver(state, envelope, correlation_id));
        return Ok(Json(SlashCommandResponse {
            response_type: "ephemeral",
            text: SEARCHING_TEXT.to_string(),
            blocks: blocks::text_message(SEARCHING_TEXT).blocks,
        }));
    }

    let result = state
        .dispatcher
        .dispatch(&envelope, &EventContext { correlation_id: correlation_id.clone() })
        .await
        .map_err(|error| api_error(StatusCode::BAD_REQUEST, error.to_string()))?;

    let message = match result {
        HandlerResult::Responded(message) => message,
        HandlerResult::Ignored => {
            blocks::error_message("That command isn't supported.", &correlation_id)
        }
    };
    Ok(Json(SlashCommandResponse {
        response_type: "ephemeral",
        text: message.fallback_text,
        blocks: message.blocks,
    }))
}

async fn slack_interactions(
    State(state): State<AppState>,
    Form(form): Form<InteractionForm>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let action = parse_block_action(&form.payload).map_err(|error| {
        api_error(StatusCode::BAD_REQUEST, format!("invalid interaction payload: {error}"))
    })?;

    if let Some(action) = action {
        let correlation_id = correlation_id();
        let envelope = SlackEnvelope {
            envelope_id: correlation_id.clone(),
            event: SlackEvent::BlockAction(action),
        };
        tokio::spawn(dispatch_and_deliver(state, envelope, correlation_id));
    }
    Ok(StatusCode::OK)
}

async fn dispatch_and_deliver(state: AppState, envelope: SlackEnvelope, correlation_id: String) {
    let (user_id, channel_id) = match &envelope.event {
        SlackEvent::Message(message) => (message.user_id.clone(), message.channel_id.clone()),
        SlackEvent::BlockAction(action) => (action.user_id.clone(), action.channel_id.clone()),
        SlackEvent::SlashCommand(command) => (command.user_id.clone(), command.channel_id.clone()),
    };

    let ctx = EventContext { correlation_id: correlation_id.clone() };
    let message = match state.dispatcher.dispatch(&envelope, &ctx).await {
        Ok(HandlerResult::Responded(message)) => message,
        Ok(HandlerResult::Ignored) => return,
        Err(error) => {
            warn!(
                event_name = "slack.dispatch.failed",
                correlation_id = %correlation_id,
                user_id = %user_id,
                error = %error,
                "slack event handler failed"
            );
            blocks::error_message("Something went wrong. Please try again.", &correlation_id)
        }
    };

    match state.reply_sink.deliver(&user_id, &channel_id, &message, &correlation_id).await {
        Ok(delivery) => info!(
            event_name = "slack.reply.delivered",
            correlation_id = %correlation_id,
            user_id = %user_id,
            delivery = ?delivery,
            "slack reply handled"
        ),
        Err(error) => warn!(
            event_name = "slack.reply.failed",
            correlation_id = %correlation_id,
            user_id = %user_id,
            error = %error,
            "could not deliver slack reply"
        ),
    }
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ApiError>)> {
    if request.user_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "user_id is required"));
    }

    let correlation_id = correlation_id();
    let reply = state.turns.reply(request.user_id.trim(), &request.message, &correlation_id).await;
    Ok(Json(ChatResponse { response: chat_body(&reply), kind: reply.kind() }))
}

async fn debug_session(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DebugResponse>, (StatusCode, Json<ApiError>)> {
    let session = state
        .turns
        .runtime()
        .sessions()
        .snapshot(&UserId::new(user_id))
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))?;

    Ok(Json(DebugResponse { session, processed_events: state.dedup.len() }))
}
