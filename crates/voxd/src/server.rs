//! Local HTTP bridge to the message bus.
//!
//! Binds to 127.0.0.1 only. When an auth token is configured every endpoint except
//! `/health` requires `Authorization: Bearer <token>`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vox_core::events::{
    ConverseRequestPayload, MessageType, SkillTargetPayload, UtterancePayload,
};
use vox_core::{Context, Message, SkillStatus, ALL_SKILLS};

use crate::bus::MessageBus;
use crate::skills::{ConverseOutcome, MetricsSnapshot, SkillManager};

/// Shared state for HTTP handlers.
pub struct AppState {
    pub bus: Arc<MessageBus>,
    pub manager: Arc<SkillManager>,
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("auth", &self.auth_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/utterances", post(post_utterance))
        .route("/skills", get(list_skills))
        .route("/skills/{id}/activate", post(activate_skill))
        .route("/skills/{id}/deactivate", post(deactivate_skill))
        .route("/skills/{id}/keep", post(keep_skill))
        .route("/skills/{id}/converse", post(converse_skill))
        .route("/metrics", get(metrics))
        .route("/events", get(stream_events))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(
    bus: Arc<MessageBus>,
    manager: Arc<SkillManager>,
    port: u16,
    auth_token: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState {
        bus,
        manager,
        auth_token,
    });

    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Validate auth token if configured.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(api_error(StatusCode::UNAUTHORIZED, "invalid auth token")),
        None => Err(api_error(StatusCode::UNAUTHORIZED, "missing auth token")),
    }
}

fn require_skill(state: &AppState, skill_id: &str) -> Result<(), ApiError> {
    if state.manager.registry().contains(skill_id) {
        Ok(())
    } else {
        warn!(skill_id = %skill_id, "unknown skill requested over http");
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("skill not found: {skill_id}"),
        ))
    }
}

// --- Request/Response types ---

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request payload for POST /utterances.
#[derive(Debug, Deserialize)]
pub struct UtteranceRequest {
    pub utterances: Vec<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

/// Response for POST /utterances.
#[derive(Debug, Serialize, Deserialize)]
pub struct UtteranceAccepted {
    pub accepted: usize,
}

/// Response for GET /skills.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListSkillsResponse {
    pub skills: Vec<SkillStatus>,
}

/// Response for activate/deactivate/keep.
#[derive(Debug, Serialize, Deserialize)]
pub struct SkillActionResponse {
    pub skill: String,
    pub action: String,
}

/// Request payload for POST /skills/{id}/converse.
#[derive(Debug, Default, Deserialize)]
pub struct ConverseRequest {
    #[serde(default)]
    pub utterances: Vec<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

/// Response for POST /skills/{id}/converse.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConverseResponse {
    pub skill_id: String,
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConverseResponse {
    fn from_outcome(skill_id: String, outcome: ConverseOutcome) -> Self {
        let error = match outcome {
            ConverseOutcome::Error(failure) => Some(failure.as_str().to_string()),
            ConverseOutcome::Handled | ConverseOutcome::Declined => None,
        };
        Self {
            skill_id,
            result: outcome.is_handled(),
            error,
        }
    }
}

/// Query params for GET /events.
#[derive(Debug, Deserialize, Default)]
pub struct StreamEventsQuery {
    /// Only forward messages on this channel.
    #[serde(default, rename = "type")]
    pub msg_type: Option<String>,
}

// --- Handlers ---

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /utterances - Inject an utterance turn.
async fn post_utterance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UtteranceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;

    let accepted = req.utterances.len();
    let context = req.context.map(Context::from).unwrap_or_default();
    let message = Message::from_payload(
        MessageType::Utterance,
        &UtterancePayload {
            utterances: req.utterances,
            lang: req.lang,
        },
    )
    .with_context(context);
    state.bus.emit(message);

    Ok((StatusCode::ACCEPTED, Json(UtteranceAccepted { accepted })))
}

/// GET /skills - List registered skills.
async fn list_skills(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(ListSkillsResponse {
        skills: state.manager.registry().statuses(),
    }))
}

fn emit_skill_action(state: &AppState, msg_type: MessageType, skill: String) -> SkillActionResponse {
    state
        .bus
        .emit(Message::from_payload(msg_type, &SkillTargetPayload { skill: skill.clone() }));
    SkillActionResponse {
        skill,
        action: msg_type.as_str().to_string(),
    }
}

/// POST /skills/{id}/activate - Activate a skill, or every skill with `all`.
async fn activate_skill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    if id != ALL_SKILLS {
        require_skill(&state, &id)?;
    }
    Ok(Json(emit_skill_action(&state, MessageType::SkillActivate, id)))
}

/// POST /skills/{id}/deactivate
async fn deactivate_skill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    require_skill(&state, &id)?;
    Ok(Json(emit_skill_action(&state, MessageType::SkillDeactivate, id)))
}

/// POST /skills/{id}/keep - Deactivate everything except this skill.
async fn keep_skill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    require_skill(&state, &id)?;
    Ok(Json(emit_skill_action(&state, MessageType::SkillKeep, id)))
}

/// POST /skills/{id}/converse - Offer utterances to one skill and report its outcome.
///
/// Converse failures are part of the response body, not the status code.
async fn converse_skill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ConverseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;

    let lang = req
        .lang
        .clone()
        .unwrap_or_else(|| state.manager.config().lang_user.clone());
    let request = Message::from_payload(
        MessageType::ConverseRequest,
        &ConverseRequestPayload {
            skill_id: id.clone(),
            utterances: req.utterances.clone(),
            lang: Some(lang.clone()),
        },
    );

    let dispatcher = Arc::clone(state.manager.dispatcher());
    let skill_id = id.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        dispatcher.converse(&request, &skill_id, &req.utterances, &lang)
    })
    .await
    .map_err(|e| {
        error!(skill_id = %id, error = %e, "converse task failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "converse task failed")
    })?;

    Ok(Json(ConverseResponse::from_outcome(id, outcome)))
}

/// GET /metrics - Skill lifecycle counters.
async fn metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.manager.metrics().snapshot()))
}

/// GET /events - Stream bus messages (SSE).
///
/// Observers that fall behind skip the messages they missed.
async fn stream_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StreamEventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    check_auth(&state, &headers)?;

    let filter = query.msg_type;
    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(move |item| {
        let event = match item {
            Ok(message) if filter.as_deref().map_or(true, |t| t == message.msg_type) => {
                let json = serde_json::to_string(&message).unwrap_or_default();
                Some(Ok(SseEvent::default().event(message.msg_type).data(json)))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "event stream lagged");
                None
            }
        };
        std::future::ready(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
