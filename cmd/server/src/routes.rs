//! Route definitions and handlers.
//!
//! Thin HTTP/WS glue over `interview_registry::Registry`: handlers do no
//! business logic of their own, matching the teacher pack's
//! handlers-delegate-to-facade convention.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use interview_asr::{AsrConfig, AsrSession};
use interview_registry::{LessonContext, SessionSocket};
use interview_socket::AxumClientSocket;
use interview_supervisor::Supervisor;

use crate::error::HttpError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/session/init", post(session_init))
        .route("/session/init-with-lesson", post(session_init_with_lesson))
        .route("/session/status", get(session_status))
        .route("/session/close", delete(session_close))
        .route("/ws/interview/{session_id}", get(interview_ws))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
struct InitRequest {
    sample_rate: Option<u32>,
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitWithLessonRequest {
    sample_rate: Option<u32>,
    encoding: Option<String>,
    lesson: Option<String>,
    introduction: Option<String>,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    guide_steps: HashMap<String, serde_json::Value>,
    conclusion: Option<String>,
    persona: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitResponse {
    session_id: String,
    websocket_url: String,
    status: &'static str,
}

fn asr_config_from(sample_rate: Option<u32>, encoding: Option<String>) -> AsrConfig {
    let mut cfg = AsrConfig::default();
    if let Some(rate) = sample_rate {
        cfg.sample_rate = rate;
    }
    if let Some(encoding) = encoding {
        cfg.encoding = encoding;
    }
    cfg
}

fn init_response(state: &AppState, session_id: String) -> InitResponse {
    let websocket_url = format!("{}/ws/interview/{session_id}", state.public_ws_base);
    InitResponse {
        session_id,
        websocket_url,
        status: "initialized",
    }
}

async fn session_init(
    State(state): State<AppState>,
    Json(req): Json<InitRequest>,
) -> impl IntoResponse {
    let cfg = asr_config_from(req.sample_rate, req.encoding);
    let session_id = state.registry.create(cfg, None);
    Json(init_response(&state, session_id))
}

async fn session_init_with_lesson(
    State(state): State<AppState>,
    Json(req): Json<InitWithLessonRequest>,
) -> impl IntoResponse {
    let cfg = asr_config_from(req.sample_rate, req.encoding);
    let lesson = LessonContext {
        lesson: req.lesson,
        introduction: req.introduction,
        questions: req.questions,
        guide_steps: req.guide_steps,
        conclusion: req.conclusion,
        persona: req.persona,
    };
    let session_id = state.registry.create(cfg, Some(lesson));
    Json(init_response(&state, session_id))
}

#[derive(Debug, Deserialize)]
struct SessionIdQuery {
    session_id: String,
}

async fn session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionIdQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let status = state
        .registry
        .status(&query.session_id)
        .await
        .map_err(HttpError::from)?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
struct CloseResponse {
    status: &'static str,
    session_id: String,
}

async fn session_close(
    State(state): State<AppState>,
    Query(query): Query<SessionIdQuery>,
) -> Result<impl IntoResponse, HttpError> {
    state.registry.close(&query.session_id).await.map_err(HttpError::from)?;
    Ok(Json(CloseResponse {
        status: "closed",
        session_id: query.session_id,
    }))
}

async fn interview_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    // Admission is only decided atomically once the socket is in hand (see
    // `handle_interview_ws`), but a double-connect attempt can be rejected
    // with a real 409/404 before the protocol switches if we already know
    // the answer. This check is advisory: it can race with a concurrent
    // attach, in which case `handle_interview_ws` still rejects correctly,
    // just by closing the socket post-upgrade instead of a status code.
    let status = state.registry.status(&session_id).await.map_err(HttpError::from)?;
    if status.status == interview_registry::SessionStatus::Connected {
        return Err(HttpError::Conflict);
    }

    Ok(ws.on_upgrade(move |socket| handle_interview_ws(socket, state, session_id)))
}

async fn handle_interview_ws(
    socket: axum::extract::ws::WebSocket,
    state: AppState,
    session_id: String,
) {
    let client_socket = Arc::new(AxumClientSocket::new(socket));

    let attachment = match state
        .registry
        .attach_socket(&session_id, client_socket.clone())
        .await
    {
        Ok(attachment) => attachment,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "rejecting websocket attach");
            client_socket.close().await;
            return;
        }
    };

    let asr = match state
        .backend
        .connect(attachment.session.config.clone(), attachment.cancel.clone())
        .await
    {
        Ok(asr) => {
            let asr: Arc<dyn AsrSession> = asr.into();
            asr
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "initial asr connect failed, closing socket");
            client_socket.close().await;
            state.registry.mark_disconnected(&session_id).await;
            return;
        }
    };

    info!(session_id = %session_id, reconnect = attachment.reconnect, "interview session attached");

    let supervisor = Supervisor::new(
        state.registry.clone(),
        attachment.session,
        client_socket,
        state.backend.clone(),
        attachment.cancel,
        state.sinks.clone(),
    );
    supervisor.run(asr).await;
}
