//! The Session Record and the types it's built from.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interview_asr::{AsrConfig, AsrSession, TranscriptEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A socket handle the registry can tell to close, without the registry
/// needing to know anything about WebSockets or axum. Implemented by
/// `interview-socket`.
#[async_trait]
pub trait SessionSocket: Send + Sync {
    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initialized,
    Connected,
    Disconnected,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only case-lesson context delivered once at session init. Never
/// mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LessonContext {
    pub lesson: Option<String>,
    pub introduction: Option<String>,
    pub questions: Vec<String>,
    pub guide_steps: HashMap<String, serde_json::Value>,
    pub conclusion: Option<String>,
    pub persona: Option<String>,
}

/// The mutable fields of a Session Record, all guarded by one mutex.
pub struct SessionState {
    pub status: SessionStatus,
    pub transcript_count: u64,
    pub utterance_count: u64,
    pub external_asr_id: Option<String>,
    pub transcript_log: Vec<TranscriptEvent>,
    pub socket: Option<Arc<dyn SessionSocket>>,
    pub asr: Option<Arc<dyn AsrSession>>,
    pub cancel: CancellationToken,
}

/// A Session Record: created on init, keyed by a stable opaque id.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub config: AsrConfig,
    pub lesson: Option<LessonContext>,
    pub state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: String, config: AsrConfig, lesson: Option<LessonContext>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            config,
            lesson,
            state: Mutex::new(SessionState {
                status: SessionStatus::Initialized,
                transcript_count: 0,
                utterance_count: 0,
                external_asr_id: None,
                transcript_log: Vec::new(),
                socket: None,
                asr: None,
                cancel: CancellationToken::new(),
            }),
        }
    }
}

/// View returned by `Registry::status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusView {
    pub session_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub transcript_count: u64,
    pub utterance_count: u64,
}
