//! Session Registry: maps session id to session record, enforces
//! uniqueness and state-dependent admission of socket connections.

mod error;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

use interview_asr::AsrConfig;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use error::RegistryError;
pub use session::{LessonContext, Session, SessionSocket, SessionState, SessionStatus, SessionStatusView};

/// Result of a successful `attach_socket` call.
pub struct Attachment {
    pub session: Arc<Session>,
    /// The cancellation handle currently in force for this attachment.
    /// Fresh on reconnection, unchanged on a first attach.
    pub cancel: CancellationToken,
    /// Whether this attachment discarded a prior ASR client
    /// (`disconnected` → `connected`), meaning the caller must build a
    /// fresh ASR client from `session.config` before resuming loops.
    pub reconnect: bool,
}

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new session record in `initialized` state.
    pub fn create(&self, config: AsrConfig, lesson: Option<LessonContext>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), config, lesson));
        self.sessions.write().insert(id.clone(), session);
        id
    }

    /// Looks up a session without regard to its status.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, RegistryError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Admits a socket attachment per the four-way admission rule:
    /// `initialized` accepts; `disconnected` accepts as a reconnection and
    /// discards the prior ASR client and cancellation handle; `connected`
    /// is rejected as `AlreadyConnected`; `closed` (or absent) is rejected
    /// as `NotFound`. The whole decision runs under the session mutex so
    /// two simultaneous attach attempts cannot both succeed.
    pub async fn attach_socket(
        &self,
        id: &str,
        socket: Arc<dyn SessionSocket>,
    ) -> Result<Attachment, RegistryError> {
        let session = self.get(id)?;
        let mut state = session.state.lock().await;

        match state.status {
            SessionStatus::Initialized => {
                state.socket = Some(socket);
                state.status = SessionStatus::Connected;
                let cancel = state.cancel.clone();
                drop(state);
                Ok(Attachment {
                    session,
                    cancel,
                    reconnect: false,
                })
            }
            SessionStatus::Disconnected => {
                state.socket = Some(socket);
                state.asr = None;
                state.external_asr_id = None;
                state.cancel = CancellationToken::new();
                state.status = SessionStatus::Connected;
                let cancel = state.cancel.clone();
                drop(state);
                Ok(Attachment {
                    session,
                    cancel,
                    reconnect: true,
                })
            }
            SessionStatus::Connected => Err(RegistryError::AlreadyConnected),
            SessionStatus::Closed => Err(RegistryError::NotFound),
        }
    }

    /// Idempotent: transitions to `closed`, fires the cancellation handle,
    /// closes the socket and ASR client if attached, and unregisters the
    /// record. Permitted even if the session was created but never
    /// attached to a socket.
    pub async fn close(&self, id: &str) -> Result<(), RegistryError> {
        let session = self
            .sessions
            .write()
            .remove(id)
            .ok_or(RegistryError::NotFound)?;

        let mut state = session.state.lock().await;
        state.cancel.cancel();
        if let Some(socket) = state.socket.take() {
            socket.close().await;
        }
        if let Some(asr) = state.asr.take() {
            asr.close().await;
        }
        state.status = SessionStatus::Closed;
        Ok(())
    }

    /// Marks a session `disconnected` without unregistering it, so it may
    /// later be re-attached. Called by the supervisor on client-socket
    /// close or cancellation, never by an external caller.
    pub async fn mark_disconnected(&self, id: &str) {
        let Ok(session) = self.get(id) else {
            warn!(session_id = id, "mark_disconnected on unknown session");
            return;
        };
        let mut state = session.state.lock().await;
        state.socket = None;
        if state.status != SessionStatus::Closed {
            state.status = SessionStatus::Disconnected;
        }
    }

    pub async fn status(&self, id: &str) -> Result<SessionStatusView, RegistryError> {
        let session = self.get(id)?;
        let state = session.state.lock().await;
        Ok(SessionStatusView {
            session_id: session.id.clone(),
            status: state.status,
            start_time: session.created_at,
            transcript_count: state.transcript_count,
            utterance_count: state.utterance_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopSocket;
    #[async_trait::async_trait]
    impl SessionSocket for NoopSocket {
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn create_then_attach_transitions_to_connected() {
        let registry = Registry::new();
        let id = registry.create(AsrConfig::default(), None);
        let attachment = registry
            .attach_socket(&id, Arc::new(NoopSocket))
            .await
            .unwrap();
        assert!(!attachment.reconnect);
        let status = registry.status(&id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn second_attach_to_connected_session_is_rejected() {
        let registry = Registry::new();
        let id = registry.create(AsrConfig::default(), None);
        registry.attach_socket(&id, Arc::new(NoopSocket)).await.unwrap();
        let err = registry
            .attach_socket(&id, Arc::new(NoopSocket))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyConnected);
    }

    #[tokio::test]
    async fn attach_to_unknown_session_is_not_found() {
        let registry = Registry::new();
        let err = registry
            .attach_socket("nope", Arc::new(NoopSocket))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound);
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_discards_prior_asr_and_id() {
        let registry = Registry::new();
        let id = registry.create(AsrConfig::default(), None);
        registry.attach_socket(&id, Arc::new(NoopSocket)).await.unwrap();
        registry.mark_disconnected(&id).await;
        assert_eq!(
            registry.status(&id).await.unwrap().status,
            SessionStatus::Disconnected
        );

        let attachment = registry
            .attach_socket(&id, Arc::new(NoopSocket))
            .await
            .unwrap();
        assert!(attachment.reconnect);
        assert_eq!(
            registry.status(&id).await.unwrap().status,
            SessionStatus::Connected
        );
    }

    #[tokio::test]
    async fn close_is_permitted_without_prior_attach() {
        let registry = Registry::new();
        let id = registry.create(AsrConfig::default(), None);
        registry.close(&id).await.unwrap();
        assert_eq!(registry.get(&id).unwrap_err(), RegistryError::NotFound);
    }

    #[tokio::test]
    async fn close_unregisters_session() {
        let registry = Registry::new();
        let id = registry.create(AsrConfig::default(), None);
        registry.attach_socket(&id, Arc::new(NoopSocket)).await.unwrap();
        registry.close(&id).await.unwrap();
        assert_eq!(registry.get(&id).unwrap_err(), RegistryError::NotFound);
        assert_eq!(
            registry.close(&id).await.unwrap_err(),
            RegistryError::NotFound
        );
    }

    #[tokio::test]
    async fn close_unknown_session_is_not_found() {
        let registry = Registry::new();
        assert_eq!(registry.close("nope").await.unwrap_err(), RegistryError::NotFound);
    }
}
