//! Session Supervisor: the per-session state machine.
//!
//! One [`Supervisor`] is built per socket attachment (first connect, or a
//! reconnection after `disconnected`). It runs three cooperating loops —
//! Socket Reader, Silence Ticker, ASR Reader — that share the session
//! record and a small local [`state::RunState`], all raced against a
//! single [`CancellationToken`]. Grounded on `mqtt0::broker`'s
//! per-connection `tokio::select!` loop shape and
//! `genx::transformers::doubao_asr_sauc`'s lazy-open/forward/drain ASR
//! loop shape.

pub mod constants;
pub mod sinks;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use interview_asr::{AsrBackend, AsrConfig, AsrError, AsrSession, TranscriptEvent, TranscriptKind};
use interview_registry::{Registry, Session, SessionSocket};
use interview_socket::{ClientSocket, ErrorType, Inbound, OutgoingEvent};
use interview_vad::{Vad, VadConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

pub use sinks::{CompletedUtterance, Sinks, UtteranceBoundary};
pub use state::{BoundaryCause, Phase, RunState};

/// Everything a [`Supervisor`] needs to drive one session's three loops.
pub struct Supervisor {
    registry: Arc<Registry>,
    session: Arc<Session>,
    socket: Arc<dyn ClientSocket>,
    backend: Arc<dyn AsrBackend>,
    cancel: CancellationToken,
    sinks: Sinks,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        session: Arc<Session>,
        socket: Arc<dyn ClientSocket>,
        backend: Arc<dyn AsrBackend>,
        cancel: CancellationToken,
        sinks: Sinks,
    ) -> Self {
        Self {
            registry,
            session,
            socket,
            backend,
            cancel,
            sinks,
        }
    }

    /// Installs `initial_asr` as the session's ASR client and runs the
    /// three loops until the client socket closes or `cancel` fires.
    /// Returns once every loop has exited and the session has been marked
    /// `disconnected` (unless it was already `closed` by a concurrent
    /// `Registry::close`).
    pub async fn run(self, initial_asr: Arc<dyn AsrSession>) {
        let session_id = self.session.id.clone();
        let span = info_span!("session", session_id = %session_id);
        async move {
            {
                let mut state = self.session.state.lock().await;
                state.asr = Some(initial_asr);
            }

            let run_state = Arc::new(tokio::sync::Mutex::new(RunState::default()));
            let (gen_tx, gen_rx) = watch::channel(0u64);

            let socket_task = socket_reader(
                self.session.clone(),
                self.socket.clone(),
                self.backend.clone(),
                self.cancel.clone(),
                self.sinks.clone(),
                run_state.clone(),
                gen_tx,
            );
            let ticker_task = silence_ticker(
                self.session.clone(),
                self.cancel.clone(),
                self.sinks.clone(),
                run_state.clone(),
            );
            let asr_task = asr_reader(
                self.session.clone(),
                self.socket.clone(),
                self.cancel.clone(),
                self.sinks.clone(),
                gen_rx,
            );

            tokio::join!(socket_task, ticker_task, asr_task);

            // Termination (spec.md §4.4): CLOSING, then close socket, close
            // ASR, mark disconnected, regardless of which loop ended first.
            run_state.lock().await.mark_closing();
            let (socket, asr) = {
                let mut state = self.session.state.lock().await;
                (state.socket.take(), state.asr.take())
            };
            if let Some(socket) = socket {
                socket.close().await;
            }
            if let Some(asr) = asr {
                asr.close().await;
            }
            self.registry.mark_disconnected(&session_id).await;
            info!("session terminated");
        }
        .instrument(span)
        .await
    }
}

/// Reads binary frames from the client socket in order, drives them
/// through VAD, forwards voiced frames to the current ASR client, and
/// tracks the `IDLE`/`IN_UTTERANCE` transition plus the max-duration cut.
async fn socket_reader(
    session: Arc<Session>,
    socket: Arc<dyn ClientSocket>,
    backend: Arc<dyn AsrBackend>,
    cancel: CancellationToken,
    sinks: Sinks,
    run_state: Arc<tokio::sync::Mutex<RunState>>,
    gen_tx: watch::Sender<u64>,
) {
    let mut vad = Vad::new(VadConfig::default());

    loop {
        let inbound = tokio::select! {
            _ = cancel.cancelled() => break,
            inbound = socket.recv_frame() => inbound,
        };

        let frame = match inbound {
            Inbound::Frame(frame) => frame,
            Inbound::Closed => {
                debug!("client socket closed, ending socket reader");
                cancel.cancel();
                break;
            }
        };

        match vad.process(&frame) {
            Ok(true) => {
                let asr = {
                    let state = session.state.lock().await;
                    state.asr.clone()
                };
                let Some(asr) = asr else {
                    warn!("voiced frame with no ASR client attached, dropping");
                    continue;
                };

                match asr.send_audio(frame).await {
                    Ok(()) => {
                        let now = tokio::time::Instant::now();
                        let mut rs = run_state.lock().await;
                        if rs.begin_utterance_if_idle(now) {
                            info!("utterance started");
                        } else {
                            rs.note_voice(now);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "asr send failed, starting reconnect protocol");
                        match reconnect(
                            &session,
                            &backend,
                            &cancel,
                            &run_state,
                            &gen_tx,
                        )
                        .await
                        {
                            Ok(()) => vad.reset(),
                            Err(()) => {
                                warn!("reconnect protocol exhausted, terminating session");
                                break;
                            }
                        }
                    }
                }
            }
            Ok(false) => {
                // Silence: not forwarded to ASR (spec.md §9 open question (a),
                // resolved in DESIGN.md: never forwarded regardless of
                // `format_turns`).
            }
            Err(e) => {
                warn!(error = %e, "vad error, dropping frame");
                let _ = socket
                    .send_event(OutgoingEvent::Error {
                        error_type: ErrorType::AudioError,
                        message: e.to_string(),
                    })
                    .await;
            }
        }

        let now = tokio::time::Instant::now();
        let boundary = run_state.lock().await.check_max_duration(now);
        if let Some(cause) = boundary {
            emit_boundary(&session, &sinks, cause).await;
        }

        if cancel.is_cancelled() {
            break;
        }
    }
}

/// Fires every [`constants::TICKER_PERIOD`]; transitions `IN_UTTERANCE` to
/// `IDLE` once sustained silence crosses [`constants::SILENCE_TICKS_TO_BOUNDARY`].
/// Never touches the ASR client — in-flight finals must not be lost.
async fn silence_ticker(
    session: Arc<Session>,
    cancel: CancellationToken,
    sinks: Sinks,
    run_state: Arc<tokio::sync::Mutex<RunState>>,
) {
    let mut interval = tokio::time::interval(constants::TICKER_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let now = tokio::time::Instant::now();
        let (boundary, phase, ticks) = {
            let mut rs = run_state.lock().await;
            let boundary = rs.tick_silence(now);
            (boundary, rs.phase, rs.silence_ticks)
        };

        match boundary {
            Some(cause) => emit_boundary(&session, &sinks, cause).await,
            None => {
                if phase == Phase::InUtterance {
                    debug!(ticks, "silence ticker waiting");
                }
            }
        }
    }
}

/// Logs and hands off an utterance boundary signal. Never closes the ASR
/// client — reconnection is a recovery mechanism, not a segmentation one.
async fn emit_boundary(session: &Arc<Session>, sinks: &Sinks, cause: state::BoundaryCause) {
    let cause_str = match cause {
        state::BoundaryCause::MaxDuration => "max-duration",
        state::BoundaryCause::Silence => "silence",
    };
    info!(cause = cause_str, "utterance boundary");
    let _ = sinks.boundary_tx.send(UtteranceBoundary {
        session_id: session.id.clone(),
        cause,
    });
}

/// Consumes the current ASR client's transcript and error sequences,
/// following it across reconnection via `gen_rx`.
async fn asr_reader(
    session: Arc<Session>,
    socket: Arc<dyn ClientSocket>,
    cancel: CancellationToken,
    sinks: Sinks,
    mut gen_rx: watch::Receiver<u64>,
) {
    loop {
        let Some(asr) = wait_for_asr(&session, &mut gen_rx, &cancel).await else {
            break;
        };

        let mut error_done = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = gen_rx.changed() => break,
                transcript = asr.recv_transcript() => {
                    match transcript {
                        Some(event) => {
                            handle_transcript(&session, &socket, &sinks, event).await;
                        }
                        None => break,
                    }
                }
                err = asr.recv_error(), if !error_done => {
                    match err {
                        Some(e) => handle_asr_error(&socket, e).await,
                        None => error_done = true,
                    }
                }
            }
        }
    }
}

async fn wait_for_asr(
    session: &Arc<Session>,
    gen_rx: &mut watch::Receiver<u64>,
    cancel: &CancellationToken,
) -> Option<Arc<dyn AsrSession>> {
    loop {
        let snapshot = session.state.lock().await.asr.clone();
        if let Some(asr) = snapshot {
            return Some(asr);
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            changed = gen_rx.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

async fn handle_transcript(
    session: &Arc<Session>,
    socket: &Arc<dyn ClientSocket>,
    sinks: &Sinks,
    event: TranscriptEvent,
) {
    let external_id = {
        let mut state = session.state.lock().await;
        if let Some(id) = &event.session_id {
            if state.external_asr_id.is_none() {
                state.external_asr_id = Some(id.clone());
            }
        }
        // SessionBegins/SessionEnds carry no transcribed text; only the
        // bookkeeping above applies to them. Everything else is logged
        // and counted only when it actually carries text.
        if !event.text.is_empty() {
            state.transcript_count += 1;
            if event.kind == TranscriptKind::Turn {
                state.utterance_count += 1;
            }
            state.transcript_log.push(event.clone());
        }
        state.external_asr_id.clone()
    };

    if let Some(message_type) = outgoing_message_type(event.kind) {
        let outgoing = OutgoingEvent::Transcript {
            message_type,
            text: event.text.clone(),
            confidence: event.confidence,
            is_final: event.is_final,
            timestamp: Utc::now(),
            session_id: external_id,
        };
        if socket.send_event(outgoing).await.is_err() {
            warn!("failed to forward transcript to client socket");
        }
    }

    if event.kind == TranscriptKind::Turn {
        let _ = sinks.utterance_tx.send(CompletedUtterance {
            session_id: session.id.clone(),
            text: event.text,
            turn_id: event.turn_id,
        });
    }
}

fn outgoing_message_type(kind: TranscriptKind) -> Option<&'static str> {
    match kind {
        TranscriptKind::Partial => Some("PartialTranscript"),
        TranscriptKind::Final => Some("FinalTranscript"),
        TranscriptKind::Turn => Some("Turn"),
        // SessionBegins/SessionEnds carry no transcribed text; they only
        // update bookkeeping (external id, log). Error never arrives on
        // the transcript channel.
        TranscriptKind::SessionBegins | TranscriptKind::SessionEnds | TranscriptKind::Error => {
            None
        }
    }
}

/// An error event whose text is exactly "connection lost" is the expected
/// echo of a transport failure the Reconnect Protocol is already handling
/// (triggered independently by the Socket Reader's send failure) and is
/// swallowed silently per spec.md §4.4. Everything else is logged and
/// forwarded to the client as a non-fatal `STT_ERROR`.
async fn handle_asr_error(socket: &Arc<dyn ClientSocket>, err: AsrError) {
    let message = err.to_string();
    if message.eq_ignore_ascii_case("connection lost") {
        return;
    }
    warn!(error = %message, "asr error");
    let _ = socket
        .send_event(OutgoingEvent::Error {
            error_type: ErrorType::SttError,
            message,
        })
        .await;
}

/// The Reconnect Protocol (spec.md §4.4). Triggered only by a send-side
/// ASR error observed by the Socket Reader. Returns `Ok(())` once a fresh
/// ASR client is installed and ready, `Err(())` once
/// [`constants::MAX_RECONNECT_ROUNDS`] rounds have all failed (the caller
/// is responsible for ending the session).
async fn reconnect(
    session: &Arc<Session>,
    backend: &Arc<dyn AsrBackend>,
    cancel: &CancellationToken,
    run_state: &Arc<tokio::sync::Mutex<RunState>>,
    gen_tx: &watch::Sender<u64>,
) -> Result<(), ()> {
    loop {
        let round = {
            let mut rs = run_state.lock().await;
            rs.reconnect_attempts += 1;
            rs.reconnect_attempts
        };
        if round > constants::MAX_RECONNECT_ROUNDS {
            return Err(());
        }
        info!(round, "reconnect protocol: round starting");

        tokio::time::sleep(constants::RECONNECT_DELAY).await;

        let old_asr = {
            let mut state = session.state.lock().await;
            state.asr.take()
        };
        if let Some(old) = old_asr {
            old.close().await;
        }
        tokio::time::sleep(constants::RECONNECT_DRAIN).await;

        let cfg = session.config.clone();
        let mut connected = None;
        for attempt in 1..=constants::RECONNECT_ATTEMPTS_PER_ROUND {
            match backend.connect(cfg.clone(), cancel.clone()).await {
                Ok(session_handle) => {
                    connected = Some(session_handle);
                    break;
                }
                Err(e) => {
                    warn!(round, attempt, error = %e, "reconnect attempt failed");
                    if attempt < constants::RECONNECT_ATTEMPTS_PER_ROUND {
                        tokio::time::sleep(constants::RECONNECT_ATTEMPT_GAP).await;
                    }
                }
            }
        }

        match connected {
            Some(new_asr) => {
                let new_asr: Arc<dyn AsrSession> = new_asr.into();
                {
                    let mut state = session.state.lock().await;
                    state.external_asr_id = None;
                    state.asr = Some(new_asr);
                }
                {
                    let mut rs = run_state.lock().await;
                    rs.reset_reconnect_on_next_voice = true;
                }
                gen_tx.send_modify(|g| *g += 1);
                info!(round, "reconnect protocol: round succeeded");
                return Ok(());
            }
            None => {
                warn!(round, "reconnect protocol: round failed, will retry if rounds remain");
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use interview_registry::{LessonContext, SessionStatus};
    use tokio::sync::mpsc;

    struct MockClientSocket {
        inbound: StdMutex<VecDeque<Inbound>>,
        outbound: StdMutex<Vec<OutgoingEvent>>,
    }

    impl MockClientSocket {
        fn new(frames: Vec<Bytes>) -> Self {
            let mut inbound: VecDeque<Inbound> =
                frames.into_iter().map(Inbound::Frame).collect();
            inbound.push_back(Inbound::Closed);
            Self {
                inbound: StdMutex::new(inbound),
                outbound: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClientSocket for MockClientSocket {
        async fn recv_frame(&self) -> Inbound {
            let next = self.inbound.lock().unwrap().pop_front();
            match next {
                Some(inbound) => inbound,
                None => Inbound::Closed,
            }
        }

        async fn send_event(&self, event: OutgoingEvent) -> Result<(), interview_socket::SocketError> {
            self.outbound.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[async_trait]
    impl SessionSocket for MockClientSocket {
        async fn close(&self) {}
    }

    struct MockAsrSession {
        config: AsrConfig,
        transcripts: tokio::sync::Mutex<mpsc::Receiver<TranscriptEvent>>,
        sent: StdMutex<Vec<Bytes>>,
        fail_next_send: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl AsrSession for MockAsrSession {
        async fn send_audio(&self, frame: Bytes) -> Result<(), AsrError> {
            if self
                .fail_next_send
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(AsrError::SendFailed("mock failure".into()));
            }
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn force_endpoint(&self) -> Result<(), AsrError> {
            Ok(())
        }

        async fn update_config(&self, _cfg: AsrConfig) -> Result<(), AsrError> {
            Ok(())
        }

        async fn recv_transcript(&self) -> Option<TranscriptEvent> {
            self.transcripts.lock().await.recv().await
        }

        async fn recv_error(&self) -> Option<AsrError> {
            std::future::pending().await
        }

        async fn close(&self) {}

        fn current_config(&self) -> &AsrConfig {
            &self.config
        }
    }

    struct MockBackend {
        sessions: StdMutex<VecDeque<Arc<MockAsrSession>>>,
    }

    #[async_trait]
    impl AsrBackend for MockBackend {
        async fn connect(
            &self,
            _cfg: AsrConfig,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn AsrSession>, AsrError> {
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(session) => Ok(Box::new(ArcAsrSession(session))),
                None => Err(AsrError::Config("no more mock sessions".into())),
            }
        }
    }

    /// Wraps an `Arc<MockAsrSession>` so the same underlying session can be
    /// asserted on by the test after being boxed for the trait object.
    struct ArcAsrSession(Arc<MockAsrSession>);

    #[async_trait]
    impl AsrSession for ArcAsrSession {
        async fn send_audio(&self, frame: Bytes) -> Result<(), AsrError> {
            self.0.send_audio(frame).await
        }
        async fn force_endpoint(&self) -> Result<(), AsrError> {
            self.0.force_endpoint().await
        }
        async fn update_config(&self, cfg: AsrConfig) -> Result<(), AsrError> {
            self.0.update_config(cfg).await
        }
        async fn recv_transcript(&self) -> Option<TranscriptEvent> {
            self.0.recv_transcript().await
        }
        async fn recv_error(&self) -> Option<AsrError> {
            self.0.recv_error().await
        }
        async fn close(&self) {
            self.0.close().await
        }
        fn current_config(&self) -> &AsrConfig {
            self.0.current_config()
        }
    }

    fn tone_frame(amplitude: i16, samples: usize) -> Bytes {
        let mut buf = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Bytes::from(buf)
    }

    fn make_sinks() -> (Sinks, mpsc::UnboundedReceiver<CompletedUtterance>, mpsc::UnboundedReceiver<UtteranceBoundary>) {
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let (boundary_tx, boundary_rx) = mpsc::unbounded_channel();
        (
            Sinks {
                utterance_tx,
                boundary_tx,
            },
            utterance_rx,
            boundary_rx,
        )
    }

    #[tokio::test]
    async fn forwards_only_voiced_frames_and_reports_turn() {
        let registry = Arc::new(Registry::new());
        let id = registry.create(AsrConfig::default(), None::<LessonContext>);

        let (transcript_tx, transcript_rx) = mpsc::channel(16);
        transcript_tx
            .send(TranscriptEvent {
                kind: TranscriptKind::Turn,
                text: "hello there".into(),
                confidence: 0.9,
                is_final: true,
                session_id: None,
                turn_id: Some("t1".into()),
            })
            .await
            .unwrap();
        drop(transcript_tx);

        let asr = Arc::new(MockAsrSession {
            config: AsrConfig::default(),
            transcripts: tokio::sync::Mutex::new(transcript_rx),
            sent: StdMutex::new(Vec::new()),
            fail_next_send: std::sync::atomic::AtomicBool::new(false),
        });

        let loud = tone_frame(5000, 160);
        let quiet = Bytes::from(vec![0u8; 320]);
        let client_socket = Arc::new(MockClientSocket::new(vec![
            loud.clone(),
            loud.clone(),
            loud.clone(),
            quiet.clone(),
        ]));

        let attachment = registry
            .attach_socket(&id, client_socket.clone() as Arc<dyn SessionSocket>)
            .await
            .unwrap();

        let backend = Arc::new(MockBackend {
            sessions: StdMutex::new(VecDeque::new()),
        });
        let (sinks, _utterance_rx, _boundary_rx) = make_sinks();

        let supervisor = Supervisor::new(
            registry.clone(),
            attachment.session.clone(),
            client_socket.clone() as Arc<dyn ClientSocket>,
            backend,
            attachment.cancel.clone(),
            sinks,
        );

        supervisor.run(asr.clone()).await;

        // P1: only the three loud frames were forwarded to ASR.
        assert_eq!(asr.sent.lock().unwrap().len(), 3);

        let status = registry.status(&id).await.unwrap();
        // P4: UtteranceCount reflects the one `turn` event observed.
        assert_eq!(status.utterance_count, 1);
        assert_eq!(status.transcript_count, 1);
        assert_eq!(status.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_protocol_clears_external_id_and_continues() {
        let registry = Arc::new(Registry::new());
        let id = registry.create(AsrConfig::default(), None::<LessonContext>);

        let (_tx1, rx1) = mpsc::channel(16);
        let first_asr = Arc::new(MockAsrSession {
            config: AsrConfig::default(),
            transcripts: tokio::sync::Mutex::new(rx1),
            sent: StdMutex::new(Vec::new()),
            fail_next_send: std::sync::atomic::AtomicBool::new(true),
        });

        let (_tx2, rx2) = mpsc::channel(16);
        let second_asr = Arc::new(MockAsrSession {
            config: AsrConfig::default(),
            transcripts: tokio::sync::Mutex::new(rx2),
            sent: StdMutex::new(Vec::new()),
            fail_next_send: std::sync::atomic::AtomicBool::new(false),
        });

        let loud = tone_frame(5000, 160);
        // Frames 1-2 build up VAD hysteresis (not forwarded); frame 3 is the
        // first forward attempt and fails, triggering the reconnect
        // protocol, which resets VAD counters; frames 4-5 rebuild hysteresis
        // against the new client, frame 6 is the first successful forward.
        let client_socket = Arc::new(MockClientSocket::new(vec![
            loud.clone(),
            loud.clone(),
            loud.clone(),
            loud.clone(),
            loud.clone(),
            loud.clone(),
        ]));

        let attachment = registry
            .attach_socket(&id, client_socket.clone() as Arc<dyn SessionSocket>)
            .await
            .unwrap();

        let backend = Arc::new(MockBackend {
            sessions: StdMutex::new(VecDeque::from(vec![second_asr.clone()])),
        });
        let (sinks, _utterance_rx, _boundary_rx) = make_sinks();

        let supervisor = Supervisor::new(
            registry.clone(),
            attachment.session.clone(),
            client_socket.clone() as Arc<dyn ClientSocket>,
            backend,
            attachment.cancel.clone(),
            sinks,
        );

        tokio::time::pause();
        let run = tokio::spawn(supervisor.run(first_asr.clone()));
        // Allow the reconnect protocol's sleeps to elapse under paused time.
        tokio::time::advance(Duration::from_secs(3)).await;
        run.await.unwrap();

        // The second (post-reconnect) ASR client received the later frames.
        assert!(!second_asr.sent.lock().unwrap().is_empty());
    }
}
