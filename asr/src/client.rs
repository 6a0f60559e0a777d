//! Duplex client for the remote streaming ASR service.
//!
//! [`WsAsrBackend::connect`] opens the WebSocket (with retrying backoff)
//! and spawns exactly one reader task and one writer task, matching the
//! read_loop/write_loop split used by this codebase's other realtime
//! WebSocket clients. [`AsrSession`] is the trait the supervisor actually
//! depends on, so tests can substitute an in-memory backend instead of
//! opening a real socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AsrError;
use crate::protocol::{AsrConfig, ClientMessage, ServerMessage, TranscriptEvent, TranscriptKind, DEFAULT_WS_PATH};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_MAX_ATTEMPTS: u32 = 3;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const TRANSCRIPT_BUFFER: usize = 100;
const ERROR_BUFFER: usize = 10;

/// A WebSocket close frame carrying the normal closure code (spec.md
/// §4.2's close discipline: "the underlying transport is closed with a
/// normal closure code").
fn normal_close_message() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
}

/// Opens sessions against the remote ASR service. Implemented by
/// [`WsAsrBackend`] for production use and by a mock in
/// `interview-supervisor`'s test suite.
#[async_trait]
pub trait AsrBackend: Send + Sync {
    async fn connect(
        &self,
        cfg: AsrConfig,
        cancel: CancellationToken,
    ) -> Result<Box<dyn AsrSession>, AsrError>;
}

/// A single duplex ASR session: one socket's worth of audio in, transcript
/// events and errors out. `transcripts`/`errors` are finite, non-restartable
/// sequences — once the reader observes a terminal condition they simply
/// stop yielding anything.
#[async_trait]
pub trait AsrSession: Send + Sync {
    async fn send_audio(&self, frame: bytes::Bytes) -> Result<(), AsrError>;
    async fn force_endpoint(&self) -> Result<(), AsrError>;
    async fn update_config(&self, cfg: AsrConfig) -> Result<(), AsrError>;
    /// Awaits the next transcript event; `None` once the sequence ends.
    /// Intended to be driven by a single caller (the ASR Reader loop).
    async fn recv_transcript(&self) -> Option<TranscriptEvent>;
    /// Awaits the next error record; `None` once the sequence ends.
    async fn recv_error(&self) -> Option<AsrError>;
    async fn close(&self);
    fn current_config(&self) -> &AsrConfig;
}

/// Production [`AsrBackend`] speaking to a real provider over WebSocket.
pub struct WsAsrBackend {
    ws_base_url: String,
    api_key: String,
}

impl WsAsrBackend {
    pub fn new(ws_base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AsrBackend for WsAsrBackend {
    async fn connect(
        &self,
        cfg: AsrConfig,
        cancel: CancellationToken,
    ) -> Result<Box<dyn AsrSession>, AsrError> {
        let client = AsrClient::connect(cfg, &self.api_key, &self.ws_base_url, cancel).await?;
        Ok(Box::new(client))
    }
}

struct WriteRequest {
    message: Message,
    ack: oneshot::Sender<Result<(), AsrError>>,
}

/// Bounded error queue with drop-oldest-on-overflow semantics (spec.md
/// §4.2's back-pressure rule). `AsrError` is not `Clone` (it wraps
/// `tungstenite::Error`/`serde_json::Error`), so this can't be a
/// `tokio::sync::broadcast` channel; a plain `VecDeque` behind a mutex, with
/// a `Notify` to wake the single waiting reader, gives the same "oldest
/// pops off the front" behavior the spec describes without requiring
/// `Clone`.
struct ErrorBuffer {
    queue: Mutex<VecDeque<AsrError>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl ErrorBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Pushes `err`, dropping and logging the oldest pending error if the
    /// buffer is already at capacity.
    async fn push(&self, err: AsrError) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(error = %dropped, "dropped oldest ASR error under back-pressure");
            }
        }
        queue.push_back(err);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Awaits the next error, `None` once closed with nothing left queued.
    /// The `notified()` future is created before the condition check (and
    /// held across it) so a `close()`/`push()` racing with this call can't
    /// be missed between the check and the wait.
    async fn recv(&self) -> Option<AsrError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut queue = self.queue.lock().await;
                if let Some(err) = queue.pop_front() {
                    return Some(err);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// The real duplex ASR session. Owns the write-request channel consumed by
/// the writer task and the receiving ends of the transcript/error channels
/// fed by the reader task.
pub struct AsrClient {
    config: AsrConfig,
    write_tx: mpsc::Sender<WriteRequest>,
    transcript_rx: tokio::sync::Mutex<mpsc::Receiver<TranscriptEvent>>,
    errors: Arc<ErrorBuffer>,
    closed: Arc<AtomicBool>,
    reader_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    writer_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AsrClient {
    /// Opens a WebSocket to the ASR provider, retrying with exponential
    /// backoff: up to 3 attempts, 1 s initial delay, doubling each time.
    pub async fn connect(
        cfg: AsrConfig,
        api_key: &str,
        ws_base_url: &str,
        cancel: CancellationToken,
    ) -> Result<Self, AsrError> {
        let request = build_connect_request(ws_base_url, api_key, &cfg)?;

        let mut delay = CONNECT_INITIAL_DELAY;
        let mut last_err = None;
        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            match tokio_tungstenite::connect_async(request.clone()).await {
                Ok((stream, _response)) => {
                    info!(attempt, "asr connection established");
                    return Ok(Self::spawn(stream, cfg, cancel));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "asr connect attempt failed");
                    last_err = Some(AsrError::Transport(e));
                    if attempt < CONNECT_MAX_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AsrError::Config("no connect attempts made".into())))
    }

    fn spawn(
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        config: AsrConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (sink, source) = stream.split();
        let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(32);
        let (transcript_tx, transcript_rx) = mpsc::channel(TRANSCRIPT_BUFFER);
        let errors = Arc::new(ErrorBuffer::new(ERROR_BUFFER));
        let closed = Arc::new(AtomicBool::new(false));

        let writer_handle = tokio::spawn(write_loop(sink, write_rx, cancel.clone()));
        let reader_handle = tokio::spawn(read_loop(
            source,
            transcript_tx,
            errors.clone(),
            closed.clone(),
            cancel,
        ));

        Self {
            config,
            write_tx,
            transcript_rx: tokio::sync::Mutex::new(transcript_rx),
            errors,
            closed,
            reader_handle: tokio::sync::Mutex::new(Some(reader_handle)),
            writer_handle: tokio::sync::Mutex::new(Some(writer_handle)),
        }
    }

    async fn send(&self, message: Message) -> Result<(), AsrError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let request = WriteRequest { message, ack: ack_tx };
        timeout(SEND_TIMEOUT, async {
            self.write_tx
                .send(request)
                .await
                .map_err(|_| AsrError::SendFailed("writer task gone".into()))?;
            ack_rx
                .await
                .map_err(|_| AsrError::SendFailed("writer task dropped ack".into()))?
        })
        .await
        .map_err(|_| AsrError::Timeout(SEND_TIMEOUT))?
    }
}

#[async_trait]
impl AsrSession for AsrClient {
    async fn send_audio(&self, frame: bytes::Bytes) -> Result<(), AsrError> {
        let json = ClientMessage::AudioData(frame).to_json();
        self.send(Message::Text(json.into())).await
    }

    async fn force_endpoint(&self) -> Result<(), AsrError> {
        let json = ClientMessage::ForceEndpoint.to_json();
        self.send(Message::Text(json.into())).await
    }

    async fn update_config(&self, cfg: AsrConfig) -> Result<(), AsrError> {
        let json = ClientMessage::UpdateConfiguration(cfg).to_json();
        self.send(Message::Text(json.into())).await
    }

    async fn recv_transcript(&self) -> Option<TranscriptEvent> {
        self.transcript_rx.lock().await.recv().await
    }

    async fn recv_error(&self) -> Option<AsrError> {
        self.errors.recv().await
    }

    /// Best-effort `SessionTermination`, then close the transport with a
    /// normal closure code (spec.md §4.2's close discipline), draining the
    /// writer's own pending sends first so the close frame goes out after
    /// anything already queued ahead of it. Closing twice is a no-op.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let json = ClientMessage::SessionTermination.to_json();
        let _ = self.send(Message::Text(json.into())).await;
        let _ = self.send(normal_close_message()).await;
        self.errors.close();
        if let Some(h) = self.writer_handle.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.reader_handle.lock().await.take() {
            h.abort();
        }
    }

    fn current_config(&self) -> &AsrConfig {
        &self.config
    }
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(normal_close_message()).await;
                break;
            }
            req = write_rx.recv() => {
                let Some(req) = req else { break };
                let result = sink.send(req.message).await.map_err(AsrError::Transport);
                let _ = req.ack.send(result);
            }
        }
    }
}

async fn read_loop(
    mut source: futures::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
    transcript_tx: mpsc::Sender<TranscriptEvent>,
    error_tx: Arc<ErrorBuffer>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = source.next() => msg,
        };

        let Some(msg) = next else {
            debug!("asr reader observed stream end");
            break;
        };

        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                error_tx.push(AsrError::Transport(e)).await;
                break;
            }
        };

        match msg {
            Message::Text(text) => match ServerMessage::parse(text.as_str()) {
                Ok(parsed) => handle_server_message(parsed, &transcript_tx, &error_tx).await,
                Err(e) => {
                    warn!(error = %e, "malformed ASR message, ignoring");
                }
            },
            Message::Close(frame) => {
                let normal = frame
                    .as_ref()
                    .map(|f| f.code == tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal)
                    .unwrap_or(true);
                if !normal && !closed.load(Ordering::SeqCst) {
                    error_tx.push(AsrError::Protocol("abnormal close".into())).await;
                }
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
    }
    error_tx.close();
}

async fn handle_server_message(
    parsed: ServerMessage,
    transcript_tx: &mpsc::Sender<TranscriptEvent>,
    error_tx: &ErrorBuffer,
) {
    match parsed {
        ServerMessage::SessionBegins { session_id } => {
            let _ = transcript_tx
                .send(TranscriptEvent {
                    kind: TranscriptKind::SessionBegins,
                    text: String::new(),
                    confidence: 0.0,
                    is_final: false,
                    session_id: Some(session_id),
                    turn_id: None,
                })
                .await;
        }
        ServerMessage::Connected => {
            debug!("asr connected acknowledgement");
        }
        ServerMessage::PartialTranscript { text, confidence } => {
            if !text.is_empty() {
                let _ = transcript_tx
                    .send(TranscriptEvent {
                        kind: TranscriptKind::Partial,
                        text,
                        confidence,
                        is_final: false,
                        session_id: None,
                        turn_id: None,
                    })
                    .await;
            }
        }
        ServerMessage::FinalTranscript { text, confidence } => {
            if !text.is_empty() {
                let _ = transcript_tx
                    .send(TranscriptEvent {
                        kind: TranscriptKind::Final,
                        text,
                        confidence,
                        is_final: true,
                        session_id: None,
                        turn_id: None,
                    })
                    .await;
            }
        }
        ServerMessage::Turn { text, confidence, turn_id } => {
            let _ = transcript_tx
                .send(TranscriptEvent {
                    kind: TranscriptKind::Turn,
                    text,
                    confidence,
                    is_final: true,
                    session_id: None,
                    turn_id,
                })
                .await;
        }
        ServerMessage::Error { code, message } => {
            error_tx.push(AsrError::asr_server(code, message)).await;
        }
        ServerMessage::SessionTerminated => {
            debug!("asr session terminated by provider");
        }
        ServerMessage::Unknown { message_type } => {
            debug!(message_type, "unknown ASR message type, ignoring");
        }
    }
}

fn build_connect_request(
    ws_base_url: &str,
    api_key: &str,
    cfg: &AsrConfig,
) -> Result<http::Request<()>, AsrError> {
    if api_key.is_empty() {
        return Err(AsrError::Config("missing ASR api key".into()));
    }

    let mut url = format!("{}{}?", ws_base_url.trim_end_matches('/'), DEFAULT_WS_PATH);
    for (i, (k, v)) in cfg.query_params().into_iter().enumerate() {
        if i > 0 {
            url.push('&');
        }
        url.push_str(&format!("{k}={v}"));
    }

    let uri: http::Uri = url
        .parse()
        .map_err(|e| AsrError::Config(format!("invalid asr url {url}: {e}")))?;
    let host = uri
        .host()
        .ok_or_else(|| AsrError::Config("asr url missing host".into()))?
        .to_string();

    http::Request::builder()
        .method("GET")
        .uri(uri)
        .header("Host", host)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_websocket_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| AsrError::Config(format!("failed to build connect request: {e}")))
}

/// A `Sec-WebSocket-Key` built from the system clock rather than pulling in
/// a `rand` dependency just for a handshake nonce.
fn generate_websocket_key() -> String {
    use base64::Engine;
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut bytes = [0u8; 16];
    let raw = nanos.to_le_bytes();
    for i in 0..16 {
        bytes[i] = raw[i % raw.len()].wrapping_add(i as u8);
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_requires_api_key() {
        let cfg = AsrConfig::default();
        let err = build_connect_request("wss://asr.example.com", "", &cfg).unwrap_err();
        assert!(matches!(err, AsrError::Config(_)));
    }

    #[test]
    fn connect_request_carries_query_params_and_auth_header() {
        let cfg = AsrConfig::default();
        let req = build_connect_request("wss://asr.example.com", "secret", &cfg).unwrap();
        let query = req.uri().query().unwrap_or_default();
        assert!(query.contains("sample_rate=16000"));
        assert!(query.contains("format_turns=true"));
        assert_eq!(
            req.headers().get("Authorization").unwrap(),
            "Bearer secret"
        );
    }

    #[test]
    fn websocket_key_is_stable_length() {
        let key = generate_websocket_key();
        assert_eq!(key.len(), 24); // base64 of 16 bytes
    }
}
