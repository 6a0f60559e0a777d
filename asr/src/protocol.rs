//! Wire protocol for the remote streaming ASR service.
//!
//! Server-to-client messages are JSON objects keyed by `message_type`; the
//! shape of the remaining fields depends on the kind, so [`ServerMessage`]
//! is parsed by hand rather than through a single `#[serde(tag = ...)]`
//! enum. Client-to-server messages have a fixed shape per kind and so are
//! serialized directly from [`ClientMessage`].

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::AsrError;

/// Endpoint path of the ASR API variant this client speaks. The provider
/// also exposes a legacy `/v2/realtime/ws`; this client targets the
/// current, non-legacy variant.
pub const DEFAULT_WS_PATH: &str = "/v3/ws";

/// Streaming ASR configuration, delivered at session creation and
/// reapplied via `UpdateConfiguration` on every reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrConfig {
    pub sample_rate: u32,
    pub encoding: String,
    pub format_turns: bool,
    pub end_of_turn_confidence_threshold: f32,
    pub min_end_of_turn_silence_when_confident_ms: u64,
    pub max_turn_silence_ms: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            encoding: "pcm_s16le".to_string(),
            format_turns: true,
            end_of_turn_confidence_threshold: 0.7,
            min_end_of_turn_silence_when_confident_ms: 160,
            max_turn_silence_ms: 2_400,
        }
    }
}

impl AsrConfig {
    /// Query-string parameters for the initial connect request.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sample_rate", self.sample_rate.to_string()),
            ("encoding", self.encoding.clone()),
            ("format_turns", self.format_turns.to_string()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Partial,
    Final,
    Turn,
    SessionBegins,
    SessionEnds,
    Error,
}

/// A single transcript observation, either surfaced to the client verbatim
/// or appended to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
}

/// Messages read from the ASR service, before being turned into
/// [`TranscriptEvent`]s by the caller (some, like `Connected`, never are).
#[derive(Debug, Clone)]
pub enum ServerMessage {
    SessionBegins { session_id: String },
    Connected,
    PartialTranscript { text: String, confidence: f32 },
    FinalTranscript { text: String, confidence: f32 },
    Turn { text: String, confidence: f32, turn_id: Option<String> },
    Error { code: i32, message: String },
    SessionTerminated,
    Unknown { message_type: String },
}

#[derive(Debug, Deserialize)]
struct RawServerMessage {
    message_type: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    turn_id: Option<String>,
    #[serde(default)]
    error_code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

impl ServerMessage {
    pub fn parse(payload: &str) -> Result<Self, AsrError> {
        let raw: RawServerMessage =
            serde_json::from_str(payload).map_err(|e| AsrError::Protocol(e.to_string()))?;

        Ok(match raw.message_type.as_str() {
            "SessionBegins" => ServerMessage::SessionBegins {
                session_id: raw.session_id.unwrap_or_default(),
            },
            "Connected" => ServerMessage::Connected,
            "PartialTranscript" => ServerMessage::PartialTranscript {
                text: raw.text.unwrap_or_default(),
                confidence: raw.confidence.unwrap_or(0.0),
            },
            "FinalTranscript" => ServerMessage::FinalTranscript {
                text: raw.text.unwrap_or_default(),
                confidence: raw.confidence.unwrap_or(0.0),
            },
            "Turn" => ServerMessage::Turn {
                text: raw.text.unwrap_or_default(),
                confidence: raw.confidence.unwrap_or(0.0),
                turn_id: raw.turn_id,
            },
            "Error" => ServerMessage::Error {
                code: raw.error_code.unwrap_or(0),
                message: raw.message.unwrap_or_default(),
            },
            "SessionTerminated" => ServerMessage::SessionTerminated,
            other => ServerMessage::Unknown {
                message_type: other.to_string(),
            },
        })
    }
}

/// Messages sent to the ASR service.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    AudioData(bytes::Bytes),
    ForceEndpoint,
    UpdateConfiguration(AsrConfig),
    SessionTermination,
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::AudioData(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                serde_json::json!({
                    "message_type": "AudioData",
                    "audio_data": encoded,
                })
                .to_string()
            }
            ClientMessage::ForceEndpoint => serde_json::json!({
                "message_type": "ForceEndpoint",
            })
            .to_string(),
            ClientMessage::UpdateConfiguration(cfg) => serde_json::json!({
                "message_type": "UpdateConfiguration",
                "sample_rate": cfg.sample_rate,
                "encoding": cfg.encoding,
                "format_turns": cfg.format_turns,
                "end_of_turn_confidence_threshold": cfg.end_of_turn_confidence_threshold,
                "min_end_of_turn_silence_when_confident_ms": cfg.min_end_of_turn_silence_when_confident_ms,
                "max_turn_silence_ms": cfg.max_turn_silence_ms,
            })
            .to_string(),
            ClientMessage::SessionTermination => serde_json::json!({
                "message_type": "SessionTermination",
            })
            .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_transcript() {
        let msg = ServerMessage::parse(
            r#"{"message_type":"PartialTranscript","text":"hello","confidence":0.4}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::PartialTranscript { text, confidence } => {
                assert_eq!(text, "hello");
                assert_eq!(confidence, 0.4);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_is_logged_and_ignored() {
        let msg = ServerMessage::parse(r#"{"message_type":"SomethingNew"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown { .. }));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = ServerMessage::parse("not json").unwrap_err();
        assert!(matches!(err, AsrError::Protocol(_)));
    }

    #[test]
    fn audio_data_round_trips_base64() {
        let msg = ClientMessage::AudioData(bytes::Bytes::from_static(&[1, 2, 3, 4]));
        let json = msg.to_json();
        assert!(json.contains("AudioData"));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let encoded = parsed["audio_data"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 4]);
    }
}
