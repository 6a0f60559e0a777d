//! JSON shapes written to the client socket. See §4.5/§6 of the
//! orchestrator specification for the two wire shapes.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    SttError,
    AudioError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingEvent {
    #[serde(rename = "transcript")]
    Transcript {
        message_type: &'static str,
        text: String,
        confidence: f32,
        is_final: bool,
        timestamp: DateTime<Utc>,
        session_id: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        error_type: ErrorType,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_type_tag() {
        let event = OutgoingEvent::Transcript {
            message_type: "PartialTranscript",
            text: "hi".to_string(),
            confidence: 0.5,
            is_final: false,
            timestamp: Utc::now(),
            session_id: Some("abc".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["message_type"], "PartialTranscript");
    }

    #[test]
    fn error_event_uses_screaming_snake_case_error_type() {
        let event = OutgoingEvent::Error {
            error_type: ErrorType::SttError,
            message: "asr unreachable".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error_type"], "STT_ERROR");
    }
}
