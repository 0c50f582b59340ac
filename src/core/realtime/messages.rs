//! Realtime API WebSocket message types.
//!
//! This module defines the subset of client and server events the conversation
//! engine speaks. All events are JSON-encoded with a `type` tag.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Send the session configuration
//! - input_audio_buffer.append - Append audio to the input buffer
//! - input_audio_buffer.commit - Commit the input buffer
//! - response.create - Request a response
//!
//! Server events (received from server):
//! - session.created - Session created
//! - response.audio.delta - Audio data chunk
//! - response.done - Response complete
//! - conversation.item.input_audio_transcription.completed - User transcript
//! - error - Error occurred
//!
//! Every other server event type deserializes to [`ServerEvent::Unknown`].

use base64::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::session::SessionConfiguration;

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the Realtime API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Send the session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfiguration,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ResponseCreate => "response.create",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        #[serde(default)]
        session: Option<serde_json::Value>,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Encoded or raw audio delta
        delta: AudioPayload,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information. Any shape is accepted so a turn completion
        /// is never lost.
        #[serde(default, deserialize_with = "lenient")]
        response: Response,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        /// Event ID
        #[serde(default)]
        event_id: Option<String>,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Content index
        #[serde(default)]
        content_index: Option<u32>,
        /// Transcript text
        #[serde(default)]
        transcript: String,
    },

    /// Any event type the engine does not act on
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }

    /// Wire name of the event, `"unknown"` for ignored types.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::Unknown => "unknown",
        }
    }

    /// Build an audio delta carrying base64 text, as the remote sends it.
    pub fn audio_delta(data: &[u8]) -> Self {
        ServerEvent::AudioDelta {
            response_id: None,
            item_id: None,
            delta: AudioPayload::Base64(BASE64_STANDARD.encode(data)),
        }
    }
}

/// Audio carried by `response.audio.delta`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AudioPayload {
    /// Base64 text (the wire encoding)
    Base64(String),
    /// Already decoded bytes
    Raw(Vec<u8>),
}

impl AudioPayload {
    /// Decode into raw PCM bytes. Raw payloads pass through unchanged.
    pub fn decode(self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            AudioPayload::Base64(text) => ServerEvent::decode_audio_delta(&text),
            AudioPayload::Raw(bytes) => Ok(bytes),
        }
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Parameter that caused the error
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub param: Option<String>,
    /// Event ID that caused the error
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_id: Option<String>,
}

/// Response information carried by `response.done`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
    /// Output items
    #[serde(default, deserialize_with = "lenient")]
    pub output: Vec<ConversationItem>,
}

impl Response {
    /// Transcript segments spoken by the assistant, in output order.
    ///
    /// Each content part of an assistant item contributes its `text` when it
    /// is non-blank, otherwise its `transcript` when that is non-blank.
    pub fn assistant_transcripts(&self) -> Vec<&str> {
        self.output
            .iter()
            .filter(|item| item.role.as_deref() == Some("assistant"))
            .flat_map(|item| item.content.iter())
            .filter_map(|part| {
                non_blank(part.text.as_deref()).or_else(|| non_blank(part.transcript.as_deref()))
            })
            .collect()
    }

    /// Assistant transcript segments trimmed and joined with single spaces.
    pub fn assistant_transcript(&self) -> String {
        self.assistant_transcripts()
            .iter()
            .map(|segment| segment.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Deserialize `T`, falling back to its default on `null` or an unexpected
/// shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Conversation item within a response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default)]
    pub id: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default)]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, deserialize_with = "lenient")]
    pub content: Vec<ContentPart>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
    /// Text content
    #[serde(default)]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default)]
    pub transcript: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_serialization() {
        let json = serde_json::to_string(&ClientEvent::InputAudioBufferCommit).unwrap();
        assert_eq!(json, r#"{"type":"input_audio_buffer.commit"}"#);

        let json = serde_json::to_string(&ClientEvent::ResponseCreate).unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_audio_append() {
        let data = vec![0u8, 1, 2, 3];
        let event = ClientEvent::audio_append(&data);
        match event {
            ClientEvent::InputAudioBufferAppend { ref audio } => {
                let decoded = BASE64_STANDARD.decode(audio).unwrap();
                assert_eq!(decoded, data);
            }
            _ => panic!("Wrong event type"),
        }
        assert_eq!(event.event_type(), "input_audio_buffer.append");
    }

    #[test]
    fn test_session_update_serialization() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfiguration::default(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "alloy");
    }

    #[test]
    fn test_error_event_deserialization() {
        let json = r#"{
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": "Test error"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Test error");
                assert_eq!(error.error_type, "invalid_request_error");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let json = r#"{"type": "rate_limits.updated", "rate_limits": []}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_audio_delta_decode() {
        let original = vec![0u8, 1, 2, 3, 4, 5];
        let json = format!(
            r#"{{"type":"response.audio.delta","response_id":"resp_1","delta":"{}"}}"#,
            BASE64_STANDARD.encode(&original)
        );
        let event: ServerEvent = serde_json::from_str(&json).unwrap();
        match event {
            ServerEvent::AudioDelta { delta, response_id, .. } => {
                assert_eq!(response_id.as_deref(), Some("resp_1"));
                assert_eq!(delta.decode().unwrap(), original);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_audio_delta_raw_passthrough() {
        let payload = AudioPayload::Raw(vec![9, 8, 7]);
        assert_eq!(payload.decode().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_audio_delta_invalid_base64() {
        let payload = AudioPayload::Base64("not base64!!".to_string());
        assert!(payload.decode().is_err());
    }

    #[test]
    fn test_transcription_completed_deserialization() {
        let json = r#"{
            "type": "conversation.item.input_audio_transcription.completed",
            "event_id": "evt_1",
            "item_id": "item_1",
            "content_index": 0,
            "transcript": "予約したいです"
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::InputAudioTranscriptionCompleted {
                item_id,
                content_index,
                transcript,
                ..
            } => {
                assert_eq!(item_id.as_deref(), Some("item_1"));
                assert_eq!(content_index, Some(0));
                assert_eq!(transcript, "予約したいです");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_assistant_transcript_extraction() {
        let json = r#"{
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [
                    {"role": "user", "content": [{"type": "input_text", "text": "ignored"}]},
                    {"role": "assistant", "content": [
                        {"type": "audio", "transcript": "  お電話ありがとうございます。 "},
                        {"type": "text", "text": "   ", "transcript": "ご予約ですか？"},
                        {"type": "text", "text": "Hello"},
                        {"type": "audio", "transcript": ""}
                    ]}
                ]
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let ServerEvent::ResponseDone { response } = event else {
            panic!("Wrong event type");
        };

        assert_eq!(response.assistant_transcripts().len(), 3);
        assert_eq!(
            response.assistant_transcript(),
            "お電話ありがとうございます。 ご予約ですか？ Hello"
        );
    }

    #[test]
    fn test_response_done_without_payload() {
        let event: ServerEvent = serde_json::from_str(r#"{"type":"response.done"}"#).unwrap();
        let ServerEvent::ResponseDone { response } = event else {
            panic!("Wrong event type");
        };
        assert!(response.assistant_transcripts().is_empty());
        assert_eq!(response.assistant_transcript(), "");
    }

    #[test]
    fn test_response_done_tolerates_null_payloads() {
        let cases = [
            r#"{"type":"response.done","response":null}"#,
            r#"{"type":"response.done","response":{"id":"resp_1","output":null}}"#,
            r#"{"type":"response.done","response":{"id":"resp_1","output":[{"role":"assistant","content":null}]}}"#,
            r#"{"type":"response.done","response":"completed"}"#,
            r#"{"type":"response.done","response":{"id":"resp_1","output":{"role":"assistant"}}}"#,
        ];

        for json in cases {
            let event: ServerEvent = serde_json::from_str(json)
                .unwrap_or_else(|e| panic!("{} failed to parse: {}", json, e));
            let ServerEvent::ResponseDone { response } = event else {
                panic!("Wrong event type for {}", json);
            };
            assert_eq!(response.assistant_transcript(), "", "{}", json);
        }
    }

    #[test]
    fn test_response_done_null_content_keeps_other_items() {
        let json = r#"{
            "type": "response.done",
            "response": {
                "id": "resp_2",
                "status": null,
                "output": [
                    {"role": "assistant", "content": null},
                    {"role": "assistant", "content": [{"type": "audio", "transcript": "かしこまりました"}]}
                ]
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let ServerEvent::ResponseDone { response } = event else {
            panic!("Wrong event type");
        };
        assert_eq!(response.id.as_deref(), Some("resp_2"));
        assert_eq!(response.output.len(), 2);
        assert_eq!(response.assistant_transcript(), "かしこまりました");
    }
}
