use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A server message the orchestrator acts on.
#[derive(Clone, Debug, PartialEq)]
pub enum IncomingMessage {
    TtsStart,
    TtsStop,
    TtsSentenceStart { text: String },
    Stt { text: String },
    Llm { emotion: String },
    Mcp { payload: Value },
    System { command: String },
    Alert {
        status: String,
        message: String,
        emotion: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message has no string `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("`{kind}` message lacks a valid `{field}` field")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("`{kind}` message has unhandled state `{state}`")]
    UnhandledState { kind: &'static str, state: String },
}

fn string_field<'a>(
    root: &'a Value,
    kind: &'static str,
    field: &'static str,
) -> Result<&'a str, MessageError> {
    root.get(field)
        .and_then(Value::as_str)
        .ok_or(MessageError::MissingField { kind, field })
}

impl IncomingMessage {
    /// Classifies a JSON message by its `type` field.
    pub fn parse(root: &Value) -> Result<Self, MessageError> {
        let kind = root
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?;

        match kind {
            "tts" => match string_field(root, "tts", "state")? {
                "start" => Ok(IncomingMessage::TtsStart),
                "stop" => Ok(IncomingMessage::TtsStop),
                "sentence_start" => Ok(IncomingMessage::TtsSentenceStart {
                    text: string_field(root, "tts", "text")?.to_string(),
                }),
                other => Err(MessageError::UnhandledState {
                    kind: "tts",
                    state: other.to_string(),
                }),
            },
            "stt" => Ok(IncomingMessage::Stt {
                text: string_field(root, "stt", "text")?.to_string(),
            }),
            "llm" => Ok(IncomingMessage::Llm {
                emotion: string_field(root, "llm", "emotion")?.to_string(),
            }),
            "mcp" => match root.get("payload") {
                Some(payload) if payload.is_object() => Ok(IncomingMessage::Mcp {
                    payload: payload.clone(),
                }),
                _ => Err(MessageError::MissingField {
                    kind: "mcp",
                    field: "payload",
                }),
            },
            "system" => Ok(IncomingMessage::System {
                command: string_field(root, "system", "command")?.to_string(),
            }),
            "alert" => Ok(IncomingMessage::Alert {
                status: string_field(root, "alert", "status")?.to_string(),
                message: string_field(root, "alert", "message")?.to_string(),
                emotion: string_field(root, "alert", "emotion")?.to_string(),
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// Text injected on behalf of the user, sent as if it had been recognized.
#[derive(Serialize)]
pub struct SttMessage<'a> {
    pub session_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    pub text: &'a str,
}

impl<'a> SttMessage<'a> {
    pub fn new(session_id: &'a str, text: &'a str) -> Self {
        Self {
            session_id,
            kind: "stt",
            text,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
