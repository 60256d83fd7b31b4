//! Wire protocol spoken between room participants and the relay.
//! Kept in its own crate so the relay side and alternative clients can share
//! the frame shape without pulling in the session runtime.
//!
//! Every frame is a JSON object `{"action": <kind>, "data": <payload>}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no action")]
    MissingAction,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

pub type ProtoResult<T> = Result<T, ProtoError>;

/// Session action carried in the `action` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Request,
    Sync,
    Play,
    Pause,
    End,
    /// Anything the client does not understand. Receivers ignore it.
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Request => "REQUEST",
            Action::Sync => "SYNC",
            Action::Play => "PLAY_VIDEO",
            Action::Pause => "PAUSE_VIDEO",
            Action::End => "END_VIDEO",
            Action::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn parse(raw: &str) -> Action {
        match raw {
            "REQUEST" => Action::Request,
            "SYNC" => Action::Sync,
            "PLAY_VIDEO" => Action::Play,
            "PAUSE_VIDEO" => Action::Pause,
            "END_VIDEO" => Action::End,
            other => Action::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback fields attached to an action. All keys are optional on the wire;
/// a REQUEST only carries `url`, a PAUSE may omit `time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub video_reference: Option<String>,
    #[serde(rename = "time", default, skip_serializing_if = "Option::is_none")]
    pub position_seconds: Option<f64>,
    #[serde(rename = "playing", default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
}

impl EventPayload {
    pub fn reference(url: impl Into<String>) -> Self {
        Self {
            video_reference: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn playback(url: impl Into<String>, position_seconds: f64, is_playing: bool) -> Self {
        Self {
            video_reference: Some(url.into()),
            position_seconds: Some(position_seconds),
            is_playing: Some(is_playing),
        }
    }

    /// The referenced video, treating an empty string as absent.
    pub fn video(&self) -> Option<&str> {
        self.video_reference.as_deref().filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub action: Action,
    pub payload: Option<EventPayload>,
}

impl SessionEvent {
    pub fn new(action: Action, payload: Option<EventPayload>) -> Self {
        Self { action, payload }
    }

    pub fn request(url: impl Into<String>) -> Self {
        Self::new(Action::Request, Some(EventPayload::reference(url)))
    }

    pub fn play(url: impl Into<String>, position_seconds: f64) -> Self {
        Self::new(
            Action::Play,
            Some(EventPayload::playback(url, position_seconds, true)),
        )
    }

    pub fn pause(url: impl Into<String>, position_seconds: f64) -> Self {
        Self::new(
            Action::Pause,
            Some(EventPayload::playback(url, position_seconds, false)),
        )
    }

    pub fn end() -> Self {
        Self::new(Action::End, None)
    }

    /// Serializes the event into its text frame. A missing payload is sent as
    /// an empty object.
    pub fn encode(&self) -> ProtoResult<String> {
        let data = match &self.payload {
            Some(payload) => serde_json::to_value(payload)?,
            None => Value::Object(Default::default()),
        };
        let frame = RawFrame {
            action: Some(self.action.as_str().to_string()),
            data: Some(data),
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Parses an inbound text frame.
    pub fn decode(text: &str) -> ProtoResult<SessionEvent> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let action = match raw.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => Action::parse(action),
            _ => return Err(ProtoError::MissingAction),
        };
        let payload = match raw.data {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(
                serde_json::from_value::<EventPayload>(value)
                    .map_err(|err| ProtoError::InvalidFrame(format!("bad payload: {err}")))?,
            ),
            Some(other) => {
                return Err(ProtoError::InvalidFrame(format!(
                    "data must be an object, got {other}"
                )))
            }
        };
        Ok(SessionEvent { action, payload })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFrame {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}
