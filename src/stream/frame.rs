//! JSON frames spoken on the playback-stream socket.
//!
//! Every frame is an `{"event": ..., "data": ...}` envelope. The client only
//! ever sends `startStream`; the server answers with any number of
//! `audioChunk` frames followed by either `streamComplete` or `error`.

use serde::Deserialize;
use serde::Serialize;

use super::StreamError;
use super::StreamEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    StartStream {
        #[serde(rename = "songName")]
        song_name: String,
    },
}

impl ClientFrame {
    pub fn start_stream<S: Into<String>>(song_name: S) -> Self {
        ClientFrame::StartStream {
            song_name: song_name.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    AudioChunk(String),
    StreamComplete,
    Error(ServerError),
}

/// Servers send either a bare message or `{ "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerError {
    Detailed { message: String },
    Text(String),
}

impl ServerError {
    pub fn message(&self) -> &str {
        match self {
            ServerError::Detailed { message } => message,
            ServerError::Text(message) => message,
        }
    }
}

impl From<ServerFrame> for StreamEvent {
    fn from(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::AudioChunk(chunk) => StreamEvent::Chunk(chunk),
            ServerFrame::StreamComplete => StreamEvent::Finished,
            ServerFrame::Error(error) => {
                StreamEvent::Error(StreamError::Server(error.message().to_string()))
            }
        }
    }
}

const KNOWN_EVENTS: [&str; 3] = ["audioChunk", "streamComplete", "error"];

#[derive(Deserialize)]
struct Envelope {
    event: String,
}

/// Parses a text frame. Events this client does not handle yield `Ok(None)`.
pub fn parse_server_frame(text: &str) -> serde_json::Result<Option<ServerFrame>> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if !KNOWN_EVENTS.contains(&envelope.event.as_str()) {
        tracing::debug!("Ignoring unhandled stream event `{}`", envelope.event);
        return Ok(None);
    }
    serde_json::from_str(text).map(Some)
}
