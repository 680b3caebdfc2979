pub mod frame;
pub mod stream;

// Re-export the connector for easier access
pub use stream::WebSocketConnector;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::track::TrackRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One base64 audio fragment, exactly as the server sent it.
    Chunk(String),
    Finished,
    Error(StreamError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to connect to the stream endpoint: {0}")]
    Connect(String),

    #[error("Server reported an error: {0}")]
    Server(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed before the stream completed")]
    ClosedEarly,

    #[error("Fragment {index} is not valid base64")]
    InvalidFragment { index: usize },
}

pub type StreamEventChannel = UnboundedReceiver<StreamEvent>;

/// A live streaming connection for one track.
///
/// Closing (or dropping) the connection stops the reader task and discards
/// anything still queued.
pub struct StreamConnection {
    events: StreamEventChannel,
    reader: Option<JoinHandle<()>>,
}

impl StreamConnection {
    pub fn new(events: StreamEventChannel, reader: Option<JoinHandle<()>>) -> Self {
        StreamConnection { events, reader }
    }

    /// Next event in delivery order. A channel that ends without a terminal
    /// event is reported as an early close.
    pub async fn next_event(&mut self) -> StreamEvent {
        self.events
            .recv()
            .await
            .unwrap_or(StreamEvent::Error(StreamError::ClosedEarly))
    }

    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events.close();
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens per-track streaming sessions against the playback endpoint.
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self, track: &TrackRequest) -> Result<StreamConnection, StreamError>;
}
