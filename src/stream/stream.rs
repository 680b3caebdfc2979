use anyhow::Result;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::stream::frame::{self, ClientFrame};
use crate::stream::{StreamConnection, StreamConnector, StreamError, StreamEvent};
use crate::track::TrackRequest;

/// Streams tracks from the EchoBeat playback endpoint over a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: Url,
}

impl WebSocketConnector {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid stream endpoint `{}`: {}", endpoint, e))?;
        match endpoint.scheme() {
            "ws" | "wss" => Ok(WebSocketConnector { endpoint }),
            scheme => Err(anyhow::anyhow!(
                "Unsupported stream endpoint scheme `{}`, expected ws or wss",
                scheme
            )),
        }
    }

    fn send_event(tx: &UnboundedSender<StreamEvent>, event: StreamEvent) {
        tx.send(event).unwrap_or_else(|e| {
            tracing::debug!("Stream listener is gone, dropping event: {:?}", e.0);
        });
    }

    /// Maps one socket message to a stream event, if it carries one.
    fn decode_message(message: Message) -> Option<StreamEvent> {
        match message {
            Message::Text(text) => match frame::parse_server_frame(text.as_str()) {
                Ok(Some(frame)) => Some(frame.into()),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Ignoring malformed stream frame: {}", e);
                    None
                }
            },
            Message::Close(_) => Some(StreamEvent::Error(StreamError::ClosedEarly)),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl StreamConnector for WebSocketConnector {
    #[tracing::instrument(name = "open_stream", skip(self), fields(endpoint = %self.endpoint))]
    async fn open(&self, track: &TrackRequest) -> Result<StreamConnection, StreamError> {
        let (socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        tracing::info!("Connected to stream endpoint");

        let (mut write, mut read) = socket.split();

        let start = ClientFrame::start_stream(track.name.clone())
            .to_json()
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        write
            .send(Message::Text(start.into()))
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        tracing::info!("Requested stream for {}", track);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            // Keep the sink half alive until the reader is done.
            let _write = write;

            while let Some(message) = read.next().await {
                let event = match message {
                    Ok(message) => match Self::decode_message(message) {
                        Some(event) => event,
                        None => continue,
                    },
                    Err(e) => {
                        tracing::error!("Stream connection failed: {}", e);
                        StreamEvent::Error(StreamError::Connection(e.to_string()))
                    }
                };

                let terminal = !matches!(event, StreamEvent::Chunk(_));
                Self::send_event(&tx, event);
                if terminal {
                    return;
                }
            }

            Self::send_event(&tx, StreamEvent::Error(StreamError::ClosedEarly));
        });

        Ok(StreamConnection::new(rx, Some(reader)))
    }
}
