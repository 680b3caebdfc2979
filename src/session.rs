use std::fmt;

use crate::reassembly::{FragmentOutcome, InvalidFragmentPolicy, ReassembledAudio, Reassembler};
use crate::stream::{StreamConnection, StreamError, StreamEvent};
use crate::track::TrackRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid session transition from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Failed)
                | (Streaming, Complete)
                | (Streaming, Failed)
        )
    }

    pub fn transition(self, next: SessionState) -> Result<SessionState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// A same-track request against a session in this state is a no-op.
    pub fn is_reusable(self) -> bool {
        matches!(self, SessionState::Streaming | SessionState::Complete)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One track's stream: its connection, its fragment buffer and where it is
/// in its lifecycle.
pub struct StreamSession {
    track: TrackRequest,
    state: SessionState,
    connection: Option<StreamConnection>,
    reassembler: Reassembler,
}

impl StreamSession {
    pub fn new(track: TrackRequest, policy: InvalidFragmentPolicy) -> Self {
        StreamSession {
            track,
            state: SessionState::Idle,
            connection: None,
            reassembler: Reassembler::new(policy),
        }
    }

    pub fn track(&self) -> &TrackRequest {
        &self.track
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn buffered_bytes(&self) -> usize {
        self.reassembler.buffered_bytes()
    }

    pub fn fragment_count(&self) -> usize {
        self.reassembler.fragment_count()
    }

    fn advance(&mut self, next: SessionState) -> Result<(), TransitionError> {
        self.state = self.state.transition(next)?;
        tracing::debug!("Session for {} is now {}", self.track, self.state);
        Ok(())
    }

    /// Marks the session as waiting on its transport.
    pub fn connect(&mut self) -> Result<(), TransitionError> {
        self.advance(SessionState::Connecting)
    }

    pub fn attach(&mut self, connection: StreamConnection) -> Result<(), TransitionError> {
        self.advance(SessionState::Streaming)?;
        self.connection = Some(connection);
        Ok(())
    }

    pub async fn next_event(&mut self) -> StreamEvent {
        match self.connection.as_mut() {
            Some(connection) => connection.next_event().await,
            None => StreamEvent::Error(StreamError::ClosedEarly),
        }
    }

    pub fn on_fragment(&mut self, raw: &str) -> Result<FragmentOutcome, StreamError> {
        self.reassembler.on_fragment(raw)
    }

    /// Closes the connection and hands back the joined audio. The session
    /// stays `Streaming` until playback is ready.
    pub fn take_audio(&mut self) -> Result<ReassembledAudio, TransitionError> {
        if self.state != SessionState::Streaming {
            return Err(TransitionError {
                from: self.state,
                to: SessionState::Complete,
            });
        }
        self.close_connection();
        Ok(self.reassembler.on_complete(self.track.clone()))
    }

    pub fn mark_complete(&mut self) -> Result<(), TransitionError> {
        self.advance(SessionState::Complete)
    }

    /// Moves to `Failed` and discards the connection and any partial buffer.
    pub fn fail(&mut self) {
        if let Err(e) = self.advance(SessionState::Failed) {
            tracing::debug!("{}", e);
        }
        self.close();
    }

    pub fn close(&mut self) {
        self.close_connection();
        self.reassembler.clear();
    }

    fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn follows_the_session_lifecycle() {
        let state = SessionState::Idle
            .transition(SessionState::Connecting)
            .and_then(|s| s.transition(SessionState::Streaming))
            .and_then(|s| s.transition(SessionState::Complete))
            .unwrap();
        assert_eq!(state, SessionState::Complete);
    }

    #[test]
    fn failure_is_reachable_only_while_in_flight() {
        assert!(SessionState::Connecting.can_transition_to(SessionState::Failed));
        assert!(SessionState::Streaming.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Complete.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Failed));
    }

    #[test]
    fn rejects_skipping_states() {
        assert_eq!(
            SessionState::Connecting.transition(SessionState::Complete),
            Err(TransitionError {
                from: SessionState::Connecting,
                to: SessionState::Complete,
            })
        );
        assert!(SessionState::Failed
            .transition(SessionState::Streaming)
            .is_err());
    }

    #[test]
    fn only_streaming_or_complete_sessions_are_reused() {
        assert!(SessionState::Streaming.is_reusable());
        assert!(SessionState::Complete.is_reusable());
        assert!(!SessionState::Connecting.is_reusable());
        assert!(!SessionState::Failed.is_reusable());
    }

    #[test]
    fn sessions_connect_before_streaming() {
        let (_tx, rx) = unbounded_channel();
        let mut session = StreamSession::new(TrackRequest::named("Song A"), Default::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.attach(StreamConnection::new(rx, None)).is_err());

        session.connect().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.connect().is_err());
    }

    #[test]
    fn take_audio_requires_a_streaming_session() {
        let mut session = StreamSession::new(TrackRequest::named("Song A"), Default::default());
        assert!(session.take_audio().is_err());
    }

    #[tokio::test]
    async fn fail_closes_the_connection_and_clears_the_buffer() {
        let (tx, rx) = unbounded_channel();
        let mut session = StreamSession::new(TrackRequest::named("Song A"), Default::default());
        session.connect().unwrap();
        session.attach(StreamConnection::new(rx, None)).unwrap();

        tx.send(StreamEvent::Chunk("AAEC".into())).unwrap();
        match session.next_event().await {
            StreamEvent::Chunk(raw) => {
                session.on_fragment(&raw).unwrap();
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(session.buffered_bytes(), 3);

        session.fail();
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.buffered_bytes(), 0);
        assert!(tx.is_closed());
        assert_eq!(
            session.next_event().await,
            StreamEvent::Error(StreamError::ClosedEarly)
        );
    }
}
