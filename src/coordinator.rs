use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cache::CacheWriter;
use crate::decoder::{self, AudioDecoder, Backend, PlaybackHandle, PlaybackStatus};
use crate::reassembly::{FragmentOutcome, InvalidFragmentPolicy};
use crate::session::{SessionState, StreamSession, TransitionError};
use crate::state::{FileStore, PlaybackStateMirror};
use crate::stream::{StreamConnector, StreamError, StreamEvent, WebSocketConnector};
use crate::track::TrackRequest;
use crate::utils;

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub server: String,
    pub cache_dir: PathBuf,
    pub state_file: PathBuf,
    pub invalid_fragments: InvalidFragmentPolicy,
    pub backend: Backend,
    pub autoplay: bool,
}

impl PlayerOptions {
    pub fn new(
        server: String,
        cache_dir: Option<String>,
        state_file: Option<String>,
        invalid_fragments: InvalidFragmentPolicy,
        backend: Backend,
        autoplay: bool,
    ) -> Result<Self> {
        let cache_dir = match cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => utils::get_cache_path()?,
        };
        Ok(PlayerOptions {
            server,
            cache_dir,
            state_file: resolve_state_file(state_file)?,
            invalid_fragments,
            backend,
            autoplay,
        })
    }
}

pub fn resolve_state_file(state_file: Option<String>) -> Result<PathBuf> {
    match state_file {
        Some(file) => Ok(PathBuf::from(file)),
        None => utils::get_state_path(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Streaming failed: {0}")]
    Transport(#[from] StreamError),

    #[error("Could not write the playback cache: {0:#}")]
    CacheWrite(#[source] anyhow::Error),

    #[error("Could not initialize the audio decoder: {0:#}")]
    Decoder(#[source] anyhow::Error),

    #[error("Playback control failed: {0:#}")]
    Control(#[source] anyhow::Error),

    #[error("No track has been requested")]
    NoActiveSession,

    #[error("{0} is not ready for playback yet")]
    NotReady(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new session was opened.
    Started,
    /// The track was already streaming or loaded. `status` is `None` while
    /// it is still streaming.
    Reused { status: Option<PlaybackStatus> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    Fragment {
        outcome: FragmentOutcome,
        buffered_bytes: usize,
        fragments: usize,
    },
    Ready(PlaybackStatus),
    /// Nothing is streaming.
    Idle,
}

/// Owns the one live stream session and the one live playback handle.
///
/// Requesting a different track tears both down before anything for the new
/// track is created. All methods take `&mut self`, so a single caller
/// serializes every transition, cache write and mirror write.
pub struct PlaybackCoordinator {
    connector: Box<dyn StreamConnector>,
    decoder: Box<dyn AudioDecoder>,
    cache: CacheWriter,
    mirror: PlaybackStateMirror,
    policy: InvalidFragmentPolicy,
    autoplay: bool,
    session: Option<StreamSession>,
    playback: Option<Box<dyn PlaybackHandle>>,
    mirrored_playing: Option<bool>,
}

fn not_ready(session: &Option<StreamSession>) -> PlaybackError {
    match session {
        Some(session) => PlaybackError::NotReady(session.track().to_string()),
        None => PlaybackError::NoActiveSession,
    }
}

impl PlaybackCoordinator {
    pub fn new(
        connector: Box<dyn StreamConnector>,
        decoder: Box<dyn AudioDecoder>,
        cache: CacheWriter,
        mirror: PlaybackStateMirror,
    ) -> Self {
        PlaybackCoordinator {
            connector,
            decoder,
            cache,
            mirror,
            policy: InvalidFragmentPolicy::default(),
            autoplay: true,
            session: None,
            playback: None,
            mirrored_playing: None,
        }
    }

    pub fn from_options(options: &PlayerOptions) -> Result<Self> {
        let connector = WebSocketConnector::new(&options.server)?;
        let store = Arc::new(FileStore::new(&options.state_file));

        Ok(Self::new(
            Box::new(connector),
            decoder::get_decoder(options.backend),
            CacheWriter::new(&options.cache_dir),
            PlaybackStateMirror::new(store),
        )
        .with_policy(options.invalid_fragments)
        .with_autoplay(options.autoplay))
    }

    pub fn with_policy(mut self, policy: InvalidFragmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(StreamSession::state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn current_track(&self) -> Option<&TrackRequest> {
        self.session.as_ref().map(StreamSession::track)
    }

    pub fn mirror(&self) -> &PlaybackStateMirror {
        &self.mirror
    }

    pub fn cache(&self) -> &CacheWriter {
        &self.cache
    }

    #[tracing::instrument(name = "request_track", skip(self), fields(track = %track))]
    pub async fn request(&mut self, track: TrackRequest) -> Result<RequestOutcome, PlaybackError> {
        if let Some(session) = &self.session {
            if session.track().same_stream(&track) && session.state().is_reusable() {
                let status = self.playback.as_ref().map(|handle| handle.status());
                tracing::info!("{} is already {}, reusing it", track, session.state());
                return Ok(RequestOutcome::Reused { status });
            }
        }

        self.release();

        let mut session = StreamSession::new(track.clone(), self.policy);
        session.connect()?;
        self.mirror_state(&track, false).await;

        match self.connector.open(&track).await {
            Ok(connection) => {
                session.attach(connection)?;
                self.session = Some(session);
                Ok(RequestOutcome::Started)
            }
            Err(e) => {
                tracing::error!("Could not open stream for {}: {}", track, e);
                session.fail();
                self.session = Some(session);
                Err(e.into())
            }
        }
    }

    /// Applies the next stream event. Returns `Ready` once the track is
    /// decoded (and playing, with autoplay).
    pub async fn drive(&mut self) -> Result<DriveOutcome, PlaybackError> {
        let session = match self.session.as_mut() {
            Some(session) if session.state() == SessionState::Streaming => session,
            _ => return Ok(DriveOutcome::Idle),
        };

        let event = session.next_event().await;
        match event {
            StreamEvent::Chunk(raw) => match session.on_fragment(&raw) {
                Ok(outcome) => Ok(DriveOutcome::Fragment {
                    outcome,
                    buffered_bytes: session.buffered_bytes(),
                    fragments: session.fragment_count(),
                }),
                Err(e) => {
                    session.fail();
                    Err(e.into())
                }
            },
            StreamEvent::Finished => self.finish().await.map(DriveOutcome::Ready),
            StreamEvent::Error(e) => {
                tracing::error!("Stream for {} failed: {}", session.track(), e);
                session.fail();
                Err(e.into())
            }
        }
    }

    pub async fn run_until_ready(&mut self) -> Result<PlaybackStatus, PlaybackError> {
        loop {
            match self.drive().await? {
                DriveOutcome::Fragment { .. } => continue,
                DriveOutcome::Ready(status) => return Ok(status),
                DriveOutcome::Idle => return self.status(),
            }
        }
    }

    async fn finish(&mut self) -> Result<PlaybackStatus, PlaybackError> {
        let audio = match self.session.as_mut() {
            Some(session) => session.take_audio()?,
            None => return Err(PlaybackError::NoActiveSession),
        };
        let track = audio.source_track.clone();

        let file = match self.cache.persist(audio).await {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("Failed to cache {}: {:#}", track, e);
                self.fail_session();
                return Err(PlaybackError::CacheWrite(e));
            }
        };

        let mut handle = match self.decoder.load(&file).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to decode {}: {:#}", track, e);
                self.fail_session();
                return Err(PlaybackError::Decoder(e));
            }
        };

        if self.autoplay {
            if let Err(e) = handle.play() {
                handle.release();
                self.fail_session();
                return Err(PlaybackError::Control(e));
            }
        }

        let status = handle.status();
        self.playback = Some(handle);
        if let Some(session) = self.session.as_mut() {
            session.mark_complete()?;
        }
        self.mirror_state(&track, status.is_playing).await;

        tracing::info!("{} is ready for playback", track);
        Ok(status)
    }

    pub async fn play(&mut self) -> Result<PlaybackStatus, PlaybackError> {
        let handle = self
            .playback
            .as_deref_mut()
            .ok_or_else(|| not_ready(&self.session))?;

        if handle.status().finished {
            handle.seek(Duration::ZERO).map_err(PlaybackError::Control)?;
        }
        handle.play().map_err(PlaybackError::Control)?;
        let status = handle.status();
        let track = handle.track().clone();

        self.mirror_state(&track, true).await;
        Ok(status)
    }

    pub async fn pause(&mut self) -> Result<PlaybackStatus, PlaybackError> {
        let handle = self
            .playback
            .as_deref_mut()
            .ok_or_else(|| not_ready(&self.session))?;

        handle.pause().map_err(PlaybackError::Control)?;
        let status = handle.status();
        let track = handle.track().clone();

        self.mirror_state(&track, false).await;
        Ok(status)
    }

    pub fn seek(&mut self, position: Duration) -> Result<PlaybackStatus, PlaybackError> {
        let handle = self
            .playback
            .as_deref_mut()
            .ok_or_else(|| not_ready(&self.session))?;

        handle.seek(position).map_err(PlaybackError::Control)?;
        Ok(handle.status())
    }

    pub fn status(&self) -> Result<PlaybackStatus, PlaybackError> {
        self.playback
            .as_ref()
            .map(|handle| handle.status())
            .ok_or_else(|| not_ready(&self.session))
    }

    /// Foreground poll: reads the live status and re-mirrors `isPlaying` if
    /// it changed underneath us, e.g. when the track ran out.
    pub async fn poll_status(&mut self) -> Result<PlaybackStatus, PlaybackError> {
        let status = self.status()?;
        if self.mirrored_playing != Some(status.is_playing) {
            if let Some(track) = self.current_track().cloned() {
                self.mirror_state(&track, status.is_playing).await;
            }
        }
        Ok(status)
    }

    /// Releases everything and mirrors that nothing is playing.
    pub async fn stop(&mut self) {
        let track = self.current_track().cloned();
        self.release();
        if let Some(track) = track {
            self.mirror_state(&track, false).await;
        }
    }

    fn release(&mut self) {
        if let Some(handle) = self.playback.take() {
            handle.release();
        }
        if let Some(mut session) = self.session.take() {
            tracing::debug!("Closing {} session for {}", session.state(), session.track());
            session.close();
        }
    }

    fn fail_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.fail();
        }
    }

    async fn mirror_state(&mut self, track: &TrackRequest, is_playing: bool) {
        self.mirror.sync(&track.name, track.id, is_playing).await;
        self.mirrored_playing = Some(is_playing);
    }
}
