//! Streaming playback core of the EchoBeat client.
//!
//! A track is requested over the playback-stream socket, its base64
//! fragments are joined in arrival order, written to one cache file and
//! handed to a decoder. "Now playing" is mirrored into a persisted
//! key-value store for the rest of the client to read.

pub mod cache;
pub mod coordinator;
pub mod decoder;
pub mod log;
pub mod reassembly;
pub mod session;
pub mod state;
pub mod stream;
pub mod track;
mod utils;

pub use coordinator::{DriveOutcome, PlaybackCoordinator, PlaybackError, PlayerOptions, RequestOutcome};
pub use decoder::PlaybackStatus;
pub use reassembly::InvalidFragmentPolicy;
pub use session::SessionState;
pub use track::TrackRequest;
