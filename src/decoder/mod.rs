#[cfg(feature = "rodio")]
mod device;
mod headless;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::cache::CacheFile;
use crate::track::TrackRequest;

#[cfg(feature = "rodio")]
pub use self::device::DeviceDecoder;
pub use self::headless::HeadlessDecoder;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub enum Backend {
    #[default]
    Headless,
    #[cfg(feature = "rodio")]
    Rodio,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "headless" => Ok(Backend::Headless),
            #[cfg(feature = "rodio")]
            "rodio" => Ok(Backend::Rodio),
            _ => Err(anyhow::anyhow!("Unsupported playback backend `{}`", s)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Headless => write!(f, "headless"),
            #[cfg(feature = "rodio")]
            Backend::Rodio => write!(f, "rodio"),
        }
    }
}

pub fn get_decoder(backend: Backend) -> Box<dyn AudioDecoder> {
    match backend {
        Backend::Headless => Box::new(HeadlessDecoder),
        #[cfg(feature = "rodio")]
        Backend::Rodio => Box::new(DeviceDecoder),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub position: Duration,
    pub duration: Option<Duration>,
    pub is_playing: bool,
    pub finished: bool,
}

/// Turns a cached audio file into a live playback instance.
///
/// Output devices are generally not `Send`, so neither are decoders or the
/// handles they create.
#[async_trait::async_trait(?Send)]
pub trait AudioDecoder {
    async fn load(&self, file: &CacheFile) -> Result<Box<dyn PlaybackHandle>>;
}

/// A decoded track bound to one cache file.
///
/// Dropping a handle stops it; `release` does the same and logs it.
pub trait PlaybackHandle {
    fn track(&self) -> &TrackRequest;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn status(&self) -> PlaybackStatus;

    fn release(self: Box<Self>) {
        tracing::info!("Releasing playback of {}", self.track());
    }
}
