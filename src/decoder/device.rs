use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use rodio::Decoder;
use rodio::OutputStream;
use rodio::Sink;
use rodio::Source;

use super::AudioDecoder;
use super::PlaybackHandle;
use super::PlaybackStatus;
use crate::cache::CacheFile;
use crate::track::TrackRequest;

/// Plays through the default output device.
#[derive(Debug)]
pub struct DeviceDecoder;

#[async_trait::async_trait(?Send)]
impl AudioDecoder for DeviceDecoder {
    async fn load(&self, file: &CacheFile) -> Result<Box<dyn PlaybackHandle>> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| anyhow::anyhow!("No audio output device: {}", e))?;

        let reader = BufReader::new(
            File::open(&file.path).with_context(|| format!("open {}", file.path.display()))?,
        );
        let source = Decoder::new(reader)
            .map_err(|e| anyhow::anyhow!("Could not decode {}: {}", file.path.display(), e))?;
        let duration = source.total_duration();

        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| anyhow::anyhow!("Could not open playback sink: {}", e))?;
        sink.pause();
        sink.append(source);
        tracing::info!("Decoded {} ({:?})", file.track, duration);

        Ok(Box::new(DeviceHandle {
            track: file.track.clone(),
            duration,
            sink,
            _stream: stream,
        }))
    }
}

struct DeviceHandle {
    track: TrackRequest,
    duration: Option<Duration>,
    sink: Sink,
    _stream: OutputStream,
}

impl PlaybackHandle for DeviceHandle {
    fn track(&self) -> &TrackRequest {
        &self.track
    }

    fn play(&mut self) -> Result<()> {
        self.sink.play();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.sink.pause();
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.sink
            .try_seek(position)
            .map_err(|e| anyhow::anyhow!("Seek to {:?} failed: {:?}", position, e))
    }

    fn status(&self) -> PlaybackStatus {
        let finished = self.sink.empty();
        PlaybackStatus {
            position: self.sink.get_pos(),
            duration: self.duration,
            is_playing: !self.sink.is_paused() && !finished,
            finished,
        }
    }

    fn release(self: Box<Self>) {
        tracing::info!("Releasing playback of {}", self.track);
        self.sink.stop();
    }
}
