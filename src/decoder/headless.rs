use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::time::Instant;

use super::AudioDecoder;
use super::PlaybackHandle;
use super::PlaybackStatus;
use crate::cache::CacheFile;
use crate::track::TrackRequest;

/// Decoder for machines without an audio device.
///
/// The cache file is probed so corrupt or truncated audio still fails at
/// load time, and playback position is tracked with a clock.
#[derive(Debug)]
pub struct HeadlessDecoder;

#[async_trait::async_trait(?Send)]
impl AudioDecoder for HeadlessDecoder {
    async fn load(&self, file: &CacheFile) -> Result<Box<dyn PlaybackHandle>> {
        let path = file.path.clone();
        let duration = tokio::task::spawn_blocking(move || probe_duration(&path)).await??;
        tracing::info!("Decoded {} ({:?})", file.track, duration);

        Ok(Box::new(HeadlessHandle::new(file.track.clone(), duration)))
    }
}

fn probe_duration(path: &Path) -> Result<Option<Duration>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow::anyhow!("Unrecognized audio in {}: {}", path.display(), e))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("No default audio track"))?;
    let params = &track.codec_params;

    let duration = match (params.time_base, params.n_frames, params.sample_rate) {
        (Some(time_base), Some(frames), _) => {
            let time = time_base.calc_time(frames);
            Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
        }
        (None, Some(frames), Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
        _ => None,
    };
    Ok(duration)
}

struct HeadlessHandle {
    track: TrackRequest,
    duration: Option<Duration>,
    offset: Duration,
    started: Option<Instant>,
}

impl HeadlessHandle {
    fn new(track: TrackRequest, duration: Option<Duration>) -> Self {
        HeadlessHandle {
            track,
            duration,
            offset: Duration::ZERO,
            started: None,
        }
    }

    fn clamp(&self, position: Duration) -> Duration {
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn position(&self) -> Duration {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        self.clamp(self.offset + elapsed)
    }

    fn finished(&self) -> bool {
        self.duration
            .map(|duration| self.position() >= duration)
            .unwrap_or(false)
    }
}

impl PlaybackHandle for HeadlessHandle {
    fn track(&self) -> &TrackRequest {
        &self.track
    }

    fn play(&mut self) -> Result<()> {
        if self.finished() {
            self.offset = Duration::ZERO;
            self.started = None;
        }
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.offset = self.position();
        self.started = None;
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.offset = self.clamp(position);
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn status(&self) -> PlaybackStatus {
        let finished = self.finished();
        PlaybackStatus {
            position: self.position(),
            duration: self.duration,
            is_playing: self.started.is_some() && !finished,
            finished,
        }
    }
}
