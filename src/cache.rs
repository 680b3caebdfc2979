use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;

use crate::reassembly::ReassembledAudio;
use crate::track::TrackRequest;

/// Every track is written to the same file; the next track overwrites it.
pub const CACHE_FILE_NAME: &str = "now-playing.mp3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    pub path: PathBuf,
    pub track: TrackRequest,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct CacheWriter {
    dir: PathBuf,
}

impl CacheWriter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        CacheWriter { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE_NAME)
    }

    #[tracing::instrument(name = "persist_audio", skip(self, audio), fields(track = %audio.source_track, bytes = audio.len()))]
    pub async fn persist(&self, audio: ReassembledAudio) -> Result<CacheFile> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Could not create cache directory {}", self.dir.display()))?;

        let path = self.path();
        tokio::fs::write(&path, &audio.bytes)
            .await
            .with_context(|| format!("Could not write {}", path.display()))?;
        tracing::info!("Cached {} bytes at {}", audio.len(), path.display());

        Ok(CacheFile {
            path,
            len: audio.len(),
            track: audio.source_track,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn audio(name: &str, bytes: &'static [u8]) -> ReassembledAudio {
        ReassembledAudio {
            bytes: Bytes::from_static(bytes),
            source_track: TrackRequest::named(name),
        }
    }

    #[tokio::test]
    async fn writes_the_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CacheWriter::new(dir.path().join("nested"));

        let file = writer.persist(audio("Song A", b"ID3 audio")).await.unwrap();
        assert_eq!(file.path, dir.path().join("nested").join(CACHE_FILE_NAME));
        assert_eq!(file.len, 9);
        assert_eq!(file.track, TrackRequest::named("Song A"));
        assert_eq!(tokio::fs::read(&file.path).await.unwrap(), b"ID3 audio");
    }

    #[tokio::test]
    async fn the_next_track_overwrites_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CacheWriter::new(dir.path());

        let first = writer.persist(audio("Song A", b"a much longer first track")).await.unwrap();
        let second = writer.persist(audio("Song B", b"short")).await.unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(tokio::fs::read(&second.path).await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn reports_unwritable_locations() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"file").await.unwrap();

        let writer = CacheWriter::new(&blocker);
        assert!(writer.persist(audio("Song A", b"x")).await.is_err());
    }
}
