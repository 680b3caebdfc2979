use std::sync::Arc;

use anyhow::Result;

use super::Entry;
use super::KeyValueStore;

pub const LAST_SONG_KEY: &str = "lastSong";
pub const LAST_SONG_ID_KEY: &str = "lastSongId";
pub const IS_PLAYING_KEY: &str = "isPlaying";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStateRecord {
    pub last_track_name: Option<String>,
    pub last_track_id: Option<u64>,
    pub is_playing: bool,
}

/// Publishes "now playing" into the shared store so other parts of the
/// client can show it without holding a reference to the player.
#[derive(Clone)]
pub struct PlaybackStateMirror {
    store: Arc<dyn KeyValueStore>,
}

impl PlaybackStateMirror {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        PlaybackStateMirror { store }
    }

    /// Write failures are logged and otherwise ignored.
    pub async fn sync(&self, track_name: &str, track_id: Option<u64>, is_playing: bool) {
        let entries: Vec<Entry> = vec![
            (LAST_SONG_KEY.to_string(), Some(track_name.to_string())),
            (LAST_SONG_ID_KEY.to_string(), track_id.map(|id| id.to_string())),
            (IS_PLAYING_KEY.to_string(), Some(is_playing.to_string())),
        ];

        match self.store.write_batch(entries).await {
            Ok(()) => tracing::debug!(
                "Mirrored now playing: {} (playing: {})",
                track_name,
                is_playing
            ),
            Err(e) => tracing::warn!("Failed to mirror playback state: {:#}", e),
        }
    }

    pub async fn read(&self) -> Result<PlaybackStateRecord> {
        let last_track_name = self.store.get(LAST_SONG_KEY).await?;
        let last_track_id = match self.store.get(LAST_SONG_ID_KEY).await? {
            Some(raw) => raw.parse::<u64>().map(Some).unwrap_or_else(|_| {
                tracing::warn!("Ignoring malformed {} value `{}`", LAST_SONG_ID_KEY, raw);
                None
            }),
            None => None,
        };
        let is_playing = self.store.get(IS_PLAYING_KEY).await?.as_deref() == Some("true");

        Ok(PlaybackStateRecord {
            last_track_name,
            last_track_id,
            is_playing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;

    fn mirror() -> (Arc<MemoryStore>, PlaybackStateMirror) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), PlaybackStateMirror::new(store))
    }

    #[tokio::test]
    async fn read_without_writes_is_empty() {
        let (_, mirror) = mirror();
        assert_eq!(mirror.read().await.unwrap(), PlaybackStateRecord::default());
    }

    #[tokio::test]
    async fn sync_uses_the_shared_keys() {
        let (store, mirror) = mirror();
        mirror.sync("Song A", Some(42), true).await;

        assert_eq!(store.get("lastSong").await.unwrap().as_deref(), Some("Song A"));
        assert_eq!(store.get("lastSongId").await.unwrap().as_deref(), Some("42"));
        assert_eq!(store.get("isPlaying").await.unwrap().as_deref(), Some("true"));
        assert_eq!(
            mirror.read().await.unwrap(),
            PlaybackStateRecord {
                last_track_name: Some("Song A".into()),
                last_track_id: Some(42),
                is_playing: true,
            }
        );
    }

    #[tokio::test]
    async fn latest_transition_wins() {
        let (_, mirror) = mirror();
        mirror.sync("Song A", Some(42), true).await;
        mirror.sync("Song A", Some(42), false).await;
        assert!(!mirror.read().await.unwrap().is_playing);
    }

    #[tokio::test]
    async fn a_track_without_id_clears_the_previous_id() {
        let (_, mirror) = mirror();
        mirror.sync("Song A", Some(42), true).await;
        mirror.sync("Song B", None, false).await;

        let record = mirror.read().await.unwrap();
        assert_eq!(record.last_track_name.as_deref(), Some("Song B"));
        assert_eq!(record.last_track_id, None);
    }

    #[tokio::test]
    async fn tolerates_foreign_values() {
        let (store, mirror) = mirror();
        store
            .write_batch(vec![
                ("lastSongId".into(), Some("not-a-number".into())),
                ("isPlaying".into(), Some("yes".into())),
            ])
            .await
            .unwrap();

        let record = mirror.read().await.unwrap();
        assert_eq!(record.last_track_id, None);
        assert!(!record.is_playing);
    }
}
