//! Test utilities and fixtures for tunesync tests.
//!
//! This module provides common test helpers, a fake metadata extractor and
//! database utilities to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use tunesync::test_utils::{temp_db, FakeExtractor, tags};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let extractor = FakeExtractor::default();
//!     extractor.set("/music/a.mp3", tags("Song", "Artist", "Album", "Artist"));
//!     // ... test logic
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::metadata::{EmbeddedPicture, Extracted, MetadataExtractor, TrackTags};
use crate::model::TrackRecord;

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// # Returns
///
/// A tuple of (connection pool, temp directory handle).
/// Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = crate::db::db_url(Some(&db_path));

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Builds tags with every field set.
pub fn tags(title: &str, artist: &str, album: &str, album_artist: &str) -> TrackTags {
    TrackTags {
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        album: Some(album.to_string()),
        album_artist: Some(album_artist.to_string()),
    }
}

/// Builds a record without a picture and a fixed `date_added`.
pub fn record(path: impl Into<PathBuf>, tags: TrackTags) -> TrackRecord {
    TrackRecord {
        path: path.into(),
        tags,
        date_added: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        picture: None,
    }
}

#[derive(Default)]
struct FakeState {
    files: Mutex<HashMap<PathBuf, Extracted>>,
    failures: Mutex<HashMap<PathBuf, String>>,
    lyrics: Mutex<HashMap<PathBuf, String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory [`MetadataExtractor`].
///
/// Paths without configured tags extract as empty tags. Clones share state,
/// so a test can keep a handle after giving one to the code under test.
#[derive(Clone, Default)]
pub struct FakeExtractor {
    state: Arc<FakeState>,
}

impl FakeExtractor {
    /// Sleep this long inside every extraction, to make overlap observable.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock() = Some(delay);
        self
    }

    pub fn set(&self, path: impl AsRef<Path>, tags: TrackTags) {
        let mut files = self.state.files.lock();
        files.entry(path.as_ref().to_path_buf()).or_default().tags = tags;
    }

    pub fn set_pictures(&self, path: impl AsRef<Path>, pictures: Vec<EmbeddedPicture>) {
        let mut files = self.state.files.lock();
        files.entry(path.as_ref().to_path_buf()).or_default().pictures = pictures;
    }

    pub fn set_lyrics(&self, path: impl AsRef<Path>, text: &str) {
        self.state
            .lyrics
            .lock()
            .insert(path.as_ref().to_path_buf(), text.to_string());
    }

    /// Make extraction of `path` fail with `message`.
    pub fn fail(&self, path: impl AsRef<Path>, message: &str) {
        self.state
            .failures
            .lock()
            .insert(path.as_ref().to_path_buf(), message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of extractions observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl MetadataExtractor for FakeExtractor {
    fn extract(&self, path: &Path) -> Result<Extracted> {
        let state = &self.state;
        state.calls.fetch_add(1, Ordering::SeqCst);
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *state.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let failure = state.failures.lock().get(path).cloned();
        let result = match failure {
            Some(message) => Err(Error::extraction(path, message)),
            None => Ok(state.files.lock().get(path).cloned().unwrap_or_default()),
        };

        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn lyrics(&self, path: &Path) -> Result<Option<String>> {
        if let Some(message) = self.state.failures.lock().get(path).cloned() {
            return Err(Error::extraction(path, message));
        }
        Ok(self.state.lyrics.lock().get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        // Should be able to query
        let tracks = crate::db::get_all_tracks(&pool).await.unwrap();
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_fake_extractor_shares_state_between_clones() {
        let extractor = FakeExtractor::default();
        let handle = extractor.clone();
        handle.set("/m/a.mp3", tags("A", "B", "C", "D"));
        handle.fail("/m/bad.mp3", "boom");

        let extracted = extractor.extract(Path::new("/m/a.mp3")).unwrap();
        assert_eq!(extracted.tags.title.as_deref(), Some("A"));
        assert_eq!(
            extractor.extract(Path::new("/m/other.mp3")).unwrap().tags,
            TrackTags::default()
        );
        assert!(extractor.extract(Path::new("/m/bad.mp3")).is_err());
        assert_eq!(handle.calls(), 3);
        assert_eq!(handle.max_in_flight(), 1);
    }
}
