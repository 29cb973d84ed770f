//! The catalog service.
//!
//! [`Library`] ties the pieces together: fingerprint-gated full scans, the
//! live watcher, progress fan-out and the catalog queries a front end needs.
//!
//! - [`identity`]: deterministic album/artist ids
//! - [`ingest`]: full-scan pipeline
//! - [`reconcile`]: the catalog writer
//! - [`progress`]: progress broadcast

pub mod identity;
pub mod ingest;
pub mod progress;
pub mod reconcile;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::cover::{self, CoverStore};
use crate::db::{self, TrackWithMetadata};
use crate::error::{Error, Result};
use crate::metadata::{LoftyExtractor, MetadataExtractor};
use crate::model::{Lyrics, PlayEvent, Playlist, ProgressState, Track};
use crate::scanner::{self, ChangeHandler, Fingerprint, LiveWatcher, fingerprint};

pub use ingest::ScanEvent;
pub use progress::ProgressBroadcaster;
pub use reconcile::Reconciler;

/// Outcome of [`Library::scan`] or [`Library::force_scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// False when the fingerprint was unchanged and nothing ran
    pub rescanned: bool,
    /// Files ingested
    pub tracks: usize,
    /// Files skipped as unreadable
    pub skipped: usize,
    /// Fingerprint stored after the scan, if any
    pub fingerprint: Option<String>,
}

/// A music library bound to one root directory and one catalog.
pub struct Library {
    config: Config,
    reconciler: Arc<Reconciler>,
    progress: ProgressBroadcaster,
    watcher: Mutex<Option<LiveWatcher>>,
}

impl Library {
    /// Open the catalog and cover directory named by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let db_path = config.library.database_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let pool = db::init_db(&db::db_url(Some(&db_path))).await?;
        let covers = CoverStore::new(config.library.cover_dir())?;

        tracing::info!(
            target: "library",
            music = %config.library.music_root().display(),
            database = %db_path.display(),
            "Library opened"
        );
        Ok(Self::with_parts(config, pool, covers, Arc::new(LoftyExtractor)))
    }

    /// Assemble a library from already opened parts.
    pub fn with_parts(
        config: Config,
        pool: SqlitePool,
        covers: CoverStore,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Self {
        Self {
            config,
            reconciler: Arc::new(Reconciler::new(pool, covers, extractor)),
            progress: ProgressBroadcaster::default(),
            watcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> PathBuf {
        self.config.library.music_root()
    }

    pub fn pool(&self) -> &SqlitePool {
        self.reconciler.pool()
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Whether the music root changed since the last completed scan.
    pub async fn should_rescan(&self) -> Result<bool> {
        Ok(fingerprint::should_rescan(self.pool(), &self.root()).await?.needed)
    }

    /// Rescan if the directory fingerprint changed.
    ///
    /// Progress is published for every processed file. The new fingerprint
    /// is stored only when every file was ingested.
    pub async fn scan(&self) -> Result<ScanSummary> {
        let decision = fingerprint::should_rescan(self.pool(), &self.root()).await?;
        if !decision.needed {
            tracing::info!(target: "library", "Music directory unchanged, skipping scan");
            return Ok(ScanSummary::default());
        }
        self.ingest(decision.fingerprint).await
    }

    /// Rescan regardless of the stored fingerprint.
    pub async fn force_scan(&self) -> Result<ScanSummary> {
        let fingerprint = fingerprint::compute(self.root()).await?;
        self.ingest(fingerprint).await
    }

    /// Raw ingestion stream of one full scan.
    ///
    /// This always rescans: it neither checks nor stores the directory
    /// fingerprint and publishes nothing to progress subscribers. It is for
    /// callers that want per-file events or their own stop condition;
    /// [`Library::scan`] and [`Library::force_scan`] are built on it and add
    /// the gating and bookkeeping.
    pub fn scan_stream(&self) -> impl Stream<Item = Result<ScanEvent>> + Send + 'static {
        ingest::scan(
            Arc::clone(&self.reconciler),
            self.root(),
            self.config.scan.clone(),
        )
    }

    async fn ingest(&self, fingerprint: Fingerprint) -> Result<ScanSummary> {
        let mut summary = ScanSummary {
            rescanned: true,
            ..ScanSummary::default()
        };

        let mut events = Box::pin(self.scan_stream());
        while let Some(event) = events.next().await {
            let event = event?;
            self.progress.publish(event.progress());
            match event {
                ScanEvent::Track { .. } => summary.tracks += 1,
                ScanEvent::Skipped { .. } => summary.skipped += 1,
            }
        }

        if summary.skipped == 0 {
            fingerprint::store(self.pool(), &fingerprint).await?;
            summary.fingerprint = Some(fingerprint.to_string());
        } else {
            tracing::warn!(
                target: "library",
                skipped = summary.skipped,
                "Scan skipped files, fingerprint not stored"
            );
        }
        Ok(summary)
    }

    /// Progress events from now on.
    pub fn subscribe_progress(&self) -> impl Stream<Item = ProgressState> + Send + 'static {
        self.progress.subscribe()
    }

    // ------------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------------

    /// Start the live watcher. A no-op while one is already running.
    pub fn start_watching(&self) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.as_ref().is_some_and(LiveWatcher::is_running) {
            return Ok(());
        }

        let sink = CatalogSink {
            reconciler: Arc::clone(&self.reconciler),
            progress: self.progress.clone(),
        };
        let watcher = LiveWatcher::start(&self.root(), self.config.watch.settings(), Arc::new(sink))?;
        *slot = Some(watcher);
        Ok(())
    }

    pub fn stop_watching(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .as_ref()
            .is_some_and(LiveWatcher::is_running)
    }

    // ------------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------------

    pub async fn read_cover(&self, path: &Path) -> Result<Vec<u8>> {
        self.reconciler.covers().read(path).await
    }

    pub async fn read_audio(&self, path: &Path) -> Result<Vec<u8>> {
        cover::read_file(path).await
    }

    /// Cover bytes of the album a track belongs to.
    pub async fn cover_for_track(&self, track_id: i64) -> Result<Vec<u8>> {
        let track = self.track(track_id).await?;
        let cover = db::get_album(self.pool(), &track.album_id)
            .await?
            .and_then(|a| a.cover_path)
            .ok_or_else(|| Error::not_found(format!("cover of track {track_id}")))?;
        self.read_cover(Path::new(&cover)).await
    }

    pub async fn audio_for_track(&self, track_id: i64) -> Result<Vec<u8>> {
        let track = self.track(track_id).await?;
        self.read_audio(&track.path_buf()).await
    }

    /// Lyrics of a track: a sibling `<stem>.lrc` file if present, else the
    /// embedded lyrics tag. A track without either gets empty text.
    pub async fn lyrics_for_track(&self, track_id: i64) -> Result<Lyrics> {
        let path = self.track(track_id).await?.path_buf();

        match tokio::fs::read_to_string(path.with_extension("lrc")).await {
            Ok(text) => return Ok(Lyrics { text, is_sync: true }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let extractor = self.reconciler.extractor();
        let embedded = tokio::task::spawn_blocking(move || extractor.lyrics(&path)).await??;
        Ok(Lyrics {
            text: embedded.unwrap_or_default(),
            is_sync: false,
        })
    }

    async fn track(&self, track_id: i64) -> Result<Track> {
        db::get_track_by_id(self.pool(), track_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("track {track_id}")))
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    pub async fn tracks(&self) -> Result<Vec<TrackWithMetadata>> {
        Ok(db::get_all_tracks_with_metadata(self.pool()).await?)
    }

    pub async fn set_favorite(&self, track_id: i64, value: bool) -> Result<()> {
        if !db::set_favorite(self.pool(), track_id, value).await? {
            return Err(Error::not_found(format!("track {track_id}")));
        }
        Ok(())
    }

    pub async fn record_play(&self, track_id: i64) -> Result<PlayEvent> {
        self.track(track_id).await?;
        let id = db::record_play(self.pool(), track_id, Utc::now()).await?;
        let events = db::get_play_events(self.pool(), track_id).await?;
        events
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::not_found(format!("play event {id}")))
    }

    pub async fn play_events(&self, track_id: i64) -> Result<Vec<PlayEvent>> {
        Ok(db::get_play_events(self.pool(), track_id).await?)
    }

    pub async fn create_playlist(&self, name: &str) -> Result<Playlist> {
        Ok(db::get_or_create_playlist(self.pool(), name).await?)
    }

    pub async fn add_to_playlist(&self, name: &str, track_id: i64) -> Result<()> {
        self.track(track_id).await?;
        let playlist = db::get_or_create_playlist(self.pool(), name).await?;
        db::add_to_playlist(self.pool(), playlist.id, track_id).await?;
        Ok(())
    }

    pub async fn remove_from_playlist(&self, name: &str, track_id: i64) -> Result<()> {
        let playlist = self.playlist(name).await?;
        db::remove_from_playlist(self.pool(), playlist.id, track_id).await?;
        Ok(())
    }

    pub async fn playlist_tracks(&self, name: &str) -> Result<Vec<Track>> {
        let playlist = self.playlist(name).await?;
        Ok(db::get_playlist_tracks(self.pool(), playlist.id).await?)
    }

    async fn playlist(&self, name: &str) -> Result<Playlist> {
        db::get_playlist_by_name(self.pool(), name)
            .await?
            .ok_or_else(|| Error::not_found(format!("playlist {name}")))
    }
}

/// Routes settled watcher changes into the catalog.
struct CatalogSink {
    reconciler: Arc<Reconciler>,
    progress: ProgressBroadcaster,
}

#[async_trait]
impl ChangeHandler for CatalogSink {
    async fn update(&self, path: &Path) -> Result<()> {
        if !scanner::is_audio_file(path) {
            return Ok(());
        }
        self.reconciler.update_single(path).await?;
        self.progress.publish(ProgressState::single());
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.reconciler.remove_single(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorPolicy;
    use crate::metadata::TrackTags;
    use crate::test_utils::{FakeExtractor, tags, temp_db};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        library: Library,
        extractor: FakeExtractor,
        music: TempDir,
        _db: TempDir,
        _covers: TempDir,
    }

    async fn fixture() -> Fixture {
        let (pool, db) = temp_db().await;
        let covers = tempfile::tempdir().unwrap();
        let music = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::default();

        let mut config = Config::default();
        config.library.music_path = music.path().to_path_buf();
        config.watch.debounce_ms = 50;
        config.watch.poll_interval_ms = 20;

        let library = Library::with_parts(
            config,
            pool,
            CoverStore::new(covers.path()).unwrap(),
            Arc::new(extractor.clone()),
        );
        Fixture {
            library,
            extractor,
            music,
            _db: db,
            _covers: covers,
        }
    }

    impl Fixture {
        fn add(&self, name: &str, tags: TrackTags) -> PathBuf {
            let path = self.music.path().join(name);
            fs::write(&path, b"audio").unwrap();
            self.extractor.set(&path, tags);
            path
        }
    }

    #[tokio::test]
    async fn test_single_file_scan() {
        let fx = fixture().await;
        fx.add(
            "song.mp3",
            TrackTags {
                title: Some("Song".into()),
                album: Some("Album".into()),
                album_artist: Some("Artist".into()),
                artist: None,
            },
        );

        let mut progress = Box::pin(fx.library.subscribe_progress());
        let summary = fx.library.scan().await.unwrap();

        assert!(summary.rescanned);
        assert_eq!(summary.tracks, 1);
        assert!(summary.fingerprint.is_some());
        assert_eq!(
            progress.next().await,
            Some(ProgressState {
                current: 1,
                total: 1,
                done: true
            })
        );

        let albums = db::get_all_albums(fx.library.pool()).await.unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, "Album");
        assert_eq!(albums[0].id, identity::album_id("Album", "Artist"));

        let listed = fx.library.tracks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Song");
        assert_eq!(listed[0].artist_names, "Artist");
    }

    #[tokio::test]
    async fn test_unchanged_directory_is_not_rescanned() {
        let fx = fixture().await;
        fx.add("a.mp3", tags("A", "X", "Album", "X"));

        assert!(fx.library.scan().await.unwrap().rescanned);
        let calls = fx.extractor.calls();

        let again = fx.library.scan().await.unwrap();
        assert!(!again.rescanned);
        assert_eq!(fx.extractor.calls(), calls);
        assert!(!fx.library.should_rescan().await.unwrap());

        let forced = fx.library.force_scan().await.unwrap();
        assert!(forced.rescanned);
        assert_eq!(db::get_all_tracks(fx.library.pool()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rescan_reconciles_deletions() {
        let fx = fixture().await;
        fx.add("a.mp3", tags("A", "Main", "Album", "Main"));
        let b = fx.add("b.mp3", tags("B", "Main, Guest", "Album", "Main"));
        fx.add("c.mp3", tags("C", "Main", "Album", "Main"));
        fx.library.scan().await.unwrap();

        fs::remove_file(&b).unwrap();
        let summary = fx.library.scan().await.unwrap();

        assert_eq!(summary.tracks, 2);
        let artists: Vec<String> = db::get_all_artists(fx.library.pool())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(artists, vec!["Main"]);
    }

    #[tokio::test]
    async fn test_failed_scan_does_not_store_fingerprint() {
        let fx = fixture().await;
        fx.add("a.mp3", tags("A", "X", "Album", "X"));
        let bad = fx.add("b.mp3", tags("B", "X", "Album", "X"));
        fx.extractor.fail(&bad, "unreadable");

        assert!(fx.library.scan().await.is_err());
        assert!(fx.library.should_rescan().await.unwrap());
    }

    #[tokio::test]
    async fn test_skipped_files_keep_rescan_pending() {
        let (pool, _db) = temp_db().await;
        let covers = tempfile::tempdir().unwrap();
        let music = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::default();
        let bad = music.path().join("bad.mp3");
        fs::write(&bad, b"x").unwrap();
        fs::write(music.path().join("good.mp3"), b"x").unwrap();
        extractor.fail(&bad, "unreadable");

        let mut config = Config::default();
        config.library.music_path = music.path().to_path_buf();
        config.scan.on_error = ErrorPolicy::Skip;
        let library = Library::with_parts(
            config,
            pool,
            CoverStore::new(covers.path()).unwrap(),
            Arc::new(extractor),
        );

        let summary = library.scan().await.unwrap();
        assert_eq!((summary.tracks, summary.skipped), (1, 1));
        assert!(summary.fingerprint.is_none());
        assert!(library.should_rescan().await.unwrap());
    }

    #[tokio::test]
    async fn test_favorites_plays_and_playlists() {
        let fx = fixture().await;
        fx.add("a.mp3", tags("A", "X", "Album", "X"));
        fx.library.scan().await.unwrap();
        let id = fx.library.tracks().await.unwrap()[0].id;

        fx.library.set_favorite(id, true).await.unwrap();
        assert!(fx.library.tracks().await.unwrap()[0].is_favorite);
        assert!(matches!(
            fx.library.set_favorite(id + 100, true).await,
            Err(Error::NotFound(_))
        ));

        let play = fx.library.record_play(id).await.unwrap();
        assert_eq!(play.track_id, id);
        assert_eq!(fx.library.play_events(id).await.unwrap().len(), 1);

        fx.library.add_to_playlist("Road trip", id).await.unwrap();
        fx.library.add_to_playlist("Road trip", id).await.unwrap();
        let members = fx.library.playlist_tracks("Road trip").await.unwrap();
        assert_eq!(members.len(), 1);

        fx.library.remove_from_playlist("Road trip", id).await.unwrap();
        assert!(fx.library.playlist_tracks("Road trip").await.unwrap().is_empty());
        assert!(fx.library.playlist_tracks("Missing").await.is_err());
    }

    #[tokio::test]
    async fn test_audio_and_cover_by_track_id() {
        let fx = fixture().await;
        let path = fx.add("a.mp3", tags("A", "X", "Album", "X"));
        fx.extractor.set_pictures(
            &path,
            vec![crate::metadata::EmbeddedPicture {
                data: b"cover".to_vec(),
                mime_type: Some("image/jpeg".into()),
                front_cover: true,
            }],
        );
        fx.library.scan().await.unwrap();
        let id = fx.library.tracks().await.unwrap()[0].id;

        assert_eq!(fx.library.audio_for_track(id).await.unwrap(), b"audio");
        assert_eq!(fx.library.cover_for_track(id).await.unwrap(), b"cover");
        assert!(matches!(
            fx.library.audio_for_track(id + 1).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            fx.library.read_audio(&fx.music.path().join("missing.mp3")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lyrics_prefer_lrc_file() {
        let fx = fixture().await;
        let path = fx.add("a.mp3", tags("A", "X", "Album", "X"));
        fx.extractor.set_lyrics(&path, "embedded words");
        fs::write(fx.music.path().join("a.lrc"), "[00:01.00]synced words").unwrap();
        fx.library.scan().await.unwrap();
        let id = fx.library.tracks().await.unwrap()[0].id;

        let lyrics = fx.library.lyrics_for_track(id).await.unwrap();
        assert_eq!(
            lyrics,
            Lyrics {
                text: "[00:01.00]synced words".into(),
                is_sync: true
            }
        );
    }

    #[tokio::test]
    async fn test_lyrics_fall_back_to_embedded_tag() {
        let fx = fixture().await;
        let a = fx.add("a.mp3", tags("A", "X", "Album", "X"));
        fx.add("b.mp3", tags("B", "X", "Album", "X"));
        fx.extractor.set_lyrics(&a, "embedded words");
        fx.library.scan().await.unwrap();

        let tracks = fx.library.tracks().await.unwrap();
        let id_of = |name: &str| {
            tracks
                .iter()
                .find(|t| t.path.ends_with(name))
                .map(|t| t.id)
                .unwrap()
        };

        let lyrics = fx.library.lyrics_for_track(id_of("a.mp3")).await.unwrap();
        assert_eq!(lyrics.text, "embedded words");
        assert!(!lyrics.is_sync);

        let none = fx.library.lyrics_for_track(id_of("b.mp3")).await.unwrap();
        assert_eq!(none, Lyrics::default());

        let missing = id_of("a.mp3").max(id_of("b.mp3")) + 1;
        assert!(matches!(
            fx.library.lyrics_for_track(missing).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_stream_skips_fingerprint_bookkeeping() {
        let fx = fixture().await;
        fx.add("a.mp3", tags("A", "X", "Album", "X"));

        let events: Vec<Result<ScanEvent>> = fx.library.scan_stream().collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
        assert_eq!(db::get_all_tracks(fx.library.pool()).await.unwrap().len(), 1);
        assert!(fx.library.should_rescan().await.unwrap());
    }

    #[tokio::test]
    async fn test_sink_updates_and_removes() {
        let fx = fixture().await;
        let sink = CatalogSink {
            reconciler: Arc::clone(&fx.library.reconciler),
            progress: fx.library.progress.clone(),
        };
        let mut progress = Box::pin(fx.library.subscribe_progress());

        let path = fx.add("live.flac", tags("Live", "X", "Album", "X"));
        sink.update(&path).await.unwrap();
        assert_eq!(progress.next().await, Some(ProgressState::single()));
        assert_eq!(db::get_all_tracks(fx.library.pool()).await.unwrap().len(), 1);

        sink.remove(&path).await.unwrap();
        assert!(db::get_all_tracks(fx.library.pool()).await.unwrap().is_empty());
        assert!(db::get_all_albums(fx.library.pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watching_picks_up_new_file() {
        let fx = fixture().await;
        fx.library.start_watching().unwrap();
        assert!(fx.library.is_watching());
        tokio::time::sleep(Duration::from_millis(100)).await;

        fx.add("new.mp3", tags("New", "X", "Album", "X"));

        let mut found = false;
        for _ in 0..100 {
            if !db::get_all_tracks(fx.library.pool()).await.unwrap().is_empty() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(found, "watcher never ingested the new file");

        fx.library.stop_watching();
        assert!(!fx.library.is_watching());
    }
}
