//! Bringing the catalog in line with extracted records.
//!
//! The [`Reconciler`] is the only writer of albums, artists and tracks. Full
//! scans feed it batches and a missing-path diff; the live watcher feeds it
//! single files.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use futures::future::try_join_all;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use super::identity::{self, AlbumIdentity};
use super::ingest;
use crate::cover::CoverStore;
use crate::db;
use crate::error::Result;
use crate::metadata::MetadataExtractor;
use crate::model::{ArtistKey, Track, TrackRecord};

/// Catalog writer shared by scans and the watcher.
///
/// Persists hold `prune_gate` shared and deletions hold it exclusively, so
/// an album or artist is never pruned between its upsert and the upsert of
/// the track that links it.
pub struct Reconciler {
    pool: SqlitePool,
    covers: CoverStore,
    extractor: Arc<dyn MetadataExtractor>,
    prune_gate: RwLock<()>,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, covers: CoverStore, extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self {
            pool,
            covers,
            extractor,
            prune_gate: RwLock::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn covers(&self) -> &CoverStore {
        &self.covers
    }

    pub fn extractor(&self) -> Arc<dyn MetadataExtractor> {
        Arc::clone(&self.extractor)
    }

    /// Persist a batch of records.
    ///
    /// Records are grouped by album identity and the groups are written
    /// concurrently. Within a group the album goes first, then its artists,
    /// then the tracks in input order. This is not one transaction: a
    /// failing group can leave other groups of the same batch written.
    pub async fn persist_batch(&self, records: &[TrackRecord]) -> Result<()> {
        let groups = group_by_album(records);
        let album_count = groups.len();
        let _shared = self.prune_gate.read().await;

        try_join_all(
            groups
                .into_iter()
                .map(|(album, tracks)| self.persist_album(album, tracks)),
        )
        .await?;

        tracing::debug!(
            target: "library::reconcile",
            tracks = records.len(),
            albums = album_count,
            "Persisted batch"
        );
        Ok(())
    }

    async fn persist_album(&self, album: AlbumIdentity, tracks: Vec<&TrackRecord>) -> Result<()> {
        let stored_cover = db::get_album(&self.pool, &album.id)
            .await?
            .and_then(|a| a.cover_path);

        let cover_path = match stored_cover {
            Some(path) => Some(path),
            None => match tracks.first() {
                Some(first) => self.materialize_cover(&album.id, first).await,
                None => None,
            },
        };

        db::upsert_album(&self.pool, &album.id, &album.title, cover_path.as_deref()).await?;

        let mut artist_ids: HashMap<String, String> = HashMap::new();
        for record in &tracks {
            for name in identity::artist_names(&record.tags) {
                if artist_ids.contains_key(&name) {
                    continue;
                }
                let key = ArtistKey {
                    name: name.clone(),
                    album_id: album.id.clone(),
                };
                let artist = db::upsert_artist(&self.pool, &identity::artist_id(&key), &key).await?;
                artist_ids.insert(name, artist.id);
            }
        }

        for record in tracks {
            let ids: Vec<String> = identity::artist_names(&record.tags)
                .iter()
                .filter_map(|name| artist_ids.get(name).cloned())
                .collect();

            db::upsert_track(
                &self.pool,
                &record.path_str(),
                &identity::track_title(&record.tags, &record.path),
                record.date_added,
                &album.id,
                &ids,
            )
            .await?;
        }

        Ok(())
    }

    /// Cover for a new album from its first track. Failures only cost the cover.
    async fn materialize_cover(&self, album_id: &str, record: &TrackRecord) -> Option<String> {
        match self.covers.materialize(record.picture.as_slice(), album_id).await {
            Ok(path) => path.map(|p| p.to_string_lossy().into_owned()),
            Err(e) => {
                tracing::warn!(
                    target: "library::reconcile",
                    album_id,
                    path = %record.path.display(),
                    error = %e,
                    "Failed to write cover"
                );
                None
            }
        }
    }

    /// Remove catalogued tracks whose path is not in `on_disk`.
    ///
    /// Returns the number of tracks removed.
    pub async fn delete_missing(&self, existing: &[String], on_disk: &HashSet<String>) -> Result<usize> {
        let mut missing = Vec::new();
        for path in existing.iter().filter(|p| !on_disk.contains(*p)) {
            if let Some(track) = db::get_track_by_path(&self.pool, path).await? {
                missing.push(track);
            }
        }

        if missing.is_empty() {
            return Ok(0);
        }
        self.remove_tracks(missing).await
    }

    /// Extract and persist one file, then clean up whatever it left behind.
    pub async fn update_single(&self, path: &Path) -> Result<TrackRecord> {
        let path_str = path.to_string_lossy();
        let previous = db::get_track_by_path(&self.pool, &path_str).await?;

        let record = ingest::load_record(self.extractor(), path.to_path_buf()).await?;
        self.persist_batch(std::slice::from_ref(&record)).await?;

        // A retag can move the track off its old album or drop artists.
        // New files leave nothing behind.
        if let Some(previous) = previous {
            let _exclusive = self.prune_gate.write().await;
            self.cleanup_albums(HashSet::from([previous.album_id])).await?;
        }

        tracing::info!(target: "library::reconcile", path = %path.display(), "Track updated");
        Ok(record)
    }

    /// Remove the track at `path`, or every track below it if it was a directory.
    pub async fn remove_single(&self, path: &Path) -> Result<usize> {
        let tracks = db::get_tracks_under(&self.pool, &path.to_string_lossy()).await?;
        if tracks.is_empty() {
            tracing::debug!(target: "library::reconcile", path = %path.display(), "Nothing catalogued at removed path");
            return Ok(0);
        }

        let removed = self.remove_tracks(tracks).await?;
        tracing::info!(target: "library::reconcile", path = %path.display(), removed, "Tracks removed");
        Ok(removed)
    }

    async fn remove_tracks(&self, tracks: Vec<Track>) -> Result<usize> {
        let ids: Vec<i64> = tracks.iter().map(|t| t.id).collect();
        let albums: HashSet<String> = tracks.into_iter().map(|t| t.album_id).collect();

        let _exclusive = self.prune_gate.write().await;
        let removed = db::delete_tracks(&self.pool, &ids).await?;
        self.cleanup_albums(albums).await?;
        Ok(removed as usize)
    }

    /// Drop covers of the given albums that have no tracks left, then prune
    /// their artists and the albums themselves if nothing links them.
    ///
    /// Callers hold `prune_gate` exclusively.
    async fn cleanup_albums(&self, albums: HashSet<String>) -> Result<()> {
        let albums: Vec<String> = albums.into_iter().collect();
        for album_id in &albums {
            if db::count_album_tracks(&self.pool, album_id).await? > 0 {
                continue;
            }
            let cover = db::get_album(&self.pool, album_id)
                .await?
                .and_then(|a| a.cover_path);
            if let Some(cover) = cover {
                self.covers.remove(Path::new(&cover)).await?;
            }
        }

        let (artists, albums) = db::prune_albums(&self.pool, &albums).await?;
        if artists > 0 || albums > 0 {
            tracing::debug!(target: "library::reconcile", artists, albums, "Pruned orphans");
        }
        Ok(())
    }
}

/// Group records by album, keeping first-appearance order.
fn group_by_album(records: &[TrackRecord]) -> Vec<(AlbumIdentity, Vec<&TrackRecord>)> {
    let mut groups: Vec<(AlbumIdentity, Vec<&TrackRecord>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let album = identity::album_identity(&record.tags, &record.path);
        match index.get(&album.id) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(album.id.clone(), groups.len());
                groups.push((album, vec![record]));
            }
        }
    }
    groups
}
