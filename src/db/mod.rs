//! Database module for catalog persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Provides async operations for:
//! - Album, artist and track upserts keyed by their unique fields
//! - Deletion of tracks and pruning of rows left without tracks
//! - The key/value `state` table (directory fingerprint)
//! - Favorites, playlists and play events
//!
//! # Example
//!
//! ```ignore
//! use tunesync::db::{init_db, get_all_tracks_with_metadata};
//!
//! let pool = init_db("sqlite:tunesync.db").await?;
//! let tracks = get_all_tracks_with_metadata(&pool).await?;
//! ```

use std::path::MAIN_SEPARATOR;

use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::Result;
use crate::model::{Album, Artist, ArtistKey, PlayEvent, Playlist, Track};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "tunesync.db";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Albums & Artists
// ============================================================================

/// Find an album by its identity.
pub async fn get_album(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<Album>> {
    sqlx::query_as::<_, Album>("SELECT id, title, cover_path FROM albums WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Insert an album or refresh an existing one.
///
/// The title is only set on creation. `cover_path` is only written when the
/// stored value is NULL, so a cover, once recorded, is never replaced.
pub async fn upsert_album(
    pool: &SqlitePool,
    id: &str,
    title: &str,
    cover_path: Option<&str>,
) -> sqlx::Result<Album> {
    sqlx::query_as::<_, Album>(
        r#"
        INSERT INTO albums (id, title, cover_path)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            cover_path = COALESCE(albums.cover_path, excluded.cover_path)
        RETURNING id, title, cover_path
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(cover_path)
    .fetch_one(pool)
    .await
}

/// Insert an artist for its `(name, album_id)` key, or return the existing row.
pub async fn upsert_artist(pool: &SqlitePool, id: &str, key: &ArtistKey) -> sqlx::Result<Artist> {
    sqlx::query_as::<_, Artist>(
        r#"
        INSERT INTO artists (id, name, album_id)
        VALUES (?, ?, ?)
        ON CONFLICT(name, album_id) DO UPDATE SET name = excluded.name
        RETURNING id, name, album_id
        "#,
    )
    .bind(id)
    .bind(&key.name)
    .bind(&key.album_id)
    .fetch_one(pool)
    .await
}

pub async fn get_all_albums(pool: &SqlitePool) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>("SELECT id, title, cover_path FROM albums ORDER BY title")
        .fetch_all(pool)
        .await
}

pub async fn get_all_artists(pool: &SqlitePool) -> sqlx::Result<Vec<Artist>> {
    sqlx::query_as::<_, Artist>("SELECT id, name, album_id FROM artists ORDER BY name, album_id")
        .fetch_all(pool)
        .await
}

/// Artists linked to a track.
pub async fn get_track_artists(pool: &SqlitePool, track_id: i64) -> sqlx::Result<Vec<Artist>> {
    sqlx::query_as::<_, Artist>(
        r#"
        SELECT a.id, a.name, a.album_id
        FROM artists a
        JOIN track_artists ta ON ta.artist_id = a.id
        WHERE ta.track_id = ?
        ORDER BY a.name
        "#,
    )
    .bind(track_id)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Tracks
// ============================================================================

/// Insert or update a track by path, replacing its artist links.
///
/// Title and album are refreshed on conflict; `date_added` and the favorite
/// flag belong to the first insert and are kept. Runs in one transaction so
/// a track is never visible without its links.
///
/// # Returns
///
/// The database ID of the inserted or updated track.
pub async fn upsert_track(
    pool: &SqlitePool,
    path: &str,
    title: &str,
    date_added: DateTime<Utc>,
    album_id: &str,
    artist_ids: &[String],
) -> sqlx::Result<i64> {
    let mut tx = pool.begin().await?;

    let (track_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO tracks (path, title, date_added, album_id)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            title = excluded.title,
            album_id = excluded.album_id
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(title)
    .bind(date_added.to_rfc3339())
    .bind(album_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM track_artists WHERE track_id = ?")
        .bind(track_id)
        .execute(&mut *tx)
        .await?;

    for artist_id in artist_ids {
        sqlx::query("INSERT OR IGNORE INTO track_artists (track_id, artist_id) VALUES (?, ?)")
            .bind(track_id)
            .bind(artist_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(track_id)
}

const TRACK_COLUMNS: &str = "id, path, title, date_added, is_favorite, album_id";

/// Get all tracks from the database.
pub async fn get_all_tracks(pool: &SqlitePool) -> sqlx::Result<Vec<Track>> {
    sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY path"))
        .fetch_all(pool)
        .await
}

/// Paths of every catalogued track.
pub async fn get_all_track_paths(pool: &SqlitePool) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar("SELECT path FROM tracks")
        .fetch_all(pool)
        .await
}

pub async fn get_track_by_id(pool: &SqlitePool, track_id: i64) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?"))
        .bind(track_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_track_by_path(pool: &SqlitePool, path: &str) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE path = ?"))
        .bind(path)
        .fetch_optional(pool)
        .await
}

/// Tracks at `path` or, when `path` is a directory, anywhere below it.
pub async fn get_tracks_under(pool: &SqlitePool, path: &str) -> sqlx::Result<Vec<Track>> {
    let prefix = format!("{}{}", path.trim_end_matches(MAIN_SEPARATOR), MAIN_SEPARATOR);
    sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE path = ? OR substr(path, 1, length(?)) = ?"
    ))
    .bind(path)
    .bind(&prefix)
    .bind(&prefix)
    .fetch_all(pool)
    .await
}

/// Delete tracks by ID in a single transaction.
/// Returns the number of deleted tracks
pub async fn delete_tracks(pool: &SqlitePool, track_ids: &[i64]) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;
    let mut deleted = 0;

    for track_id in track_ids {
        let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
            .bind(track_id)
            .execute(&mut *tx)
            .await?;
        deleted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(deleted)
}

/// Number of tracks on an album.
pub async fn count_album_tracks(pool: &SqlitePool, album_id: &str) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM tracks WHERE album_id = ?")
        .bind(album_id)
        .fetch_one(pool)
        .await
}

/// Delete the artists of `album_ids` that lost all their tracks, then
/// those albums if they have no tracks left.
///
/// Only the given albums are touched, so rows of an album that is still
/// being written elsewhere are never collected. Returns
/// `(artists_removed, albums_removed)`.
pub async fn prune_albums(pool: &SqlitePool, album_ids: &[String]) -> sqlx::Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    let (mut artists, mut albums) = (0, 0);

    for album_id in album_ids {
        artists += sqlx::query(
            r#"
            DELETE FROM artists
            WHERE album_id = ?
              AND id NOT IN (SELECT DISTINCT artist_id FROM track_artists)
            "#,
        )
        .bind(album_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        albums += sqlx::query(
            "DELETE FROM albums WHERE id = ? AND NOT EXISTS (SELECT 1 FROM tracks WHERE album_id = ?)",
        )
        .bind(album_id)
        .bind(album_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    Ok((artists, albums))
}

/// Track with joined album title and artist names.
///
/// Used for listing where human-readable names are needed rather than
/// foreign keys.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrackWithMetadata {
    /// Database ID
    pub id: i64,
    /// Track title
    pub title: String,
    /// File path
    pub path: String,
    /// Favorite flag
    pub is_favorite: bool,
    /// Album title
    pub album_title: String,
    /// Comma-separated artist names (empty when none)
    pub artist_names: String,
}

/// Get all tracks with album title and artist names, ordered by path.
pub async fn get_all_tracks_with_metadata(
    pool: &SqlitePool,
) -> sqlx::Result<Vec<TrackWithMetadata>> {
    sqlx::query_as::<_, TrackWithMetadata>(
        r#"
        SELECT
            t.id, t.title, t.path, t.is_favorite,
            al.title AS album_title,
            COALESCE(GROUP_CONCAT(ar.name, ', '), '') AS artist_names
        FROM tracks t
        JOIN albums al ON t.album_id = al.id
        LEFT JOIN track_artists ta ON ta.track_id = t.id
        LEFT JOIN artists ar ON ar.id = ta.artist_id
        GROUP BY t.id
        ORDER BY t.path
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Set or clear the favorite flag. Returns false if the track doesn't exist.
pub async fn set_favorite(pool: &SqlitePool, track_id: i64, value: bool) -> sqlx::Result<bool> {
    let result = sqlx::query("UPDATE tracks SET is_favorite = ? WHERE id = ?")
        .bind(value)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Playlists & Play Events
// ============================================================================

/// Get or create a playlist by name.
pub async fn get_or_create_playlist(pool: &SqlitePool, name: &str) -> sqlx::Result<Playlist> {
    sqlx::query_as::<_, Playlist>(
        r#"
        INSERT INTO playlists (name) VALUES (?)
        ON CONFLICT(name) DO UPDATE SET name = excluded.name
        RETURNING id, name
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await
}

pub async fn get_playlist_by_name(pool: &SqlitePool, name: &str) -> sqlx::Result<Option<Playlist>> {
    sqlx::query_as::<_, Playlist>("SELECT id, name FROM playlists WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Add a track to a playlist. Adding twice is a no-op.
pub async fn add_to_playlist(pool: &SqlitePool, playlist_id: i64, track_id: i64) -> sqlx::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO playlist_tracks (playlist_id, track_id) VALUES (?, ?)")
        .bind(playlist_id)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn remove_from_playlist(
    pool: &SqlitePool,
    playlist_id: i64,
    track_id: i64,
) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = ? AND track_id = ?")
        .bind(playlist_id)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Tracks in a playlist, ordered by path.
pub async fn get_playlist_tracks(pool: &SqlitePool, playlist_id: i64) -> sqlx::Result<Vec<Track>> {
    sqlx::query_as::<_, Track>(
        r#"
        SELECT t.id, t.path, t.title, t.date_added, t.is_favorite, t.album_id
        FROM tracks t
        JOIN playlist_tracks pt ON pt.track_id = t.id
        WHERE pt.playlist_id = ?
        ORDER BY t.path
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await
}

/// Append a play event for a track.
pub async fn record_play(
    pool: &SqlitePool,
    track_id: i64,
    played_at: DateTime<Utc>,
) -> sqlx::Result<i64> {
    let result = sqlx::query("INSERT INTO play_events (track_id, played_at) VALUES (?, ?)")
        .bind(track_id)
        .bind(played_at.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_play_events(pool: &SqlitePool, track_id: i64) -> sqlx::Result<Vec<PlayEvent>> {
    sqlx::query_as::<_, PlayEvent>(
        "SELECT id, track_id, played_at FROM play_events WHERE track_id = ? ORDER BY id",
    )
    .bind(track_id)
    .fetch_all(pool)
    .await
}

// ============================================================================
// State
// ============================================================================

pub async fn get_state(pool: &SqlitePool, key: &str) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar("SELECT value FROM state WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
}

pub async fn set_state(pool: &SqlitePool, key: &str, value: &str) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO state (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_db;

    async fn seed_track(pool: &SqlitePool, path: &str, album_id: &str, artist: &str) -> i64 {
        upsert_album(pool, album_id, "Album", None).await.unwrap();
        let key = ArtistKey {
            name: artist.to_string(),
            album_id: album_id.to_string(),
        };
        let artist = upsert_artist(pool, &format!("{artist}-{album_id}"), &key)
            .await
            .unwrap();
        upsert_track(pool, path, "Song", Utc::now(), album_id, &[artist.id])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let pool = init_db(&db_url(Some(&db_path))).await.expect("Failed to init db");
        assert!(db_path.exists());

        let tracks = get_all_tracks(&pool).await.expect("Failed to query tracks");
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_album_cover_is_set_once() {
        let (pool, _dir) = temp_db().await;

        let album = upsert_album(&pool, "a1", "Album", None).await.unwrap();
        assert_eq!(album.cover_path, None);

        let album = upsert_album(&pool, "a1", "Other Title", Some("/covers/a1.png"))
            .await
            .unwrap();
        assert_eq!(album.title, "Album");
        assert_eq!(album.cover_path.as_deref(), Some("/covers/a1.png"));

        let album = upsert_album(&pool, "a1", "Album", Some("/covers/a1.jpg"))
            .await
            .unwrap();
        assert_eq!(album.cover_path.as_deref(), Some("/covers/a1.png"));
    }

    #[tokio::test]
    async fn test_artist_upsert_is_keyed_by_name_and_album() {
        let (pool, _dir) = temp_db().await;
        upsert_album(&pool, "a1", "One", None).await.unwrap();
        upsert_album(&pool, "a2", "Two", None).await.unwrap();

        let key1 = ArtistKey {
            name: "Queen".into(),
            album_id: "a1".into(),
        };
        let first = upsert_artist(&pool, "queen-a1", &key1).await.unwrap();
        let again = upsert_artist(&pool, "queen-a1", &key1).await.unwrap();
        assert_eq!(first, again);

        let key2 = ArtistKey {
            name: "Queen".into(),
            album_id: "a2".into(),
        };
        let other = upsert_artist(&pool, "queen-a2", &key2).await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(get_all_artists(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_track_upsert_keeps_identity_and_favorite() {
        let (pool, _dir) = temp_db().await;
        let id = seed_track(&pool, "/music/a.mp3", "a1", "Artist").await;
        assert!(set_favorite(&pool, id, true).await.unwrap());

        let again = upsert_track(&pool, "/music/a.mp3", "Renamed", Utc::now(), "a1", &[])
            .await
            .unwrap();
        assert_eq!(id, again);

        let track = get_track_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(track.title, "Renamed");
        assert!(track.is_favorite);
        assert!(get_track_artists(&pool, id).await.unwrap().is_empty());
        assert_eq!(get_all_tracks(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tracks_under_matches_file_and_directory() {
        let (pool, _dir) = temp_db().await;
        seed_track(&pool, "/music/rock/a.mp3", "a1", "X").await;
        seed_track(&pool, "/music/rock/sub/b.mp3", "a1", "X").await;
        seed_track(&pool, "/music/rockabilly/c.mp3", "a1", "X").await;

        let under = get_tracks_under(&pool, "/music/rock").await.unwrap();
        let paths: Vec<_> = under.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths.len(), 2);
        assert!(!paths.contains(&"/music/rockabilly/c.mp3"));

        let exact = get_tracks_under(&pool, "/music/rock/a.mp3").await.unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_prune_albums() {
        let (pool, _dir) = temp_db().await;
        let a = seed_track(&pool, "/music/a.mp3", "a1", "Shared").await;
        seed_track(&pool, "/music/b.mp3", "a2", "Solo").await;

        assert_eq!(delete_tracks(&pool, &[a]).await.unwrap(), 1);
        assert_eq!(count_album_tracks(&pool, "a1").await.unwrap(), 0);

        let (artists, albums) = prune_albums(&pool, &["a1".into(), "a2".into()])
            .await
            .unwrap();
        assert_eq!((artists, albums), (1, 1));
        assert!(get_album(&pool, "a1").await.unwrap().is_none());
        assert!(get_album(&pool, "a2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_all_tracks_with_metadata() {
        let (pool, _dir) = temp_db().await;
        seed_track(&pool, "/music/a.mp3", "a1", "Test Artist").await;

        let tracks = get_all_tracks_with_metadata(&pool).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].album_title, "Album");
        assert_eq!(tracks[0].artist_names, "Test Artist");
    }

    #[tokio::test]
    async fn test_playlists_and_play_events() {
        let (pool, _dir) = temp_db().await;
        let id = seed_track(&pool, "/music/a.mp3", "a1", "X").await;

        let list = get_or_create_playlist(&pool, "Road Trip").await.unwrap();
        assert_eq!(get_or_create_playlist(&pool, "Road Trip").await.unwrap().id, list.id);

        add_to_playlist(&pool, list.id, id).await.unwrap();
        add_to_playlist(&pool, list.id, id).await.unwrap();
        assert_eq!(get_playlist_tracks(&pool, list.id).await.unwrap().len(), 1);

        record_play(&pool, id, Utc::now()).await.unwrap();
        record_play(&pool, id, Utc::now()).await.unwrap();
        assert_eq!(get_play_events(&pool, id).await.unwrap().len(), 2);

        // Deleting the track cascades to memberships and play events
        delete_tracks(&pool, &[id]).await.unwrap();
        assert!(get_playlist_tracks(&pool, list.id).await.unwrap().is_empty());
        assert!(get_play_events(&pool, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let (pool, _dir) = temp_db().await;
        assert_eq!(get_state(&pool, "k").await.unwrap(), None);
        set_state(&pool, "k", "v1").await.unwrap();
        set_state(&pool, "k", "v2").await.unwrap();
        assert_eq!(get_state(&pool, "k").await.unwrap().as_deref(), Some("v2"));
    }
}
