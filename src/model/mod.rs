//! Core data models for the catalog.
//!
//! Defines the persisted entities: [`Track`], [`Album`], [`Artist`],
//! [`Playlist`] and [`PlayEvent`], plus the sync-side [`TrackRecord`] and
//! [`ProgressState`] that flow from ingestion into the reconciler.
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `albums` - Albums keyed by a deterministic UUID
//! - `artists` - Artists keyed by `(name, album_id)`
//! - `tracks` - Individual audio files, unique by path
//! - `track_artists` - Track/artist links
//! - `playlists`, `playlist_tracks`, `play_events`
//! - `state` - Key/value rows (directory fingerprint)

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::metadata::{EmbeddedPicture, TrackTags};

/// An album in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Album {
    /// Deterministic UUID derived from album title and album artist
    pub id: String,
    /// Album title
    pub title: String,
    /// Materialized cover file, once written
    pub cover_path: Option<String>,
}

/// The composite identity of an artist.
///
/// Artists are not deduplicated globally: the same name on two different
/// albums is two different artists. Keeping the pair visible makes that
/// limitation explicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtistKey {
    pub name: String,
    pub album_id: String,
}

/// An artist in the catalog, scoped to one album.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Artist {
    /// UUID derived from [`ArtistKey`]
    pub id: String,
    /// Artist name
    pub name: String,
    /// Album the artist was found on
    pub album_id: String,
}

impl Artist {
    pub fn key(&self) -> ArtistKey {
        ArtistKey {
            name: self.name.clone(),
            album_id: self.album_id.clone(),
        }
    }
}

/// A track (audio file) in the catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Track {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Absolute file path (unique identifier)
    pub path: String,
    /// Track title (from tags or filename)
    pub title: String,
    /// RFC 3339 timestamp of the file's creation
    pub date_added: String,
    /// Favorite flag
    pub is_favorite: bool,
    /// Foreign key to albums table
    pub album_id: String,
}

impl Track {
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// A named playlist.
#[derive(Debug, Clone, FromRow)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
}

/// One playback of a track. Append-only.
#[derive(Debug, Clone, FromRow)]
pub struct PlayEvent {
    pub id: i64,
    pub track_id: i64,
    pub played_at: String,
}

/// Lyrics of a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lyrics {
    pub text: String,
    /// True when read from a time-synced `.lrc` file next to the track
    pub is_sync: bool,
}

/// Scan progress, one per processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    /// 1-based index of the file in enumeration order
    pub current: usize,
    /// Total number of files in this scan
    pub total: usize,
    /// True for the last file
    pub done: bool,
}

impl ProgressState {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            done: current == total,
        }
    }

    /// Progress for a single-file live update.
    pub fn single() -> Self {
        Self::new(1, 1)
    }
}

/// A file's extracted metadata, ready to be reconciled.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub path: PathBuf,
    pub tags: TrackTags,
    /// File creation time (falls back to modification time)
    pub date_added: DateTime<Utc>,
    /// Best embedded picture, if any
    pub picture: Option<EmbeddedPicture>,
}

impl TrackRecord {
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}
