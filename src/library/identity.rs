//! Deterministic identity derivation.
//!
//! Album and artist ids are UUIDv5 values computed from tag fields, so
//! ingesting the same logical album twice always lands on the same row.

use std::path::Path;

use uuid::Uuid;

use crate::metadata::TrackTags;
use crate::model::ArtistKey;

/// Album artist used when a file has none.
pub const DEFAULT_ALBUM_ARTIST: &str = "Various Artists";

/// Identity and display title of the album a track belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumIdentity {
    pub id: String,
    pub title: String,
}

/// Title of a track: the title tag, else the file name.
pub fn track_title(tags: &TrackTags, path: &Path) -> String {
    tags.title.clone().unwrap_or_else(|| file_name(path))
}

/// Derive the album a track belongs to.
///
/// The key is `(album tag or track title, album artist or "Various Artists")`,
/// so untagged singles each get an album of their own.
pub fn album_identity(tags: &TrackTags, path: &Path) -> AlbumIdentity {
    let title = tags.album.clone().unwrap_or_else(|| track_title(tags, path));
    let album_artist = tags
        .album_artist
        .as_deref()
        .unwrap_or(DEFAULT_ALBUM_ARTIST);

    AlbumIdentity {
        id: album_id(&title, album_artist),
        title,
    }
}

pub fn album_id(title: &str, album_artist: &str) -> String {
    stable_id(&format!("{title}-{album_artist}"))
}

pub fn artist_id(key: &ArtistKey) -> String {
    stable_id(&format!("{}-{}", key.name, key.album_id))
}

fn stable_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()).to_string()
}

/// Split a multi-artist tag on commas, trimming and dropping empty or
/// repeated names. Order of first appearance is kept.
pub fn split_artists(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Artist names credited on a track.
///
/// Uses the artist tag; files that only carry an album artist are credited
/// to it.
pub fn artist_names(tags: &TrackTags) -> Vec<String> {
    tags.artist
        .as_deref()
        .or(tags.album_artist.as_deref())
        .map(split_artists)
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
