//! Audio file metadata extraction.
//!
//! Uses the lofty crate for format-independent tag access. The sync engine
//! only talks to the [`MetadataExtractor`] trait so tests (and future
//! extractors) can stand in for lofty.
//!
//! # Features
//! - Read title, artist, album and album artist tags
//! - Collect embedded pictures for cover materialization
//! - Read embedded (unsynced) lyrics on demand

use lofty::file::{TaggedFile, TaggedFileExt};
use lofty::picture::PictureType;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};
use std::path::Path;

use crate::error::{Error, Result};

/// Tag fields the catalog cares about. Absent tags stay `None`; fallbacks
/// (filename title, "Various Artists") are applied during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
}

/// An image embedded in a file's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPicture {
    pub data: Vec<u8>,
    /// Declared MIME type, e.g. `image/png`
    pub mime_type: Option<String>,
    /// Whether the tag marks this picture as the front cover
    pub front_cover: bool,
}

/// Everything extracted from one file.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub tags: TrackTags,
    pub pictures: Vec<EmbeddedPicture>,
}

/// Parses one file into tags and embedded pictures.
///
/// Implementations are synchronous; callers run them on the blocking pool.
pub trait MetadataExtractor: Send + Sync + 'static {
    fn extract(&self, path: &Path) -> Result<Extracted>;

    /// Embedded lyrics, if the file carries any.
    fn lyrics(&self, path: &Path) -> Result<Option<String>>;
}

/// [`MetadataExtractor`] backed by lofty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyExtractor;

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<Extracted> {
        read(path)
    }

    fn lyrics(&self, path: &Path) -> Result<Option<String>> {
        read_lyrics(path)
    }
}

fn open(path: &Path) -> Result<TaggedFile> {
    Probe::open(path)
        .map_err(|e| Error::extraction(path, e.to_string()))?
        .read()
        .map_err(|e| Error::extraction(path, e.to_string()))
}

/// Read tags and pictures from an audio file.
pub fn read(path: &Path) -> Result<Extracted> {
    let tagged_file = open(path)?;

    // Primary tag first, then whatever else the file carries
    let Some(tag) = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
    else {
        return Ok(Extracted::default());
    };

    let tags = TrackTags {
        title: non_empty(tag.title().map(|s| s.to_string())),
        artist: non_empty(tag.artist().map(|s| s.to_string())),
        album: non_empty(tag.album().map(|s| s.to_string())),
        album_artist: non_empty(tag.get_string(&ItemKey::AlbumArtist).map(str::to_string)),
    };

    let pictures = tag
        .pictures()
        .iter()
        .map(|p| EmbeddedPicture {
            data: p.data().to_vec(),
            mime_type: p.mime_type().map(|m| m.as_str().to_string()),
            front_cover: p.pic_type() == PictureType::CoverFront,
        })
        .collect();

    Ok(Extracted { tags, pictures })
}

/// Read the lyrics tag from an audio file.
pub fn read_lyrics(path: &Path) -> Result<Option<String>> {
    let tagged_file = open(path)?;
    let lyrics = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .and_then(|tag| tag.get_string(&ItemKey::Lyrics))
        .map(str::to_string);
    Ok(non_empty(lyrics))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
