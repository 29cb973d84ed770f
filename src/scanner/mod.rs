//! Filesystem side of the sync engine.
//!
//! - [`list_audio_files`]: enumerate supported audio files under the music root
//! - [`fingerprint`]: digest of the tree used to skip unnecessary rescans
//! - [`watcher`]: live change notifications with debounce and stabilization

pub mod fingerprint;
pub mod watcher;

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

pub use fingerprint::{Fingerprint, RescanDecision};
pub use watcher::{Change, ChangeHandler, ChangeKind, LiveWatcher, WatchSettings};

/// Extensions picked up by scans and the watcher (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg"];

/// Check if a path is an audio file by extension.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| e.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Recursively collect audio files under `root`, sorted by path.
///
/// Runs the walk on the blocking pool. A missing root or any entry that
/// cannot be read fails the whole listing with [`Error::Traversal`], since a
/// partial listing would look like deleted files.
pub async fn list_audio_files(root: PathBuf) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || list_audio_files_blocking(&root)).await?
}

fn list_audio_files_blocking(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() && is_audio_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Traversal error for a failed walk entry, falling back to `root` when
/// walkdir has no path.
pub(crate) fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    let message = err.to_string();
    let io = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other(message));
    Error::traversal(path, io)
}
