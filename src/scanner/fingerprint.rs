//! Directory fingerprint for change detection.
//!
//! A SHA-256 digest over `(path, modification time)` of every regular file
//! under the music root. The walk is sorted by file name so the digest is
//! reproducible across runs and platforms. The last fingerprint of a
//! completed scan is stored in the `state` table; an unchanged fingerprint
//! means a full rescan can be skipped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use walkdir::WalkDir;

use super::walk_error;
use crate::db;
use crate::error::{Error, Result};

/// `state` key under which the fingerprint is persisted.
pub const FINGERPRINT_KEY: &str = "MUSIC_DIRECTORY_HASH";

/// Lowercase hex SHA-256 digest of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a full rescan is needed, with the fingerprint to store afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanDecision {
    pub needed: bool,
    pub fingerprint: Fingerprint,
}

/// Compute the fingerprint of `root` on the blocking pool.
///
/// # Errors
///
/// [`Error::Traversal`] if any directory or file under `root` cannot be read.
/// Callers must treat this as fatal for the scan, never as "unchanged".
pub async fn compute(root: PathBuf) -> Result<Fingerprint> {
    tokio::task::spawn_blocking(move || compute_blocking(&root)).await?
}

pub fn compute_blocking(root: &Path) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let modified = entry
            .metadata()
            .map_err(|e| walk_error(root, e))?
            .modified()
            .map_err(|e| Error::traversal(entry.path(), e))?;
        let mtime_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        hasher.update(entry.path().as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        hasher.update(mtime_ms.to_le_bytes());
    }

    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// Compare the current fingerprint of `root` with the stored one.
pub async fn should_rescan(pool: &SqlitePool, root: &Path) -> Result<RescanDecision> {
    let fingerprint = compute(root.to_path_buf()).await?;
    let stored = db::get_state(pool, FINGERPRINT_KEY).await?;
    let needed = stored.as_deref() != Some(fingerprint.as_str());

    tracing::debug!(
        target: "scanner::fingerprint",
        root = %root.display(),
        fingerprint = %fingerprint,
        needed,
        "Checked directory fingerprint"
    );

    Ok(RescanDecision {
        needed,
        fingerprint,
    })
}

/// Persist `fingerprint` as the last known state of the music root.
pub async fn store(pool: &SqlitePool, fingerprint: &Fingerprint) -> Result<()> {
    db::set_state(pool, FINGERPRINT_KEY, fingerprint.as_str()).await?;
    Ok(())
}
