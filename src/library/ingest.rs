//! Full-scan ingestion pipeline.
//!
//! Enumerates the music root, extracts metadata under a scan-wide
//! concurrency cap and persists it batch by batch. A producer task does the
//! work and hands events to the consumer over a bounded channel, so an event
//! is only ever observed after its batch is in the catalog.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use super::reconcile::Reconciler;
use crate::config::{ErrorPolicy, ScanConfig};
use crate::cover::select_picture;
use crate::db;
use crate::error::Result;
use crate::metadata::MetadataExtractor;
use crate::model::{ProgressState, TrackRecord};
use crate::scanner;

/// One processed file of a full scan.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Extracted and persisted
    Track {
        record: TrackRecord,
        progress: ProgressState,
    },
    /// Unreadable, left out of the catalog (skip policy only)
    Skipped {
        path: PathBuf,
        message: String,
        progress: ProgressState,
    },
}

impl ScanEvent {
    pub fn progress(&self) -> ProgressState {
        match self {
            Self::Track { progress, .. } | Self::Skipped { progress, .. } => *progress,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Track { record, .. } => &record.path,
            Self::Skipped { path, .. } => path,
        }
    }
}

/// Scan `root` and stream one event per supported file.
///
/// Before anything is yielded, catalogued tracks that are no longer on disk
/// are removed. If the root cannot be fully enumerated the stream yields
/// [`crate::error::Error::Traversal`] and nothing is removed.
///
/// Under [`ErrorPolicy::FailFast`] the first extraction error
/// is yielded and ends the stream; batches yielded before it stay persisted.
///
/// The scan runs to completion even if the stream is dropped early.
pub fn scan(
    reconciler: Arc<Reconciler>,
    root: PathBuf,
    config: ScanConfig,
) -> impl Stream<Item = Result<ScanEvent>> + Send + 'static {
    let (tx, rx) = mpsc::channel(config.batch_size.max(1));

    tokio::spawn(async move {
        if let Err(e) = run_scan(&reconciler, root, &config, &tx).await {
            tracing::error!(target: "library::ingest", error = %e, "Scan failed");
            let _ = tx.send(Err(e)).await;
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

type Outcome = (PathBuf, Result<TrackRecord>);

/// Extraction of one batch, aborted if dropped before completion.
struct BatchTask(JoinHandle<Vec<Outcome>>);

impl BatchTask {
    async fn join(&mut self) -> Result<Vec<Outcome>> {
        Ok((&mut self.0).await?)
    }
}

impl Drop for BatchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_scan(
    reconciler: &Reconciler,
    root: PathBuf,
    config: &ScanConfig,
    tx: &mpsc::Sender<Result<ScanEvent>>,
) -> Result<()> {
    let files = scanner::list_audio_files(root.clone()).await?;
    let total = files.len();
    tracing::info!(target: "library::ingest", root = %root.display(), total, "Starting scan");

    let on_disk: HashSet<String> = files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let existing = db::get_all_track_paths(reconciler.pool()).await?;
    let removed = reconciler.delete_missing(&existing, &on_disk).await?;
    if removed > 0 {
        tracing::info!(target: "library::ingest", removed, "Removed tracks missing from disk");
    }

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut batches = files.chunks(config.batch_size.max(1)).map(<[PathBuf]>::to_vec);

    let mut offset = 0;
    let mut skipped = 0;
    let mut next = batches
        .next()
        .map(|batch| spawn_batch(reconciler.extractor(), Arc::clone(&semaphore), batch));

    while let Some(mut current) = next.take() {
        // Start extracting the following batch while this one is persisted
        next = batches
            .next()
            .map(|batch| spawn_batch(reconciler.extractor(), Arc::clone(&semaphore), batch));

        let outcomes = current.join().await?;
        let mut records = Vec::with_capacity(outcomes.len());
        let mut events = Vec::with_capacity(outcomes.len());

        for (path, outcome) in outcomes {
            offset += 1;
            let progress = ProgressState::new(offset, total);
            match (outcome, config.on_error) {
                (Ok(record), _) => {
                    records.push(record.clone());
                    events.push(ScanEvent::Track { record, progress });
                }
                (Err(e), ErrorPolicy::FailFast) => return Err(e),
                (Err(e), ErrorPolicy::Skip) => {
                    tracing::warn!(target: "library::ingest", path = %path.display(), error = %e, "Skipping unreadable file");
                    skipped += 1;
                    events.push(ScanEvent::Skipped {
                        path,
                        message: e.to_string(),
                        progress,
                    });
                }
            }
        }

        reconciler.persist_batch(&records).await?;
        tracing::debug!(target: "library::ingest", processed = offset, total, "Batch persisted");

        for event in events {
            // A dropped consumer doesn't stop the scan
            let _ = tx.send(Ok(event)).await;
        }
    }

    tracing::info!(target: "library::ingest", total, skipped, "Scan finished");
    Ok(())
}

fn spawn_batch(
    extractor: Arc<dyn MetadataExtractor>,
    semaphore: Arc<Semaphore>,
    paths: Vec<PathBuf>,
) -> BatchTask {
    BatchTask(tokio::spawn(async move {
        join_all(paths.into_iter().map(|path| {
            let extractor = Arc::clone(&extractor);
            let semaphore = Arc::clone(&semaphore);
            async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = load_record(extractor, path.clone()).await;
                (path, outcome)
            }
        }))
        .await
    }))
}

/// Extract one file into a [`TrackRecord`] on the blocking pool.
pub(crate) async fn load_record(
    extractor: Arc<dyn MetadataExtractor>,
    path: PathBuf,
) -> Result<TrackRecord> {
    tokio::task::spawn_blocking(move || -> Result<TrackRecord> {
        let extracted = extractor.extract(&path)?;
        let picture = select_picture(&extracted.pictures).cloned();
        Ok(TrackRecord {
            date_added: date_added(&path),
            tags: extracted.tags,
            picture,
            path,
        })
    })
    .await?
}

/// Creation time of the file, else its modification time, else now.
fn date_added(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
