//! Library scanning and file watching commands.

use std::io::Write;
use std::time::Duration;

use futures::StreamExt;
use tokio::runtime::Runtime;
use tracing::info;

use super::open_library;
use crate::config::Config;
use crate::library::Library;
use crate::model::ProgressState;

/// Synchronize the catalog with the music directory
pub fn cmd_scan(rt: &Runtime, config: Config, force: bool, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        if !json {
            println!("Scanning directory: {}", library.root().display());
        }

        let printer = (!json).then(|| tokio::spawn(print_progress(library.subscribe_progress())));

        let result = if force {
            library.force_scan().await
        } else {
            library.scan().await
        };
        if let Some(mut printer) = printer {
            // Let queued progress drain up to the final line
            let finished = matches!(&result, Ok(s) if s.tracks + s.skipped > 0);
            if !finished || tokio::time::timeout(PRINTER_DRAIN, &mut printer).await.is_err() {
                printer.abort();
            }
        }
        let summary = result?;

        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else if !summary.rescanned {
            println!("Library unchanged, nothing to scan.");
        } else {
            println!(
                "\nScan complete: {} tracks, {} skipped.",
                summary.tracks, summary.skipped
            );
        }
        Ok(())
    })
}

const PRINTER_DRAIN: Duration = Duration::from_millis(500);

/// Print every 100th state and the final one, returning after the final one.
async fn print_progress(
    progress: impl futures::Stream<Item = ProgressState>,
) -> Option<ProgressState> {
    let mut progress = std::pin::pin!(progress);
    let mut last = None;
    while let Some(state) = progress.next().await {
        if state.current % 100 == 0 || state.done {
            print!("\rScanned {}/{} files...", state.current, state.total);
            let _ = std::io::stdout().flush();
            last = Some(state);
        }
        if state.done {
            break;
        }
    }
    last
}

/// List all tracks in the catalog
pub fn cmd_list(rt: &Runtime, config: Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        for track in library.tracks().await? {
            let star = if track.is_favorite { "*" } else { " " };
            let artists = if track.artist_names.is_empty() {
                "Unknown Artist"
            } else {
                track.artist_names.as_str()
            };
            println!(
                "{star} {:>5}  {} - {} [{}]  {}",
                track.id, artists, track.title, track.album_title, track.path
            );
        }
        Ok(())
    })
}

/// Watch the music directory until Ctrl+C
pub fn cmd_watch(rt: &Runtime, config: Config, scan_first: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;

        if scan_first {
            println!("Running scan...");
            let summary = library.scan().await?;
            if summary.rescanned {
                println!("Scan complete: {} tracks.", summary.tracks);
            } else {
                println!("Library unchanged.");
            }
        }

        watch_until_interrupted(&library).await
    })
}

async fn watch_until_interrupted(library: &Library) -> anyhow::Result<()> {
    library.start_watching()?;
    println!("Watching for changes in: {}", library.root().display());
    println!("Press Ctrl+C to stop.\n");

    let mut updates = std::pin::pin!(library.subscribe_progress());
    let mut health = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(_) = updates.next() => println!("Catalog updated"),
            _ = health.tick() => {
                if !library.is_watching() {
                    library.stop_watching();
                    anyhow::bail!("File watcher stopped unexpectedly");
                }
            }
        }
    }

    library.stop_watching();
    info!(target: "scanner::watcher", "File watcher stopped");
    Ok(())
}
