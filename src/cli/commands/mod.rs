//! CLI command definitions and dispatch.
//!
//! Each group of subcommands is implemented in its own submodule:
//! - `scan`: full scans, live watching and listing
//! - `catalog`: favorites, covers, playlists and play events

mod catalog;
mod scan;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::library::Library;

pub use catalog::{cmd_cover, cmd_favorite, cmd_lyrics, cmd_played, cmd_playlist};
pub use scan::{cmd_list, cmd_scan, cmd_watch};

/// tunesync CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: OS config directory)
    #[arg(long, global = true, env = "TUNESYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Music directory, overriding the config file
    #[arg(long, global = true, env = "TUNESYNC_MUSIC_PATH")]
    pub music_path: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(long, global = true, env = "TUNESYNC_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize the catalog with the music directory
    Scan {
        /// Rescan even if the directory fingerprint is unchanged
        #[arg(long)]
        force: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch the music directory and keep the catalog in sync until Ctrl+C
    Watch {
        /// Run a (fingerprint-gated) scan before watching
        #[arg(long)]
        scan_first: bool,
    },
    /// List all tracks in the catalog
    List,
    /// Mark a track as favorite
    Favorite {
        /// Track ID
        id: i64,
        /// Clear the flag instead
        #[arg(long)]
        off: bool,
    },
    /// Write the album cover of a track to a file
    Cover {
        /// Track ID
        id: i64,
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Print the lyrics of a track
    Lyrics {
        /// Track ID
        id: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage playlists
    Playlist {
        #[command(subcommand)]
        action: PlaylistAction,
    },
    /// Record that a track was played
    Played {
        /// Track ID
        id: i64,
    },
}

/// Playlist subcommands
#[derive(Subcommand)]
pub enum PlaylistAction {
    /// Create an empty playlist
    Create { name: String },
    /// Add a track to a playlist (created if missing)
    Add { name: String, id: i64 },
    /// Remove a track from a playlist
    Remove { name: String, id: i64 },
    /// Show the tracks of a playlist
    Show { name: String },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = resolve_config(cli);

    match &cli.command {
        Commands::Scan { force, json } => cmd_scan(&rt, config, *force, *json),
        Commands::Watch { scan_first } => cmd_watch(&rt, config, *scan_first),
        Commands::List => cmd_list(&rt, config),
        Commands::Favorite { id, off } => cmd_favorite(&rt, config, *id, !*off),
        Commands::Cover { id, out } => cmd_cover(&rt, config, *id, out),
        Commands::Lyrics { id, json } => cmd_lyrics(&rt, config, *id, *json),
        Commands::Playlist { action } => cmd_playlist(&rt, config, action),
        Commands::Played { id } => cmd_played(&rt, config, *id),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Config file plus command line overrides.
fn resolve_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    if let Some(music_path) = &cli.music_path {
        config.library.music_path = music_path.clone();
    }
    if let Some(db) = &cli.db {
        config.library.database = Some(db.clone());
    }
    config
}

pub(crate) async fn open_library(config: Config) -> anyhow::Result<Library> {
    let root = config.library.music_root();
    if !root.is_dir() {
        anyhow::bail!("Music directory {} does not exist", root.display());
    }
    Ok(Library::open(config).await?)
}
