//! Favorites, covers, playlists and play events.

use std::path::Path;

use tokio::runtime::Runtime;

use super::{PlaylistAction, open_library};
use crate::config::Config;

/// Set or clear the favorite flag of a track
pub fn cmd_favorite(rt: &Runtime, config: Config, id: i64, value: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        library.set_favorite(id, value).await?;
        if value {
            println!("Track {id} marked as favorite.");
        } else {
            println!("Track {id} is no longer a favorite.");
        }
        Ok(())
    })
}

/// Write the cover of a track's album to `out`
pub fn cmd_cover(rt: &Runtime, config: Config, id: i64, out: &Path) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        let bytes = library.cover_for_track(id).await?;
        tokio::fs::write(out, &bytes).await?;
        println!("Wrote {} bytes to {}", bytes.len(), out.display());
        Ok(())
    })
}

/// Print the lyrics of a track
pub fn cmd_lyrics(rt: &Runtime, config: Config, id: i64, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        let lyrics = library.lyrics_for_track(id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&lyrics)?);
        } else if lyrics.text.is_empty() {
            println!("No lyrics for track {id}.");
        } else {
            println!("{}", lyrics.text);
        }
        Ok(())
    })
}

/// Playlist management
pub fn cmd_playlist(rt: &Runtime, config: Config, action: &PlaylistAction) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        match action {
            PlaylistAction::Create { name } => {
                let playlist = library.create_playlist(name).await?;
                println!("Playlist '{}' ({})", playlist.name, playlist.id);
            }
            PlaylistAction::Add { name, id } => {
                library.add_to_playlist(name, *id).await?;
                println!("Added track {id} to '{name}'.");
            }
            PlaylistAction::Remove { name, id } => {
                library.remove_from_playlist(name, *id).await?;
                println!("Removed track {id} from '{name}'.");
            }
            PlaylistAction::Show { name } => {
                let tracks = library.playlist_tracks(name).await?;
                if tracks.is_empty() {
                    println!("'{name}' is empty.");
                }
                for track in tracks {
                    println!("{:>5}  {}  {}", track.id, track.title, track.path);
                }
            }
        }
        Ok(())
    })
}

/// Record a play of a track
pub fn cmd_played(rt: &Runtime, config: Config, id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config).await?;
        let event = library.record_play(id).await?;
        let total = library.play_events(id).await?.len();
        println!("Track {id} played at {} ({total} plays).", event.played_at);
        Ok(())
    })
}
