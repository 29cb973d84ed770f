//! Command-line interface for tunesync.
//!
//! This module provides CLI commands for scanning, watching and querying
//! the catalog.

mod commands;

pub use commands::{Cli, Commands, PlaylistAction, run_command};
