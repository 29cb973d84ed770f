//! tunesync - keeps a music catalog in sync with a directory of audio files.
//!
//! Full scans are gated by a directory fingerprint; a live watcher applies
//! single-file changes once writes have settled. Everything is driven from
//! CLI commands.

pub mod cli;
pub mod config;
pub mod cover;
pub mod db;
pub mod error;
pub mod library;
pub mod metadata;
pub mod model;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging; subsystems log under their own targets
    let mut filter = EnvFilter::from_default_env().add_directive("tunesync=info".parse()?);
    for target in ["library", "scanner", "cover"] {
        filter = filter.add_directive(format!("{target}=info").parse()?);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli::run_command(&args)
}
