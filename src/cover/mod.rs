//! Album cover materialization.
//!
//! Covers come from pictures embedded in audio tags. The first usable picture
//! of an album is written once to `<cover_dir>/<album_id>.<ext>` and never
//! overwritten afterwards.
//!
//! # Design Principles
//!
//! - **Write once**: an existing cover file is never replaced
//! - **Graceful degradation**: no embedded picture means no cover, not an error
//! - **Content keyed by album identity**: file names are album ids

mod embedded;
mod store;

pub use embedded::{extension_for, select_picture};
pub use store::CoverStore;
pub(crate) use store::read_file;
