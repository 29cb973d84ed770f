//! Picking the cover among embedded pictures.

use crate::metadata::EmbeddedPicture;

/// Choose the picture to use as album cover.
///
/// Prefers a picture tagged as front cover, falls back to the first picture.
pub fn select_picture(pictures: &[EmbeddedPicture]) -> Option<&EmbeddedPicture> {
    pictures
        .iter()
        .find(|p| p.front_cover)
        .or_else(|| pictures.first())
}

/// File extension for a picture, from the subtype of its MIME type.
///
/// `image/png` becomes `png`; a missing or malformed MIME type yields `jpg`.
pub fn extension_for(picture: &EmbeddedPicture) -> String {
    picture
        .mime_type
        .as_deref()
        .and_then(|m| m.split_once('/'))
        .map(|(_, sub)| sub.trim().to_ascii_lowercase())
        .filter(|sub| !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}
