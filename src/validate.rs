//! File validation before import.
//!
//! Imports are checked by content, not by extension: a file is accepted only
//! if its leading bytes carry a known image signature.

use serde::Serialize;
use std::fmt;

/// Decides whether raw file bytes may be stored in a library
pub trait FileValidator: Send + Sync {
    fn validate(&self, bytes: &[u8]) -> bool;
}

/// Image container formats recognised by signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    WebP,
    Ico,
}

impl ImageFormat {
    /// Identify the format from the first bytes of a file
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
        if bytes.starts_with(PNG) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 14 && bytes.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(ImageFormat::Tiff)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::WebP)
        } else if bytes.len() >= 6 && bytes.starts_with(&[0, 0, 1, 0]) && bytes[4..6] != [0, 0] {
            Some(ImageFormat::Ico)
        } else {
            None
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::WebP => "webp",
            ImageFormat::Ico => "ico",
        };
        f.write_str(name)
    }
}

/// Accepts any file with a recognised image signature
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageValidator;

impl FileValidator for ImageValidator {
    fn validate(&self, bytes: &[u8]) -> bool {
        ImageFormat::detect(bytes).is_some()
    }
}

/// Accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl FileValidator for AcceptAll {
    fn validate(&self, _bytes: &[u8]) -> bool {
        true
    }
}
