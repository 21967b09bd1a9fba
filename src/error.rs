use std::path::PathBuf;

use thiserror::Error;

use crate::fingerprint::MediaType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported media format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("cannot compare a {found} fingerprint against a {expected} fingerprint")]
    ModalityMismatch {
        expected: MediaType,
        found: MediaType,
    },

    #[error("no {0} fingerprint to compare against")]
    MissingFingerprint(MediaType),

    #[error("operation requires a video source")]
    NotVideo,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
