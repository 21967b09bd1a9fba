#![deny(clippy::all)]

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod transform;

pub use config::{Alignment, AudioConfig, FingerprintConfig, JobPaths, ScoringConfig, VideoConfig};
pub use error::{Error, Result};
pub use fingerprint::content::ContentFingerprint;
pub use fingerprint::loader::{MediaHandle, MediaLoader, SignalLoader};
pub use fingerprint::{
    AudioFingerprint, AudioPeak, Fingerprint, FingerprintSet, FrameHash, MediaType,
    SimilarityReport, VideoFingerprint,
};
pub use transform::{MediaTransformPipeline, TransformSettings};
