pub mod audio;
pub mod compare;
pub mod content;
pub mod decode;
pub mod hash;
pub mod loader;
pub mod video;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a"];

/// The two fingerprinting domains. A file is exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    /// Classify a path by its extension.
    ///
    /// This is the only place extensions are inspected; everything downstream
    /// matches on the returned variant.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => Ok(MediaType::Video),
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => Ok(MediaType::Audio),
            _ => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => f.write_str("audio"),
            MediaType::Video => f.write_str("video"),
        }
    }
}

/// A local spectral-magnitude maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioPeak {
    pub time_bin: u32,
    pub frequency_bin: u32,
}

impl AudioPeak {
    pub fn new(time_bin: u32, frequency_bin: u32) -> Self {
        Self {
            time_bin,
            frequency_bin,
        }
    }
}

/// Peak constellation in scan order (time bins non-decreasing).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioFingerprint {
    pub peaks: Vec<AudioPeak>,
}

impl AudioFingerprint {
    pub fn new(peaks: Vec<AudioPeak>) -> Self {
        Self { peaks }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// Fixed-length bit string produced by the average hash of one frame.
///
/// Bits are row-major and packed most significant bit first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FrameHash {
    bytes: Vec<u8>,
    bits: usize,
}

impl FrameHash {
    pub fn from_bits<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bytes = Vec::new();
        let mut bits = 0usize;
        for bit in iter {
            if bits % 8 == 0 {
                bytes.push(0);
            }
            if bit {
                let last = bytes.len() - 1;
                bytes[last] |= 0x80 >> (bits % 8);
            }
            bits += 1;
        }
        Self { bytes, bits }
    }

    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.bits && self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn count_ones(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }
}

impl fmt::Display for FrameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.bits {
            f.write_str(if self.bit(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl From<FrameHash> for String {
    fn from(hash: FrameHash) -> Self {
        hash.to_string()
    }
}

impl TryFrom<String> for FrameHash {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(format!("invalid hash character {other:?}")),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(FrameHash::from_bits)
    }
}

/// One hash per decoded frame, in source frame order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoFingerprint {
    pub frames: Vec<FrameHash>,
}

impl VideoFingerprint {
    pub fn new(frames: Vec<FrameHash>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Audio(AudioFingerprint),
    Video(VideoFingerprint),
}

impl Fingerprint {
    pub fn media_type(&self) -> MediaType {
        match self {
            Fingerprint::Audio(_) => MediaType::Audio,
            Fingerprint::Video(_) => MediaType::Video,
        }
    }
}

/// Fingerprints of another item, keyed by modality.
///
/// This is the serialisable form used to store a fingerprint and compare
/// against it later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoFingerprint>,
}

impl FingerprintSet {
    pub fn get(&self, media_type: MediaType) -> Option<Fingerprint> {
        match media_type {
            MediaType::Audio => self.audio.clone().map(Fingerprint::Audio),
            MediaType::Video => self.video.clone().map(Fingerprint::Video),
        }
    }
}

impl From<Fingerprint> for FingerprintSet {
    fn from(fingerprint: Fingerprint) -> Self {
        match fingerprint {
            Fingerprint::Audio(audio) => Self {
                audio: Some(audio),
                video: None,
            },
            Fingerprint::Video(video) => Self {
                audio: None,
                video: Some(video),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    pub audio_similarity: Option<f64>,
    pub video_similarity: Option<f64>,
    pub overall_similarity: f64,
}

impl SimilarityReport {
    pub fn new(audio_similarity: Option<f64>, video_similarity: Option<f64>) -> Self {
        Self {
            audio_similarity,
            video_similarity,
            overall_similarity: audio_similarity.unwrap_or(0.0) + video_similarity.unwrap_or(0.0),
        }
    }

    /// Report for a single-modality comparison; the other modality is absent.
    pub fn for_modality(media_type: MediaType, similarity: f64) -> Self {
        match media_type {
            MediaType::Audio => Self::new(Some(similarity), None),
            MediaType::Video => Self::new(None, Some(similarity)),
        }
    }
}
