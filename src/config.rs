//! Explicit configuration passed into constructors.
//!
//! Nothing in the fingerprinting or comparison code reads files; the
//! `from_json_file` helpers exist for the command-line edge only.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical rate audio is decoded to before fingerprinting.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub scoring: ScoringConfig,
}

impl FingerprintConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.video.validate()
    }
}

/// STFT and peak-picking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Peaks must be strictly louder than this (dB).
    pub min_peak_db: f32,
    /// Side of the square max-filter window, in bins.
    pub neighborhood: usize,
    /// Dynamic range kept below the loudest bin; `None` disables clipping.
    pub top_db: Option<f32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            n_fft: 2048,
            hop_length: 512,
            min_peak_db: 10.0,
            neighborhood: 20,
            top_db: Some(80.0),
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.n_fft == 0 || self.hop_length == 0 {
            return Err(Error::InvalidSettings(
                "sample_rate, n_fft and hop_length must be > 0".to_string(),
            ));
        }
        if self.neighborhood == 0 {
            return Err(Error::InvalidSettings(
                "neighborhood must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Side of the downsampled luma grid; the hash has `hash_size²` bits.
    pub hash_size: u32,
    /// Frames hashed concurrently per batch. 1 hashes on the calling thread.
    pub batch_size: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            hash_size: 32,
            batch_size: 8,
        }
    }
}

impl VideoConfig {
    fn validate(&self) -> Result<()> {
        if self.hash_size == 0 {
            return Err(Error::InvalidSettings("hash_size must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Position-by-position up to the shorter length.
    #[default]
    Truncate,
    /// Longest common subsequence under the element equality.
    Sequence,
}

/// How fingerprint elements are matched. The defaults reproduce exact,
/// position-by-position scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub alignment: Alignment,
    /// Audio peaks in the same frequency bin match within this many time bins.
    pub peak_time_tolerance: u32,
    /// Frame hashes match when their Hamming distance is at most this.
    pub max_hash_distance: u32,
}

/// Input/output paths, in the shape of `compare.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPaths {
    pub input_video_path: PathBuf,
    pub output_video_path: PathBuf,
}

impl JobPaths {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path)
    }
}

pub(crate) fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let file = File::open(path.as_ref())?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FingerprintConfig::default();
        assert_eq!(config.audio.sample_rate, 22_050);
        assert_eq!(config.audio.neighborhood, 20);
        assert_eq!(config.audio.min_peak_db, 10.0);
        assert_eq!(config.video.hash_size, 32);
        assert_eq!(config.scoring.alignment, Alignment::Truncate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: FingerprintConfig = serde_json::from_str(
            r#"{"audio": {"neighborhood": 5}, "scoring": {"alignment": "sequence"}}"#,
        )
        .unwrap();
        assert_eq!(config.audio.neighborhood, 5);
        assert_eq!(config.audio.n_fft, 2048);
        assert_eq!(config.scoring.alignment, Alignment::Sequence);
        assert_eq!(config.scoring.max_hash_distance, 0);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = FingerprintConfig::default();
        config.audio.hop_length = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidSettings(_))));

        let mut config = FingerprintConfig::default();
        config.video.hash_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_paths_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"input_video_path": "in.mp4", "output_video_path": "out/edited.mp4"}}"#
        )
        .unwrap();

        let job = JobPaths::from_json_file(file.path()).unwrap();
        assert_eq!(job.input_video_path, PathBuf::from("in.mp4"));
        assert_eq!(job.output_video_path, PathBuf::from("out/edited.mp4"));
    }
}
