use tracing::debug;

use super::hash::hamming_distance;
use super::{AudioFingerprint, AudioPeak, Fingerprint, FrameHash, VideoFingerprint};
use crate::config::{Alignment, ScoringConfig};
use crate::error::{Error, Result};

/// Scores two fingerprints of the same modality in `[0, 1]`.
///
/// The default configuration compares positions up to the shorter length and
/// divides exact matches by the longer length. Content that shifted in time
/// therefore stops matching after the shift; `Alignment::Sequence` is the
/// opt-in remedy.
#[derive(Debug, Clone, Default)]
pub struct FingerprintComparator {
    scoring: ScoringConfig,
}

impl FingerprintComparator {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }

    pub fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> Result<f64> {
        match (a, b) {
            (Fingerprint::Audio(a), Fingerprint::Audio(b)) => Ok(self.compare_audio(a, b)),
            (Fingerprint::Video(a), Fingerprint::Video(b)) => Ok(self.compare_video(a, b)),
            _ => Err(Error::ModalityMismatch {
                expected: a.media_type(),
                found: b.media_type(),
            }),
        }
    }

    pub fn compare_audio(&self, a: &AudioFingerprint, b: &AudioFingerprint) -> f64 {
        let tolerance = self.scoring.peak_time_tolerance;
        let same = |x: &AudioPeak, y: &AudioPeak| {
            x.frequency_bin == y.frequency_bin && x.time_bin.abs_diff(y.time_bin) <= tolerance
        };
        self.score(&a.peaks, &b.peaks, same)
    }

    pub fn compare_video(&self, a: &VideoFingerprint, b: &VideoFingerprint) -> f64 {
        let max_distance = self.scoring.max_hash_distance;
        let same = |x: &FrameHash, y: &FrameHash| {
            if max_distance == 0 {
                x == y
            } else {
                hamming_distance(x, y).is_ok_and(|d| d <= max_distance)
            }
        };
        self.score(&a.frames, &b.frames, same)
    }

    fn score<T>(&self, a: &[T], b: &[T], same: impl Fn(&T, &T) -> bool) -> f64 {
        let longest = a.len().max(b.len());
        if longest == 0 {
            return 1.0;
        }

        let matches = match self.scoring.alignment {
            Alignment::Truncate => positional_matches(a, b, same),
            Alignment::Sequence => common_subsequence(a, b, same),
        };
        debug!(
            matches,
            left = a.len(),
            right = b.len(),
            alignment = ?self.scoring.alignment,
            "Scored fingerprints"
        );
        matches as f64 / longest as f64
    }
}

fn positional_matches<T>(a: &[T], b: &[T], same: impl Fn(&T, &T) -> bool) -> usize {
    a.iter().zip(b).filter(|(x, y)| same(x, y)).count()
}

/// Length of the longest common subsequence, two rows of DP state.
fn common_subsequence<T>(a: &[T], b: &[T], same: impl Fn(&T, &T) -> bool) -> usize {
    let (outer, inner, flipped) = if a.len() >= b.len() {
        (a, b, false)
    } else {
        (b, a, true)
    };

    let mut previous = vec![0usize; inner.len() + 1];
    let mut current = vec![0usize; inner.len() + 1];
    for x in outer {
        for (j, y) in inner.iter().enumerate() {
            let hit = if flipped { same(y, x) } else { same(x, y) };
            current[j + 1] = if hit {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[inner.len()]
}
