//! Spectral peak constellations.
//!
//! Samples go through a centred short-time Fourier transform, magnitudes are
//! converted to decibels, and every bin that is both loud enough and equal to
//! the maximum of its square neighbourhood becomes a peak. Equal maxima inside
//! one neighbourhood are all reported, so flat plateaus produce clusters.

use std::f32::consts::PI;

use rustfft::{FftPlanner, num_complex::Complex};
use tracing::debug;

use super::{AudioFingerprint, AudioPeak};
use crate::config::AudioConfig;

const AMPLITUDE_FLOOR: f32 = 1e-5;

/// Decibel magnitudes, stored time-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    n_frames: usize,
    n_bins: usize,
    values: Vec<f32>,
}

impl Spectrogram {
    pub fn from_frames(frames: Vec<Vec<f32>>) -> Self {
        let n_frames = frames.len();
        let n_bins = frames.first().map_or(0, Vec::len);
        let values = frames.into_iter().flatten().collect::<Vec<_>>();
        debug_assert_eq!(values.len(), n_frames * n_bins);
        Self {
            n_frames,
            n_bins,
            values,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn get(&self, time: usize, bin: usize) -> f32 {
        self.values[time * self.n_bins + bin]
    }

    pub fn frame(&self, time: usize) -> &[f32] {
        &self.values[time * self.n_bins..(time + 1) * self.n_bins]
    }
}

pub struct AudioFingerprinter {
    config: AudioConfig,
}

impl AudioFingerprinter {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    pub fn fingerprint(&self, samples: &[f32]) -> AudioFingerprint {
        let spectrogram = self.spectrogram_db(samples);
        let peaks = find_peaks(
            &spectrogram,
            self.config.min_peak_db,
            self.config.neighborhood,
        );
        debug!(
            frames = spectrogram.n_frames(),
            bins = spectrogram.n_bins(),
            peaks = peaks.len(),
            "Extracted audio constellation"
        );
        AudioFingerprint::new(peaks)
    }

    /// Magnitude STFT in decibels.
    pub fn spectrogram_db(&self, samples: &[f32]) -> Spectrogram {
        let magnitudes = stft_magnitude(samples, self.config.n_fft, self.config.hop_length);
        amplitude_to_db(magnitudes, self.config.top_db)
    }
}

/// Centred STFT magnitudes: the signal is zero-padded by `n_fft / 2` on both
/// sides and yields `1 + len / hop` frames of `n_fft / 2 + 1` bins.
pub fn stft_magnitude(samples: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<f32>> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; (samples.len() + 2 * pad).max(n_fft)];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    let window = hann_window(n_fft);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let n_bins = n_fft / 2 + 1;

    let n_frames = 1 + (padded.len() - n_fft) / hop;
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
    let mut frames = Vec::with_capacity(n_frames);

    for t in 0..n_frames {
        let start = t * hop;
        for ((slot, &sample), &w) in buffer
            .iter_mut()
            .zip(&padded[start..start + n_fft])
            .zip(&window)
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        fft.process(&mut buffer);
        frames.push(buffer[..n_bins].iter().map(|c| c.norm()).collect());
    }

    frames
}

/// Periodic Hann window.
fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n).cos())
        .collect()
}

/// `20·log10(max(floor, |x|))`, optionally clipped to `top_db` below the peak.
pub fn amplitude_to_db(magnitudes: Vec<Vec<f32>>, top_db: Option<f32>) -> Spectrogram {
    let mut spectrogram = Spectrogram::from_frames(magnitudes);
    for value in spectrogram.values.iter_mut() {
        *value = 20.0 * value.max(AMPLITUDE_FLOOR).log10();
    }

    if let Some(top_db) = top_db {
        let max = spectrogram
            .values
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let floor = max - top_db;
        for value in spectrogram.values.iter_mut() {
            *value = value.max(floor);
        }
    }

    spectrogram
}

/// Bins louder than `min_db` that equal the maximum of the
/// `neighborhood × neighborhood` window centred on them, in time-major order.
pub fn find_peaks(spectrogram: &Spectrogram, min_db: f32, neighborhood: usize) -> Vec<AudioPeak> {
    let local_max = maximum_filter(spectrogram, neighborhood);

    let mut peaks = Vec::new();
    for t in 0..spectrogram.n_frames() {
        for f in 0..spectrogram.n_bins() {
            let value = spectrogram.get(t, f);
            if value > min_db && value == local_max.get(t, f) {
                peaks.push(AudioPeak::new(t as u32, f as u32));
            }
        }
    }
    peaks
}

/// Separable square max filter with mirrored (`d c b a | a b c d`) edges.
pub fn maximum_filter(spectrogram: &Spectrogram, size: usize) -> Spectrogram {
    let (n_frames, n_bins) = (spectrogram.n_frames(), spectrogram.n_bins());
    if n_frames == 0 || n_bins == 0 {
        return spectrogram.clone();
    }

    let before = (size / 2) as isize;
    let after = (size - size / 2) as isize - 1;

    let mut along_bins = vec![0.0f32; n_frames * n_bins];
    for t in 0..n_frames {
        let row = spectrogram.frame(t);
        for f in 0..n_bins {
            along_bins[t * n_bins + f] = (-before..=after)
                .map(|offset| row[reflect(f as isize + offset, n_bins)])
                .fold(f32::NEG_INFINITY, f32::max);
        }
    }

    let mut values = vec![0.0f32; n_frames * n_bins];
    for t in 0..n_frames {
        for f in 0..n_bins {
            values[t * n_bins + f] = (-before..=after)
                .map(|offset| along_bins[reflect(t as isize + offset, n_frames) * n_bins + f])
                .fold(f32::NEG_INFINITY, f32::max);
        }
    }

    Spectrogram {
        n_frames,
        n_bins,
        values,
    }
}

fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let m = index.rem_euclid(period);
    (if m >= len { period - m - 1 } else { m }) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n_frames: usize, n_bins: usize, fill: f32) -> Vec<Vec<f32>> {
        vec![vec![fill; n_bins]; n_frames]
    }

    #[test]
    fn test_reflect_mirrors_edges() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn test_single_spike_is_single_peak() {
        let mut frames = grid(12, 16, 0.0);
        frames[5][7] = 40.0;
        let spectrogram = Spectrogram::from_frames(frames);

        for size in [1, 2, 3, 5, 10] {
            let peaks = find_peaks(&spectrogram, 10.0, size);
            assert_eq!(peaks, vec![AudioPeak::new(5, 7)], "neighborhood {size}");
        }
    }

    #[test]
    fn test_spike_below_floor_is_ignored() {
        let mut frames = grid(6, 6, 0.0);
        frames[2][2] = 10.0;
        let peaks = find_peaks(&Spectrogram::from_frames(frames), 10.0, 3);
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_plateau_yields_clustered_peaks() {
        let mut frames = grid(8, 8, 0.0);
        frames[3][4] = 30.0;
        frames[4][4] = 30.0;
        let peaks = find_peaks(&Spectrogram::from_frames(frames), 10.0, 5);
        assert_eq!(peaks, vec![AudioPeak::new(3, 4), AudioPeak::new(4, 4)]);
    }

    #[test]
    fn test_neighborhood_suppresses_weaker_maxima() {
        let mut frames = grid(10, 10, 0.0);
        frames[2][2] = 30.0;
        frames[4][4] = 20.0;
        let spectrogram = Spectrogram::from_frames(frames);

        assert_eq!(find_peaks(&spectrogram, 10.0, 3).len(), 2);
        assert_eq!(
            find_peaks(&spectrogram, 10.0, 8),
            vec![AudioPeak::new(2, 2)]
        );
    }

    #[test]
    fn test_peaks_are_time_major() {
        let mut frames = grid(10, 10, 0.0);
        frames[1][8] = 30.0;
        frames[6][1] = 30.0;
        frames[6][8] = 30.0;
        let peaks = find_peaks(&Spectrogram::from_frames(frames), 10.0, 3);
        assert_eq!(
            peaks,
            vec![AudioPeak::new(1, 8), AudioPeak::new(6, 1), AudioPeak::new(6, 8)]
        );
        assert!(peaks.windows(2).all(|w| w[0].time_bin <= w[1].time_bin));
    }

    #[test]
    fn test_stft_shape() {
        let frames = stft_magnitude(&[0.0; 44_100], 2048, 512);
        assert_eq!(frames.len(), 1 + 44_100 / 512);
        assert!(frames.iter().all(|f| f.len() == 1025));

        let empty = stft_magnitude(&[], 2048, 512);
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn test_bin_centred_tone_peaks_at_its_bin() {
        // 40 cycles per 2048 samples lands exactly on bin 40.
        let samples: Vec<f32> = (0..8192)
            .map(|n| 0.5 * (2.0 * PI * 40.0 * (n % 2048) as f32 / 2048.0).sin())
            .collect();
        let fingerprinter = AudioFingerprinter::new(AudioConfig::default());
        let spectrogram = fingerprinter.spectrogram_db(&samples);

        let frame = spectrogram.frame(8);
        let loudest = (0..frame.len())
            .max_by(|&a, &b| frame[a].total_cmp(&frame[b]))
            .unwrap();
        assert_eq!(loudest, 40);
    }

    #[test]
    fn test_db_clipping() {
        let close = |a: f32, b: f32| (a - b).abs() < 1e-3;

        let spectrogram = amplitude_to_db(vec![vec![1000.0, 1.0, 0.0]], Some(80.0));
        assert!(close(spectrogram.get(0, 0), 60.0));
        assert_eq!(spectrogram.get(0, 1), 0.0);
        assert!(close(spectrogram.get(0, 2), -20.0));

        let unclipped = amplitude_to_db(vec![vec![0.0]], None);
        assert!(close(unclipped.get(0, 0), -100.0));
    }

    #[test]
    fn test_silence_has_no_peaks() {
        let fingerprinter = AudioFingerprinter::new(AudioConfig::default());
        assert!(fingerprinter.fingerprint(&[0.0; 22_050]).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let samples: Vec<f32> = (0..22_050)
            .map(|n| (n as f32 * 0.05).sin() * 0.4 + (n as f32 * 0.31).sin() * 0.2)
            .collect();
        let fingerprinter = AudioFingerprinter::new(AudioConfig::default());
        let first = fingerprinter.fingerprint(&samples);
        let second = fingerprinter.fingerprint(&samples);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }
}
