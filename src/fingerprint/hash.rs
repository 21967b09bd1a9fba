use image::{GrayImage, Luma, RgbImage};
use rayon::prelude::*;
use tracing::debug;

use super::{FrameHash, VideoFingerprint};
use crate::config::VideoConfig;
use crate::error::{Error, Result};

pub struct VideoFingerprinter {
    config: VideoConfig,
}

impl VideoFingerprinter {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn hash_frame(&self, frame: &RgbImage) -> FrameHash {
        let luma = image::imageops::grayscale(frame);
        let grid = area_resize(&luma, self.config.hash_size, self.config.hash_size);
        average_hash(&grid)
    }

    /// Hash a stream of frames, keeping at most one batch decoded at a time.
    ///
    /// Frames inside a batch are hashed on the rayon pool; the result always
    /// follows source order.
    pub fn fingerprint<I>(&self, frames: I) -> Result<VideoFingerprint>
    where
        I: IntoIterator<Item = Result<RgbImage>>,
    {
        let batch_size = self.config.batch_size.max(1);
        let mut hashes = Vec::new();
        let mut batch = Vec::with_capacity(batch_size);

        for frame in frames {
            batch.push(frame?);
            if batch.len() == batch_size {
                self.hash_batch(&mut batch, &mut hashes);
            }
        }
        self.hash_batch(&mut batch, &mut hashes);

        debug!(frames = hashes.len(), "Hashed video frames");
        Ok(VideoFingerprint::new(hashes))
    }

    fn hash_batch(&self, batch: &mut Vec<RgbImage>, out: &mut Vec<FrameHash>) {
        if batch.len() == 1 {
            out.push(self.hash_frame(&batch[0]));
        } else if !batch.is_empty() {
            let hashed: Vec<FrameHash> = batch
                .par_iter()
                .map(|frame| self.hash_frame(frame))
                .collect();
            out.extend(hashed);
        }
        batch.clear();
    }
}

/// One bit per pixel, set when the pixel is strictly brighter than the grid
/// mean, in row-major order.
pub fn average_hash(grid: &GrayImage) -> FrameHash {
    let pixels = grid.as_raw();
    if pixels.is_empty() {
        return FrameHash::from_bits(std::iter::empty());
    }
    let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / pixels.len() as f64;
    FrameHash::from_bits(pixels.iter().map(|&p| f64::from(p) > mean))
}

/// Area-averaging resize: every output pixel is the coverage-weighted mean
/// of the source pixels under its footprint, rounded to the nearest level.
pub fn area_resize(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 {
        return GrayImage::new(width, height);
    }
    if (src_w, src_h) == (width, height) {
        return src.clone();
    }

    let x_spans = coverage(src_w, width);
    let y_spans = coverage(src_h, height);

    let mut out = GrayImage::new(width, height);
    for (y, rows) in y_spans.iter().enumerate() {
        for (x, cols) in x_spans.iter().enumerate() {
            let mut sum = 0.0f64;
            let mut weight = 0.0f64;
            for &(sy, wy) in rows {
                for &(sx, wx) in cols {
                    let w = wy * wx;
                    sum += f64::from(src.get_pixel(sx, sy)[0]) * w;
                    weight += w;
                }
            }
            let value = (sum / weight).round().clamp(0.0, 255.0) as u8;
            out.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
    out
}

/// For each destination index, the source indices it covers and by how much.
fn coverage(src_len: u32, dst_len: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = f64::from(src_len) / f64::from(dst_len);
    (0..dst_len)
        .map(|d| {
            let start = f64::from(d) * scale;
            let end = start + scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src_len);
            (first..last.max(first + 1))
                .filter_map(|s| {
                    let lo = start.max(f64::from(s));
                    let hi = end.min(f64::from(s + 1));
                    (hi > lo).then_some((s.min(src_len - 1), hi - lo))
                })
                .collect()
        })
        .collect()
}

pub fn hamming_distance(hash1: &FrameHash, hash2: &FrameHash) -> Result<u32> {
    if hash1.len() != hash2.len() {
        return Err(Error::InvalidSettings(
            "hashes must be the same length".to_string(),
        ));
    }
    Ok(hash1
        .as_bytes()
        .iter()
        .zip(hash2.as_bytes())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum())
}
