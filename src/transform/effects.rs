use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use super::{AudioTrack, Clip, ColorFilter};
use crate::error::{Error, Result};

/// Resize every frame; a missing side keeps the source size.
pub fn resize(mut clip: Clip, width: Option<u32>, height: Option<u32>) -> Result<Clip> {
    if width == Some(0) || height == Some(0) {
        return Err(Error::InvalidSettings(
            "resize dimensions must be > 0".to_string(),
        ));
    }
    let (src_w, src_h) = clip.dimensions();
    let target = (width.unwrap_or(src_w), height.unwrap_or(src_h));
    if target == (src_w, src_h) {
        return Ok(clip);
    }

    for frame in clip.frames.iter_mut() {
        *frame = imageops::resize(frame, target.0, target.1, FilterType::CatmullRom);
    }
    Ok(clip)
}

/// Play the clip `factor` times faster. Frames are resampled at the original
/// frame rate and the audio is time-scaled with it, so pitch shifts too.
pub fn change_speed(mut clip: Clip, factor: f64) -> Result<Clip> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(Error::InvalidSettings(format!(
            "speed factor must be a positive number, got {factor}"
        )));
    }

    let source_len = clip.frames.len();
    if source_len > 0 {
        let target_len = ((source_len as f64 / factor).round() as usize).max(1);
        let source = std::mem::take(&mut clip.frames);
        clip.frames = (0..target_len)
            .map(|i| {
                let index = ((i as f64 * factor) as usize).min(source_len - 1);
                source[index].clone()
            })
            .collect();
    }

    if let Some(track) = clip.audio.as_mut() {
        track.samples = stretch(track, factor);
    }
    Ok(clip)
}

/// Linear-interpolated time scaling of interleaved samples.
fn stretch(track: &AudioTrack, factor: f64) -> Vec<f32> {
    let channels = usize::from(track.channels.max(1));
    let source_len = track.len();
    if source_len == 0 {
        return Vec::new();
    }
    let target_len = ((source_len as f64 / factor).round() as usize).max(1);

    let mut out = Vec::with_capacity(target_len * channels);
    for j in 0..target_len {
        let position = j as f64 * factor;
        let i0 = (position.floor() as usize).min(source_len - 1);
        let i1 = (i0 + 1).min(source_len - 1);
        let frac = (position - i0 as f64).clamp(0.0, 1.0) as f32;
        for c in 0..channels {
            let a = track.samples[i0 * channels + c];
            let b = track.samples[i1 * channels + c];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

/// Surround every frame with `size` pixels of `color`.
pub fn add_border(mut clip: Clip, size: u32, color: [u8; 3]) -> Clip {
    if size == 0 {
        return clip;
    }
    for frame in clip.frames.iter_mut() {
        let (w, h) = frame.dimensions();
        let mut canvas = RgbImage::from_pixel(w + 2 * size, h + 2 * size, Rgb(color));
        imageops::replace(&mut canvas, frame, i64::from(size), i64::from(size));
        *frame = canvas;
    }
    clip
}

pub fn color_filter(mut clip: Clip, filter: ColorFilter) -> Clip {
    for frame in clip.frames.iter_mut() {
        match filter {
            ColorFilter::Grayscale => {
                let luma = imageops::grayscale(frame);
                *frame = DynamicImage::ImageLuma8(luma).into_rgb8();
            }
            ColorFilter::Invert => imageops::invert(frame),
            ColorFilter::Sepia => {
                for pixel in frame.pixels_mut() {
                    *pixel = sepia(*pixel);
                }
            }
        }
    }
    clip
}

fn sepia(Rgb([r, g, b]): Rgb<u8>) -> Rgb<u8> {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let tone = |wr: f32, wg: f32, wb: f32| (wr * r + wg * g + wb * b).round().min(255.0) as u8;
    Rgb([
        tone(0.393, 0.769, 0.189),
        tone(0.349, 0.686, 0.168),
        tone(0.272, 0.534, 0.131),
    ])
}

/// Play frames and audio backwards.
pub fn reverse(mut clip: Clip) -> Clip {
    clip.frames.reverse();
    if let Some(track) = clip.audio.as_mut() {
        let channels = usize::from(track.channels.max(1));
        track.samples = track
            .samples
            .chunks(channels)
            .rev()
            .flatten()
            .copied()
            .collect();
    }
    clip
}

/// Multiply audio samples by `factor`, clipping to full scale.
pub fn scale_volume(mut clip: Clip, factor: f32) -> Clip {
    if let Some(track) = clip.audio.as_mut() {
        for sample in track.samples.iter_mut() {
            *sample = (*sample * factor).clamp(-1.0, 1.0);
        }
    }
    clip
}
