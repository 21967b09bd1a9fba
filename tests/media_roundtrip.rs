//! Encoded video on disk: clips are written with the transform encoder, then
//! fingerprinted, edited and exported through FFmpeg.

use std::collections::HashSet;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use content_fingerprint::transform::codec::{decode_clip, encode_clip};
use content_fingerprint::transform::{
    AudioTrack, Clip, EncodeSettings, ResizeOptions, Step, TextOptions,
};
use content_fingerprint::{
    ContentFingerprint, Fingerprint, FingerprintConfig, FingerprintSet, MediaTransformPipeline,
    MediaType, TransformSettings,
};
use image::{Rgb, RgbImage};

const FRAMES: usize = 7;
const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

/// Bright left part, dark right part. Splits on multiples of 8 stay distinct
/// after lossy coding.
fn split_frame(split: u32) -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, _| {
        if x < split {
            Rgb([220, 220, 220])
        } else {
            Rgb([20, 20, 20])
        }
    })
}

fn sine(freq: f32, secs: f32, rate: u32) -> Vec<f32> {
    let count = (secs * rate as f32) as usize;
    (0..count)
        .map(|n| 0.3 * (2.0 * PI * freq * n as f32 / rate as f32).sin())
        .collect()
}

fn write_clip(dir: &Path) -> PathBuf {
    let clip = Clip {
        frames: (1..=FRAMES as u32).map(|i| split_frame(i * 8)).collect(),
        frame_rate: 25.0,
        audio: Some(AudioTrack {
            samples: sine(440.0, 0.5, 44_100),
            channels: 1,
            sample_rate: 44_100,
        }),
    };
    let path = dir.join("clip.mp4");
    encode_clip(&clip, &path, &EncodeSettings::default()).unwrap();
    path
}

#[test]
fn test_encoded_video_fingerprints_one_hash_per_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path());

    let item = ContentFingerprint::open(&path, FingerprintConfig::default()).unwrap();
    assert_eq!(item.media_type(), MediaType::Video);

    let fingerprint = item.fingerprint().unwrap();
    let Fingerprint::Video(video) = &fingerprint else {
        panic!("expected video fingerprint");
    };
    assert_eq!(video.len(), FRAMES);
    let distinct: HashSet<_> = video.frames.iter().collect();
    assert_eq!(distinct.len(), FRAMES);

    let report = item.compare(&FingerprintSet::from(fingerprint)).unwrap();
    assert_eq!(report.video_similarity, Some(1.0));
    assert_eq!(report.audio_similarity, None);
    assert_eq!(report.overall_similarity, 1.0);
}

#[test]
fn test_decoded_clip_keeps_frames_and_audio() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path());

    let clip = decode_clip(&path).unwrap();
    assert_eq!(clip.frames.len(), FRAMES);
    assert_eq!(clip.dimensions(), (WIDTH, HEIGHT));
    assert!((clip.frame_rate - 25.0).abs() < 0.01, "{}", clip.frame_rate);

    let audio = clip.audio.expect("audio track");
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.sample_rate, 44_100);
    assert!(audio.len() >= 20_000, "decoded {} samples", audio.len());
}

#[test]
fn test_pipeline_resizes_and_captions_video() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_clip(dir.path());
    let output = dir.path().join("edited").join("out.mp4");

    let settings = TransformSettings {
        resize: Step::enabled(ResizeOptions {
            width: Some(32),
            height: Some(24),
        }),
        overlay_text: Step::enabled(TextOptions {
            text: "Hi".to_string(),
            fontsize: 12,
            ..TextOptions::default()
        }),
        ..TransformSettings::default()
    };
    MediaTransformPipeline::new(settings)
        .unwrap()
        .run(&input, &output)
        .unwrap();

    let edited = decode_clip(&output).unwrap();
    assert_eq!(edited.frames.len(), FRAMES);
    assert_eq!(edited.dimensions(), (32, 24));
    assert!(edited.audio.is_some());
}

#[test]
fn test_keyframes_are_saved_as_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path());
    let frames_dir = dir.path().join("frames");

    let item = ContentFingerprint::open(&path, FingerprintConfig::default()).unwrap();
    let written = item.save_keyframes(&frames_dir, "png").unwrap();
    assert_eq!(written.len(), FRAMES);
    assert_eq!(written[0], frames_dir.join("frame_0.png"));

    for file in &written {
        let image = image::open(file).unwrap();
        assert_eq!((image.width(), image.height()), (WIDTH, HEIGHT));
    }
}
