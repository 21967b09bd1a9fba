//! Video editing pipeline driven by a `modify.json`-style settings file.
//!
//! A source is decoded into a [`Clip`], each enabled step rewrites the clip in
//! a fixed order, and the result is encoded to the output path.

pub mod codec;
pub mod effects;
pub mod text;

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::read_json;
use crate::error::{Error, Result};
use crate::fingerprint::MediaType;

/// Interleaved PCM carried alongside the frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioTrack {
    /// Number of sample frames (one sample per channel).
    pub fn len(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Fully decoded media held in memory while it is edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub frames: Vec<RgbImage>,
    pub frame_rate: f64,
    pub audio: Option<AudioTrack>,
}

impl Clip {
    pub fn dimensions(&self) -> (u32, u32) {
        self.frames.first().map_or((0, 0), RgbImage::dimensions)
    }
}

/// One optional pipeline step: `{ "enabled": bool, ...options }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step<T> {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: T,
}

impl<T> Step<T> {
    pub fn enabled(options: T) -> Self {
        Self {
            enabled: true,
            options,
        }
    }

    fn active(&self) -> Option<&T> {
        self.enabled.then_some(&self.options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedOptions {
    pub factor: f64,
}

impl Default for SpeedOptions {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderOptions {
    pub size: u32,
    pub color: [u8; 3],
}

impl Default for BorderOptions {
    fn default() -> Self {
        Self {
            size: 10,
            color: [0, 0, 0],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFilter {
    #[default]
    Grayscale,
    Invert,
    Sepia,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorFilterOptions {
    pub filter_type: ColorFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamedPosition {
    Top,
    Center,
    Bottom,
}

/// Vertical text placement; text is always centred horizontally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextPosition {
    Named(NamedPosition),
    /// Offset of the top of the text from the top of the frame.
    Pixels(u32),
}

impl Default for TextPosition {
    fn default() -> Self {
        TextPosition::Named(NamedPosition::Bottom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOptions {
    pub text: String,
    pub position: TextPosition,
    pub fontsize: u32,
    pub color: String,
    /// Font file; FFmpeg's default font when absent.
    pub font: Option<PathBuf>,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            position: TextPosition::default(),
            fontsize: 24,
            color: "white".to_string(),
            font: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReverseOptions {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchOptions {
    pub pitch_factor: f32,
}

impl Default for PitchOptions {
    fn default() -> Self {
        Self { pitch_factor: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub audio_codec: String,
    /// Bits per second; encoder default when absent.
    pub video_bitrate: Option<usize>,
    pub audio_bitrate: Option<usize>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            video_bitrate: None,
            audio_bitrate: None,
        }
    }
}

/// Edits applied by [`MediaTransformPipeline`], in application order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    pub resize: Step<ResizeOptions>,
    pub change_speed: Step<SpeedOptions>,
    pub add_border: Step<BorderOptions>,
    pub apply_color_filter: Step<ColorFilterOptions>,
    pub overlay_text: Step<TextOptions>,
    pub reverse_video: Step<ReverseOptions>,
    pub adjust_audio_pitch: Step<PitchOptions>,
    pub output: EncodeSettings,
}

impl TransformSettings {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Self = read_json(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject options that cannot produce a clip. Disabled steps are not
    /// checked.
    pub fn validate(&self) -> Result<()> {
        let resize = self.resize.active();
        if resize.is_some_and(|r| r.width == Some(0) || r.height == Some(0)) {
            return Err(Error::InvalidSettings(
            "resize dimensions must be > 0".to_string(),
        ));
        }
        let speed = self.change_speed.active();
        if let Some(speed) = speed.filter(|s| !(s.factor.is_finite() && s.factor > 0.0)) {
            return Err(Error::InvalidSettings(format!(
                "speed factor must be a positive number, got {}",
                speed.factor
            )));
        }
        if self.overlay_text.active().is_some_and(|t| t.fontsize == 0) {
            return Err(Error::InvalidSettings("fontsize must be > 0".to_string()));
        }
        let pitch = self.adjust_audio_pitch.active();
        if let Some(pitch) = pitch.filter(|p| !(0.0..f32::INFINITY).contains(&p.pitch_factor)) {
            return Err(Error::InvalidSettings(format!(
                "pitch factor must be a non-negative number, got {}",
                pitch.pitch_factor
            )));
        }
        if self.output.video_codec.is_empty() || self.output.audio_codec.is_empty() {
            return Err(Error::InvalidSettings(
            "output codecs must be named".to_string(),
        ));
        }
        Ok(())
    }
}

pub struct MediaTransformPipeline {
    settings: TransformSettings,
}

impl MediaTransformPipeline {
    pub fn new(settings: TransformSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    /// Apply every enabled step, in the fixed order of [`TransformSettings`].
    pub fn apply(&self, mut clip: Clip) -> Result<Clip> {
        let s = &self.settings;

        if let Some(resize) = s.resize.active() {
            clip = effects::resize(clip, resize.width, resize.height)?;
            debug!(dimensions = ?clip.dimensions(), "Resized");
        }
        if let Some(speed) = s.change_speed.active() {
            clip = effects::change_speed(clip, speed.factor)?;
            debug!(
                factor = speed.factor,
                frames = clip.frames.len(),
                "Changed speed"
            );
        }
        if let Some(border) = s.add_border.active() {
            clip = effects::add_border(clip, border.size, border.color);
            debug!(size = border.size, "Added border");
        }
        if let Some(filter) = s.apply_color_filter.active() {
            clip = effects::color_filter(clip, filter.filter_type);
            debug!(filter = ?filter.filter_type, "Applied color filter");
        }
        if let Some(options) = s.overlay_text.active() {
            text::overlay_text(&mut clip.frames, options)?;
            debug!(text = %options.text, "Overlaid text");
        }
        if s.reverse_video.enabled {
            clip = effects::reverse(clip);
            debug!("Reversed clip");
        }
        if let Some(pitch) = s.adjust_audio_pitch.active() {
            clip = effects::scale_volume(clip, pitch.pitch_factor);
            debug!(factor = pitch.pitch_factor, "Adjusted audio gain");
        }

        Ok(clip)
    }

    /// Decode `input`, apply the settings and write the result to `output`.
    #[instrument(skip_all, fields(input = ?input.as_ref(), output = ?output.as_ref()))]
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<()> {
        if MediaType::from_path(input.as_ref())? != MediaType::Video {
            return Err(Error::NotVideo);
        }

        let clip = codec::decode_clip(input.as_ref())?;
        info!(
            frames = clip.frames.len(),
            frame_rate = clip.frame_rate,
            audio = clip.audio.is_some(),
            "Decoded clip"
        );

        let clip = self.apply(clip)?;
        codec::encode_clip(&clip, output.as_ref(), &self.settings.output)?;
        info!(frames = clip.frames.len(), "Wrote edited clip");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const MODIFY_JSON: &str = r#"{
        "resize": {"enabled": true, "width": 40, "height": null},
        "change_speed": {"enabled": false, "factor": 1.5},
        "add_border": {"enabled": true, "size": 2, "color": [255, 0, 0]},
        "apply_color_filter": {"enabled": true, "filter_type": "invert"},
        "overlay_text": {
            "enabled": false, "text": "Sample Text", "position": "bottom",
            "fontsize": 24, "color": "white"
        },
        "reverse_video": {"enabled": true},
        "adjust_audio_pitch": {"enabled": true, "pitch_factor": 0.5}
    }"#;

    fn clip(frames: usize) -> Clip {
        Clip {
            frames: (0..frames)
                .map(|i| RgbImage::from_pixel(20, 10, Rgb([i as u8 * 10, 0, 0])))
                .collect(),
            frame_rate: 25.0,
            audio: Some(AudioTrack {
                samples: vec![0.5, -0.5, 0.25, -0.25],
                channels: 2,
                sample_rate: 44_100,
            }),
        }
    }

    #[test]
    fn test_parse_modify_json() {
        let settings: TransformSettings = serde_json::from_str(MODIFY_JSON).unwrap();

        assert!(settings.resize.enabled);
        assert_eq!(settings.resize.options.width, Some(40));
        assert_eq!(settings.resize.options.height, None);
        assert!(!settings.change_speed.enabled);
        assert_eq!(settings.change_speed.options.factor, 1.5);
        assert_eq!(settings.add_border.options.color, [255, 0, 0]);
        assert_eq!(
            settings.apply_color_filter.options.filter_type,
            ColorFilter::Invert
        );
        assert_eq!(
            settings.overlay_text.options.position,
            TextPosition::Named(NamedPosition::Bottom)
        );
        assert_eq!(settings.output, EncodeSettings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_pixel_text_position() {
        let step: Step<TextOptions> =
            serde_json::from_str(r#"{"enabled": true, "text": "hi", "position": 120}"#).unwrap();
        assert_eq!(step.options.position, TextPosition::Pixels(120));
        assert_eq!(step.options.fontsize, 24);
    }

    #[test]
    fn test_missing_steps_are_disabled() {
        let settings: TransformSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, TransformSettings::default());

        let pipeline = MediaTransformPipeline::new(settings).unwrap();
        assert_eq!(pipeline.apply(clip(3)).unwrap(), clip(3));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut settings = TransformSettings::default();
        settings.change_speed = Step::enabled(SpeedOptions { factor: 0.0 });
        assert!(matches!(
            MediaTransformPipeline::new(settings),
            Err(Error::InvalidSettings(_))
        ));

        let mut settings = TransformSettings::default();
        settings.resize = Step::enabled(ResizeOptions {
            width: Some(0),
            height: None,
        });
        assert!(settings.validate().is_err());

        // Disabled steps are not validated.
        let mut settings = TransformSettings::default();
        settings.change_speed.options.factor = -1.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_apply_runs_steps_in_order() {
        let settings: TransformSettings = serde_json::from_str(MODIFY_JSON).unwrap();
        let pipeline = MediaTransformPipeline::new(settings).unwrap();
        let out = pipeline.apply(clip(3)).unwrap();

        // Resize to 40x10 first, then a 2 px border on every side.
        assert_eq!(out.dimensions(), (44, 14));
        // The border is inverted too, and the last source frame comes first.
        assert_eq!(*out.frames[0].get_pixel(0, 0), Rgb([0, 255, 255]));
        assert_eq!(*out.frames[0].get_pixel(20, 7), Rgb([255 - 20, 255, 255]));
        assert_eq!(*out.frames[2].get_pixel(20, 7), Rgb([255, 255, 255]));

        let audio = out.audio.unwrap();
        assert_eq!(audio.samples, vec![0.125, -0.125, 0.25, -0.25]);
    }

    #[test]
    fn test_run_rejects_audio_input() {
        let pipeline = MediaTransformPipeline::new(TransformSettings::default()).unwrap();
        assert!(matches!(
            pipeline.run("song.mp3", "out.mp4"),
            Err(Error::NotVideo)
        ));
        assert!(matches!(
            pipeline.run("notes.txt", "out.mp4"),
            Err(Error::UnsupportedFormat { .. })
        ));
    }
}
