use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;
use tracing::{debug, instrument};

use super::MediaType;
use super::decode::load_mono;
use super::video::{VideoFrames, VideoInfo, init_ffmpeg, probe};
use crate::config::DEFAULT_SAMPLE_RATE;
use crate::error::Result;

/// Decoding boundary between the fingerprinting core and media libraries.
pub trait SignalLoader {
    type Frames: Iterator<Item = Result<RgbImage>>;

    /// Rate of the samples returned by [`SignalLoader::decode_audio`].
    fn sample_rate(&self) -> u32;

    /// Mono PCM at [`SignalLoader::sample_rate`].
    fn decode_audio(&self, path: &Path) -> Result<Vec<f32>>;

    fn probe_video(&self, path: &Path) -> Result<VideoInfo>;

    /// Decoded frames in source order, produced on demand.
    fn decode_video_frames(&self, path: &Path) -> Result<Self::Frames>;
}

/// Symphonia for audio, FFmpeg for video.
#[derive(Debug, Clone)]
pub struct MediaLoader {
    sample_rate: u32,
}

impl MediaLoader {
    pub fn new(sample_rate: u32) -> Result<Self> {
        init_ffmpeg()?;
        Ok(Self { sample_rate })
    }
}

impl SignalLoader for MediaLoader {
    type Frames = VideoFrames;

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn decode_audio(&self, path: &Path) -> Result<Vec<f32>> {
        load_mono(path, self.sample_rate)
    }

    fn probe_video(&self, path: &Path) -> Result<VideoInfo> {
        probe(path)
    }

    fn decode_video_frames(&self, path: &Path) -> Result<VideoFrames> {
        VideoFrames::open(path)
    }
}

#[derive(Debug, Clone)]
pub enum MediaPayload {
    /// Mono samples, released with the handle.
    Audio(Vec<f32>),
    /// Frames are decoded lazily from the source path.
    Video(VideoInfo),
}

/// A classified, opened media source.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    path: PathBuf,
    media_type: MediaType,
    duration: Option<Duration>,
    payload: MediaPayload,
}

impl MediaHandle {
    /// Classify `path` and decode (audio) or probe (video) it.
    ///
    /// Unsupported extensions fail before the loader is touched.
    #[instrument(skip_all, fields(file = ?path.as_ref()))]
    pub fn open<P: AsRef<Path>, L: SignalLoader>(path: P, loader: &L) -> Result<Self> {
        let path = path.as_ref();
        let media_type = MediaType::from_path(path)?;

        let (duration, payload) = match media_type {
            MediaType::Audio => {
                let samples = loader.decode_audio(path)?;
                let rate = loader.sample_rate().max(1);
                let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(rate));
                (Some(duration), MediaPayload::Audio(samples))
            }
            MediaType::Video => {
                let info = loader.probe_video(path)?;
                (info.duration, MediaPayload::Video(info))
            }
        };

        debug!(%media_type, ?duration, "Opened media");
        Ok(Self {
            path: path.to_path_buf(),
            media_type,
            duration,
            payload,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn payload(&self) -> &MediaPayload {
        &self.payload
    }

    pub fn samples(&self) -> Option<&[f32]> {
        match &self.payload {
            MediaPayload::Audio(samples) => Some(samples),
            MediaPayload::Video(_) => None,
        }
    }
}

impl Default for MediaLoader {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}
