use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

static FFMPEG_INIT: Once = Once::new();

/// Initialize FFmpeg. Safe to call any number of times.
pub fn init_ffmpeg() -> Result<()> {
    let mut result = Ok(());
    FFMPEG_INIT.call_once(|| {
        result = ffmpeg::init();
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    });
    Ok(result?)
}

/// Container-level facts about a video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration: Option<Duration>,
}

#[instrument(skip_all, fields(file = ?path.as_ref()))]
pub fn probe<P: AsRef<Path>>(path: P) -> Result<VideoInfo> {
    init_ffmpeg()?;
    let input = ffmpeg::format::input(&path)?;

    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| Error::Decode("could not find video stream".to_string()))?;

    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
        .decoder()
        .video()?;

    let seconds = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
    let duration = (input.duration() > 0).then(|| Duration::from_secs_f64(seconds));

    let info = VideoInfo {
        width: decoder.width(),
        height: decoder.height(),
        frame_rate: rational_to_f64(stream.avg_frame_rate()).unwrap_or(25.0),
        duration,
    };
    debug!(?info, "Probed video");
    Ok(info)
}

/// Lazily decoded RGB frames of the best video stream.
///
/// Holds at most one decoded frame at a time; the input is closed when the
/// iterator is dropped.
pub struct VideoFrames {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<Scaler>,
    stream_index: usize,
    decoded: VideoFrame,
    eof_sent: bool,
    finished: bool,
}

impl VideoFrames {
    #[instrument(skip_all, fields(file = ?path.as_ref()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        init_ffmpeg()?;
        let input = ffmpeg::format::input(&path)?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::Decode("could not find video stream".to_string()))?;
        let stream_index = stream.index();

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        Ok(Self {
            input,
            decoder,
            scaler: None,
            stream_index,
            decoded: VideoFrame::empty(),
            eof_sent: false,
            finished: false,
        })
    }

    fn convert(&mut self) -> Result<RgbImage> {
        let (format, width, height) = (
            self.decoded.format(),
            self.decoded.width(),
            self.decoded.height(),
        );
        let stale = self.scaler.as_ref().is_none_or(|s| {
            let input = s.input();
            input.format != format || input.width != width || input.height != height
        });
        if stale {
            self.scaler = Some(Scaler::get(
                format,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                Flags::BILINEAR,
            )?);
        }

        let mut rgb = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(&self.decoded, &mut rgb)?;
        }
        frame_to_image(&rgb)
    }

    fn read_packet(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                if packet.stream() == self.stream_index {
                    self.decoder.send_packet(&packet)?;
                }
                Ok(())
            }
            Err(ffmpeg::Error::Eof) => {
                self.decoder.send_eof()?;
                self.eof_sent = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for VideoFrames {
    type Item = Result<RgbImage>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return Some(self.convert());
            }
            if self.eof_sent {
                self.finished = true;
                break;
            }
            if let Err(e) = self.read_packet() {
                self.finished = true;
                return Some(Err(e));
            }
        }
        None
    }
}

/// Copy an RGB24 frame into an image, honouring the line stride.
pub fn frame_to_image(frame: &VideoFrame) -> Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let row_bytes = width * 3;
    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| Error::Decode("failed to create image buffer from frame".to_string()))
}

/// Copy an image into a freshly allocated RGB24 frame.
pub fn image_to_frame(image: &RgbImage) -> VideoFrame {
    let (width, height) = image.dimensions();
    let mut frame = VideoFrame::new(Pixel::RGB24, width, height);
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;
    let data = frame.data_mut(0);
    for (row, pixels) in image.as_raw().chunks_exact(row_bytes).enumerate() {
        let start = row * stride;
        data[start..start + row_bytes].copy_from_slice(pixels);
    }
    frame
}

pub(crate) fn rational_to_f64(value: ffmpeg::Rational) -> Option<f64> {
    (value.numerator() > 0 && value.denominator() > 0)
        .then(|| f64::from(value.numerator()) / f64::from(value.denominator()))
}
