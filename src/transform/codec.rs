//! Whole-clip decode and H.264/AAC encode.

use std::path::Path;

use ffmpeg::ChannelLayout;
use ffmpeg::format::{Pixel, Sample, sample::Type as SampleType};
use ffmpeg::software::resampling::Context as Resampler;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::{Packet, Rational, codec, encoder};
use ffmpeg_next as ffmpeg;
use tracing::{debug, instrument};

use super::{AudioTrack, Clip, EncodeSettings};
use crate::error::{Error, Result};
use crate::fingerprint::video::{VideoFrames, image_to_frame, init_ffmpeg, probe};

const AAC_FRAME_SIZE: usize = 1024;

/// Decode every frame and the best audio stream of `path`.
///
/// The clip is silent only when the container has no audio stream.
#[instrument(skip_all, fields(file = ?path.as_ref()))]
pub fn decode_clip<P: AsRef<Path>>(path: P) -> Result<Clip> {
    let path = path.as_ref();
    let info = probe(path)?;
    let frames = VideoFrames::open(path)?.collect::<Result<Vec<_>>>()?;
    let audio = decode_audio(path)?;

    debug!(
        frames = frames.len(),
        audio = audio.is_some(),
        "Decoded clip"
    );
    Ok(Clip {
        frames,
        frame_rate: info.frame_rate,
        audio,
    })
}

/// Decode the best audio stream to interleaved f32 at its own rate.
fn decode_audio(path: &Path) -> Result<Option<AudioTrack>> {
    init_ffmpeg()?;
    let mut input = ffmpeg::format::input(&path)?;

    let Some(stream) = input.streams().best(ffmpeg::media::Type::Audio) else {
        return Ok(None);
    };
    let stream_index = stream.index();
    let mut decoder = codec::context::Context::from_parameters(stream.parameters())?
        .decoder()
        .audio()?;

    let mut collector = AudioCollector::new(&decoder);
    for (stream, packet) in input.packets() {
        if stream.index() == stream_index {
            decoder.send_packet(&packet)?;
            collector.receive(&mut decoder)?;
        }
    }
    decoder.send_eof()?;
    collector.receive(&mut decoder)?;

    debug!(samples = collector.track.len(), "Decoded audio");
    Ok(Some(collector.track))
}

/// Converts decoded frames to packed f32 in the layout and rate of the
/// first frame.
struct AudioCollector {
    resampler: Option<Resampler>,
    output: Option<(ChannelLayout, u32)>,
    track: AudioTrack,
}

impl AudioCollector {
    fn new(decoder: &ffmpeg::decoder::Audio) -> Self {
        Self {
            resampler: None,
            output: None,
            track: AudioTrack {
                samples: Vec::new(),
                channels: decoder.channels(),
                sample_rate: decoder.rate(),
            },
        }
    }

    fn receive(&mut self, decoder: &mut ffmpeg::decoder::Audio) -> Result<()> {
        let mut decoded = AudioFrame::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            self.push(&decoded)?;
        }
        Ok(())
    }

    fn push(&mut self, decoded: &AudioFrame) -> Result<()> {
        let (format, layout, rate) = (
            decoded.format(),
            decoded.channel_layout(),
            decoded.rate(),
        );
        let (out_layout, out_rate) = *self.output.get_or_insert((layout, rate));
        if rate != out_rate {
            return Err(Error::Decode(format!(
                "sample rate changed from {out_rate} to {rate} mid-stream"
            )));
        }
        self.track.channels = u16::try_from(out_layout.channels())
            .map_err(|_| Error::Decode("invalid channel count".to_string()))?;
        self.track.sample_rate = out_rate;

        let stale = self.resampler.as_ref().is_none_or(|r| {
            let input = r.input();
            input.format != format || input.channel_layout != layout
        });
        if stale {
            self.resampler = Some(Resampler::get(
                format,
                layout,
                rate,
                Sample::F32(SampleType::Packed),
                out_layout,
                out_rate,
            )?);
        }

        let mut converted = AudioFrame::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(decoded, &mut converted)?;
        }
        if converted.samples() == 0 {
            return Ok(());
        }

        let len = converted.samples() * usize::from(self.track.channels) * 4;
        let bytes = converted
            .data(0)
            .get(..len)
            .ok_or_else(|| Error::Decode("short audio frame".to_string()))?;
        self.track.samples.extend(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
        );
        Ok(())
    }
}

/// Encode `clip` to `output`. The container is chosen from the extension and
/// the file only appears once it is complete.
#[instrument(skip_all, fields(output = ?output.as_ref()))]
pub fn encode_clip<P: AsRef<Path>>(
    clip: &Clip,
    output: P,
    settings: &EncodeSettings,
) -> Result<()> {
    let output = output.as_ref();
    if clip.frames.is_empty() {
        return Err(Error::Encode("clip has no frames".to_string()));
    }
    init_ffmpeg()?;

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let extension = output
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp4");
    let scratch = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(dir)?
        .into_temp_path();

    write_container(clip, &scratch, settings)?;
    scratch.persist(output).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn write_container(clip: &Clip, path: &Path, settings: &EncodeSettings) -> Result<()> {
    let mut octx = ffmpeg::format::output(&path)?;
    let global_header = octx
        .format()
        .flags()
        .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

    let mut video = VideoSink::new(&mut octx, clip, settings, global_header)?;
    let mut audio = match &clip.audio {
        Some(track) if !track.is_empty() => {
            Some(AudioSink::new(&mut octx, track, settings, global_header)?)
        }
        _ => None,
    };

    octx.write_header()?;

    for (index, image) in clip.frames.iter().enumerate() {
        video.push(&mut octx, image, index as i64)?;
    }
    video.finish(&mut octx)?;

    if let (Some(sink), Some(track)) = (audio.as_mut(), &clip.audio) {
        sink.push_all(&mut octx, track)?;
        sink.finish(&mut octx)?;
    }

    octx.write_trailer()?;
    debug!(frames = clip.frames.len(), "Wrote container");
    Ok(())
}

struct VideoSink {
    encoder: encoder::video::Encoder,
    scaler: Scaler,
    stream_index: usize,
    time_base: Rational,
}

impl VideoSink {
    fn new(
        octx: &mut ffmpeg::format::context::Output,
        clip: &Clip,
        settings: &EncodeSettings,
        global_header: bool,
    ) -> Result<Self> {
        let codec = encoder::find_by_name(&settings.video_codec)
            .ok_or_else(|| Error::Encode(format!("unknown video codec {}", settings.video_codec)))?;

        let (src_w, src_h) = clip.dimensions();
        // 4:2:0 chroma needs even dimensions.
        let width = (src_w & !1).max(2);
        let height = (src_h & !1).max(2);
        let fps = if clip.frame_rate > 0.0 {
            clip.frame_rate
        } else {
            25.0
        };
        let frame_rate = Rational::from(fps);
        let time_base = frame_rate.invert();

        let mut stream = octx.add_stream(codec)?;
        let stream_index = stream.index();

        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        context.set_width(width);
        context.set_height(height);
        context.set_format(Pixel::YUV420P);
        context.set_time_base(time_base);
        context.set_frame_rate(Some(frame_rate));
        if let Some(bitrate) = settings.video_bitrate {
            context.set_bit_rate(bitrate);
        }
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = context.open_as(codec)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        let scaler = Scaler::get(
            Pixel::RGB24,
            src_w,
            src_h,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )?;

        Ok(Self {
            encoder,
            scaler,
            stream_index,
            time_base,
        })
    }

    fn push(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
        image: &image::RgbImage,
        pts: i64,
    ) -> Result<()> {
        let rgb = image_to_frame(image);
        let mut yuv = ffmpeg::util::frame::video::Video::empty();
        self.scaler.run(&rgb, &mut yuv)?;
        yuv.set_pts(Some(pts));
        self.encoder.send_frame(&yuv)?;
        drain(&mut self.encoder, octx, self.stream_index, self.time_base)
    }

    fn finish(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<()> {
        self.encoder.send_eof()?;
        drain(&mut self.encoder, octx, self.stream_index, self.time_base)
    }
}

struct AudioSink {
    encoder: encoder::audio::Encoder,
    layout: ChannelLayout,
    channels: usize,
    frame_size: usize,
    stream_index: usize,
    time_base: Rational,
}

impl AudioSink {
    fn new(
        octx: &mut ffmpeg::format::context::Output,
        track: &AudioTrack,
        settings: &EncodeSettings,
        global_header: bool,
    ) -> Result<Self> {
        let codec = encoder::find_by_name(&settings.audio_codec)
            .ok_or_else(|| Error::Encode(format!("unknown audio codec {}", settings.audio_codec)))?;

        // Extra channels are dropped rather than remapped.
        let (layout, channels) = if track.channels <= 1 {
            (ChannelLayout::MONO, 1)
        } else {
            (ChannelLayout::STEREO, 2)
        };
        let rate = i32::try_from(track.sample_rate)
            .map_err(|_| Error::Encode(format!("sample rate {} out of range", track.sample_rate)))?;
        let time_base = Rational::new(1, rate);

        let mut stream = octx.add_stream(codec)?;
        let stream_index = stream.index();

        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()?;
        context.set_rate(rate);
        context.set_channel_layout(layout);
        context.set_format(Sample::F32(SampleType::Planar));
        context.set_time_base(time_base);
        if let Some(bitrate) = settings.audio_bitrate {
            context.set_bit_rate(bitrate);
        }
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = context.open_as(codec)?;
        let frame_size = match encoder.frame_size() {
            0 => AAC_FRAME_SIZE,
            n => n as usize,
        };
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        Ok(Self {
            encoder,
            layout,
            channels,
            frame_size,
            stream_index,
            time_base,
        })
    }

    fn push_all(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
        track: &AudioTrack,
    ) -> Result<()> {
        let source_channels = usize::from(track.channels.max(1));
        let total = track.len();

        let mut offset = 0;
        while offset < total {
            let count = self.frame_size.min(total - offset);
            let mut frame = AudioFrame::new(Sample::F32(SampleType::Planar), count, self.layout);
            frame.set_rate(track.sample_rate);
            frame.set_pts(Some(offset as i64));

            for channel in 0..self.channels {
                let source = channel.min(source_channels - 1);
                let plane = frame.data_mut(channel);
                for (i, bytes) in plane.chunks_exact_mut(4).take(count).enumerate() {
                    let sample = track.samples[(offset + i) * source_channels + source];
                    bytes.copy_from_slice(&sample.to_ne_bytes());
                }
            }

            self.encoder.send_frame(&frame)?;
            drain(&mut self.encoder, octx, self.stream_index, self.time_base)?;
            offset += count;
        }
        Ok(())
    }

    fn finish(&mut self, octx: &mut ffmpeg::format::context::Output) -> Result<()> {
        self.encoder.send_eof()?;
        drain(&mut self.encoder, octx, self.stream_index, self.time_base)
    }
}

/// Move every packet the encoder has ready into the container.
fn drain(
    encoder: &mut encoder::Encoder,
    octx: &mut ffmpeg::format::context::Output,
    stream_index: usize,
    encoder_time_base: Rational,
) -> Result<()> {
    let stream_time_base = octx
        .stream(stream_index)
        .map(|stream| stream.time_base())
        .ok_or_else(|| Error::Encode(format!("missing output stream {stream_index}")))?;

    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet.write_interleaved(octx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_encode_rejects_empty_clip() {
        let clip = Clip {
            frames: Vec::new(),
            frame_rate: 25.0,
            audio: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("empty.mp4");

        let result = encode_clip(&clip, &output, &EncodeSettings::default());
        assert!(matches!(result, Err(Error::Encode(_))));
        assert!(!output.exists());
    }

    #[test]
    fn test_unknown_codec_leaves_no_output() {
        let clip = Clip {
            frames: vec![RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]))],
            frame_rate: 25.0,
            audio: None,
        };
        let settings = EncodeSettings {
            video_codec: "no-such-codec".to_string(),
            ..EncodeSettings::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");

        let result = encode_clip(&clip, &output, &settings);
        assert!(matches!(result, Err(Error::Encode(_))));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn tone_clip(frames: usize) -> Clip {
        let rate = 44_100;
        let samples = (0..rate / 2)
            .flat_map(|n| {
                let value = 0.3 * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 44_100.0).sin();
                [value, value]
            })
            .collect();
        Clip {
            frames: (0..frames)
                .map(|i| RgbImage::from_pixel(64, 48, Rgb([(i * 30) as u8, 90, 160])))
                .collect(),
            frame_rate: 25.0,
            audio: Some(AudioTrack {
                samples,
                channels: 2,
                sample_rate: 44_100,
            }),
        }
    }

    fn rms(track: &AudioTrack) -> f32 {
        let energy: f32 = track.samples.iter().map(|s| s * s).sum();
        (energy / track.samples.len() as f32).sqrt()
    }

    #[test]
    fn test_audio_track_survives_decode_and_encode() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.mp4");
        let second = dir.path().join("second.mp4");
        let source = tone_clip(5);
        encode_clip(&source, &first, &EncodeSettings::default()).unwrap();

        let decoded = decode_clip(&first).unwrap();
        assert_eq!(decoded.frames.len(), 5);
        let track = decoded.audio.as_ref().expect("audio track");
        assert_eq!(track.channels, 2);
        assert_eq!(track.sample_rate, 44_100);
        assert_eq!(track.samples.len() % 2, 0);
        // AAC adds priming and pads the last frame.
        assert!(track.len() >= 20_000, "decoded {} samples", track.len());
        assert!(rms(track) > 0.1, "rms {}", rms(track));

        encode_clip(&decoded, &second, &EncodeSettings::default()).unwrap();
        let again = decode_clip(&second).unwrap();
        let track = again.audio.as_ref().expect("audio track");
        assert_eq!(track.channels, 2);
        assert!(track.len() >= 20_000, "decoded {} samples", track.len());
        assert!(rms(track) > 0.1, "rms {}", rms(track));
    }

    #[test]
    fn test_clip_without_audio_stream_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("silent.mkv");
        let clip = Clip {
            audio: None,
            ..tone_clip(3)
        };
        encode_clip(&clip, &output, &EncodeSettings::default()).unwrap();

        let decoded = decode_clip(&output).unwrap();
        assert_eq!(decoded.frames.len(), 3);
        assert!(decoded.audio.is_none());
    }
}
