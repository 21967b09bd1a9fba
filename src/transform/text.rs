//! Caption rendering through FFmpeg's `drawtext` filter.

use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{NamedPosition, TextOptions, TextPosition};
use crate::error::{Error, Result};
use crate::fingerprint::video::{frame_to_image, image_to_frame, init_ffmpeg};

/// Draw `options.text` onto every frame, horizontally centred.
pub fn overlay_text(frames: &mut [RgbImage], options: &TextOptions) -> Result<()> {
    let Some((width, height)) = frames.first().map(RgbImage::dimensions) else {
        return Ok(());
    };
    if options.text.is_empty() {
        return Ok(());
    }
    init_ffmpeg()?;

    let mut graph = build_graph(width, height, options)?;
    let mut filtered = VideoFrame::empty();

    for (index, frame) in frames.iter_mut().enumerate() {
        if frame.dimensions() != (width, height) {
            return Err(Error::InvalidSettings(
                "all frames must share one size to overlay text".to_string(),
            ));
        }
        let mut input = image_to_frame(frame);
        input.set_pts(Some(index as i64));

        graph
            .get("in")
            .ok_or_else(|| Error::Encode("filter graph has no source".to_string()))?
            .source()
            .add(&input)?;
        graph
            .get("out")
            .ok_or_else(|| Error::Encode("filter graph has no sink".to_string()))?
            .sink()
            .frame(&mut filtered)?;

        *frame = frame_to_image(&filtered)?;
    }
    Ok(())
}

fn build_graph(width: u32, height: u32, options: &TextOptions) -> Result<ffmpeg::filter::Graph> {
    let mut graph = ffmpeg::filter::Graph::new();

    let buffer = ffmpeg::filter::find("buffer")
        .ok_or_else(|| Error::Encode("FFmpeg has no buffer filter".to_string()))?;
    let sink = ffmpeg::filter::find("buffersink")
        .ok_or_else(|| Error::Encode("FFmpeg has no buffersink filter".to_string()))?;

    let args = format!("video_size={width}x{height}:pix_fmt=rgb24:time_base=1/25:pixel_aspect=1/1");
    graph.add(&buffer, "in", &args)?;
    graph.add(&sink, "out", "")?;

    graph
        .output("in", 0)?
        .input("out", 0)?
        .parse(&drawtext_spec(options))?;
    graph.validate()?;
    Ok(graph)
}

/// Filter description for one caption, converted back to RGB24.
fn drawtext_spec(options: &TextOptions) -> String {
    let y = match options.position {
        TextPosition::Named(NamedPosition::Top) => "0".to_string(),
        TextPosition::Named(NamedPosition::Center) => "(h-text_h)/2".to_string(),
        TextPosition::Named(NamedPosition::Bottom) => "h-text_h".to_string(),
        TextPosition::Pixels(offset) => offset.to_string(),
    };

    let mut spec = format!(
        "drawtext=expansion=none:text={}:fontsize={}:fontcolor={}:x=(w-text_w)/2:y={}",
        escape_drawtext(&options.text),
        options.fontsize,
        escape_drawtext(&options.color),
        y,
    );
    if let Some(font) = &options.font {
        spec.push_str(":fontfile=");
        spec.push_str(&escape_drawtext(&font.to_string_lossy()));
    }
    spec.push_str(",format=rgb24");
    spec
}

/// Escape a value for an option of a filter inside a filtergraph description.
///
/// The option parser and the graph parser each consume one level of
/// backslashes, so the value is escaped for both in turn.
pub fn escape_drawtext(value: &str) -> String {
    escape_chars(
        &escape_chars(value, &['\\', '\'', ':']),
        &['\\', '\'', '[', ']', ',', ';'],
    )
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
