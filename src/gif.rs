//! Animated GIF89a writer.
//!
//! Frames are buffered one at a time: a frame is only written once the next
//! different frame arrives (or the stream is finished), so a run of identical
//! frames collapses into one image whose delay is the sum of theirs.

use std::io::Write;
use std::time::Duration;

use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;

use crate::error::GifError;
use crate::image::IndexedImage;
use crate::lzw::LzwEncoder;
use crate::palette::{cube_index, Palette};
use crate::ReduceConfig;

const TRAILER: u8 = 0x3B;
const EXTENSION: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const COMMENT_LABEL: u8 = 0xFE;
const APPLICATION_LABEL: u8 = 0xFF;
const MAX_SUB_BLOCK: usize = 255;

/// How true-color frames are turned into indexed images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameQuantization {
    /// Per-frame octree palette.
    Adaptive(ReduceConfig),
    /// Fixed 6x6x6 color cube; fast and stable between frames.
    ColorCube,
}

impl Default for FrameQuantization {
    fn default() -> Self {
        Self::Adaptive(ReduceConfig::default())
    }
}

/// Stream-wide settings.
#[derive(Debug, Clone)]
pub struct GifConfig {
    pub looping: bool,
    /// Text of the comment extension. Must be ASCII; empty means no comment.
    pub comment: String,
    pub quantization: FrameQuantization,
}

impl Default for GifConfig {
    fn default() -> Self {
        Self {
            looping: true,
            comment: format!(
                "Created by {} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            quantization: FrameQuantization::default(),
        }
    }
}

impl GifConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn quantization(mut self, quantization: FrameQuantization) -> Self {
        self.quantization = quantization;
        self
    }
}

/// A frame handed to [`GifSequenceWriter::add_frame`].
#[derive(Debug, Clone)]
pub enum FrameInput<'a> {
    /// Quantized according to the writer's [`FrameQuantization`].
    Rgba(ImgRef<'a, RGBA8>),
    /// Written with its own palette as is.
    Indexed(IndexedImage),
}

impl<'a> From<ImgRef<'a, RGBA8>> for FrameInput<'a> {
    fn from(img: ImgRef<'a, RGBA8>) -> Self {
        Self::Rgba(img)
    }
}

impl<'a> From<&'a ImgVec<RGBA8>> for FrameInput<'a> {
    fn from(img: &'a ImgVec<RGBA8>) -> Self {
        Self::Rgba(img.as_ref())
    }
}

impl From<IndexedImage> for FrameInput<'static> {
    fn from(img: IndexedImage) -> Self {
        Self::Indexed(img)
    }
}

/// What was written for one image of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    /// Delay in hundredths of a second.
    pub delay_cs: u16,
    pub local_color_table: bool,
}

#[derive(Debug)]
struct PendingFrame {
    image: IndexedImage,
    delay: Duration,
}

#[derive(Debug)]
struct Screen {
    width: u16,
    height: u16,
    depth_bits: u8,
    color_table: Vec<u8>,
}

/// Writes a sequence of frames as one animated GIF.
#[derive(Debug)]
pub struct GifSequenceWriter<W: Write> {
    out: W,
    config: GifConfig,
    screen: Option<Screen>,
    header_written: bool,
    pending: Option<PendingFrame>,
    flushed: Vec<FrameRecord>,
    finished: bool,
    lzw: LzwEncoder,
}

impl<W: Write> GifSequenceWriter<W> {
    /// Nothing is written until the first frame is flushed.
    pub fn new(out: W, config: GifConfig) -> Result<Self, GifError> {
        if !config.comment.is_ascii() {
            return Err(GifError::Metadata {
                message: "comment text must be ASCII".into(),
            });
        }
        Ok(Self {
            out,
            config,
            screen: None,
            header_written: false,
            pending: None,
            flushed: Vec::new(),
            finished: false,
            lzw: LzwEncoder::new(),
        })
    }

    /// Queue a frame shown for `delay`.
    ///
    /// The first frame fixes the logical screen size and the global color
    /// table. A frame equal to the previous one only extends its delay.
    pub fn add_frame<'a>(
        &mut self,
        delay: Duration,
        frame: impl Into<FrameInput<'a>>,
    ) -> Result<(), GifError> {
        if self.finished {
            return Err(GifError::Finished);
        }
        let image = self.index_frame(frame.into())?;
        let (width, height) = check_dimensions(image.width(), image.height())?;

        if let Some(screen) = &self.screen {
            if (screen.width, screen.height) != (width, height) {
                return Err(GifError::FrameSize {
                    expected: (screen.width, screen.height),
                    found: (image.width(), image.height()),
                });
            }
        } else {
            let palette = image.palette();
            self.screen = Some(Screen {
                width,
                height,
                depth_bits: palette.depth_bits(),
                color_table: palette.color_table(),
            });
        }

        if let Some(pending) = self.pending.as_mut() {
            if pending.image == image {
                pending.delay = pending.delay.saturating_add(delay);
                tracing::trace!(
                    delay_ms = pending.delay.as_millis() as u64,
                    "coalesced duplicate frame"
                );
                return Ok(());
            }
        }
        if let Some(previous) = self.pending.take() {
            if let Err(err) = self.write_frame(&previous) {
                self.pending = Some(previous);
                return Err(err);
            }
        }
        self.pending = Some(PendingFrame { image, delay });
        Ok(())
    }

    /// Flush the last frame and write the trailer.
    ///
    /// Returns `false`, having written nothing, when no frame was added.
    pub fn finish(&mut self) -> Result<bool, GifError> {
        if self.finished {
            return Err(GifError::Finished);
        }
        self.finished = true;
        let Some(last) = self.pending.take() else {
            tracing::debug!("finished GIF without frames");
            return Ok(false);
        };
        self.write_frame(&last)?;
        self.out.write_all(&[TRAILER])?;
        self.out.flush()?;
        tracing::debug!(frames = self.flushed.len(), "finished GIF");
        Ok(true)
    }

    /// Images written so far, in stream order.
    pub fn flushed_frames(&self) -> &[FrameRecord] {
        &self.flushed
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn index_frame(&self, frame: FrameInput<'_>) -> Result<IndexedImage, GifError> {
        let img = match frame {
            FrameInput::Indexed(img) => return Ok(img),
            FrameInput::Rgba(img) => img,
        };
        check_dimensions(img.width(), img.height())?;
        match &self.config.quantization {
            FrameQuantization::Adaptive(reduce) => {
                let pixels: Vec<RGBA8> = img.pixels().collect();
                Ok(crate::reduce_colors(&pixels, img.width(), img.height(), reduce)?)
            }
            FrameQuantization::ColorCube => {
                let indices = img
                    .pixels()
                    .map(|p| cube_index(rgb::RGB8::new(p.r, p.g, p.b)))
                    .collect();
                Ok(IndexedImage::from_parts(
                    img.width(),
                    img.height(),
                    indices,
                    Palette::color_cube(),
                ))
            }
        }
    }

    fn write_frame(&mut self, frame: &PendingFrame) -> Result<(), GifError> {
        let screen = self.screen.as_ref().ok_or_else(|| GifError::Metadata {
            message: "no logical screen for frame".into(),
        })?;
        let palette = frame.image.palette();
        let table = palette.color_table();
        let depth_bits = palette.depth_bits();
        let local_color_table = table != screen.color_table;

        if let Some(&bad) = frame.image.indices().iter().find(|&&i| i as usize >= palette.len()) {
            return Err(GifError::Metadata {
                message: format!("index {bad} outside a {}-entry color table", palette.len()),
            });
        }

        if !self.header_written {
            write_header(&mut self.out, screen, &self.config)?;
            self.header_written = true;
            tracing::debug!(
                width = screen.width,
                height = screen.height,
                depth_bits = screen.depth_bits,
                looping = self.config.looping,
                "wrote GIF header"
            );
        }

        let delay_cs = delay_centis(frame.delay);
        let [d_lo, d_hi] = delay_cs.to_le_bytes();
        self.out
            .write_all(&[EXTENSION, GRAPHIC_CONTROL_LABEL, 4, 0x00, d_lo, d_hi, 0, 0])?;

        let [w_lo, w_hi] = screen.width.to_le_bytes();
        let [h_lo, h_hi] = screen.height.to_le_bytes();
        let packed = if local_color_table { 0x80 | (depth_bits - 1) } else { 0 };
        self.out
            .write_all(&[IMAGE_SEPARATOR, 0, 0, 0, 0, w_lo, w_hi, h_lo, h_hi, packed])?;
        if local_color_table {
            self.out.write_all(&table)?;
        }

        self.lzw
            .encode(frame.image.indices(), depth_bits.max(2), &mut self.out)?;

        self.flushed.push(FrameRecord {
            delay_cs,
            local_color_table,
        });
        tracing::debug!(
            frame = self.flushed.len() - 1,
            delay_cs,
            local_color_table,
            colors = palette.len(),
            "wrote GIF frame"
        );
        Ok(())
    }
}

fn write_header<W: Write>(
    out: &mut W,
    screen: &Screen,
    config: &GifConfig,
) -> Result<(), GifError> {
    out.write_all(b"GIF89a")?;
    let [w_lo, w_hi] = screen.width.to_le_bytes();
    let [h_lo, h_hi] = screen.height.to_le_bytes();
    out.write_all(&[w_lo, w_hi, h_lo, h_hi, 0xF0 | (screen.depth_bits - 1), 0, 0])?;
    out.write_all(&screen.color_table)?;

    if !config.comment.is_empty() {
        out.write_all(&[EXTENSION, COMMENT_LABEL])?;
        for chunk in config.comment.as_bytes().chunks(MAX_SUB_BLOCK) {
            out.write_all(&[chunk.len() as u8])?;
            out.write_all(chunk)?;
        }
        out.write_all(&[0])?;
    }

    if config.looping {
        out.write_all(&[EXTENSION, APPLICATION_LABEL, 11])?;
        out.write_all(b"NETSCAPE2.0")?;
        // Sub-block 1: loop count, 0 = forever.
        out.write_all(&[3, 1, 0, 0, 0])?;
    }
    Ok(())
}

/// Round to the nearest centisecond, saturating at the field's maximum.
fn delay_centis(delay: Duration) -> u16 {
    let cs = (delay.as_millis() + 5) / 10;
    u16::try_from(cs).unwrap_or(u16::MAX)
}

fn check_dimensions(width: usize, height: usize) -> Result<(u16, u16), GifError> {
    if width == 0 || height == 0 {
        return Err(GifError::Unsupported {
            reason: format!("frame has zero size ({width}x{height})"),
        });
    }
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(GifError::Unsupported {
            reason: format!("{width}x{height} exceeds the 65535 pixel limit"),
        }),
    }
}

/// Encode `frames` into an in-memory animated GIF with a `width`x`height`
/// logical screen.
pub fn encode_animation<'a, I>(
    frames: I,
    width: usize,
    height: usize,
    config: GifConfig,
) -> Result<Vec<u8>, GifError>
where
    I: IntoIterator<Item = (Duration, ImgRef<'a, RGBA8>)>,
{
    let screen = check_dimensions(width, height)?;
    let mut writer = GifSequenceWriter::new(Vec::new(), config)?;
    for (delay, frame) in frames {
        if (frame.width(), frame.height()) != (width, height) {
            return Err(GifError::FrameSize {
                expected: screen,
                found: (frame.width(), frame.height()),
            });
        }
        writer.add_frame(delay, frame)?;
    }
    writer.finish()?;
    Ok(writer.into_inner())
}
