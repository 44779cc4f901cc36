//! Palette reduction and animated GIF encoding.
//!
//! True-color RGBA frames are reduced to at most 256 colors with an octree
//! histogram, optionally dithered onto that palette, and written as a GIF89a
//! stream in which identical consecutive frames are merged.
//!
//! ```no_run
//! use std::time::Duration;
//! use octogif::{gif::{GifConfig, GifSequenceWriter}, ImgVec, RGBA8};
//!
//! let frame = ImgVec::new(vec![RGBA8::new(255, 0, 0, 255); 16 * 16], 16, 16);
//! let mut out = Vec::new();
//! let mut writer = GifSequenceWriter::new(&mut out, GifConfig::new())?;
//! writer.add_frame(Duration::from_millis(100), frame.as_ref())?;
//! writer.finish()?;
//! # Ok::<(), octogif::GifError>(())
//! ```

#![forbid(unsafe_code)]

pub mod dither;
pub mod error;
pub mod gif;
pub mod histogram;
pub mod image;
pub mod lzw;
pub mod palette;
pub mod progress;
pub mod remap;

pub use dither::DitherAlgorithm;
pub use error::{GifError, ReduceError};
pub use image::IndexedImage;
pub use imgref::{ImgRef, ImgVec};
pub use palette::Palette;
pub use progress::{Job, Progress};
pub use rgb::{RGB8, RGBA8};

use histogram::ColorTree;
use palette::is_transparent;
use progress::{into_ok, uncancellable, Cancelled};

/// Configuration for palette reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceConfig {
    /// Maximum number of palette entries (2..=256), transparent entry included.
    pub max_colors: u32,
    /// Error diffusion to use; `None` maps every pixel to its nearest entry.
    pub dither: Option<DitherAlgorithm>,
    /// Composite non-opaque images over this color instead of keeping a
    /// transparent palette entry.
    pub background: Option<RGB8>,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            max_colors: 256,
            dither: None,
            background: None,
        }
    }
}

impl ReduceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_colors(mut self, n: u32) -> Self {
        self.max_colors = n;
        self
    }

    pub fn dither(mut self, algorithm: DitherAlgorithm) -> Self {
        self.dither = Some(algorithm);
        self
    }

    pub fn no_dither(mut self) -> Self {
        self.dither = None;
        self
    }

    pub fn background(mut self, color: RGB8) -> Self {
        self.background = Some(color);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ReduceError> {
        if !(2..=256).contains(&self.max_colors) {
            return Err(ReduceError::InvalidMaxColors(self.max_colors));
        }
        Ok(())
    }
}

/// Reduce an RGBA image to an indexed image with at most
/// `config.max_colors` palette entries.
pub fn reduce_colors(
    pixels: &[RGBA8],
    width: usize,
    height: usize,
    config: &ReduceConfig,
) -> Result<IndexedImage, ReduceError> {
    validate_inputs(pixels, width, height)?;
    config.validate()?;
    Ok(into_ok(reduce_with(pixels, width, height, config, uncancellable)))
}

/// Like [`reduce_colors`], reporting to `progress` and honouring its cancel
/// flag. The progress maximum is twice the pixel count: one pass to build
/// the histogram and one to map pixels; the counter restarts from zero on
/// every call. A cancelled run returns `Ok(None)`.
pub fn reduce_colors_with_progress(
    pixels: &[RGBA8],
    width: usize,
    height: usize,
    config: &ReduceConfig,
    progress: &Progress,
) -> Result<Option<IndexedImage>, ReduceError> {
    validate_inputs(pixels, width, height)?;
    config.validate()?;
    progress.start(2 * pixels.len() as u64);
    match reduce_with(pixels, width, height, config, || progress.step()) {
        Ok(image) => Ok(Some(image)),
        Err(Cancelled) => {
            tracing::debug!("color reduction cancelled");
            Ok(None)
        }
    }
}

/// Run [`reduce_colors_with_progress`] on a worker thread.
pub fn spawn_reduce(
    image: ImgVec<RGBA8>,
    config: ReduceConfig,
) -> Result<Job<Option<IndexedImage>>, ReduceError> {
    let (pixels, width, height) = image.into_contiguous_buf();
    validate_inputs(&pixels, width, height)?;
    config.validate()?;

    Job::spawn("reduce colors", move |progress: &Progress| {
        progress.start(2 * pixels.len() as u64);
        reduce_with(&pixels, width, height, &config, || progress.step()).ok()
    })
    .map_err(ReduceError::Spawn)
}

fn reduce_with<E>(
    pixels: &[RGBA8],
    width: usize,
    height: usize,
    config: &ReduceConfig,
    mut tick: impl FnMut() -> Result<(), E>,
) -> Result<IndexedImage, E> {
    let flattened;
    let pixels = match config.background {
        Some(bg) if pixels.iter().any(|p| p.a != 255) => {
            flattened = flatten(pixels, bg);
            flattened.as_slice()
        }
        _ => pixels,
    };

    let mut tree = ColorTree::new();
    let mut has_transparency = false;
    for &px in pixels {
        if is_transparent(px) {
            has_transparency = true;
        } else {
            tree.put_pixel(RGB8::new(px.r, px.g, px.b));
        }
        tick()?;
    }

    let budget = config.max_colors as usize - usize::from(has_transparency);
    let colors = tree.reduce_colors(budget);
    let palette = Palette::from_colors(colors, has_transparency);
    tracing::debug!(
        width,
        height,
        palette_len = palette.len(),
        has_transparency,
        dither = ?config.dither,
        "built palette"
    );

    let mut indices = vec![0u8; pixels.len()];
    match config.dither {
        Some(algorithm) => {
            dither::diffuse(pixels, width, &palette, algorithm, &mut indices, &mut tick)?
        }
        None => remap::remap_nearest(pixels, &palette, &mut indices, &mut tick)?,
    }
    Ok(IndexedImage::from_parts(width, height, indices, palette))
}

/// Composite every pixel over `bg`, making the image fully opaque.
fn flatten(pixels: &[RGBA8], bg: RGB8) -> Vec<RGBA8> {
    let blend = |c: u8, b: u8, a: u8| -> u8 {
        let a = a as u32;
        ((c as u32 * a + b as u32 * (255 - a) + 127) / 255) as u8
    };
    pixels
        .iter()
        .map(|p| {
            RGBA8::new(
                blend(p.r, bg.r, p.a),
                blend(p.g, bg.g, p.a),
                blend(p.b, bg.b, p.a),
                255,
            )
        })
        .collect()
}

pub(crate) fn validate_inputs(
    pixels: &[RGBA8],
    width: usize,
    height: usize,
) -> Result<(), ReduceError> {
    if width == 0 || height == 0 {
        return Err(ReduceError::ZeroDimension);
    }
    if width.checked_mul(height) != Some(pixels.len()) {
        return Err(ReduceError::DimensionMismatch {
            len: pixels.len(),
            width,
            height,
        });
    }
    Ok(())
}
