use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;

use crate::error::ReduceError;
use crate::image::IndexedImage;
use crate::palette::{is_transparent, Palette};
use crate::progress::{into_ok, uncancellable, Job, Progress};

/// Error-diffusion kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DitherAlgorithm {
    /// Classic 4-neighbour kernel, full error.
    FloydSteinberg,
    /// Three-row Sierra kernel, full error.
    Sierra3,
    /// Diffuses 3/4 of the error, which keeps highlights and shadows crisp.
    Atkinson,
}

/// `(row offset, column offset, weight)` triples.
type Kernel = &'static [(usize, isize, f32)];

const FLOYD_STEINBERG: Kernel = &[
    (0, 1, 7.0 / 16.0),
    (1, -1, 3.0 / 16.0),
    (1, 0, 5.0 / 16.0),
    (1, 1, 1.0 / 16.0),
];

const SIERRA3: Kernel = &[
    (0, 1, 5.0 / 32.0),
    (0, 2, 3.0 / 32.0),
    (1, -2, 2.0 / 32.0),
    (1, -1, 4.0 / 32.0),
    (1, 0, 5.0 / 32.0),
    (1, 1, 4.0 / 32.0),
    (1, 2, 2.0 / 32.0),
    (2, -1, 2.0 / 32.0),
    (2, 0, 3.0 / 32.0),
    (2, 1, 2.0 / 32.0),
];

const ATKINSON: Kernel = &[
    (0, 1, 1.0 / 8.0),
    (0, 2, 1.0 / 8.0),
    (1, -1, 1.0 / 8.0),
    (1, 0, 1.0 / 8.0),
    (1, 1, 1.0 / 8.0),
    (2, 0, 1.0 / 8.0),
];

impl DitherAlgorithm {
    pub const ALL: [Self; 3] = [Self::FloydSteinberg, Self::Sierra3, Self::Atkinson];

    /// Human-readable name for menus and logs.
    pub fn description(self) -> &'static str {
        match self {
            Self::FloydSteinberg => "Floyd-Steinberg",
            Self::Sierra3 => "Sierra 3-row",
            Self::Atkinson => "Atkinson",
        }
    }

    fn kernel(self) -> Kernel {
        match self {
            Self::FloydSteinberg => FLOYD_STEINBERG,
            Self::Sierra3 => SIERRA3,
            Self::Atkinson => ATKINSON,
        }
    }

    /// Number of carry rows the kernel touches, the current one included.
    fn rows(self) -> usize {
        match self {
            Self::FloydSteinberg => 2,
            Self::Sierra3 | Self::Atkinson => 3,
        }
    }
}

impl core::fmt::Display for DitherAlgorithm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Dither `pixels` onto `palette`, one index per pixel.
///
/// Restarts `progress` with the pixel count as its maximum, advances it once
/// per pixel and returns `Ok(None)` as soon as it is cancelled.
pub fn dither_image(
    pixels: &[RGBA8],
    width: usize,
    height: usize,
    palette: &Palette,
    algorithm: DitherAlgorithm,
    progress: &Progress,
) -> Result<Option<Vec<u8>>, ReduceError> {
    crate::validate_inputs(pixels, width, height)?;
    progress.start(pixels.len() as u64);
    let mut indices = vec![0u8; pixels.len()];
    if diffuse(pixels, width, palette, algorithm, &mut indices, || progress.step()).is_err() {
        tracing::debug!(algorithm = %algorithm, "dithering cancelled");
        return Ok(None);
    }
    Ok(Some(indices))
}

/// Dither a whole image synchronously.
pub fn dither(
    image: ImgRef<'_, RGBA8>,
    palette: Palette,
    algorithm: DitherAlgorithm,
) -> IndexedImage {
    let pixels: Vec<RGBA8> = image.pixels().collect();
    let mut indices = vec![0u8; pixels.len()];
    into_ok(diffuse(&pixels, image.width(), &palette, algorithm, &mut indices, uncancellable));
    IndexedImage::from_parts(image.width(), image.height(), indices, palette)
}

/// Dither on a worker thread. The job's progress maximum is the pixel count.
pub fn spawn_dither(
    image: ImgVec<RGBA8>,
    palette: Palette,
    algorithm: DitherAlgorithm,
) -> Result<Job<Option<IndexedImage>>, ReduceError> {
    let (pixels, width, height) = image.into_contiguous_buf();
    crate::validate_inputs(&pixels, width, height)?;

    Job::spawn("dither", move |progress: &Progress| {
        progress.start(pixels.len() as u64);
        let mut indices = vec![0u8; pixels.len()];
        diffuse(&pixels, width, &palette, algorithm, &mut indices, || progress.step())
            .ok()
            .map(|()| IndexedImage::from_parts(width, height, indices, palette))
    })
    .map_err(ReduceError::Spawn)
}

/// Core error-diffusion loop. `tick` runs after every pixel; an error from
/// it stops the pass and is returned.
pub(crate) fn diffuse<E>(
    pixels: &[RGBA8],
    width: usize,
    palette: &Palette,
    algorithm: DitherAlgorithm,
    out: &mut [u8],
    mut tick: impl FnMut() -> Result<(), E>,
) -> Result<(), E> {
    if width == 0 {
        return Ok(());
    }
    tracing::debug!(
        algorithm = %algorithm,
        palette_len = palette.len(),
        pixels = pixels.len(),
        "dithering image"
    );

    let kernel = algorithm.kernel();
    let transparent = palette.transparent_index();
    let mut carry: Vec<Vec<[f32; 3]>> = vec![vec![[0.0; 3]; width]; algorithm.rows()];

    for (src_row, out_row) in pixels.chunks_exact(width).zip(out.chunks_exact_mut(width)) {
        for (x, (&px, slot)) in src_row.iter().zip(out_row.iter_mut()).enumerate() {
            if let (Some(t), true) = (transparent, is_transparent(px)) {
                *slot = t;
            } else {
                let acc = carry[0][x];
                let desired = [
                    (px.r as f32 + acc[0]).clamp(0.0, 255.0),
                    (px.g as f32 + acc[1]).clamp(0.0, 255.0),
                    (px.b as f32 + acc[2]).clamp(0.0, 255.0),
                ];
                let chosen = palette.nearest_f32(desired);
                *slot = chosen;

                let c = palette.entry(chosen);
                let err = [
                    desired[0] - c.r as f32,
                    desired[1] - c.g as f32,
                    desired[2] - c.b as f32,
                ];
                for &(dy, dx, weight) in kernel {
                    let Some(tx) = x.checked_add_signed(dx).filter(|&tx| tx < width) else {
                        continue;
                    };
                    let cell = &mut carry[dy][tx];
                    cell[0] += err[0] * weight;
                    cell[1] += err[1] * weight;
                    cell[2] += err[2] * weight;
                }
            }
            tick()?;
        }

        carry.rotate_left(1);
        if let Some(last) = carry.last_mut() {
            last.fill([0.0; 3]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgb::RGB8;

    fn make_gradient(width: usize, height: usize) -> Vec<RGBA8> {
        (0..height)
            .flat_map(|_| {
                (0..width).map(move |x| {
                    let v = (x * 255 / (width - 1).max(1)) as u8;
                    RGBA8::new(v, v, v, 255)
                })
            })
            .collect()
    }

    fn black_white() -> Palette {
        Palette::new(vec![RGB8::new(0, 0, 0), RGB8::new(255, 255, 255)], None).unwrap()
    }

    #[test]
    fn kernels_carry_expected_error_fraction() {
        let sum = |a: DitherAlgorithm| a.kernel().iter().map(|k| k.2).sum::<f32>();
        assert!((sum(DitherAlgorithm::FloydSteinberg) - 1.0).abs() < 1e-6);
        assert!((sum(DitherAlgorithm::Sierra3) - 1.0).abs() < 1e-6);
        assert!((sum(DitherAlgorithm::Atkinson) - 0.75).abs() < 1e-6);
        for a in DitherAlgorithm::ALL {
            assert!(a.kernel().iter().all(|k| k.0 < a.rows()));
            // Nothing may flow back into already visited pixels.
            assert!(a.kernel().iter().all(|k| k.0 > 0 || k.1 > 0));
        }
    }

    #[test]
    fn exact_palette_colors_map_without_error() {
        let palette = black_white();
        let pixels = vec![
            RGBA8::new(0, 0, 0, 255),
            RGBA8::new(255, 255, 255, 255),
            RGBA8::new(255, 255, 255, 255),
            RGBA8::new(0, 0, 0, 255),
        ];
        for a in DitherAlgorithm::ALL {
            let out = dither_image(&pixels, 2, 2, &palette, a, &Progress::new())
                .unwrap()
                .unwrap();
            assert_eq!(out, vec![0, 1, 1, 0], "{a}");
        }
    }

    #[test]
    fn mid_gray_alternates() {
        let pixels = vec![RGBA8::new(128, 128, 128, 255); 64];
        let img = dither(
            ImgRef::new(&pixels, 8, 8),
            black_white(),
            DitherAlgorithm::FloydSteinberg,
        );
        let whites = img.indices().iter().filter(|&&i| i == 1).count();
        assert!((24..=40).contains(&whites), "{whites} white pixels");
    }

    #[test]
    fn transparent_pixels_take_transparent_index() {
        let palette = Palette::new(
            vec![RGB8::new(0, 0, 0), RGB8::new(200, 0, 0), RGB8::new(255, 255, 255)],
            Some(2),
        )
        .unwrap();
        let pixels = vec![
            RGBA8::new(250, 250, 250, 10),
            RGBA8::new(190, 5, 5, 255),
            RGBA8::new(255, 255, 255, 255),
        ];
        let out = dither_image(&pixels, 3, 1, &palette, DitherAlgorithm::Atkinson, &Progress::new())
            .unwrap()
            .unwrap();
        assert_eq!(out[0], 2);
        assert_eq!(out[1], 1);
        // Opaque white never lands on the transparent entry.
        assert_ne!(out[2], 2);
    }

    #[test]
    fn deterministic_across_runs() {
        let pixels = make_gradient(37, 11);
        let palette = Palette::new(
            vec![RGB8::new(0, 0, 0), RGB8::new(90, 90, 90), RGB8::new(255, 255, 255)],
            None,
        )
        .unwrap();
        for a in DitherAlgorithm::ALL {
            let first = dither(ImgRef::new(&pixels, 37, 11), palette.clone(), a);
            let second = dither(ImgRef::new(&pixels, 37, 11), palette.clone(), a);
            assert_eq!(first, second);
            assert_eq!(first.palette(), &palette);
        }
    }

    #[test]
    fn cancelled_progress_stops_early() {
        let pixels = make_gradient(16, 16);
        let progress = Progress::new();
        progress.cancel();
        let out = dither_image(&pixels, 16, 16, &black_white(), DitherAlgorithm::Sierra3, &progress)
            .unwrap();
        assert!(out.is_none());
        assert_eq!(progress.snapshot().0, 1);
    }

    #[test]
    fn progress_reaches_pixel_count() {
        let pixels = make_gradient(8, 8);
        let progress = Progress::new();
        for a in DitherAlgorithm::ALL {
            dither_image(&pixels, 8, 8, &black_white(), a, &progress)
                .unwrap()
                .unwrap();
            assert_eq!(progress.snapshot(), (64, 64), "{a}");
        }
    }

    #[test]
    fn spawned_dither_reports_progress() {
        let pixels = make_gradient(20, 5);
        let job = spawn_dither(ImgVec::new(pixels, 20, 5), black_white(), DitherAlgorithm::Atkinson)
            .unwrap();
        let img = job.join().unwrap();
        assert_eq!((img.width(), img.height()), (20, 5));
        assert_eq!(img.row(0)[0], 0);
        assert_eq!(img.row(0)[19], 1);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let pixels = make_gradient(4, 4);
        let progress = Progress::new();
        let r = dither_image(&pixels, 5, 4, &black_white(), DitherAlgorithm::Atkinson, &progress);
        assert!(matches!(r, Err(ReduceError::DimensionMismatch { .. })));
    }
}
