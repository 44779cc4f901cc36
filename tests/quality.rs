use octogif::dither::{dither, dither_image};
use octogif::remap::remap_pixels;
use octogif::{reduce_colors, DitherAlgorithm, ImgRef, Palette, Progress, ReduceConfig, RGB8, RGBA8};

/// Mean squared RGB error between the source and its indexed rendition.
fn compute_mse(pixels: &[RGBA8], palette: &Palette, indices: &[u8]) -> f32 {
    let mut total = 0.0f32;
    for (p, &idx) in pixels.iter().zip(indices) {
        let q = palette.entries()[idx as usize];
        let d = |a: u8, b: u8| (a as f32 - b as f32).powi(2);
        total += d(p.r, q.r) + d(p.g, q.g) + d(p.b, q.b);
    }
    total / pixels.len() as f32
}

/// Horizontal gray ramp, 0 at the left edge to 255 at the right.
fn gray_ramp(width: usize, height: usize) -> Vec<RGBA8> {
    let mut pixels = Vec::with_capacity(width * height);
    for _ in 0..height {
        for x in 0..width {
            let v = (x * 255 / (width - 1)) as u8;
            pixels.push(RGBA8::new(v, v, v, 255));
        }
    }
    pixels
}

fn gradient_image(width: usize, height: usize) -> Vec<RGBA8> {
    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = ((x + y) * 128 / (width + height).max(1)) as u8;
            pixels.push(RGBA8::new(r, g, b, 255));
        }
    }
    pixels
}

fn black_white() -> Palette {
    Palette::new(vec![RGB8::new(0, 0, 0), RGB8::new(255, 255, 255)], None).unwrap()
}

#[test]
fn atkinson_two_color_ramp_keeps_brightness() {
    let width = 256;
    let height = 32;
    let pixels = gray_ramp(width, height);
    let img = dither(
        ImgRef::new(&pixels, width, height),
        black_white(),
        DitherAlgorithm::Atkinson,
    );

    let source_avg = pixels[..width].iter().map(|p| p.r as f32).sum::<f32>() / width as f32;
    for y in 0..height {
        let row = img.row(y);
        let avg = row.iter().map(|&i| if i == 1 { 255.0 } else { 0.0 }).sum::<f32>() / width as f32;
        assert!(
            (avg - source_avg).abs() <= 255.0 * 0.05,
            "row {y}: average {avg:.1} vs source {source_avg:.1}"
        );
    }
}

#[test]
fn diffusion_beats_thresholding_locally() {
    // Dithered output tracks the ramp's local brightness; a plain
    // nearest-color remap is all black, then all white.
    let width = 256;
    let height = 8;
    let pixels = gray_ramp(width, height);
    let palette = black_white();

    for algorithm in DitherAlgorithm::ALL {
        let dithered = dither_image(&pixels, width, height, &palette, algorithm, &Progress::new())
            .unwrap()
            .unwrap();
        let thresholded = remap_pixels(&pixels, &palette);

        // Compare 32-column bands, skipping the first row.
        let band_error = |indices: &[u8]| -> f32 {
            let mut worst = 0.0f32;
            for start in (0..width).step_by(32) {
                let (mut src, mut out) = (0.0f32, 0.0f32);
                for y in 1..height {
                    let range = y * width + start..y * width + start + 32;
                    src += pixels[range.clone()].iter().map(|p| p.r as f32).sum::<f32>();
                    out += indices[range].iter().map(|&i| i as f32 * 255.0).sum::<f32>();
                }
                let n = (32 * (height - 1)) as f32;
                worst = worst.max((src - out).abs() / n);
            }
            worst
        };

        let dithered_err = band_error(&dithered);
        let threshold_err = band_error(&thresholded);
        assert!(
            dithered_err < threshold_err,
            "{algorithm}: dithered {dithered_err:.1} vs thresholded {threshold_err:.1}"
        );
        assert!(dithered_err < 40.0, "{algorithm}: band error {dithered_err:.1}");
    }
}

#[test]
fn two_color_reduction_keeps_black() {
    let pixels = gray_ramp(256, 4);
    let config = ReduceConfig::new().max_colors(2).dither(DitherAlgorithm::Atkinson);
    let result = reduce_colors(&pixels, 256, 4, &config).unwrap();
    let entries = result.palette().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], RGB8::new(0, 0, 0));
    assert!(result.indices().iter().all(|&i| i < 2));
}

#[test]
fn more_colors_lower_mse() {
    let pixels = gradient_image(64, 64);

    let mut prev_mse = f32::MAX;
    for max in [4u32, 16, 64, 256] {
        let result = reduce_colors(&pixels, 64, 64, &ReduceConfig::new().max_colors(max)).unwrap();
        let mse = compute_mse(&pixels, result.palette(), result.indices());
        assert!(
            mse <= prev_mse,
            "MSE grew with more colors: {max} colors gave {mse:.1}, previous {prev_mse:.1}"
        );
        prev_mse = mse;
    }
}

#[test]
fn gradient_produces_reasonable_quality() {
    let pixels = gradient_image(64, 64);
    let result = reduce_colors(&pixels, 64, 64, &ReduceConfig::new()).unwrap();
    let mse = compute_mse(&pixels, result.palette(), result.indices());

    assert!(mse < 90.0, "MSE too high for 256-color gradient: {mse:.2}");
}
