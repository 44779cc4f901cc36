use rgb::{RGB8, RGBA8};

use crate::palette::{is_transparent, Palette};
use crate::progress::{into_ok, uncancellable};

/// Map every pixel to its nearest palette entry without dithering.
///
/// Transparent pixels take the palette's transparent index when it has one.
pub fn remap_pixels(pixels: &[RGBA8], palette: &Palette) -> Vec<u8> {
    let mut indices = vec![0u8; pixels.len()];
    into_ok(remap_nearest(pixels, palette, &mut indices, uncancellable));
    indices
}

/// Remap into `out`, calling `tick` after each pixel and stopping at its
/// first error.
pub(crate) fn remap_nearest<E>(
    pixels: &[RGBA8],
    palette: &Palette,
    out: &mut [u8],
    mut tick: impl FnMut() -> Result<(), E>,
) -> Result<(), E> {
    let transparent = palette.transparent_index();
    // Flat images repeat the same color a lot; skip the search for runs.
    let mut last: Option<(RGB8, u8)> = None;

    for (&px, slot) in pixels.iter().zip(out.iter_mut()) {
        *slot = match transparent {
            Some(t) if is_transparent(px) => t,
            _ => {
                let color = RGB8::new(px.r, px.g, px.b);
                match last {
                    Some((c, i)) if c == color => i,
                    _ => {
                        let i = palette.nearest(color);
                        last = Some((color, i));
                        i
                    }
                }
            }
        };
        tick()?;
    }
    Ok(())
}
