use rgb::{RGB8, RGBA8};

/// Pixels with an alpha value below this are treated as fully transparent.
pub const TRANSPARENCY_THRESHOLD: u8 = 0x80;

/// Largest number of entries a GIF color table can hold.
pub const MAX_PALETTE_LEN: usize = 256;

/// Color used for the reserved transparent entry.
pub const TRANSPARENT_COLOR: RGB8 = RGB8 {
    r: 0xFF,
    g: 0xFF,
    b: 0xFF,
};

/// Whether a pixel counts as transparent for palette building and remapping.
#[inline]
pub fn is_transparent(pixel: RGBA8) -> bool {
    pixel.a < TRANSPARENCY_THRESHOLD
}

/// Channel levels of the 6x6x6 default color cube.
const CUBE_LEVELS: [u8; 6] = [0, 51, 102, 153, 204, 255];

/// Default palette used when frames are reduced without a histogram:
/// 216 cube colors, 38 grays and white. 255 entries, so a 256th slot
/// stays free for a transparent entry.
pub const COLOR_CUBE: [RGB8; 255] = build_color_cube();

const fn build_color_cube() -> [RGB8; 255] {
    let mut table = [RGB8 { r: 0, g: 0, b: 0 }; 255];
    let mut p = 0;
    let mut i = 0;
    while i < 6 {
        let mut j = 0;
        while j < 6 {
            let mut k = 0;
            while k < 6 {
                table[p] = RGB8 {
                    r: CUBE_LEVELS[i],
                    g: CUBE_LEVELS[j],
                    b: CUBE_LEVELS[k],
                };
                p += 1;
                k += 1;
            }
            j += 1;
        }
        i += 1;
    }

    let step = 256 / (254 - 216);
    let mut v = step;
    while p < 254 {
        table[p] = RGB8 {
            r: v as u8,
            g: v as u8,
            b: v as u8,
        };
        v += step;
        p += 1;
    }
    table[254] = RGB8 {
        r: 255,
        g: 255,
        b: 255,
    };
    table
}

/// Index into [`COLOR_CUBE`] for a color snapped to six levels per channel.
#[inline]
pub fn cube_index(color: RGB8) -> u8 {
    let r = color.r / 43;
    let g = color.g / 43;
    let b = color.b / 43;
    r * 36 + g * 6 + b
}

/// An ordered color table with an optional transparent entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<RGB8>,
    transparent_index: Option<u8>,
}

impl Palette {
    /// Build a palette from explicit entries.
    ///
    /// Returns `None` when `entries` is empty, longer than 256, or when
    /// `transparent_index` does not point at an entry.
    pub fn new(entries: Vec<RGB8>, transparent_index: Option<u8>) -> Option<Self> {
        if entries.is_empty() || entries.len() > MAX_PALETTE_LEN {
            return None;
        }
        if let Some(t) = transparent_index {
            if t as usize >= entries.len() {
                return None;
            }
        }
        Some(Self {
            entries,
            transparent_index,
        })
    }

    /// Palette from reduced colors, with the transparent entry appended last
    /// when requested.
    pub(crate) fn from_colors(mut colors: Vec<RGB8>, has_transparency: bool) -> Self {
        colors.truncate(MAX_PALETTE_LEN - usize::from(has_transparency));
        let transparent_index = if has_transparency {
            colors.push(TRANSPARENT_COLOR);
            Some((colors.len() - 1) as u8)
        } else {
            None
        };
        if colors.is_empty() {
            colors.push(RGB8 { r: 0, g: 0, b: 0 });
        }
        Self {
            entries: colors,
            transparent_index,
        }
    }

    /// The fixed default palette ([`COLOR_CUBE`]).
    pub fn color_cube() -> Self {
        Self {
            entries: COLOR_CUBE.to_vec(),
            transparent_index: None,
        }
    }

    pub fn entries(&self) -> &[RGB8] {
        &self.entries
    }

    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Color table depth in bits: the smallest of 1, 2, 4 or 8 that holds
    /// every entry.
    pub fn depth_bits(&self) -> u8 {
        match self.entries.len() {
            0..=2 => 1,
            3..=4 => 2,
            5..=16 => 4,
            _ => 8,
        }
    }

    /// Number of entries in the padded color table (`2^depth_bits`).
    pub fn table_len(&self) -> usize {
        1 << self.depth_bits()
    }

    /// RGB triples padded with black up to [`Self::table_len`].
    pub fn color_table(&self) -> Vec<u8> {
        let mut table = Vec::with_capacity(self.table_len() * 3);
        for c in &self.entries {
            table.extend_from_slice(&[c.r, c.g, c.b]);
        }
        table.resize(self.table_len() * 3, 0);
        table
    }

    /// Nearest entry by squared RGB distance. The transparent entry is never
    /// chosen unless it is the only one. Ties go to the lower index.
    pub fn nearest(&self, color: RGB8) -> u8 {
        let mut best_idx = None;
        let mut best_dist = u32::MAX;

        for (i, entry) in self.entries.iter().enumerate() {
            if self.transparent_index == Some(i as u8) {
                continue;
            }
            let dr = entry.r as i32 - color.r as i32;
            let dg = entry.g as i32 - color.g as i32;
            let db = entry.b as i32 - color.b as i32;
            let d = (dr * dr + dg * dg + db * db) as u32;
            if best_idx.is_none() || d < best_dist {
                best_dist = d;
                best_idx = Some(i);
            }
        }

        best_idx.or(self.transparent_index.map(usize::from)).unwrap_or(0) as u8
    }

    /// Nearest entry for a fractional color, used by error diffusion.
    pub(crate) fn nearest_f32(&self, color: [f32; 3]) -> u8 {
        let mut best_idx = None;
        let mut best_dist = f32::MAX;

        for (i, entry) in self.entries.iter().enumerate() {
            if self.transparent_index == Some(i as u8) {
                continue;
            }
            let dr = entry.r as f32 - color[0];
            let dg = entry.g as f32 - color[1];
            let db = entry.b as f32 - color[2];
            let d = dr * dr + dg * dg + db * db;
            if best_idx.is_none() || d < best_dist {
                best_dist = d;
                best_idx = Some(i);
            }
        }

        best_idx.or(self.transparent_index.map(usize::from)).unwrap_or(0) as u8
    }

    pub(crate) fn entry(&self, index: u8) -> RGB8 {
        self.entries[index as usize]
    }
}

/// Index of the palette entry closest to `color`, ignoring alpha.
///
/// Pure lookup for callers that edit or import palettes; it does not need a
/// quantization run.
pub fn nearest_index(palette: &Palette, color: RGBA8) -> u8 {
    palette.nearest(RGB8 {
        r: color.r,
        g: color.g,
        b: color.b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(r: u8, g: u8, b: u8) -> RGB8 {
        RGB8 { r, g, b }
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(Palette::new(Vec::new(), None).is_none());
        assert!(Palette::new(vec![rgb(0, 0, 0); 257], None).is_none());
        assert!(Palette::new(vec![rgb(0, 0, 0); 2], Some(2)).is_none());
        assert!(Palette::new(vec![rgb(0, 0, 0); 256], Some(255)).is_some());
    }

    #[test]
    fn depth_bits_round_up_to_gif_depths() {
        let depth = |n: usize| Palette::new(vec![rgb(1, 2, 3); n], None).unwrap().depth_bits();
        assert_eq!(depth(1), 1);
        assert_eq!(depth(2), 1);
        assert_eq!(depth(3), 2);
        assert_eq!(depth(4), 2);
        assert_eq!(depth(5), 4);
        assert_eq!(depth(16), 4);
        assert_eq!(depth(17), 8);
        assert_eq!(depth(256), 8);
    }

    #[test]
    fn color_table_is_padded_with_black() {
        let p = Palette::new(vec![rgb(10, 20, 30), rgb(40, 50, 60), rgb(70, 80, 90)], None)
            .unwrap();
        let table = p.color_table();
        assert_eq!(table.len(), 4 * 3);
        assert_eq!(&table[..9], &[10, 20, 30, 40, 50, 60, 70, 80, 90]);
        assert_eq!(&table[9..], &[0, 0, 0]);
    }

    #[test]
    fn nearest_prefers_first_on_ties() {
        let p = Palette::new(vec![rgb(0, 0, 0), rgb(20, 20, 20), rgb(20, 20, 20)], None).unwrap();
        assert_eq!(p.nearest(rgb(10, 10, 10)), 0);
        assert_eq!(p.nearest(rgb(18, 18, 18)), 1);
    }

    #[test]
    fn nearest_skips_transparent_entry() {
        let p = Palette::from_colors(vec![rgb(0, 0, 0), rgb(128, 128, 128)], true);
        assert_eq!(p.transparent_index(), Some(2));
        assert_eq!(p.entries()[2], TRANSPARENT_COLOR);
        // White is closest to the transparent entry's color but must not pick it.
        assert_eq!(nearest_index(&p, RGBA8::new(255, 255, 255, 255)), 1);
    }

    #[test]
    fn transparent_only_palette() {
        let p = Palette::from_colors(Vec::new(), true);
        assert_eq!(p.len(), 1);
        assert_eq!(p.nearest(rgb(3, 4, 5)), 0);
    }

    #[test]
    fn color_cube_layout() {
        assert_eq!(COLOR_CUBE[0], rgb(0, 0, 0));
        assert_eq!(COLOR_CUBE[215], rgb(255, 255, 255));
        assert_eq!(COLOR_CUBE[216], rgb(6, 6, 6));
        assert_eq!(COLOR_CUBE[253], rgb(228, 228, 228));
        assert_eq!(COLOR_CUBE[254], rgb(255, 255, 255));
        assert_eq!(COLOR_CUBE[cube_index(rgb(255, 0, 130)) as usize], rgb(255, 0, 153));
        assert_eq!(Palette::color_cube().depth_bits(), 8);
    }
}
