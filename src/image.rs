use crate::palette::Palette;

/// A paletted image: one palette index per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    width: usize,
    height: usize,
    indices: Vec<u8>,
    palette: Palette,
}

impl IndexedImage {
    /// Returns `None` when `indices` does not hold `width * height` entries
    /// or an index points past the end of the palette.
    pub fn new(width: usize, height: usize, indices: Vec<u8>, palette: Palette) -> Option<Self> {
        if width.checked_mul(height) != Some(indices.len()) {
            return None;
        }
        if indices.iter().any(|&i| i as usize >= palette.len()) {
            return None;
        }
        Some(Self {
            width,
            height,
            indices,
            palette,
        })
    }

    pub(crate) fn from_parts(
        width: usize,
        height: usize,
        indices: Vec<u8>,
        palette: Palette,
    ) -> Self {
        debug_assert_eq!(indices.len(), width * height);
        Self {
            width,
            height,
            indices,
            palette,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Row `y` of palette indices.
    pub fn row(&self, y: usize) -> &[u8] {
        &self.indices[y * self.width..(y + 1) * self.width]
    }

    pub fn into_parts(self) -> (Vec<u8>, Palette) {
        (self.indices, self.palette)
    }
}
