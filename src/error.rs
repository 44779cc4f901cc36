use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch {
        len: usize,
        width: usize,
        height: usize,
    },

    #[error("max_colors must be between 2 and 256, got {0}")]
    InvalidMaxColors(u32),

    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GifError {
    /// The frame cannot be expressed as an animated GIF at all.
    #[error("GIF animation is not supported for this input: {reason}")]
    Unsupported { reason: String },

    #[error("failed to build GIF metadata: {message}")]
    Metadata { message: String },

    #[error("frame is {found:?} but the logical screen is {expected:?}")]
    FrameSize {
        expected: (u16, u16),
        found: (usize, usize),
    },

    #[error("the GIF stream has already been finished")]
    Finished,

    #[error("frame quantization failed: {0}")]
    Quantize(#[from] ReduceError),

    #[error("I/O error while writing GIF data: {0}")]
    Io(#[from] std::io::Error),
}
