//! Render resource error types.

use thiserror::Error;

/// Errors from CPU render resource creation and use.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Targets and depth buffers must have non-zero dimensions.
    #[error("render target dimensions must be non-zero, got {width}x{height}")]
    ZeroSizedTarget { width: u32, height: u32 },
    /// Two buffers that must match in size do not.
    #[error("buffer size mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    SizeMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
    /// Downsample factors must be at least 1.
    #[error("downsample factor must be >= 1, got {factor}")]
    InvalidDownsampleFactor { factor: u32 },
}
