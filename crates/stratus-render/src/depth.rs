//! Scene depth buffers and the per-frame downsample cache.
//!
//! Depth values are linear view distances in km. Downsampled buffers are
//! point-sampled so a reduced-resolution depth value always equals one of
//! the full-resolution samples; that keeps the depth-discrepancy
//! heuristics of the upsampler exact instead of comparing against
//! invented averages.

use crate::error::RenderError;
use std::collections::HashMap;

/// A width x height grid of linear view-distance samples (km).
#[derive(Clone, Debug, PartialEq)]
pub struct DepthBuffer {
    width: u32,
    height: u32,
    samples: Vec<f32>,
}

impl DepthBuffer {
    /// Create a buffer filled with a constant distance.
    pub fn constant(width: u32, height: u32, distance_km: f32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::ZeroSizedTarget { width, height });
        }
        Ok(Self {
            width,
            height,
            samples: vec![distance_km; (width * height) as usize],
        })
    }

    /// Create a buffer by evaluating `f` at every sample.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> f32,
    ) -> Result<Self, RenderError> {
        let mut buffer = Self::constant(width, height, 0.0)?;
        for y in 0..height {
            for x in 0..width {
                buffer.samples[(y * width + x) as usize] = f(x, y);
            }
        }
        Ok(buffer)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fetch a sample with clamped addressing.
    pub fn get(&self, x: u32, y: u32) -> f32 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.samples[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, distance_km: f32) {
        if x < self.width && y < self.height {
            self.samples[(y * self.width + x) as usize] = distance_km;
        }
    }

    /// Point-sampled downsample by an integer factor.
    pub fn downsample(&self, factor: u32) -> Result<DepthBuffer, RenderError> {
        if factor == 0 {
            return Err(RenderError::InvalidDownsampleFactor { factor });
        }
        let width = (self.width / factor).max(1);
        let height = (self.height / factor).max(1);
        DepthBuffer::from_fn(width, height, |x, y| self.get(x * factor, y * factor))
    }
}

/// Per-frame cache of downsampled depth buffers keyed by factor.
///
/// Multiple consumers of the same reduced resolution share one buffer for
/// the remainder of the frame; `clear` releases everything at end-of-frame.
/// This is the only cache in the pipeline with a lifetime shorter than the
/// whole session.
#[derive(Debug, Default)]
pub struct DepthCache {
    buffers: HashMap<u32, DepthBuffer>,
}

impl DepthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached buffer for `factor`, downsampling `full` on first use.
    pub fn get_or_insert(
        &mut self,
        factor: u32,
        full: &DepthBuffer,
    ) -> Result<&DepthBuffer, RenderError> {
        if !self.buffers.contains_key(&factor) {
            let reduced = full.downsample(factor)?;
            log::trace!(
                "depth cache: built {}x{} buffer for factor {factor}",
                reduced.width(),
                reduced.height()
            );
            self.buffers.insert(factor, reduced);
        }
        Ok(&self.buffers[&factor])
    }

    /// Number of cached factors.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Release all cached buffers. Called at end-of-frame.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
