//! RGBA float render target with clamped addressing and bilinear sampling.
//!
//! The CPU analogue of an rgba16f/rgba32f texture: the shadow builder, the
//! layer scattering passes, and the tone mapper all read and write these.

use crate::error::RenderError;

/// A width x height grid of `[f32; 4]` texels.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

impl Target {
    /// Create a target cleared to transparent black.
    ///
    /// Fails on zero dimensions; callers treat that as a recoverable
    /// per-resource failure, not a panic.
    pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::ZeroSizedTarget { width, height });
        }
        Ok(Self {
            width,
            height,
            texels: vec![[0.0; 4]; (width * height) as usize],
        })
    }

    /// Create a target filled with a constant color.
    pub fn filled(width: u32, height: u32, color: [f32; 4]) -> Result<Self, RenderError> {
        let mut target = Self::new(width, height)?;
        target.clear(color);
        Ok(target)
    }

    /// Create a target by evaluating `shade` at every texel.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut shade: impl FnMut(u32, u32) -> [f32; 4],
    ) -> Result<Self, RenderError> {
        let mut target = Self::new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                target.texels[(y * width + x) as usize] = shade(x, y);
            }
        }
        Ok(target)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw texel storage, row-major.
    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    /// Fetch a texel with clamped addressing.
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.texels[(y * self.width + x) as usize]
    }

    /// Store a texel. Out-of-bounds writes are dropped.
    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x < self.width && y < self.height {
            self.texels[(y * self.width + x) as usize] = value;
        }
    }

    /// Overwrite every texel with `color`.
    pub fn clear(&mut self, color: [f32; 4]) {
        self.texels.fill(color);
    }

    /// Overwrite a single channel of every texel.
    pub fn fill_channel(&mut self, channel: usize, value: f32) {
        for texel in &mut self.texels {
            texel[channel] = value;
        }
    }

    /// Bilinear sample with normalized coordinates in \[0,1\], clamped
    /// addressing at the edges.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> [f32; 4] {
        let fx = u.clamp(0.0, 1.0) * (self.width - 1) as f32;
        let fy = v.clamp(0.0, 1.0) * (self.height - 1) as f32;
        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let c00 = self.get(x0, y0);
        let c10 = self.get(x1, y0);
        let c01 = self.get(x0, y1);
        let c11 = self.get(x1, y1);

        let mut out = [0.0f32; 4];
        for (i, slot) in out.iter_mut().enumerate() {
            let top = c00[i] + (c10[i] - c00[i]) * tx;
            let bottom = c01[i] + (c11[i] - c01[i]) * tx;
            *slot = top + (bottom - top) * ty;
        }
        out
    }

    /// Mean texel value over the whole target.
    pub fn mean(&self) -> [f32; 4] {
        let mut sum = [0.0f64; 4];
        for texel in &self.texels {
            for i in 0..4 {
                sum[i] += f64::from(texel[i]);
            }
        }
        let count = self.texels.len() as f64;
        [
            (sum[0] / count) as f32,
            (sum[1] / count) as f32,
            (sum[2] / count) as f32,
            (sum[3] / count) as f32,
        ]
    }
}
