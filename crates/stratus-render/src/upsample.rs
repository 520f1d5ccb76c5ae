//! Depth-aware resolution refinement.
//!
//! Expensive passes render at reduced resolution; one of four policies
//! reconstructs the full-resolution result using the scene depth buffer to
//! detect where naive interpolation would smear across depth edges.

use crate::depth::DepthBuffer;
use crate::error::RenderError;
use crate::target::Target;

/// Reconstruction policy. Global per frame; switching it changes every
/// layer's render-target shape (full size vs reduced), so the owner must
/// reallocate targets on change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsampleTechnique {
    /// No downsampling: the pass renders directly at full resolution.
    Bilinear,
    /// Hard-select the low-res sample whose depth best matches the pixel.
    Cutout,
    /// Blend the four nearest samples, penalizing depth discrepancy.
    Smart,
    /// Recompute pixels whose neighborhood disagrees in depth.
    Accurate,
}

/// Tunables for the refinement policies.
#[derive(Clone, Copy, Debug)]
pub struct UpsampleConfig {
    pub technique: UpsampleTechnique,
    /// Resolution divisor for the low-res pass.
    pub factor: u32,
    /// Depth disagreement (km) at or above which `Accurate` recomputes a
    /// pixel. Zero degenerates into "recompute everything".
    pub discrepancy_threshold_km: f32,
    /// Strength of the depth penalty in the `Smart` weights:
    /// `1 / (1 + discrepancy * weight_factor)`.
    pub depth_weight_factor: f32,
}

impl Default for UpsampleConfig {
    fn default() -> Self {
        Self {
            technique: UpsampleTechnique::Smart,
            factor: 2,
            discrepancy_threshold_km: 1.0,
            depth_weight_factor: 4.0,
        }
    }
}

/// Reconstruct `out` (full resolution) from `low`.
///
/// `low_depth` must match `low` in size and `full_depth` must match `out`.
/// `recompute` re-invokes the expensive pass for a single full-resolution
/// pixel; only the `Accurate` policy calls it.
pub fn upsample(
    low: &Target,
    low_depth: &DepthBuffer,
    full_depth: &DepthBuffer,
    config: &UpsampleConfig,
    recompute: &mut dyn FnMut(u32, u32) -> [f32; 4],
    out: &mut Target,
) -> Result<(), RenderError> {
    if low.width() != low_depth.width() || low.height() != low_depth.height() {
        return Err(RenderError::SizeMismatch {
            expected_width: low.width(),
            expected_height: low.height(),
            width: low_depth.width(),
            height: low_depth.height(),
        });
    }
    if out.width() != full_depth.width() || out.height() != full_depth.height() {
        return Err(RenderError::SizeMismatch {
            expected_width: out.width(),
            expected_height: out.height(),
            width: full_depth.width(),
            height: full_depth.height(),
        });
    }
    if config.factor == 0 {
        return Err(RenderError::InvalidDownsampleFactor {
            factor: config.factor,
        });
    }

    for y in 0..out.height() {
        for x in 0..out.width() {
            let taps = neighborhood(low, low_depth, x, y, config.factor);
            let pixel_depth = full_depth.get(x, y);

            let value = match config.technique {
                UpsampleTechnique::Bilinear => taps.blend_bilinear(),
                UpsampleTechnique::Cutout => taps.select_nearest_depth(pixel_depth),
                UpsampleTechnique::Smart => {
                    taps.blend_depth_weighted(pixel_depth, config.depth_weight_factor)
                }
                UpsampleTechnique::Accurate => {
                    if taps.depth_spread() >= config.discrepancy_threshold_km {
                        recompute(x, y)
                    } else {
                        taps.blend_bilinear()
                    }
                }
            };
            out.set(x, y, value);
        }
    }
    Ok(())
}

/// The four low-res taps surrounding one full-res pixel.
struct Taps {
    colors: [[f32; 4]; 4],
    depths: [f32; 4],
    weights: [f32; 4],
}

fn neighborhood(low: &Target, low_depth: &DepthBuffer, x: u32, y: u32, factor: u32) -> Taps {
    // Map the full-res pixel center into low-res sample space.
    let lx = (x as f32 + 0.5) / factor as f32 - 0.5;
    let ly = (y as f32 + 0.5) / factor as f32 - 0.5;
    let x0 = lx.floor().max(0.0) as u32;
    let y0 = ly.floor().max(0.0) as u32;
    let x1 = (x0 + 1).min(low.width() - 1);
    let y1 = (y0 + 1).min(low.height() - 1);
    let tx = (lx - x0 as f32).clamp(0.0, 1.0);
    let ty = (ly - y0 as f32).clamp(0.0, 1.0);

    let coords = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)];
    let mut colors = [[0.0f32; 4]; 4];
    let mut depths = [0.0f32; 4];
    for (i, &(cx, cy)) in coords.iter().enumerate() {
        colors[i] = low.get(cx, cy);
        depths[i] = low_depth.get(cx, cy);
    }
    let weights = [
        (1.0 - tx) * (1.0 - ty),
        tx * (1.0 - ty),
        (1.0 - tx) * ty,
        tx * ty,
    ];
    Taps {
        colors,
        depths,
        weights,
    }
}

impl Taps {
    fn blend_bilinear(&self) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (color, &w) in self.colors.iter().zip(&self.weights) {
            for c in 0..4 {
                out[c] += color[c] * w;
            }
        }
        out
    }

    /// Hard classification: the tap whose depth is closest to the pixel's
    /// own depth wins outright, no blending.
    fn select_nearest_depth(&self, pixel_depth: f32) -> [f32; 4] {
        let mut best = 0;
        let mut best_err = f32::MAX;
        for (i, &d) in self.depths.iter().enumerate() {
            let err = (d - pixel_depth).abs();
            if err < best_err {
                best_err = err;
                best = i;
            }
        }
        self.colors[best]
    }

    /// Bilinear weights attenuated by a depth-discrepancy penalty, then
    /// renormalized.
    fn blend_depth_weighted(&self, pixel_depth: f32, weight_factor: f32) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        let mut total = 0.0f32;
        for i in 0..4 {
            let discrepancy = (self.depths[i] - pixel_depth).abs();
            let w = self.weights[i] / (1.0 + discrepancy * weight_factor);
            total += w;
            for c in 0..4 {
                out[c] += self.colors[i][c] * w;
            }
        }
        if total > 0.0 {
            for c in &mut out {
                *c /= total;
            }
        }
        out
    }

    /// Largest pairwise depth disagreement in the neighborhood.
    fn depth_spread(&self) -> f32 {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &d in &self.depths {
            min = min.min(d);
            max = max.max(d);
        }
        max - min
    }
}
