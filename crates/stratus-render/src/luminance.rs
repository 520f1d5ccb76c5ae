//! Scene luminance measurement and temporal adaptation.
//!
//! Each frame the tone mapper measures an immediate luminance estimate
//! from the HDR composite, blends the previous frame's adapted luminance
//! toward it at a day/night-dependent rate, clamps the result to
//! day/night bounds, and tints it toward blue as a scotopic-vision
//! approximation. The adapted value then drives the middle-grey
//! calibration of the tone-mapping operators.

use crate::target::Target;
use glam::Vec3;

/// Rec. 709 luminance weights.
pub const LUMA_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Floor applied to any luminance before it is used as a divisor.
pub const MIN_LUMINANCE: f32 = 1e-3;

/// How the immediate luminance estimate is produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LuminanceMode {
    /// Hierarchical 2x2 downsample-average of the HDR buffer.
    DownsampleAverage,
    /// Hierarchical average in the log domain; less sensitive to a few
    /// very bright pixels.
    LogAverage,
    /// Fixed estimate of 1.0 (adaptation effectively disabled).
    Constant,
    /// Externally supplied value.
    Custom(f32),
}

/// Temporal adaptation tunables.
#[derive(Clone, Copy, Debug)]
pub struct AdaptationConfig {
    /// Adaptation rate (per second) in full daylight.
    pub day_rate: f32,
    /// Adaptation rate (per second) at night; the eye dark-adapts slowly.
    pub night_rate: f32,
    /// Adapted luminance bounds in daylight.
    pub day_min: f32,
    pub day_max: f32,
    /// Adapted luminance bounds at night.
    pub night_min: f32,
    pub night_max: f32,
    /// Scotopic tint the adapted color shifts toward at night.
    pub blue_shift: Vec3,
    /// Blend strength of the scotopic tint, \[0,1\].
    pub blue_shift_strength: f32,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            day_rate: 0.7,
            night_rate: 0.1,
            day_min: 0.1,
            day_max: 8.0,
            night_min: 0.005,
            night_max: 0.4,
            blue_shift: Vec3::new(0.6, 0.75, 1.3),
            blue_shift_strength: 0.8,
        }
    }
}

/// Cross-frame luminance state. Single writer per frame; never reset
/// except on full reinitialization.
#[derive(Clone, Copy, Debug)]
pub struct LuminanceState {
    /// Previous-frame adapted luminance, RGB (tinted at night).
    pub adapted: Vec3,
    /// Most recent immediate estimate.
    pub immediate: f32,
    /// Middle grey derived from the adapted luminance.
    pub middle_grey: f32,
}

impl LuminanceState {
    pub fn new() -> Self {
        Self {
            adapted: Vec3::ONE,
            immediate: 1.0,
            middle_grey: middle_grey(1.0),
        }
    }

    /// Scalar luminance of the adapted RGB value.
    pub fn adapted_luminance(&self) -> f32 {
        luminance_of(self.adapted)
    }

    /// Blend toward `immediate` and clamp.
    ///
    /// `night` interpolates rate and bounds between the day and night
    /// columns of `config`; the scotopic tint is applied luminance-
    /// preserving so the clamp stays exact.
    pub fn adapt(&mut self, immediate: f32, dt_seconds: f32, night: f32, config: &AdaptationConfig) {
        let night = night.clamp(0.0, 1.0);
        let rate = lerp(config.day_rate, config.night_rate, night);
        let blend = 1.0 - (-dt_seconds.max(0.0) * rate).exp();

        let previous = self.adapted_luminance();
        let mut luminance = previous + (immediate.max(0.0) - previous) * blend;

        let min = lerp(config.day_min, config.night_min, night);
        let max = lerp(config.day_max, config.night_max, night);
        luminance = luminance.clamp(min, max);

        let tint = Vec3::ONE.lerp(config.blue_shift, night * config.blue_shift_strength);
        let tint_luminance = luminance_of(tint).max(MIN_LUMINANCE);
        self.adapted = tint * (luminance / tint_luminance);
        self.immediate = immediate;
        self.middle_grey = middle_grey(luminance);
    }
}

impl Default for LuminanceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Rec. 709 luminance of an RGB value.
pub fn luminance_of(rgb: Vec3) -> f32 {
    rgb.dot(LUMA_WEIGHTS)
}

/// Middle grey for a given adapted luminance: `1.03 - 2/(2 + log10(1+L))`.
pub fn middle_grey(adapted_luminance: f32) -> f32 {
    1.03 - 2.0 / (2.0 + (1.0 + adapted_luminance.max(0.0)).log10())
}

/// Nightness of the light direction: 0 with the sun at or above the
/// horizon, ramping to 1 as it sinks 12 degrees below.
pub fn nightness(sun_direction: Vec3, up: Vec3) -> f32 {
    let sin_elevation = sun_direction.dot(up);
    let full_night = (-12.0f32).to_radians().sin();
    1.0 - smoothstep(full_night, 0.0, sin_elevation)
}

/// Measure the immediate luminance estimate from the HDR buffer.
pub fn measure_immediate(mode: LuminanceMode, hdr: &Target) -> f32 {
    match mode {
        LuminanceMode::DownsampleAverage => hierarchical_average(hdr, false),
        LuminanceMode::LogAverage => hierarchical_average(hdr, true),
        LuminanceMode::Constant => 1.0,
        LuminanceMode::Custom(value) => value.max(0.0),
    }
}

/// Hierarchical 2x2 reduction of per-texel luminance, mirroring a GPU mip
/// chain. In log mode the reduction averages `ln(eps + Y)` and exponentiates
/// the final level.
fn hierarchical_average(hdr: &Target, log_domain: bool) -> f32 {
    let mut width = hdr.width() as usize;
    let mut height = hdr.height() as usize;
    let mut level: Vec<f32> = hdr
        .texels()
        .iter()
        .map(|t| {
            let y = luminance_of(Vec3::new(t[0], t[1], t[2]));
            if log_domain { (1e-4 + y).ln() } else { y }
        })
        .collect();

    while width > 1 || height > 1 {
        let next_w = width.div_ceil(2);
        let next_h = height.div_ceil(2);
        let mut next = vec![0.0f32; next_w * next_h];
        for ny in 0..next_h {
            for nx in 0..next_w {
                let mut sum = 0.0f32;
                let mut count = 0.0f32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let x = nx * 2 + dx;
                        let y = ny * 2 + dy;
                        if x < width && y < height {
                            sum += level[y * width + x];
                            count += 1.0;
                        }
                    }
                }
                next[ny * next_w + nx] = sum / count;
            }
        }
        level = next;
        width = next_w;
        height = next_h;
    }

    if log_domain { level[0].exp() } else { level[0] }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
