//! HDR to display mapping: the selectable tone-mapping operator family.
//!
//! Each pixel's luminance is scaled by middle-grey over adapted luminance,
//! pushed through the selected operator, and the original chroma is then
//! re-applied, followed by gamma and an intensity boost. The `Disabled`
//! operator is an exact pass-through.

use crate::luminance::{LuminanceState, MIN_LUMINANCE, luminance_of};
use crate::target::Target;
use glam::Vec3;

/// Hable "uncharted" filmic curve coefficients plus the linear white point.
#[derive(Clone, Copy, Debug)]
pub struct FilmicParams {
    pub shoulder_strength: f32,
    pub linear_strength: f32,
    pub linear_angle: f32,
    pub toe_strength: f32,
    pub toe_numerator: f32,
    pub toe_denominator: f32,
    pub white_point: f32,
}

impl Default for FilmicParams {
    fn default() -> Self {
        Self {
            shoulder_strength: 0.15,
            linear_strength: 0.50,
            linear_angle: 0.10,
            toe_strength: 0.20,
            toe_numerator: 0.02,
            toe_denominator: 0.30,
            white_point: 11.2,
        }
    }
}

/// Extended Reinhard with a white-luminance parameter.
#[derive(Clone, Copy, Debug)]
pub struct ReinhardParams {
    /// Luminance that maps exactly to white.
    pub white_luminance: f32,
}

impl Default for ReinhardParams {
    fn default() -> Self {
        Self { white_luminance: 4.0 }
    }
}

/// Drago logarithmic mapping.
#[derive(Clone, Copy, Debug)]
pub struct DragoParams {
    /// Maximum display luminance in cd/m^2.
    pub display_max: f32,
    /// Bias exponent controlling the curve shape, (0,1].
    pub bias: f32,
    /// Scene luminance treated as the maximum input.
    pub max_luminance: f32,
}

impl Default for DragoParams {
    fn default() -> Self {
        Self {
            display_max: 100.0,
            bias: 0.85,
            max_luminance: 10.0,
        }
    }
}

/// Exponential saturation mapping: `gain * (1 - exp(-exposure * Y))`.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialParams {
    pub gain: f32,
    pub exposure: f32,
}

impl Default for ExponentialParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            exposure: 1.0,
        }
    }
}

/// Direct linear scale.
#[derive(Clone, Copy, Debug)]
pub struct LinearParams {
    pub factor: f32,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

/// The selectable operator family.
#[derive(Clone, Copy, Debug)]
pub enum ToneOperator {
    Filmic(FilmicParams),
    Reinhard(ReinhardParams),
    Drago(DragoParams),
    Exponential(ExponentialParams),
    Linear(LinearParams),
    /// Exact identity: the input buffer passes through untouched.
    Disabled,
}

impl Default for ToneOperator {
    fn default() -> Self {
        ToneOperator::Filmic(FilmicParams::default())
    }
}

/// Tone-mapping stage configuration.
#[derive(Clone, Copy, Debug)]
pub struct ToneMapConfig {
    pub operator: ToneOperator,
    /// Display gamma applied after the operator.
    pub gamma: f32,
    /// Final intensity multiplier.
    pub intensity_boost: f32,
}

impl Default for ToneMapConfig {
    fn default() -> Self {
        Self {
            operator: ToneOperator::default(),
            gamma: 2.2,
            intensity_boost: 1.0,
        }
    }
}

fn hable(x: f32, p: &FilmicParams) -> f32 {
    let (a, b, c, d, e, f) = (
        p.shoulder_strength,
        p.linear_strength,
        p.linear_angle,
        p.toe_strength,
        p.toe_numerator,
        p.toe_denominator,
    );
    ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f
}

/// Map one scaled luminance value through an operator. The result is
/// clamped to \[0,1\] so derived ambient colors can never exceed white.
pub fn map_luminance(scaled: f32, operator: &ToneOperator) -> f32 {
    let mapped = match operator {
        ToneOperator::Filmic(p) => {
            let white = hable(p.white_point, p).max(MIN_LUMINANCE);
            hable(scaled, p) / white
        }
        ToneOperator::Reinhard(p) => {
            let white2 = (p.white_luminance * p.white_luminance).max(MIN_LUMINANCE);
            scaled * (1.0 + scaled / white2) / (1.0 + scaled)
        }
        ToneOperator::Drago(p) => {
            let max = p.max_luminance.max(MIN_LUMINANCE);
            let exponent = p.bias.max(1e-3).ln() / 0.5f32.ln();
            let denom = (2.0 + 8.0 * (scaled / max).powf(exponent)).ln();
            (p.display_max * 0.01) / (max + 1.0).log10() * (scaled + 1.0).ln() / denom
        }
        ToneOperator::Exponential(p) => p.gain * (1.0 - (-p.exposure * scaled).exp()),
        ToneOperator::Linear(p) => scaled * p.factor,
        ToneOperator::Disabled => scaled,
    };
    mapped.clamp(0.0, 1.0)
}

/// Tone-map an HDR buffer into a displayable one.
///
/// With `ToneOperator::Disabled` the input is returned unchanged (exact
/// identity, gamma and boost included). Otherwise each texel's luminance
/// is floor-clamped, scaled by middle grey over adapted luminance, mapped,
/// re-chromatized, gamma-corrected, boosted, and clamped to white.
pub fn apply_tone_map(hdr: &Target, state: &LuminanceState, config: &ToneMapConfig) -> Target {
    if matches!(config.operator, ToneOperator::Disabled) {
        return hdr.clone();
    }

    let adapted = state.adapted_luminance().max(MIN_LUMINANCE);
    let inv_gamma = 1.0 / config.gamma.max(1e-3);
    let mut out = hdr.clone();
    for y in 0..hdr.height() {
        for x in 0..hdr.width() {
            let texel = hdr.get(x, y);
            let rgb = Vec3::new(texel[0], texel[1], texel[2]);
            let luminance = luminance_of(rgb).max(MIN_LUMINANCE);
            let scaled = luminance * state.middle_grey / adapted;
            let mapped = map_luminance(scaled, &config.operator);

            let mut display = rgb * (mapped / luminance);
            display = Vec3::new(
                display.x.max(0.0).powf(inv_gamma),
                display.y.max(0.0).powf(inv_gamma),
                display.z.max(0.0).powf(inv_gamma),
            ) * config.intensity_boost;
            display = display.clamp(Vec3::ZERO, Vec3::ONE);

            out.set(x, y, [display.x, display.y, display.z, texel[3]]);
        }
    }
    out
}
