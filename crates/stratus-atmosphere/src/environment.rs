//! Closed-form ambient sky / sun environment estimator.
//!
//! Runs the same radiance integrator the sky pass uses, but over a coarse
//! fixed set of hemisphere directions, so CPU-side scene lighting matches
//! the rendered sky without a GPU readback.

use crate::optical_depth::OpticalDepthTable;
use crate::planet::PlanetFrame;
use crate::scatter::{ScatteringParams, ray_sphere_intersect, sky_color, terminator};
use glam::Vec3;

/// Ambient sky and direct sun colors at a position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvironmentEstimate {
    /// Cosine-weighted average in-scattered sky radiance over the upper
    /// hemisphere.
    pub sky_ambient: Vec3,
    /// Direct sun color after atmospheric extinction and the terminator.
    pub sun_color: Vec3,
}

impl Default for EnvironmentEstimate {
    fn default() -> Self {
        Self {
            sky_ambient: Vec3::ZERO,
            sun_color: Vec3::ZERO,
        }
    }
}

/// Fixed hemisphere sample directions in the local tangent frame:
/// the zenith plus two elevation rings of four azimuths each.
const HEMISPHERE_ELEVATIONS_DEG: [f32; 2] = [60.0, 30.0];
const HEMISPHERE_AZIMUTHS: usize = 4;

/// Estimate ambient sky color and direct sun color at `position`.
///
/// `march_steps` is the per-ray march resolution; 12-32 is the intended
/// coarse range. Deterministic: the sample directions are fixed.
pub fn estimate_environment(
    planet: &PlanetFrame,
    table: &OpticalDepthTable,
    params: &ScatteringParams,
    position: Vec3,
    sun_direction: Vec3,
    march_steps: u32,
) -> EnvironmentEstimate {
    let up = planet.up_at(position);
    let tangent = if up.x.abs() < 0.9 { Vec3::X } else { Vec3::Z };
    let right = up.cross(tangent).normalize();
    let forward = right.cross(up);

    let mut ambient = Vec3::ZERO;
    let mut weight_sum = 0.0f32;

    let mut accumulate = |dir: Vec3| {
        let distance = atmosphere_exit_distance(planet, position, dir);
        let radiance = sky_color(
            planet,
            table,
            params,
            position,
            dir,
            sun_direction,
            distance,
            march_steps,
        );
        let weight = dir.dot(up).max(0.0);
        ambient += radiance.in_scattered * weight;
        weight_sum += weight;
    };

    accumulate(up);
    for elevation_deg in HEMISPHERE_ELEVATIONS_DEG {
        let (sin_e, cos_e) = elevation_deg.to_radians().sin_cos();
        for i in 0..HEMISPHERE_AZIMUTHS {
            let azimuth = i as f32 / HEMISPHERE_AZIMUTHS as f32 * std::f32::consts::TAU;
            let dir = up * sin_e + (right * azimuth.cos() + forward * azimuth.sin()) * cos_e;
            accumulate(dir);
        }
    }

    let sky_ambient = if weight_sum > 0.0 {
        ambient / weight_sum
    } else {
        Vec3::ZERO
    };

    EnvironmentEstimate {
        sky_ambient,
        sun_color: sun_color(planet, table, params, position, sun_direction),
    }
}

/// Direct sun color at a position: intensity attenuated by the table's
/// accumulated sun-path optical depth and the terminator.
pub fn sun_color(
    planet: &PlanetFrame,
    table: &OpticalDepthTable,
    params: &ScatteringParams,
    position: Vec3,
    sun_direction: Vec3,
) -> Vec3 {
    let top = planet.atmosphere_top_km();
    let altitude = planet.altitude_of(position).clamp(0.0, top);
    let up = planet.up_at(position);
    let cell = table.sample(up.dot(sun_direction), altitude / top);

    let tau = params.rayleigh_coefficients * cell[2] + Vec3::splat(params.mie_coefficient) * cell[3];
    let transmittance = Vec3::new((-tau.x).exp(), (-tau.y).exp(), (-tau.z).exp());
    transmittance * params.sun_intensity * terminator(planet, position, sun_direction)
}

/// Distance along `dir` until the ray exits the atmosphere sphere.
fn atmosphere_exit_distance(planet: &PlanetFrame, position: Vec3, dir: Vec3) -> f32 {
    let (_, t_far) =
        ray_sphere_intersect(position, dir, planet.center, planet.atmosphere_radius_km());
    t_far.max(0.0)
}
