//! Sky radiance integrator: phase functions, the view-ray march, and the
//! planet terminator.
//!
//! The march consumes the precomputed [`OpticalDepthTable`] for both local
//! density and the accumulated sun-path integrals, so a single table build
//! serves every ray. Identical inputs and an identical table produce
//! bit-identical results; the CPU environment estimator depends on that.

use crate::optical_depth::OpticalDepthTable;
use crate::planet::PlanetFrame;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::f32::consts::PI;

/// Wavelength-dependent scattering parameters. Coefficients are per km at
/// sea level.
#[derive(Clone, Debug)]
pub struct ScatteringParams {
    /// Rayleigh scattering coefficients (RGB, per km).
    pub rayleigh_coefficients: Vec3,
    /// Mie scattering coefficient (scalar, per km).
    pub mie_coefficient: f32,
    /// Henyey-Greenstein anisotropy for the Mie phase function.
    pub mie_anisotropy: f32,
    /// Sun intensity multiplier applied to the in-scattered term.
    pub sun_intensity: f32,
}

impl ScatteringParams {
    /// Earth-like scattering coefficients.
    pub fn earth_like() -> Self {
        Self {
            rayleigh_coefficients: Vec3::new(5.5e-3, 13.0e-3, 22.4e-3),
            mie_coefficient: 2.1e-3,
            mie_anisotropy: 0.758,
            sun_intensity: 20.0,
        }
    }
}

impl Default for ScatteringParams {
    fn default() -> Self {
        Self::earth_like()
    }
}

/// GPU-side scattering uniform. Matches a WGSL struct with 16-byte rows.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ScatterUniform {
    /// Planet center in world space, km. (offset 0)
    pub planet_center: [f32; 3],
    /// Planet surface radius, km. (offset 12)
    pub planet_radius_km: f32,
    /// Rayleigh scattering coefficients, per km. (offset 16)
    pub rayleigh_coefficients: [f32; 3],
    /// Atmosphere top radius, km. (offset 28)
    pub atmosphere_radius_km: f32,
    /// Normalized direction toward the sun. (offset 32)
    pub sun_direction: [f32; 3],
    /// Mie scattering coefficient, per km. (offset 44)
    pub mie_coefficient: f32,
    /// Camera position in world space, km. (offset 48)
    pub camera_position: [f32; 3],
    /// Mie anisotropy (Henyey-Greenstein g). (offset 60)
    pub mie_anisotropy: f32,
    /// Sun intensity multiplier. (offset 64)
    pub sun_intensity: f32,
    /// March step count for the sky pass. (offset 68)
    pub step_count: u32,
    /// Padding to a 16-byte multiple. (offset 72)
    pub _pad: [f32; 2],
}

impl ScatterUniform {
    /// Assemble the uniform from parameters and per-frame state.
    pub fn from_params(
        params: &ScatteringParams,
        planet: &PlanetFrame,
        sun_direction: Vec3,
        camera_position: Vec3,
        step_count: u32,
    ) -> Self {
        Self {
            planet_center: planet.center.to_array(),
            planet_radius_km: planet.radius_km(),
            rayleigh_coefficients: params.rayleigh_coefficients.to_array(),
            atmosphere_radius_km: planet.atmosphere_radius_km(),
            sun_direction: sun_direction.normalize_or_zero().to_array(),
            mie_coefficient: params.mie_coefficient,
            camera_position: camera_position.to_array(),
            mie_anisotropy: params.mie_anisotropy,
            sun_intensity: params.sun_intensity,
            step_count,
            _pad: [0.0; 2],
        }
    }
}

/// Result of integrating one view ray through the atmosphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyRadiance {
    /// Light scattered into the ray, RGB.
    pub in_scattered: Vec3,
    /// Remaining transmittance along the ray, RGB.
    pub extinction: Vec3,
    /// Lit fraction of the view point with respect to the planet's own
    /// shadow, in \[0,1\].
    pub terminator: f32,
}

/// Ray-sphere intersection returning (t_near, t_far). Returns (-1, -1) on miss.
pub fn ray_sphere_intersect(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> (f32, f32) {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return (-1.0, -1.0);
    }
    let sqrt_disc = disc.sqrt();
    (-b - sqrt_disc, -b + sqrt_disc)
}

fn rayleigh_phase(cos_angle: f32) -> f32 {
    3.0 / (16.0 * PI) * (1.0 + cos_angle * cos_angle)
}

fn mie_phase(cos_angle: f32, g: f32) -> f32 {
    let g2 = g * g;
    let num = 3.0 * (1.0 - g2) * (1.0 + cos_angle * cos_angle);
    let denom = 8.0 * PI * (2.0 + g2) * (1.0 + g2 - 2.0 * g * cos_angle).powf(1.5);
    num / denom
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Soft lit fraction of a point with respect to the planet's shadow
/// cylinder in light space.
///
/// 1.0 whenever the point's projection along the sun direction is positive
/// (the point sits on the lit hemisphere). Behind the terminator plane the
/// lit fraction falls off with radial distance into the shadow cylinder.
pub fn terminator(planet: &PlanetFrame, position: Vec3, sun_direction: Vec3) -> f32 {
    let radial = position - planet.center;
    let axial = radial.dot(sun_direction);
    if axial > 0.0 {
        return 1.0;
    }
    let distance_to_axis = (radial - sun_direction * axial).length();
    let half_width = 0.02 * planet.radius_km();
    smoothstep(
        planet.radius_km() - half_width,
        planet.radius_km() + half_width,
        distance_to_axis,
    )
}

/// Integrate in-scattered light and extinction along one view ray.
///
/// Marches `step_count` midpoint segments from `view_pos` over
/// `view_distance_km`. At each step the table supplies the local Rayleigh
/// and Mie densities plus the accumulated sun-path integrals; direct sun
/// transmittance is `exp(-tau)` of those integrals, and the in-scattered
/// contribution is weighted by the running view extinction before the
/// extinction itself is updated. The running extinction is therefore
/// non-increasing along the march.
pub fn sky_color(
    planet: &PlanetFrame,
    table: &OpticalDepthTable,
    params: &ScatteringParams,
    view_pos: Vec3,
    view_dir: Vec3,
    sun_direction: Vec3,
    view_distance_km: f32,
    step_count: u32,
) -> SkyRadiance {
    let lit = terminator(planet, view_pos, sun_direction);
    if view_distance_km <= 0.0 || step_count == 0 {
        return SkyRadiance {
            in_scattered: Vec3::ZERO,
            extinction: Vec3::ONE,
            terminator: lit,
        };
    }

    let cos_angle = view_dir.dot(sun_direction);
    let phase_r = rayleigh_phase(cos_angle);
    let phase_m = mie_phase(cos_angle, params.mie_anisotropy);
    let beta_r = params.rayleigh_coefficients;
    let beta_m = Vec3::splat(params.mie_coefficient);
    let top = planet.atmosphere_top_km();

    let step = view_distance_km / step_count as f32;
    let mut in_scattered = Vec3::ZERO;
    let mut extinction = Vec3::ONE;

    for i in 0..step_count {
        let t = (i as f32 + 0.5) * step;
        let pos = view_pos + view_dir * t;
        let altitude = planet.altitude_of(pos).clamp(0.0, top);
        let up = planet.up_at(pos);
        let cell = table.sample(up.dot(sun_direction), altitude / top);

        let density_r = cell[0];
        let density_m = cell[1];
        let sun_tau = beta_r * cell[2] + beta_m * cell[3];
        let sun_transmittance =
            Vec3::new((-sun_tau.x).exp(), (-sun_tau.y).exp(), (-sun_tau.z).exp());

        in_scattered += (beta_r * (phase_r * density_r) + beta_m * (phase_m * density_m))
            * sun_transmittance
            * extinction
            * step;

        let local_tau = (beta_r * density_r + beta_m * density_m) * step;
        extinction *= Vec3::new((-local_tau.x).exp(), (-local_tau.y).exp(), (-local_tau.z).exp());
    }

    SkyRadiance {
        in_scattered: in_scattered * params.sun_intensity * lit,
        extinction,
        terminator: lit,
    }
}
