//! Precomputed optical depth lookup table.
//!
//! For every (cosine of view angle, normalized altitude) pair the table
//! stores the local Rayleigh and Mie particle densities plus the density
//! integrals accumulated from that point to the top of the atmosphere.
//! The build is fully deterministic: identical planet geometry produces a
//! bit-identical table, which is what keeps the CPU environment estimator
//! and the per-pixel sky integrator consistent with each other.

use crate::planet::{AtmosphereError, PlanetFrame};
use glam::Vec2;

/// Scale height of the molecular (Rayleigh) density profile, km.
pub const RAYLEIGH_SCALE_HEIGHT_KM: f32 = 8.0;
/// Scale height of the aerosol (Mie) density profile, km.
pub const MIE_SCALE_HEIGHT_KM: f32 = 1.2;
/// Largest finite value representable in IEEE half precision. Accumulated
/// integrals are clamped here so a GPU mirror stored as rgba16f cannot
/// overflow to infinity.
pub const HALF_FLOAT_MAX: f32 = 65504.0;
/// Default grid resolution along each table axis.
pub const DEFAULT_TABLE_RESOLUTION: usize = 128;

/// Fixed ray-march step count used while accumulating the integrals.
const MARCH_STEPS: usize = 64;

/// Square lookup table over (cos view angle in \[-1,1\], altitude fraction
/// in \[0,1\]). Each cell holds `[rayleigh density, mie density,
/// accumulated rayleigh integral, accumulated mie integral]`.
///
/// Immutable between rebuilds; rebuilt only when the owning planet's
/// geometry generation changes.
#[derive(Clone, Debug)]
pub struct OpticalDepthTable {
    resolution: usize,
    generation: u64,
    cells: Vec<[f32; 4]>,
}

impl OpticalDepthTable {
    /// Build the table for the given planet geometry.
    ///
    /// Ray-marches from each grid point toward the top of the atmosphere
    /// with a fixed step count, accumulating `exp(-h/H)` for both particle
    /// families. Rays that strike the surface are treated as fully opaque.
    pub fn build(planet: &PlanetFrame, resolution: usize) -> Result<Self, AtmosphereError> {
        if resolution < 2 {
            return Err(AtmosphereError::TableResolutionTooSmall { resolution });
        }
        let surface = planet.radius_km();
        let top = planet.atmosphere_top_km();
        let atmosphere = planet.atmosphere_radius_km();

        let mut cells = Vec::with_capacity(resolution * resolution);
        for row in 0..resolution {
            let altitude_fraction = row as f32 / (resolution - 1) as f32;
            let altitude = altitude_fraction * top;
            for col in 0..resolution {
                let cos_view = -1.0 + 2.0 * col as f32 / (resolution - 1) as f32;
                let sin_view = (1.0 - cos_view * cos_view).max(0.0).sqrt();

                // 2D slice through the planet center: x tangential, y radial.
                let origin = Vec2::new(0.0, surface + altitude);
                let dir = Vec2::new(sin_view, cos_view);

                let local_r = (-altitude / RAYLEIGH_SCALE_HEIGHT_KM).exp();
                let local_m = (-altitude / MIE_SCALE_HEIGHT_KM).exp();

                let (depth_r, depth_m) = if hits_circle(origin, dir, surface) {
                    // Looking into the ground: the sun path is fully occluded.
                    (HALF_FLOAT_MAX, HALF_FLOAT_MAX)
                } else {
                    let exit = exit_distance(origin, dir, atmosphere);
                    integrate_depth(origin, dir, exit, surface)
                };

                cells.push([
                    local_r,
                    local_m,
                    depth_r.min(HALF_FLOAT_MAX),
                    depth_m.min(HALF_FLOAT_MAX),
                ]);
            }
        }

        Ok(Self {
            resolution,
            generation: planet.generation(),
            cells,
        })
    }

    /// Grid resolution along each axis.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Planet geometry generation this table was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Read-only CPU mirror of the raw cell data, row-major with the
    /// altitude fraction as the row axis.
    pub fn cells(&self) -> &[[f32; 4]] {
        &self.cells
    }

    /// Bilinearly sample the table.
    ///
    /// `cos_view` is clamped to \[-1,1\] and `altitude_fraction` to \[0,1\].
    pub fn sample(&self, cos_view: f32, altitude_fraction: f32) -> [f32; 4] {
        let n = self.resolution;
        let u = (cos_view.clamp(-1.0, 1.0) + 1.0) * 0.5 * (n - 1) as f32;
        let v = altitude_fraction.clamp(0.0, 1.0) * (n - 1) as f32;

        let x0 = u.floor() as usize;
        let y0 = v.floor() as usize;
        let x1 = (x0 + 1).min(n - 1);
        let y1 = (y0 + 1).min(n - 1);
        let fx = u - x0 as f32;
        let fy = v - y0 as f32;

        let c00 = self.cells[y0 * n + x0];
        let c10 = self.cells[y0 * n + x1];
        let c01 = self.cells[y1 * n + x0];
        let c11 = self.cells[y1 * n + x1];

        let mut out = [0.0f32; 4];
        for (i, slot) in out.iter_mut().enumerate() {
            let top = c00[i] + (c10[i] - c00[i]) * fx;
            let bottom = c01[i] + (c11[i] - c01[i]) * fx;
            *slot = top + (bottom - top) * fy;
        }
        out
    }
}

/// Does a 2D ray hit the circle of the given radius around the origin?
fn hits_circle(origin: Vec2, dir: Vec2, radius: f32) -> bool {
    let b = origin.dot(dir);
    let c = origin.dot(origin) - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return false;
    }
    // Only a forward intersection counts.
    -b - disc.sqrt() > 0.0
}

/// Distance to the exit point of the atmosphere circle. The origin is
/// always inside (altitude <= top), so the far root is the exit.
fn exit_distance(origin: Vec2, dir: Vec2, atmosphere_radius: f32) -> f32 {
    let b = origin.dot(dir);
    let c = origin.dot(origin) - atmosphere_radius * atmosphere_radius;
    let disc = (b * b - c).max(0.0);
    (-b + disc.sqrt()).max(0.0)
}

/// Accumulate the two density integrals along the ray with midpoint steps.
fn integrate_depth(origin: Vec2, dir: Vec2, distance: f32, surface: f32) -> (f32, f32) {
    let step = distance / MARCH_STEPS as f32;
    let mut depth_r = 0.0f32;
    let mut depth_m = 0.0f32;
    for i in 0..MARCH_STEPS {
        let t = (i as f32 + 0.5) * step;
        let altitude = ((origin + dir * t).length() - surface).max(0.0);
        depth_r += (-altitude / RAYLEIGH_SCALE_HEIGHT_KM).exp() * step;
        depth_m += (-altitude / MIE_SCALE_HEIGHT_KM).exp() * step;
    }
    (depth_r, depth_m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn test_planet() -> PlanetFrame {
        PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap()
    }

    #[test]
    fn test_build_is_bit_deterministic() {
        let planet = test_planet();
        let a = OpticalDepthTable::build(&planet, 32).unwrap();
        let b = OpticalDepthTable::build(&planet, 32).unwrap();
        for (ca, cb) in a.cells().iter().zip(b.cells()) {
            for i in 0..4 {
                assert_eq!(
                    ca[i].to_bits(),
                    cb[i].to_bits(),
                    "repeated builds must be bit-identical"
                );
            }
        }
    }

    #[test]
    fn test_resolution_too_small_is_rejected() {
        let planet = test_planet();
        assert!(OpticalDepthTable::build(&planet, 1).is_err());
    }

    #[test]
    fn test_density_falls_with_altitude() {
        let planet = test_planet();
        let table = OpticalDepthTable::build(&planet, 64).unwrap();
        let low = table.sample(1.0, 0.0);
        let high = table.sample(1.0, 0.9);
        assert!(low[0] > high[0], "rayleigh density must decay with altitude");
        assert!(low[1] > high[1], "mie density must decay with altitude");
        // Aerosols have the smaller scale height, so they decay faster.
        assert!(high[1] / low[1] < high[0] / low[0]);
    }

    #[test]
    fn test_upward_depth_smaller_than_horizontal() {
        let planet = test_planet();
        let table = OpticalDepthTable::build(&planet, 64).unwrap();
        let up = table.sample(1.0, 0.0);
        let horizontal = table.sample(0.0, 0.0);
        assert!(
            horizontal[2] > up[2],
            "horizontal path {h} must accumulate more depth than vertical {v}",
            h = horizontal[2],
            v = up[2]
        );
    }

    #[test]
    fn test_downward_rays_are_occluded() {
        let planet = test_planet();
        let table = OpticalDepthTable::build(&planet, 64).unwrap();
        let down = table.sample(-1.0, 0.5);
        assert_eq!(down[2], HALF_FLOAT_MAX);
        assert_eq!(down[3], HALF_FLOAT_MAX);
    }

    #[test]
    fn test_accumulated_values_fit_half_precision() {
        let planet = test_planet();
        let table = OpticalDepthTable::build(&planet, 48).unwrap();
        for cell in table.cells() {
            assert!(cell[2] <= HALF_FLOAT_MAX && cell[3] <= HALF_FLOAT_MAX);
            assert!(cell[2].is_finite() && cell[3].is_finite());
        }
    }

    #[test]
    fn test_sample_clamps_out_of_range_coordinates() {
        let planet = test_planet();
        let table = OpticalDepthTable::build(&planet, 32).unwrap();
        let inside = table.sample(1.0, 1.0);
        let outside = table.sample(2.0, 5.0);
        assert_eq!(inside, outside);
    }

    #[test]
    fn test_generation_tracks_planet() {
        let mut planet = test_planet();
        planet.set_atmosphere_top_km(80.0).unwrap();
        let table = OpticalDepthTable::build(&planet, 16).unwrap();
        assert_eq!(table.generation(), planet.generation());
    }
}
