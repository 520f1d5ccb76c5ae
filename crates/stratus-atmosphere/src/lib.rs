//! Atmospheric scattering core: planet frame, precomputed optical depth,
//! and the sky radiance integrator.
//!
//! The optical depth table is built offline (once per planet geometry
//! generation) and consumed by the ray-marching radiance integrator. A CPU
//! environment estimator reuses the same integrator at coarse sample counts
//! so scene lighting stays consistent with the rendered sky.

pub mod environment;
pub mod optical_depth;
pub mod planet;
pub mod scatter;

pub use environment::{EnvironmentEstimate, estimate_environment, sun_color};
pub use optical_depth::{
    DEFAULT_TABLE_RESOLUTION, HALF_FLOAT_MAX, MIE_SCALE_HEIGHT_KM, OpticalDepthTable,
    RAYLEIGH_SCALE_HEIGHT_KM,
};
pub use planet::{AtmosphereError, PlanetFrame};
pub use scatter::{
    ScatterUniform, ScatteringParams, SkyRadiance, ray_sphere_intersect, sky_color, terminator,
};
