//! Planet geometry reference frame.
//!
//! All atmospheric quantities are expressed relative to a `PlanetFrame`:
//! a center position, a surface radius, and the altitude of the atmosphere
//! top above the surface. Distances are in kilometers throughout.

use glam::Vec3;
use thiserror::Error;

/// Errors from atmospheric model construction.
#[derive(Debug, Error)]
pub enum AtmosphereError {
    /// The planet radius must be strictly positive.
    #[error("degenerate planet: radius must be > 0 km, got {radius_km}")]
    DegeneratePlanet { radius_km: f32 },
    /// The atmosphere must extend above the surface.
    #[error("degenerate atmosphere: top altitude must be > 0 km, got {top_km}")]
    DegenerateAtmosphere { top_km: f32 },
    /// The optical depth table needs at least a 2x2 grid to interpolate.
    #[error("optical depth table resolution must be >= 2, got {resolution}")]
    TableResolutionTooSmall { resolution: usize },
}

/// Planet geometry driving the atmospheric model.
///
/// Mutating the radius or atmosphere top bumps the generation counter,
/// which invalidates any [`crate::OpticalDepthTable`] built from an older
/// generation. Invariant: atmosphere radius >= surface radius, enforced by
/// rejecting non-positive top altitudes.
#[derive(Clone, Debug)]
pub struct PlanetFrame {
    /// Planet center in world space (km).
    pub center: Vec3,
    /// Surface radius in km.
    radius_km: f32,
    /// Altitude of the atmosphere top above the surface, in km.
    atmosphere_top_km: f32,
    /// Surface "up" normal at the camera; used when a position coincides
    /// with the planet center and no radial direction exists.
    pub surface_normal: Vec3,
    generation: u64,
}

impl PlanetFrame {
    /// Create a planet frame, failing fast on degenerate geometry.
    pub fn new(
        center: Vec3,
        radius_km: f32,
        atmosphere_top_km: f32,
    ) -> Result<Self, AtmosphereError> {
        if !(radius_km > 0.0) {
            return Err(AtmosphereError::DegeneratePlanet { radius_km });
        }
        if !(atmosphere_top_km > 0.0) {
            return Err(AtmosphereError::DegenerateAtmosphere {
                top_km: atmosphere_top_km,
            });
        }
        Ok(Self {
            center,
            radius_km,
            atmosphere_top_km,
            surface_normal: Vec3::Y,
            generation: 0,
        })
    }

    /// Earth-like planet at the world origin: 6371 km radius, 60 km atmosphere.
    pub fn earth_like() -> Self {
        Self {
            center: Vec3::ZERO,
            radius_km: 6371.0,
            atmosphere_top_km: 60.0,
            surface_normal: Vec3::Y,
            generation: 0,
        }
    }

    /// Surface radius in km.
    pub fn radius_km(&self) -> f32 {
        self.radius_km
    }

    /// Altitude of the atmosphere top above the surface, in km.
    pub fn atmosphere_top_km(&self) -> f32 {
        self.atmosphere_top_km
    }

    /// Radius of the atmosphere top sphere in km.
    pub fn atmosphere_radius_km(&self) -> f32 {
        self.radius_km + self.atmosphere_top_km
    }

    /// Replace the surface radius. Bumps the generation counter.
    pub fn set_radius_km(&mut self, radius_km: f32) -> Result<(), AtmosphereError> {
        if !(radius_km > 0.0) {
            return Err(AtmosphereError::DegeneratePlanet { radius_km });
        }
        self.radius_km = radius_km;
        self.generation += 1;
        Ok(())
    }

    /// Replace the atmosphere top altitude. Bumps the generation counter.
    pub fn set_atmosphere_top_km(&mut self, top_km: f32) -> Result<(), AtmosphereError> {
        if !(top_km > 0.0) {
            return Err(AtmosphereError::DegenerateAtmosphere { top_km });
        }
        self.atmosphere_top_km = top_km;
        self.generation += 1;
        Ok(())
    }

    /// Geometry generation counter. Changes whenever radius or atmosphere
    /// top are mutated, signalling that derived tables must be rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Altitude of a world position above the surface (km, may be negative).
    pub fn altitude_of(&self, position: Vec3) -> f32 {
        (position - self.center).length() - self.radius_km
    }

    /// Radial "up" direction at a world position.
    pub fn up_at(&self, position: Vec3) -> Vec3 {
        let radial = position - self.center;
        if radial.length_squared() > 1e-12 {
            radial.normalize()
        } else {
            self.surface_normal
        }
    }
}
