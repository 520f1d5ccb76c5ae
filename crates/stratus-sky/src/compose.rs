//! Per-pixel shading kernels: layer shell marching, ordered compositing,
//! and the god-ray modulation of the background sky.
//!
//! These are plain functions over the shared frame state so the full-res,
//! reduced-res, and recompute paths all run the identical code. The
//! refinement policies rely on that: a recomputed pixel must be
//! bit-identical to a directly rendered one.

use glam::Vec3;
use std::f32::consts::PI;
use stratus_atmosphere::{PlanetFrame, ray_sphere_intersect};
use stratus_clouds::{CloudLayer, DeepShadowBuilder};

/// Isotropic phase normalization.
const ISOTROPIC_PHASE: f32 = 1.0 / (4.0 * PI);

/// Ray parameter interval over which the ray crosses the spherical shell
/// `[bottom_km, top_km]` around the planet, if it does.
pub fn shell_segment(
    planet: &PlanetFrame,
    origin: Vec3,
    dir: Vec3,
    bottom_km: f32,
    top_km: f32,
) -> Option<(f32, f32)> {
    let outer = ray_sphere_intersect(origin, dir, planet.center, planet.radius_km() + top_km);
    if outer.1 < 0.0 {
        return None;
    }
    let inner = ray_sphere_intersect(origin, dir, planet.center, planet.radius_km() + bottom_km);
    let altitude = planet.altitude_of(origin);

    let (start, end) = if altitude > top_km {
        // Approaching from above: enter through the outer sphere, stop at
        // the inner sphere if the ray dives into it.
        let end = if inner.0 > 0.0 { inner.0 } else { outer.1 };
        (outer.0.max(0.0), end)
    } else if altitude < bottom_km {
        // From below: the inner sphere surrounds the origin, so the shell
        // begins at its far crossing.
        (inner.1.max(0.0), outer.1)
    } else {
        let end = if inner.0 > 0.0 { inner.0 } else { outer.1 };
        (0.0, end)
    };

    (end > start).then_some((start, end))
}

/// Shared per-frame inputs for shading one layer.
pub struct LayerShade<'a> {
    pub planet: &'a PlanetFrame,
    pub layer: &'a CloudLayer,
    pub shadow: &'a DeepShadowBuilder,
    /// Direct sun color at the camera, extinction applied.
    pub sun_color: Vec3,
    /// Ambient arriving at this layer from the sky and the layers above.
    pub ambient: Vec3,
    pub march_steps: u32,
}

impl LayerShade<'_> {
    /// March the view ray through the layer shell.
    ///
    /// Returns premultiplied in-scattered RGB and the remaining view
    /// transmittance in alpha. Rays that never cross the shell, or whose
    /// crossing lies beyond `max_distance_km`, return the identity sample.
    pub fn shade(&self, origin: Vec3, dir: Vec3, max_distance_km: f32) -> [f32; 4] {
        let bottom = self.layer.params.altitude_km;
        let top = self.layer.top_km();
        let Some((start, end)) = shell_segment(self.planet, origin, dir, bottom, top) else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        let end = end.min(max_distance_km);
        if end <= start || self.march_steps == 0 {
            return [0.0, 0.0, 0.0, 1.0];
        }

        let step = (end - start) / self.march_steps as f32;
        let mut in_scattered = Vec3::ZERO;
        let mut transmittance = 1.0f32;

        for i in 0..self.march_steps {
            let t = start + (i as f32 + 0.5) * step;
            let pos = origin + dir * t;
            let sigma = self.layer.density_at(pos, self.planet);
            if sigma <= 0.0 {
                continue;
            }
            let altitude = self.planet.altitude_of(pos);
            let sun = self.sun_color * self.shadow.transmittance_above(pos, altitude);
            let source = (sun + self.ambient) * ISOTROPIC_PHASE;
            in_scattered += source * (sigma * step * transmittance);
            transmittance *= (-sigma * step).exp();
        }

        [in_scattered.x, in_scattered.y, in_scattered.z, transmittance]
    }
}

/// Composite layer samples over the background sky.
///
/// `samples` is ordered near to far along the view ray; each holds
/// premultiplied RGB and transmittance in alpha. Standard back-to-front
/// over-compositing, so the result for an empty slice is the sky itself.
pub fn composite_over(sky: Vec3, samples: &[[f32; 4]]) -> Vec3 {
    let mut result = sky;
    for sample in samples.iter().rev() {
        result = Vec3::new(sample[0], sample[1], sample[2]) + result * sample[3];
    }
    result
}

/// Average sun transmittance along the view ray over `[t_start, t_end]`,
/// used to modulate the background in-scatter of the god-ray crossing.
pub fn god_ray_factor(
    shadow: &DeepShadowBuilder,
    planet: &PlanetFrame,
    origin: Vec3,
    dir: Vec3,
    t_start: f32,
    t_end: f32,
    steps: u32,
) -> f32 {
    if steps == 0 || t_end <= t_start {
        return 1.0;
    }
    let step = (t_end - t_start) / steps as f32;
    let mut sum = 0.0f32;
    for i in 0..steps {
        let pos = origin + dir * (t_start + (i as f32 + 0.5) * step);
        sum += shadow.transmittance_above(pos, planet.altitude_of(pos));
    }
    (sum / steps as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_clouds::{LayerKind, LayerParams, ShadowConfig};

    fn planet() -> PlanetFrame {
        PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap()
    }

    fn surface(planet: &PlanetFrame) -> Vec3 {
        planet.center + Vec3::Y * planet.radius_km()
    }

    #[test]
    fn test_shell_segment_from_below() {
        let planet = planet();
        let (start, end) = shell_segment(&planet, surface(&planet), Vec3::Y, 2.0, 4.0).unwrap();
        assert!((start - 2.0).abs() < 1e-2, "entry at layer bottom, got {start}");
        assert!((end - 4.0).abs() < 1e-2, "exit at layer top, got {end}");
    }

    #[test]
    fn test_shell_segment_from_inside() {
        let planet = planet();
        let origin = planet.center + Vec3::Y * (planet.radius_km() + 3.0);
        let (start, end) = shell_segment(&planet, origin, Vec3::Y, 2.0, 4.0).unwrap();
        assert_eq!(start, 0.0);
        assert!((end - 1.0).abs() < 1e-2);

        // Looking down from inside stops at the inner sphere.
        let (start, end) = shell_segment(&planet, origin, -Vec3::Y, 2.0, 4.0).unwrap();
        assert_eq!(start, 0.0);
        assert!((end - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_shell_segment_from_above() {
        let planet = planet();
        let origin = planet.center + Vec3::Y * (planet.radius_km() + 10.0);
        let (start, end) = shell_segment(&planet, origin, -Vec3::Y, 2.0, 4.0).unwrap();
        assert!((start - 6.0).abs() < 1e-2);
        assert!((end - 8.0).abs() < 1e-2);
    }

    #[test]
    fn test_shell_segment_miss() {
        let planet = planet();
        let origin = planet.center + Vec3::Y * (planet.radius_km() + 10.0);
        assert!(shell_segment(&planet, origin, Vec3::Y, 2.0, 4.0).is_none());
    }

    #[test]
    fn test_composite_identity_for_no_samples() {
        let sky = Vec3::new(0.2, 0.4, 0.9);
        assert_eq!(composite_over(sky, &[]), sky);
    }

    #[test]
    fn test_composite_near_sample_occludes_far() {
        let sky = Vec3::ONE;
        let opaque_near = [0.5, 0.0, 0.0, 0.0];
        let far = [0.0, 9.0, 0.0, 0.5];
        let out = composite_over(sky, &[opaque_near, far]);
        // The opaque near sample blocks both the far layer and the sky.
        assert_eq!(out, Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn test_layer_shade_identity_outside_shell() {
        let planet = planet();
        let layer = CloudLayer::new(
            LayerKind::Volumetric,
            LayerParams {
                altitude_km: 2.0,
                thickness_km: 2.0,
                ..Default::default()
            },
        );
        let shadow = DeepShadowBuilder::new(ShadowConfig::default()).unwrap();
        let shade = LayerShade {
            planet: &planet,
            layer: &layer,
            shadow: &shadow,
            sun_color: Vec3::ONE,
            ambient: Vec3::ZERO,
            march_steps: 8,
        };
        // Scene geometry in front of the layer keeps the sample empty.
        let sample = shade.shade(surface(&planet), Vec3::Y, 1.0);
        assert_eq!(sample, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_dense_fog_attenuates_view() {
        let planet = planet();
        let fog = CloudLayer::new(
            LayerKind::Fog,
            LayerParams {
                altitude_km: 0.0,
                thickness_km: 1.0,
                density: 10.0,
                coverage: 1.0,
                ..Default::default()
            },
        );
        let shadow = DeepShadowBuilder::new(ShadowConfig::default()).unwrap();
        let shade = LayerShade {
            planet: &planet,
            layer: &fog,
            shadow: &shadow,
            sun_color: Vec3::splat(20.0),
            ambient: Vec3::ZERO,
            march_steps: 16,
        };
        let sample = shade.shade(surface(&planet), Vec3::Y, 1000.0);
        assert!(sample[3] < 1.0, "dense fog must absorb, got {}", sample[3]);
        assert!(sample[0] > 0.0, "lit fog must in-scatter");
    }

    #[test]
    fn test_god_ray_factor_is_unit_without_occluders() {
        let planet = planet();
        let shadow = DeepShadowBuilder::new(ShadowConfig::default()).unwrap();
        let f = god_ray_factor(&shadow, &planet, surface(&planet), Vec3::Y, 0.0, 10.0, 8);
        assert_eq!(f, 1.0);
    }
}
