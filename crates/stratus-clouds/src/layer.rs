//! Cloud and fog layer model plus the per-frame active layer set.
//!
//! A layer is a spherical shell around the planet described by a base
//! altitude and thickness. Density inside the shell comes from a vertical
//! profile modulated by a deterministic fractal noise field (uniform for
//! fog). At most four layers can be active in a frame; the active set is
//! rebuilt every frame and truncated with a surfaced warning when more are
//! requested.

use glam::Vec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use stratus_atmosphere::PlanetFrame;
use stratus_render::{RenderError, Target, UpsampleTechnique};

/// Hard system-wide cap on simultaneously active layers.
pub const MAX_ACTIVE_LAYERS: usize = 4;

/// Edge length of a layer's small environment-light buffer.
const ENV_LIGHT_SIZE: u32 = 4;

/// The layer variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// Ground-hugging uniform fog with an exponential vertical falloff.
    Fog,
    /// Thin 2D scattering sheet; density varies only tangentially.
    Scattering2D,
    /// Full volumetric layer; density varies in all three dimensions.
    Volumetric,
}

/// Designer-facing layer parameters.
#[derive(Clone, Copy, Debug)]
pub struct LayerParams {
    /// Base altitude of the layer above the surface, km.
    pub altitude_km: f32,
    /// Shell thickness, km.
    pub thickness_km: f32,
    /// Extinction coefficient scale, per km.
    pub density: f32,
    /// Cloud coverage in \[0,1\]; 0 clears the sky.
    pub coverage: f32,
    /// Tangential noise frequency, cycles per km.
    pub noise_frequency: f32,
    /// Noise seed; layers with equal seeds produce identical fields.
    pub seed: u32,
    pub enabled: bool,
    pub cast_shadow: bool,
}

impl Default for LayerParams {
    fn default() -> Self {
        Self {
            altitude_km: 2.0,
            thickness_km: 2.0,
            density: 8.0,
            coverage: 0.5,
            noise_frequency: 0.2,
            seed: 0,
            enabled: true,
            cast_shadow: true,
        }
    }
}

/// Render targets owned by one layer.
#[derive(Clone, Debug)]
pub struct LayerTargets {
    /// Full-resolution scattering buffer (rgb = in-scatter, a = transmittance).
    pub scattering: Target,
    /// Reduced-resolution mirror, absent in the Bilinear (no-downsampling)
    /// technique.
    pub downsampled: Option<Target>,
    /// Small environment-light buffer passed to the layer below.
    pub env_light: Target,
}

/// One cloud or fog layer.
#[derive(Clone)]
pub struct CloudLayer {
    pub kind: LayerKind,
    pub params: LayerParams,
    noise: Fbm<Perlin>,
    /// Allocated lazily by the pipeline; `None` until the first frame or
    /// after a technique change drops every layer's targets.
    pub targets: Option<LayerTargets>,
    /// Set when target allocation failed; the layer is out for the session.
    pub disabled_by_error: bool,
}

impl CloudLayer {
    pub fn new(kind: LayerKind, params: LayerParams) -> Self {
        Self {
            kind,
            params,
            noise: Fbm::<Perlin>::new(params.seed).set_octaves(4),
            targets: None,
            disabled_by_error: false,
        }
    }

    /// Altitude of the layer top, km.
    pub fn top_km(&self) -> f32 {
        self.params.altitude_km + self.params.thickness_km
    }

    /// Combined opacity knob; a non-positive value means the layer cannot
    /// occlude anything.
    pub fn opacity(&self) -> f32 {
        self.params.density * self.params.coverage
    }

    /// True when the layer is knowably a no-op and can be skipped outright.
    pub fn bypass(&self) -> bool {
        self.params.density <= 0.0
            || self.params.coverage <= 0.0
            || self.params.thickness_km <= 0.0
    }

    /// Extinction coefficient (per km) at a world position.
    ///
    /// Zero outside the shell. Inside, the vertical profile shapes the
    /// shell edges and the noise field carves coverage out of it. Fog is
    /// uniform tangentially with an exponential falloff from its base.
    pub fn density_at(&self, position: Vec3, planet: &PlanetFrame) -> f32 {
        let altitude = planet.altitude_of(position);
        if altitude < self.params.altitude_km || altitude > self.top_km() {
            return 0.0;
        }
        let h = (altitude - self.params.altitude_km) / self.params.thickness_km.max(1e-3);

        let profile = match self.kind {
            LayerKind::Fog => (-3.0 * h).exp(),
            LayerKind::Scattering2D => 1.0,
            LayerKind::Volumetric => {
                smoothstep(0.0, 0.15, h) * (1.0 - smoothstep(0.85, 1.0, h))
            }
        };

        let field = match self.kind {
            LayerKind::Fog => 1.0,
            LayerKind::Scattering2D => {
                let p = position * self.params.noise_frequency;
                let n = self.noise.get([f64::from(p.x), f64::from(p.z)]) as f32;
                coverage_remap(n * 0.5 + 0.5, self.params.coverage)
            }
            LayerKind::Volumetric => {
                let p = position * self.params.noise_frequency;
                let n = self
                    .noise
                    .get([f64::from(p.x), f64::from(p.y), f64::from(p.z)])
                    as f32;
                coverage_remap(n * 0.5 + 0.5, self.params.coverage)
            }
        };

        self.params.density * profile * field
    }

    /// Allocate this layer's render targets for the given output size and
    /// refinement technique. Fails (recoverably) on degenerate sizes.
    pub fn allocate_targets(
        &mut self,
        width: u32,
        height: u32,
        technique: UpsampleTechnique,
        factor: u32,
    ) -> Result<(), RenderError> {
        let downsampled = if technique == UpsampleTechnique::Bilinear {
            None
        } else {
            Some(Target::new(width / factor.max(1), height / factor.max(1))?)
        };
        self.targets = Some(LayerTargets {
            scattering: Target::new(width, height)?,
            downsampled,
            env_light: Target::new(ENV_LIGHT_SIZE, ENV_LIGHT_SIZE)?,
        });
        Ok(())
    }

    /// Drop the owned targets (used when the refinement technique changes
    /// and every layer's buffer shape must be rebuilt).
    pub fn release_targets(&mut self) {
        self.targets = None;
    }
}

/// Remap a \[0,1\] noise value against a coverage amount: coverage 1 keeps
/// the full field, coverage 0 clears it.
fn coverage_remap(base: f32, coverage: f32) -> f32 {
    ((base - (1.0 - coverage)) / coverage.max(1e-3)).clamp(0.0, 1.0)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Altitude-sorted (ascending) subset of the enabled, non-bypassed layers
/// for the current frame. Rebuilt every frame, never persisted.
#[derive(Clone, Debug, Default)]
pub struct ActiveLayerSet {
    /// Indices into the owning layer array, sorted by ascending altitude.
    indices: Vec<usize>,
    /// True when more than [`MAX_ACTIVE_LAYERS`] layers were requested and
    /// the set was truncated to the lowest four.
    pub truncated: bool,
}

impl ActiveLayerSet {
    /// Build the set for this frame.
    ///
    /// More than four candidates is a degraded condition, not an error:
    /// the set keeps the four lowest layers, flags the truncation, and
    /// logs a warning so the frame still renders.
    pub fn build(layers: &[CloudLayer]) -> Self {
        let mut indices: Vec<usize> = layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| {
                layer.params.enabled && !layer.disabled_by_error && !layer.bypass()
            })
            .map(|(i, _)| i)
            .collect();
        indices.sort_by(|&a, &b| {
            layers[a]
                .params
                .altitude_km
                .total_cmp(&layers[b].params.altitude_km)
        });

        let truncated = indices.len() > MAX_ACTIVE_LAYERS;
        if truncated {
            log::warn!(
                "{} cloud layers requested but only {MAX_ACTIVE_LAYERS} may be active; \
                 dropping the {} highest",
                indices.len(),
                indices.len() - MAX_ACTIVE_LAYERS
            );
            indices.truncate(MAX_ACTIVE_LAYERS);
        }

        Self { indices, truncated }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Layer index for an ordinal slot (0 = lowest altitude).
    pub fn layer_index(&self, slot: usize) -> usize {
        self.indices[slot]
    }

    /// Slots in ascending-altitude order.
    pub fn ascending(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.indices.iter().copied().enumerate()
    }

    /// Slots in descending-altitude order (shadow and composite order).
    pub fn descending(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.indices.iter().copied().enumerate().rev()
    }

    /// True when any active layer is fog.
    pub fn has_fog(&self, layers: &[CloudLayer]) -> bool {
        self.indices
            .iter()
            .any(|&i| layers[i].kind == LayerKind::Fog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn volumetric(altitude_km: f32) -> CloudLayer {
        CloudLayer::new(
            LayerKind::Volumetric,
            LayerParams {
                altitude_km,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_active_set_sorted_ascending() {
        let layers = vec![volumetric(8.0), volumetric(2.0), volumetric(5.0)];
        let set = ActiveLayerSet::build(&layers);
        assert_eq!(set.len(), 3);
        assert!(!set.truncated);
        let altitudes: Vec<f32> = set
            .ascending()
            .map(|(_, i)| layers[i].params.altitude_km)
            .collect();
        assert_eq!(altitudes, vec![2.0, 5.0, 8.0]);
    }

    #[test]
    fn test_five_layers_truncate_to_lowest_four_with_warning() {
        let layers = vec![
            volumetric(10.0),
            volumetric(2.0),
            volumetric(6.0),
            volumetric(4.0),
            volumetric(8.0),
        ];
        let set = ActiveLayerSet::build(&layers);
        assert_eq!(set.len(), MAX_ACTIVE_LAYERS);
        assert!(set.truncated, "truncation must be surfaced, not silent");
        let kept: Vec<f32> = set
            .ascending()
            .map(|(_, i)| layers[i].params.altitude_km)
            .collect();
        assert_eq!(kept, vec![2.0, 4.0, 6.0, 8.0], "the highest layer is excluded");
    }

    #[test]
    fn test_disabled_bypassed_and_errored_layers_are_excluded() {
        let mut disabled = volumetric(1.0);
        disabled.params.enabled = false;
        let mut bypassed = volumetric(2.0);
        bypassed.params.density = 0.0;
        let mut errored = volumetric(3.0);
        errored.disabled_by_error = true;

        let layers = vec![disabled, bypassed, errored, volumetric(4.0)];
        let set = ActiveLayerSet::build(&layers);
        assert_eq!(set.len(), 1);
        assert_eq!(set.layer_index(0), 3);
        assert!(!set.truncated);
    }

    #[test]
    fn test_density_zero_outside_shell() {
        let planet = PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap();
        let layer = volumetric(2.0);
        let below = planet.center + Vec3::Y * (planet.radius_km() + 1.0);
        let above = planet.center + Vec3::Y * (planet.radius_km() + 5.0);
        assert_eq!(layer.density_at(below, &planet), 0.0);
        assert_eq!(layer.density_at(above, &planet), 0.0);
    }

    #[test]
    fn test_fog_density_is_uniform_tangentially() {
        let planet = PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap();
        let fog = CloudLayer::new(
            LayerKind::Fog,
            LayerParams {
                altitude_km: 0.0,
                thickness_km: 1.0,
                coverage: 1.0,
                ..Default::default()
            },
        );
        let r = planet.radius_km() + 0.2;
        let a = fog.density_at(Vec3::new(0.0, r, 0.0), &planet);
        let b = fog.density_at(Vec3::new(0.0, r, 0.0) + Vec3::X * 0.5, &planet);
        assert!(a > 0.0);
        assert!((a - b).abs() < a * 0.01, "fog should not vary tangentially: {a} vs {b}");
    }

    #[test]
    fn test_noise_field_is_deterministic_per_seed() {
        let planet = PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap();
        let a = volumetric(2.0);
        let b = volumetric(2.0);
        let pos = planet.center + Vec3::new(3.0, planet.radius_km() + 3.0, 7.0);
        assert_eq!(a.density_at(pos, &planet), b.density_at(pos, &planet));
    }

    #[test]
    fn test_full_coverage_makes_density_positive_mid_shell() {
        let planet = PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap();
        let layer = CloudLayer::new(
            LayerKind::Volumetric,
            LayerParams {
                coverage: 1.0,
                ..Default::default()
            },
        );
        // With full coverage the remap keeps the whole field; mid-shell the
        // vertical profile is 1, so density > 0 wherever noise > -1.
        let mut hits = 0;
        for i in 0..16 {
            let pos = planet.center
                + Vec3::new(i as f32 * 2.0, planet.radius_km() + 3.0, i as f32 * 3.0);
            if layer.density_at(pos, &planet) > 0.0 {
                hits += 1;
            }
        }
        assert!(hits > 8, "most mid-shell samples should carry density, got {hits}/16");
    }

    #[test]
    fn test_bypass_predicate() {
        let mut layer = volumetric(2.0);
        assert!(!layer.bypass());
        layer.params.coverage = 0.0;
        assert!(layer.bypass());
        layer.params.coverage = 0.5;
        layer.params.thickness_km = 0.0;
        assert!(layer.bypass());
    }

    #[test]
    fn test_allocate_targets_shapes_follow_technique() {
        let mut layer = volumetric(2.0);
        layer
            .allocate_targets(8, 8, UpsampleTechnique::Bilinear, 2)
            .unwrap();
        assert!(layer.targets.as_ref().unwrap().downsampled.is_none());

        layer
            .allocate_targets(8, 8, UpsampleTechnique::Smart, 2)
            .unwrap();
        let targets = layer.targets.as_ref().unwrap();
        let low = targets.downsampled.as_ref().unwrap();
        assert_eq!((low.width(), low.height()), (4, 4));
        assert_eq!(
            (targets.scattering.width(), targets.scattering.height()),
            (8, 8)
        );
    }

    #[test]
    fn test_degenerate_allocation_fails_recoverably() {
        let mut layer = volumetric(2.0);
        // Factor larger than the buffer collapses the mirror to zero texels.
        assert!(
            layer
                .allocate_targets(2, 2, UpsampleTechnique::Smart, 4)
                .is_err()
        );
    }
}
