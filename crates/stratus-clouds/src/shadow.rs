//! Multi-layer deep shadow maps.
//!
//! All casting layers share one four-channel shadow target; each layer
//! owns the channel matching its ordinal slot. Layers render strictly top
//! to bottom: the first sub-layer of each layer reads the product of the
//! channels already written, so occlusion from higher layers darkens the
//! layers beneath them through the scatter feedback term. A layer's
//! altitude bounds are published only after its channel is written, which
//! keeps readers from sampling a channel that still holds its clear value.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use stratus_atmosphere::{PlanetFrame, ray_sphere_intersect};
use stratus_render::{RenderError, Target};

use crate::layer::{CloudLayer, LayerKind};
use crate::order::LayerBounds;

/// Vertical extent recorded for a layer with no depth of its own.
const FLAT_LAYER_EPSILON_KM: f32 = 0.05;

/// Density samples per sub-layer slab.
const SLAB_STEPS: u32 = 4;

/// How many transmittance sub-layers each casting layer is split into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeepShadowQuality {
    Deep1,
    Deep2,
    Deep3,
}

impl DeepShadowQuality {
    pub fn sub_layers(self) -> usize {
        match self {
            DeepShadowQuality::Deep1 => 1,
            DeepShadowQuality::Deep2 => 2,
            DeepShadowQuality::Deep3 => 3,
        }
    }
}

/// Shadow map configuration.
#[derive(Clone, Copy, Debug)]
pub struct ShadowConfig {
    /// Edge length of the square shadow map, texels.
    pub resolution: u32,
    pub quality: DeepShadowQuality,
    /// Box blur radius applied after each sub-layer, texels. 0 disables.
    pub blur_radius: u32,
    /// World-space edge length covered by the map, km.
    pub coverage_km: f32,
    /// Strength of the incoming-occlusion feedback on slab extinction.
    /// 0 makes every layer independent of the layers above it.
    pub scatter_feedback: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: 128,
            quality: DeepShadowQuality::Deep2,
            blur_radius: 1,
            coverage_km: 40.0,
            scatter_feedback: 0.5,
        }
    }
}

/// Texel rectangle of the shadow map in use this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(resolution: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: resolution,
            height: resolution,
        }
    }
}

/// Per-frame shadow map state shared with the scattering and composite
/// passes.
#[derive(Clone, Copy, Debug)]
pub struct ShadowState {
    /// Bounds per channel slot, ascending-altitude order. Slots whose
    /// layer has not rendered yet hold [`LayerBounds::EMPTY`].
    pub bounds: [LayerBounds; 4],
    pub world_to_shadow: Mat4,
    pub shadow_to_world: Mat4,
    pub viewport: Viewport,
    /// Light travel direction (away from the sun), normalized.
    pub travel: Vec3,
}

impl ShadowState {
    fn idle() -> Self {
        Self {
            bounds: [LayerBounds::EMPTY; 4],
            world_to_shadow: Mat4::IDENTITY,
            shadow_to_world: Mat4::IDENTITY,
            viewport: Viewport::full(1),
            travel: -Vec3::Y,
        }
    }
}

/// GPU-side shadow uniform. Matches a WGSL struct with 16-byte rows.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowUniform {
    /// World to shadow clip transform. (offset 0)
    pub world_to_shadow: [[f32; 4]; 4],
    /// Per-slot lower bound altitudes, km. (offset 64)
    pub bounds_min_km: [f32; 4],
    /// Per-slot upper bound altitudes, km. (offset 80)
    pub bounds_max_km: [f32; 4],
    /// Reciprocal map resolution. (offset 96)
    pub texel_size: [f32; 2],
    /// Scatter feedback strength. (offset 104)
    pub scatter_feedback: f32,
    /// Active channel count. (offset 108)
    pub active_count: u32,
}

impl ShadowUniform {
    pub fn from_state(state: &ShadowState, config: &ShadowConfig, active_count: u32) -> Self {
        let mut bounds_min_km = [0.0f32; 4];
        let mut bounds_max_km = [0.0f32; 4];
        for (i, b) in state.bounds.iter().enumerate() {
            bounds_min_km[i] = b.min_km;
            bounds_max_km[i] = b.max_km;
        }
        let inv = 1.0 / config.resolution as f32;
        Self {
            world_to_shadow: state.world_to_shadow.to_cols_array_2d(),
            bounds_min_km,
            bounds_max_km,
            texel_size: [inv, inv],
            scatter_feedback: config.scatter_feedback,
            active_count,
        }
    }
}

/// First positive ray parameter at which `origin + t * dir` reaches the
/// sphere shell `altitude_km` above the surface, if any.
pub fn project_to_altitude(
    origin: Vec3,
    dir: Vec3,
    planet: &PlanetFrame,
    altitude_km: f32,
) -> Option<f32> {
    let radius = planet.radius_km() + altitude_km;
    let (t0, t1) = ray_sphere_intersect(origin, dir, planet.center, radius);
    if t1 < 0.0 {
        None
    } else if t0 >= 0.0 {
        Some(t0)
    } else {
        Some(t1)
    }
}

/// Builds the shared four-channel deep shadow map for a frame.
pub struct DeepShadowBuilder {
    config: ShadowConfig,
    map: Target,
    state: ShadowState,
}

impl DeepShadowBuilder {
    pub fn new(config: ShadowConfig) -> Result<Self, RenderError> {
        let map = Target::filled(config.resolution, config.resolution, [1.0; 4])?;
        Ok(Self {
            config,
            map,
            state: ShadowState::idle(),
        })
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// The shared shadow target. Channel `n` holds the transmittance of
    /// the layer in ordinal slot `n`.
    pub fn map(&self) -> &Target {
        &self.map
    }

    pub fn state(&self) -> &ShadowState {
        &self.state
    }

    /// Reset the map and fit the orthographic frame over the camera's
    /// ground point for this frame's sun direction.
    pub fn begin_frame(&mut self, planet: &PlanetFrame, camera_position: Vec3, sun_direction: Vec3) {
        self.map.clear([1.0; 4]);

        let travel = (-sun_direction).normalize_or_zero();
        let up_hint = if travel.y.abs() < 0.99 { Vec3::Y } else { Vec3::X };

        // Anchor the frame over the camera's ground point, with the eye
        // pushed back above the atmosphere so every layer sits in front
        // of the near plane.
        let ground = planet.center + planet.up_at(camera_position) * planet.radius_km();
        let standoff = planet.atmosphere_radius_km() - planet.radius_km() + self.config.coverage_km;
        let eye = ground - travel * standoff;

        let half = self.config.coverage_km * 0.5;
        let depth = 2.0 * standoff + planet.atmosphere_radius_km();
        let view = Mat4::look_to_rh(eye, travel, up_hint);
        let proj = Mat4::orthographic_rh(-half, half, -half, half, 0.0, depth);

        self.state = ShadowState {
            bounds: [LayerBounds::EMPTY; 4],
            world_to_shadow: proj * view,
            shadow_to_world: (proj * view).inverse(),
            viewport: Viewport::full(self.config.resolution),
            travel,
        };
    }

    /// World-space ray for a shadow texel, starting on the near plane and
    /// traveling with the light.
    fn texel_ray(&self, x: u32, y: u32) -> (Vec3, Vec3) {
        let res = self.config.resolution as f32;
        let ndc_x = ((x as f32 + 0.5) / res) * 2.0 - 1.0;
        let ndc_y = 1.0 - ((y as f32 + 0.5) / res) * 2.0;
        let origin = self
            .state
            .shadow_to_world
            .project_point3(Vec3::new(ndc_x, ndc_y, 0.0));
        (origin, self.state.travel)
    }

    /// Render one layer's channel and publish its bounds.
    ///
    /// Must be called in descending-altitude order within a frame; the
    /// first sub-layer reads the channel product, so a lower layer drawn
    /// too early would miss the occlusion of the layers above it.
    pub fn render_layer(&mut self, slot: usize, layer: &CloudLayer, planet: &PlanetFrame) {
        debug_assert!(slot < 4);
        let res = self.config.resolution;
        let texel_count = (res * res) as usize;
        let depth = self.config.quality.sub_layers();
        let feedback = self.config.scatter_feedback;

        let top_km = layer.top_km();
        let slab_km = layer.params.thickness_km.max(1e-3) / depth as f32;

        let mut transmittance = vec![1.0f32; texel_count];
        for d in 0..depth {
            let slab_top = top_km - d as f32 * slab_km;
            let slab_bottom = slab_top - slab_km;

            for y in 0..res {
                for x in 0..res {
                    let i = (y * res + x) as usize;
                    let (origin, dir) = self.texel_ray(x, y);
                    let tau = slab_optical_depth(
                        origin, dir, planet, layer, slab_top, slab_bottom,
                    );

                    let incoming = if d == 0 {
                        let c = self.map.get(x, y);
                        c[0] * c[1] * c[2] * c[3]
                    } else {
                        transmittance[i]
                    };
                    let slab = (-tau * (1.0 + feedback * (1.0 - incoming))).exp();
                    transmittance[i] = if d == 0 { slab } else { incoming * slab };
                }
            }

            if self.config.blur_radius > 0 {
                box_blur(&mut transmittance, res, self.config.blur_radius);
            }
        }

        for y in 0..res {
            for x in 0..res {
                let mut texel = self.map.get(x, y);
                texel[slot] = transmittance[(y * res + x) as usize];
                self.map.set(x, y, texel);
            }
        }

        // Bounds go live only now that the channel holds real data.
        self.record_bounds(slot, layer);
    }

    /// Publish a layer's bounds without touching its channel. Non-casting
    /// layers go through here so the classifier still sees them.
    pub fn record_bounds(&mut self, slot: usize, layer: &CloudLayer) {
        debug_assert!(slot < 4);
        // Only volumetric layers occupy a real vertical band. Fog hugs the
        // ground and flat sheets have no depth, so both publish a sliver.
        let max_km = match layer.kind {
            LayerKind::Volumetric => layer.top_km(),
            LayerKind::Fog | LayerKind::Scattering2D => {
                layer.params.altitude_km + FLAT_LAYER_EPSILON_KM
            }
        };
        self.state.bounds[slot] = LayerBounds::new(layer.params.altitude_km, max_km);
    }

    /// Sun transmittance at a world position from every layer whose
    /// published bounds lie above the given altitude.
    pub fn transmittance_above(&self, world: Vec3, altitude_km: f32) -> f32 {
        let clip = self.state.world_to_shadow.project_point3(world);
        let u = clip.x * 0.5 + 0.5;
        let v = 0.5 - clip.y * 0.5;
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return 1.0;
        }
        let texel = self.map.sample_bilinear(u, v);
        let mut result = 1.0;
        for (channel, bounds) in self.state.bounds.iter().enumerate() {
            if !bounds.is_empty() && bounds.min_km > altitude_km {
                result *= texel[channel];
            }
        }
        result
    }
}

/// Optical depth through one slab of a layer along a light ray.
fn slab_optical_depth(
    origin: Vec3,
    dir: Vec3,
    planet: &PlanetFrame,
    layer: &CloudLayer,
    slab_top_km: f32,
    slab_bottom_km: f32,
) -> f32 {
    let Some(t_enter) = project_to_altitude(origin, dir, planet, slab_top_km) else {
        return 0.0;
    };
    let Some(t_exit) = project_to_altitude(origin, dir, planet, slab_bottom_km) else {
        return 0.0;
    };
    let length = t_exit - t_enter;
    if length <= 0.0 {
        return 0.0;
    }

    let step = length / SLAB_STEPS as f32;
    let mut tau = 0.0;
    for s in 0..SLAB_STEPS {
        let t = t_enter + (s as f32 + 0.5) * step;
        tau += layer.density_at(origin + dir * t, planet) * step;
    }
    tau
}

/// Separable box blur over a square single-channel buffer, clamped at the
/// edges.
fn box_blur(buffer: &mut [f32], resolution: u32, radius: u32) {
    let res = resolution as i64;
    let r = radius as i64;
    let norm = 1.0 / (2 * r + 1) as f32;
    let mut scratch = vec![0.0f32; buffer.len()];

    for y in 0..res {
        for x in 0..res {
            let mut sum = 0.0;
            for dx in -r..=r {
                let sx = (x + dx).clamp(0, res - 1);
                sum += buffer[(y * res + sx) as usize];
            }
            scratch[(y * res + x) as usize] = sum * norm;
        }
    }
    for y in 0..res {
        for x in 0..res {
            let mut sum = 0.0;
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, res - 1);
                sum += scratch[(sy * res + x) as usize];
            }
            buffer[(y * res + x) as usize] = sum * norm;
        }
    }
}
