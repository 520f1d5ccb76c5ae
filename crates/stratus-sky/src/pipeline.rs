//! The per-frame sky pipeline and its phase machine.
//!
//! Each frame walks four phases in a fixed order: `pre_render` (shadows,
//! environment, classification), `main_render` (layer scattering and the
//! sky composite), `post_process` (scene composite, luminance adaptation,
//! tone mapping), and `end_frame` (cache teardown). Calling a phase out of order is an
//! error, not UB. Unrecoverable failures park the pipeline in a disabled
//! state that every later call reports until `re_enable`.

use std::collections::VecDeque;

use glam::Vec3;
use thiserror::Error;

use stratus_atmosphere::{
    AtmosphereError, EnvironmentEstimate, OpticalDepthTable, PlanetFrame, estimate_environment,
    ray_sphere_intersect, sky_color,
};
use stratus_clouds::{
    ActiveLayerSet, CloudLayer, DeepShadowBuilder, LayerKind, LayerOrdering, LayerParams, classify,
};
use stratus_render::{
    Camera, DepthBuffer, DepthCache, LuminanceState, RenderError, Target, UpsampleTechnique,
    apply_tone_map, measure_immediate, nightness, upsample,
};

use crate::compose::{LayerShade, composite_over, god_ray_factor, shell_segment};
use crate::config::SkyConfig;

/// Frames between measuring scene luminance and feeding it to adaptation,
/// mirroring an asynchronous GPU readback.
const READBACK_DELAY_FRAMES: usize = 2;

/// The four per-frame phases, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    PreRender,
    MainRender,
    PostProcess,
    EndFrame,
}

/// Sky pipeline errors.
#[derive(Debug, Error)]
pub enum SkyError {
    /// A prior unrecoverable failure parked the pipeline; call
    /// [`SkyPipeline::re_enable`] to try again.
    #[error("sky pipeline is disabled after an unrecoverable error")]
    Disabled,
    #[error("frame phase out of order: expected {expected:?}, got {requested:?}")]
    OutOfOrder {
        expected: FramePhase,
        requested: FramePhase,
    },
    #[error(transparent)]
    Atmosphere(#[from] AtmosphereError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Everything `pre_render` resolves for the rest of the frame.
#[derive(Clone)]
struct FrameContext {
    camera: Camera,
    sun_direction: Vec3,
    dt_seconds: f32,
    night: f32,
    active: ActiveLayerSet,
    ordering: LayerOrdering,
    environment: EnvironmentEstimate,
}

/// The sky renderer.
pub struct SkyPipeline {
    planet: PlanetFrame,
    config: SkyConfig,
    layers: Vec<CloudLayer>,
    table: OpticalDepthTable,
    table_generation: u64,
    shadow: DeepShadowBuilder,
    depth_cache: DepthCache,
    luminance: LuminanceState,
    readbacks: VecDeque<f32>,
    frame: Option<FrameContext>,
    hdr: Target,
    /// Per-pixel RGB transmittance toward the scene: atmospheric
    /// extinction times the cloud-layer transmittance product.
    extinction: Target,
    output: Target,
    phase: FramePhase,
    disabled_reason: Option<String>,
    frame_index: u64,
}

impl SkyPipeline {
    pub fn new(planet: PlanetFrame, config: SkyConfig) -> Result<Self, SkyError> {
        let table = OpticalDepthTable::build(&planet, config.table_resolution)?;
        let table_generation = planet.generation();
        let shadow = DeepShadowBuilder::new(config.shadow)?;
        let hdr = Target::new(config.width, config.height)?;
        let extinction = Target::filled(config.width, config.height, [1.0; 4])?;
        let output = Target::new(config.width, config.height)?;
        Ok(Self {
            planet,
            config,
            layers: Vec::new(),
            table,
            table_generation,
            shadow,
            depth_cache: DepthCache::new(),
            luminance: LuminanceState::new(),
            readbacks: VecDeque::new(),
            frame: None,
            hdr,
            extinction,
            output,
            phase: FramePhase::PreRender,
            disabled_reason: None,
            frame_index: 0,
        })
    }

    pub fn add_layer(&mut self, kind: LayerKind, params: LayerParams) -> usize {
        self.layers.push(CloudLayer::new(kind, params));
        self.layers.len() - 1
    }

    pub fn layer(&self, index: usize) -> Option<&CloudLayer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut CloudLayer> {
        self.layers.get_mut(index)
    }

    pub fn planet(&self) -> &PlanetFrame {
        &self.planet
    }

    /// Mutable planet access. Geometry changes bump the generation counter
    /// and the optical depth table rebuilds lazily on the next frame.
    pub fn planet_mut(&mut self) -> &mut PlanetFrame {
        &mut self.planet
    }

    pub fn config(&self) -> &SkyConfig {
        &self.config
    }

    /// Switch the resolution refinement policy. Changing it invalidates
    /// every layer's target shapes, so all targets are dropped and come
    /// back on the next `pre_render`.
    pub fn set_upsample_technique(&mut self, technique: UpsampleTechnique) {
        if self.config.upsample.technique == technique {
            return;
        }
        log::info!(
            "upsample technique {:?} -> {technique:?}; reallocating layer targets",
            self.config.upsample.technique
        );
        self.config.upsample.technique = technique;
        for layer in &mut self.layers {
            layer.release_targets();
        }
    }

    /// Tone-mapped output of the last completed frame.
    pub fn output(&self) -> &Target {
        &self.output
    }

    /// HDR sky-and-cloud radiance of the last `main_render`, before the
    /// scene composite.
    pub fn hdr(&self) -> &Target {
        &self.hdr
    }

    /// Per-pixel RGB transmittance of sky and clouds toward the scene.
    pub fn extinction(&self) -> &Target {
        &self.extinction
    }

    pub fn luminance(&self) -> &LuminanceState {
        &self.luminance
    }

    pub fn shadow(&self) -> &DeepShadowBuilder {
        &self.shadow
    }

    /// Classification of the current frame, if `pre_render` has run.
    pub fn ordering(&self) -> Option<&LayerOrdering> {
        self.frame.as_ref().map(|f| &f.ordering)
    }

    pub fn environment(&self) -> Option<&EnvironmentEstimate> {
        self.frame.as_ref().map(|f| &f.environment)
    }

    pub fn active_layer_count(&self) -> usize {
        self.frame.as_ref().map_or(0, |f| f.active.len())
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_reason.is_some()
    }

    /// Human-readable pipeline status for diagnostics.
    pub fn status(&self) -> String {
        match &self.disabled_reason {
            Some(reason) => format!("disabled: {reason}"),
            None => format!("ok: frame {}, phase {:?}", self.frame_index, self.phase),
        }
    }

    /// Clear the disabled state and restart the phase machine.
    pub fn re_enable(&mut self) {
        if self.disabled_reason.take().is_some() {
            log::info!("sky pipeline re-enabled");
        }
        self.phase = FramePhase::PreRender;
        self.frame = None;
    }

    fn ensure_phase(&self, requested: FramePhase) -> Result<(), SkyError> {
        if self.disabled_reason.is_some() {
            return Err(SkyError::Disabled);
        }
        if self.phase != requested {
            return Err(SkyError::OutOfOrder {
                expected: self.phase,
                requested,
            });
        }
        Ok(())
    }

    /// Phase 1: rebuild stale tables, build the active set, render the
    /// deep shadow map top to bottom, estimate environment lighting, and
    /// classify the camera.
    pub fn pre_render(
        &mut self,
        camera: Camera,
        sun_direction: Vec3,
        dt_seconds: f32,
    ) -> Result<(), SkyError> {
        self.ensure_phase(FramePhase::PreRender)?;

        if self.planet.generation() != self.table_generation {
            match OpticalDepthTable::build(&self.planet, self.config.table_resolution) {
                Ok(table) => {
                    log::debug!(
                        "optical depth table rebuilt for generation {}",
                        self.planet.generation()
                    );
                    self.table = table;
                    self.table_generation = self.planet.generation();
                }
                Err(e) => {
                    log::error!("optical depth table rebuild failed: {e}");
                    self.disabled_reason = Some(e.to_string());
                    return Err(e.into());
                }
            }
        }

        let sun_direction = sun_direction.normalize_or_zero();

        // Allocate targets for layers that lack them; a failed layer is
        // disabled individually rather than taking the frame down.
        let active = ActiveLayerSet::build(&self.layers);
        for (_, idx) in active.ascending() {
            let layer = &mut self.layers[idx];
            if layer.targets.is_none() {
                if let Err(e) = layer.allocate_targets(
                    self.config.width,
                    self.config.height,
                    self.config.upsample.technique,
                    self.config.upsample.factor,
                ) {
                    log::error!("layer {idx} target allocation failed, disabling layer: {e}");
                    layer.disabled_by_error = true;
                }
            }
        }
        let active = ActiveLayerSet::build(&self.layers);

        let camera_position = camera.position();
        self.shadow
            .begin_frame(&self.planet, camera_position, sun_direction);
        for (slot, idx) in active.descending() {
            let layer = &self.layers[idx];
            if layer.params.cast_shadow {
                self.shadow.render_layer(slot, layer, &self.planet);
            } else {
                self.shadow.record_bounds(slot, layer);
            }
        }

        let environment = estimate_environment(
            &self.planet,
            &self.table,
            &self.config.scattering,
            camera_position,
            sun_direction,
            self.config.environment_march_steps,
        );

        let ordering = classify(
            self.planet.altitude_of(camera_position),
            &self.shadow.state().bounds,
            active.len(),
            active.has_fog(&self.layers),
        );

        self.frame = Some(FrameContext {
            camera,
            sun_direction,
            dt_seconds,
            night: nightness(sun_direction, self.planet.up_at(camera_position)),
            active,
            ordering,
            environment,
        });
        self.phase = FramePhase::MainRender;
        Ok(())
    }

    /// Phase 2: render each layer's scattering (reduced resolution where
    /// the policy asks for it), chain environment light downward, and
    /// composite layers over the background sky in classifier order.
    pub fn main_render(&mut self, scene_depth: &DepthBuffer) -> Result<(), SkyError> {
        self.ensure_phase(FramePhase::MainRender)?;
        let Some(ctx) = self.frame.as_ref() else {
            return Err(SkyError::OutOfOrder {
                expected: FramePhase::PreRender,
                requested: FramePhase::MainRender,
            });
        };
        let (camera, sun_direction, environment, ordering, active) = (
            ctx.camera,
            ctx.sun_direction,
            ctx.environment,
            ctx.ordering,
            ctx.active.clone(),
        );

        if scene_depth.width() != self.config.width || scene_depth.height() != self.config.height {
            return Err(RenderError::SizeMismatch {
                expected_width: self.config.width,
                expected_height: self.config.height,
                width: scene_depth.width(),
                height: scene_depth.height(),
            }
            .into());
        }

        self.render_layer_scattering(&camera, &environment, scene_depth, &active)?;
        self.composite(&camera, sun_direction, scene_depth, &ordering, &active)?;

        self.phase = FramePhase::PostProcess;
        Ok(())
    }

    /// Render every active layer's scattering target, top to bottom, so
    /// each layer's environment light can include the dimming of the
    /// layers above it.
    fn render_layer_scattering(
        &mut self,
        camera: &Camera,
        environment: &EnvironmentEstimate,
        scene_depth: &DepthBuffer,
        active: &ActiveLayerSet,
    ) -> Result<(), SkyError> {
        let origin = camera.position();
        let full_w = self.config.width;
        let full_h = self.config.height;
        let technique = self.config.upsample.technique;
        let factor = self.config.upsample.factor;
        let low_depth = if technique == UpsampleTechnique::Bilinear {
            None
        } else {
            Some(self.depth_cache.get_or_insert(factor, scene_depth)?.clone())
        };

        // The topmost layer consumes the no-ambient sentinel; everything
        // below it sees the sky ambient filtered by the layers above.
        let mut carried_ambient = Vec3::ZERO;
        let mut transmittance_above = 1.0f32;
        let order: Vec<(usize, usize)> = active.descending().collect();
        for (_slot, idx) in order {
            let Some(mut targets) = self.layers[idx].targets.take() else {
                continue;
            };
            let ambient = carried_ambient;
            {
                let shade = LayerShade {
                    planet: &self.planet,
                    layer: &self.layers[idx],
                    shadow: &self.shadow,
                    sun_color: environment.sun_color,
                    ambient,
                    march_steps: self.config.layer_march_steps,
                };
                let mut shade_full = |x: u32, y: u32| {
                    let u = (x as f32 + 0.5) / full_w as f32;
                    let v = (y as f32 + 0.5) / full_h as f32;
                    shade.shade(origin, camera.ray_direction(u, v), scene_depth.get(x, y))
                };

                match (&mut targets.downsampled, &low_depth) {
                    (Some(low), Some(low_depth)) => {
                        let (low_w, low_h) = (low.width(), low.height());
                        for y in 0..low_h {
                            for x in 0..low_w {
                                // Low-res samples shade the pixel centers the
                                // depth downsample picked.
                                let fx = (x * factor).min(full_w - 1);
                                let fy = (y * factor).min(full_h - 1);
                                let u = (fx as f32 + 0.5) / full_w as f32;
                                let v = (fy as f32 + 0.5) / full_h as f32;
                                let sample = shade.shade(
                                    origin,
                                    camera.ray_direction(u, v),
                                    low_depth.get(x, y),
                                );
                                low.set(x, y, sample);
                            }
                        }
                        upsample(
                            low,
                            low_depth,
                            scene_depth,
                            &self.config.upsample,
                            &mut shade_full,
                            &mut targets.scattering,
                        )?;
                    }
                    _ => {
                        for y in 0..full_h {
                            for x in 0..full_w {
                                let sample = shade_full(x, y);
                                targets.scattering.set(x, y, sample);
                            }
                        }
                    }
                }
            }

            targets.env_light.clear([ambient.x, ambient.y, ambient.z, 1.0]);
            transmittance_above *= targets.scattering.mean()[3];
            carried_ambient = environment.sky_ambient * transmittance_above;
            self.layers[idx].targets = Some(targets);
        }
        Ok(())
    }

    /// Per-pixel background sky, god-ray modulation, and the ordered
    /// layer composite.
    fn composite(
        &mut self,
        camera: &Camera,
        sun_direction: Vec3,
        scene_depth: &DepthBuffer,
        ordering: &LayerOrdering,
        active: &ActiveLayerSet,
    ) -> Result<(), SkyError> {
        let origin = camera.position();
        let up = self.planet.up_at(origin);
        let mut hdr = Target::new(self.config.width, self.config.height)?;
        let mut extinction = Target::new(self.config.width, self.config.height)?;

        for y in 0..self.config.height {
            for x in 0..self.config.width {
                let u = (x as f32 + 0.5) / self.config.width as f32;
                let v = (y as f32 + 0.5) / self.config.height as f32;
                let dir = camera.ray_direction(u, v);

                let (_, exit) = ray_sphere_intersect(
                    origin,
                    dir,
                    self.planet.center,
                    self.planet.atmosphere_radius_km(),
                );
                let distance = scene_depth.get(x, y).min(exit.max(0.0));
                let radiance = sky_color(
                    &self.planet,
                    &self.table,
                    &self.config.scattering,
                    origin,
                    dir,
                    sun_direction,
                    distance,
                    self.config.sky_march_steps,
                );

                let mut sky_rgb = radiance.in_scattered;
                if let Some(seg) = ordering.god_ray_segment
                    && let Some(slot) = ordering.downward.get(seg)
                {
                    let bounds = self.shadow.state().bounds[slot as usize];
                    if !bounds.is_empty()
                        && let Some((t0, t1)) =
                            shell_segment(&self.planet, origin, dir, bounds.min_km, bounds.max_km)
                    {
                        let t1 = t1.min(distance);
                        if t1 > t0 {
                            sky_rgb *= god_ray_factor(
                                &self.shadow,
                                &self.planet,
                                origin,
                                dir,
                                t0,
                                t1,
                                self.config.god_ray_steps,
                            );
                        }
                    }
                }

                let sequence = if dir.dot(up) >= 0.0 {
                    &ordering.upward
                } else {
                    &ordering.downward
                };
                let mut samples = [[0.0f32; 4]; 4];
                let mut count = 0;
                for slot in sequence.iter() {
                    let idx = active.layer_index(slot as usize);
                    if let Some(targets) = &self.layers[idx].targets {
                        samples[count] = targets.scattering.get(x, y);
                        count += 1;
                    }
                }

                let rgb = composite_over(sky_rgb, &samples[..count]);
                let alpha = samples[..count].iter().map(|s| s[3]).product::<f32>();
                hdr.set(x, y, [rgb.x, rgb.y, rgb.z, alpha]);
                let through = radiance.extinction * alpha;
                extinction.set(x, y, [through.x, through.y, through.z, 1.0]);
            }
        }

        self.hdr = hdr;
        self.extinction = extinction;
        Ok(())
    }

    /// Phase 3: composite the host-rendered opaque scene behind the sky
    /// and clouds, measure the composite's luminance, feed the
    /// two-frame-delayed readback into temporal adaptation, and tone map.
    ///
    /// Each scene texel is attenuated by the per-pixel transmittance of
    /// the media in front of it before the in-scattered radiance is
    /// added. Returns the finished displayable frame.
    pub fn post_process(&mut self, scene: &Target) -> Result<&Target, SkyError> {
        self.ensure_phase(FramePhase::PostProcess)?;
        let Some(ctx) = self.frame.as_ref() else {
            return Err(SkyError::OutOfOrder {
                expected: FramePhase::PreRender,
                requested: FramePhase::PostProcess,
            });
        };
        let (dt, night) = (ctx.dt_seconds, ctx.night);

        if scene.width() != self.config.width || scene.height() != self.config.height {
            return Err(RenderError::SizeMismatch {
                expected_width: self.config.width,
                expected_height: self.config.height,
                width: scene.width(),
                height: scene.height(),
            }
            .into());
        }

        let mut composite = self.hdr.clone();
        for y in 0..self.config.height {
            for x in 0..self.config.width {
                let s = scene.get(x, y);
                let through = self.extinction.get(x, y);
                let h = self.hdr.get(x, y);
                composite.set(
                    x,
                    y,
                    [
                        s[0] * through[0] + h[0],
                        s[1] * through[1] + h[1],
                        s[2] * through[2] + h[2],
                        h[3],
                    ],
                );
            }
        }

        let measured = measure_immediate(self.config.luminance_mode, &composite);
        self.readbacks.push_back(measured);
        if self.readbacks.len() > READBACK_DELAY_FRAMES
            && let Some(delayed) = self.readbacks.pop_front()
        {
            self.luminance.adapt(delayed, dt, night, &self.config.adaptation);
        }

        self.output = apply_tone_map(&composite, &self.luminance, &self.config.tonemap);
        self.phase = FramePhase::EndFrame;
        Ok(&self.output)
    }

    /// Phase 4: per-frame cache teardown and phase reset.
    pub fn end_frame(&mut self) -> Result<(), SkyError> {
        self.ensure_phase(FramePhase::EndFrame)?;
        self.depth_cache.clear();
        self.frame_index += 1;
        self.phase = FramePhase::PreRender;
        Ok(())
    }
}
