//! Full-frame scenario tests for the sky pipeline.

use glam::{Mat4, Vec3};
use stratus_atmosphere::PlanetFrame;
use stratus_clouds::{AltitudeBand, LayerKind, LayerParams, ShadowConfig};
use stratus_render::{
    Camera, CameraIntrinsics, DepthBuffer, LuminanceMode, Target, ToneMapConfig, ToneOperator,
    UpsampleConfig, UpsampleTechnique,
};
use stratus_sky::{SkyConfig, SkyPipeline};

const SIZE: u32 = 8;

fn small_config() -> SkyConfig {
    SkyConfig {
        width: SIZE,
        height: SIZE,
        table_resolution: 32,
        sky_march_steps: 8,
        layer_march_steps: 8,
        god_ray_steps: 4,
        environment_march_steps: 8,
        shadow: ShadowConfig {
            resolution: 8,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn planet() -> PlanetFrame {
    PlanetFrame::new(Vec3::ZERO, 6400.0, 60.0).unwrap()
}

fn camera_looking_up(planet: &PlanetFrame) -> Camera {
    let eye = planet.center + Vec3::Y * planet.radius_km();
    let view = Mat4::look_to_rh(eye, Vec3::Y, Vec3::Z);
    Camera::new(CameraIntrinsics::default(), view.inverse(), view)
}

fn sky_only_depth() -> DepthBuffer {
    DepthBuffer::constant(SIZE, SIZE, 1.0e4).unwrap()
}

fn black_scene() -> Target {
    Target::filled(SIZE, SIZE, [0.0; 4]).unwrap()
}

fn run_frame(sky: &mut SkyPipeline, camera: Camera, sun: Vec3, depth: &DepthBuffer) {
    sky.pre_render(camera, sun, 0.016).unwrap();
    sky.main_render(depth).unwrap();
    sky.post_process(&black_scene()).unwrap();
    sky.end_frame().unwrap();
}

#[test]
fn test_sea_level_frame_under_one_volumetric_layer() {
    let mut sky = SkyPipeline::new(planet(), small_config()).unwrap();
    sky.add_layer(
        LayerKind::Volumetric,
        LayerParams {
            altitude_km: 2.0,
            thickness_km: 2.0,
            coverage: 1.0,
            ..Default::default()
        },
    );

    let camera = camera_looking_up(sky.planet());
    let depth = sky_only_depth();
    sky.pre_render(camera, Vec3::Y, 0.016).unwrap();

    // Camera between the surface and the layer base: lowest band, the
    // layer crossed looking up, nothing below.
    let ordering = *sky.ordering().unwrap();
    assert_eq!(ordering.band, AltitudeBand::Below(0));
    assert_eq!(ordering.upward.iter().collect::<Vec<u8>>(), vec![0]);
    assert!(ordering.downward.is_empty());
    assert_eq!(ordering.god_ray_segment, None);

    let bounds = sky.shadow().state().bounds;
    assert_eq!((bounds[0].min_km, bounds[0].max_km), (2.0, 4.0));
    assert!(bounds[1].is_empty() && bounds[2].is_empty() && bounds[3].is_empty());

    // Noon: the camera sits fully on the lit side.
    let lit = stratus_atmosphere::terminator(sky.planet(), camera.position(), Vec3::Y);
    assert_eq!(lit, 1.0, "overhead sun leaves the camera fully lit");
    let env = *sky.environment().unwrap();
    assert!(env.sun_color.length() > 0.0, "overhead sun must reach the surface");
    assert!(env.sky_ambient.length() > 0.0);

    sky.main_render(&depth).unwrap();
    sky.post_process(&black_scene()).unwrap();
    sky.end_frame().unwrap();
    assert_eq!(sky.frame_index(), 1);

    let mut lit = 0;
    for texel in sky.hdr().texels() {
        for c in 0..4 {
            assert!(texel[c].is_finite());
        }
        if texel[0] + texel[1] + texel[2] > 0.0 {
            lit += 1;
        }
    }
    assert!(lit > 0, "a daytime sky must not be black");
}

#[test]
fn test_fifth_layer_is_dropped_highest_first() {
    let mut sky = SkyPipeline::new(planet(), small_config()).unwrap();
    for altitude in [2.0f32, 4.0, 6.0, 8.0, 10.0] {
        sky.add_layer(
            LayerKind::Volumetric,
            LayerParams {
                altitude_km: altitude,
                thickness_km: 1.0,
                coverage: 1.0,
                ..Default::default()
            },
        );
    }

    let camera = camera_looking_up(sky.planet());
    sky.pre_render(camera, Vec3::Y, 0.016).unwrap();

    assert_eq!(sky.active_layer_count(), 4);
    let bounds = sky.shadow().state().bounds;
    assert_eq!(bounds[3].min_km, 8.0, "the 10 km layer should be the one dropped");
    let ordering = sky.ordering().unwrap();
    assert_eq!(ordering.upward.len(), 4);
}

#[test]
fn test_accurate_full_recompute_matches_direct_render() {
    // A depth gradient keeps every low-res neighborhood disagreeing, so a
    // zero discrepancy threshold recomputes every pixel through the same
    // kernel the no-downsampling path uses. The two frames must agree
    // exactly.
    let depth = DepthBuffer::from_fn(SIZE, SIZE, |x, y| 5.0e3 + (x + y) as f32).unwrap();
    let layer = LayerParams {
        altitude_km: 2.0,
        thickness_km: 2.0,
        coverage: 1.0,
        ..Default::default()
    };
    let sun = Vec3::new(0.3, 1.0, 0.1).normalize();

    let mut direct = SkyPipeline::new(
        planet(),
        SkyConfig {
            upsample: UpsampleConfig {
                technique: UpsampleTechnique::Bilinear,
                ..Default::default()
            },
            ..small_config()
        },
    )
    .unwrap();
    direct.add_layer(LayerKind::Volumetric, layer);

    let mut recomputed = SkyPipeline::new(
        planet(),
        SkyConfig {
            upsample: UpsampleConfig {
                technique: UpsampleTechnique::Accurate,
                discrepancy_threshold_km: 0.0,
                factor: 2,
                ..Default::default()
            },
            ..small_config()
        },
    )
    .unwrap();
    recomputed.add_layer(LayerKind::Volumetric, layer);

    let camera = camera_looking_up(direct.planet());
    run_frame(&mut direct, camera, sun, &depth);
    run_frame(&mut recomputed, camera, sun, &depth);

    assert_eq!(
        direct.hdr().texels(),
        recomputed.hdr().texels(),
        "full recompute must be indistinguishable from a direct full-res render"
    );
}

#[test]
fn test_disabled_tone_operator_passes_hdr_through() {
    let mut sky = SkyPipeline::new(
        planet(),
        SkyConfig {
            tonemap: ToneMapConfig {
                operator: ToneOperator::Disabled,
                ..Default::default()
            },
            ..small_config()
        },
    )
    .unwrap();

    let camera = camera_looking_up(sky.planet());
    run_frame(&mut sky, camera, Vec3::Y, &sky_only_depth());
    assert_eq!(sky.output(), sky.hdr());
}

#[test]
fn test_scene_color_shows_through_extinction() {
    // Same frame rendered over a black and a mid-grey scene buffer. With
    // tone mapping disabled the outputs differ by exactly the scene color
    // attenuated by the sky's per-pixel transmittance, so the grey frame
    // must be at least as bright everywhere and strictly brighter where
    // the atmosphere lets any light through.
    let mut sky = SkyPipeline::new(
        planet(),
        SkyConfig {
            tonemap: ToneMapConfig {
                operator: ToneOperator::Disabled,
                ..Default::default()
            },
            ..small_config()
        },
    )
    .unwrap();
    let camera = camera_looking_up(sky.planet());
    let depth = sky_only_depth();

    sky.pre_render(camera, Vec3::Y, 0.016).unwrap();
    sky.main_render(&depth).unwrap();
    sky.post_process(&black_scene()).unwrap();
    let over_black = sky.output().clone();
    sky.end_frame().unwrap();

    let grey = Target::filled(SIZE, SIZE, [0.5; 4]).unwrap();
    sky.pre_render(camera, Vec3::Y, 0.016).unwrap();
    sky.main_render(&depth).unwrap();
    sky.post_process(&grey).unwrap();
    let over_grey = sky.output().clone();

    let mut brighter = 0;
    for (dark, lit) in over_black.texels().iter().zip(over_grey.texels()) {
        for c in 0..3 {
            assert!(lit[c] >= dark[c]);
        }
        if lit[0] > dark[0] {
            brighter += 1;
        }
    }
    assert!(
        brighter > 0,
        "the host scene must show through the sky's transmittance"
    );
}

#[test]
fn test_topmost_layer_env_light_carries_no_sky_ambient() {
    let mut sky = SkyPipeline::new(planet(), small_config()).unwrap();
    let lower = sky.add_layer(
        LayerKind::Volumetric,
        LayerParams {
            altitude_km: 2.0,
            thickness_km: 1.0,
            coverage: 1.0,
            ..Default::default()
        },
    );
    let upper = sky.add_layer(
        LayerKind::Volumetric,
        LayerParams {
            altitude_km: 6.0,
            thickness_km: 1.0,
            coverage: 1.0,
            ..Default::default()
        },
    );

    let camera = camera_looking_up(sky.planet());
    sky.pre_render(camera, Vec3::Y, 0.016).unwrap();
    sky.main_render(&sky_only_depth()).unwrap();

    // Nothing shades the highest layer from above, so its environment
    // light stays at the zero sentinel; the layer below picks up the sky
    // ambient dimmed by the layer above it.
    let top_env = sky.layer(upper).unwrap().targets.as_ref().unwrap().env_light.get(0, 0);
    assert_eq!(top_env, [0.0, 0.0, 0.0, 1.0]);

    let low_env = sky.layer(lower).unwrap().targets.as_ref().unwrap().env_light.get(0, 0);
    assert!(
        low_env[0] + low_env[1] + low_env[2] > 0.0,
        "a layer under another must receive filtered sky ambient"
    );

    let env = sky.environment().unwrap();
    let ambient_sum = env.sky_ambient.x + env.sky_ambient.y + env.sky_ambient.z;
    assert!(
        low_env[0] + low_env[1] + low_env[2] < ambient_sum,
        "the upper layer must dim the ambient reaching the lower one"
    );
}

#[test]
fn test_luminance_readback_is_delayed_two_frames() {
    let mut sky = SkyPipeline::new(
        planet(),
        SkyConfig {
            luminance_mode: LuminanceMode::Custom(0.1),
            ..small_config()
        },
    )
    .unwrap();
    let camera = camera_looking_up(sky.planet());
    let depth = sky_only_depth();
    let initial = sky.luminance().adapted_luminance();

    run_frame(&mut sky, camera, Vec3::Y, &depth);
    assert_eq!(sky.luminance().adapted_luminance(), initial);
    run_frame(&mut sky, camera, Vec3::Y, &depth);
    assert_eq!(
        sky.luminance().adapted_luminance(),
        initial,
        "the first measurement must not land before its readback completes"
    );
    run_frame(&mut sky, camera, Vec3::Y, &depth);
    assert!(
        sky.luminance().adapted_luminance() < initial,
        "the delayed measurement should pull adaptation down"
    );
}

#[test]
fn test_fog_reserves_the_lowest_downward_crossing() {
    let mut sky = SkyPipeline::new(planet(), small_config()).unwrap();
    sky.add_layer(
        LayerKind::Fog,
        LayerParams {
            altitude_km: 0.0,
            thickness_km: 0.5,
            coverage: 1.0,
            ..Default::default()
        },
    );
    sky.add_layer(
        LayerKind::Volumetric,
        LayerParams {
            altitude_km: 2.0,
            thickness_km: 1.0,
            coverage: 1.0,
            ..Default::default()
        },
    );

    // Camera above both layers, looking down through them.
    let eye = Vec3::Y * (6400.0 + 10.0);
    let view = Mat4::look_to_rh(eye, -Vec3::Y, Vec3::Z);
    let camera = Camera::new(CameraIntrinsics::default(), view.inverse(), view);
    sky.pre_render(camera, Vec3::Y, 0.016).unwrap();

    let ordering = sky.ordering().unwrap();
    assert_eq!(ordering.band, AltitudeBand::AboveAll);
    assert_eq!(ordering.downward.iter().collect::<Vec<u8>>(), vec![1, 0]);
    // The fog crossing (index 1, lowest) is excluded from the god-ray
    // march, which lands on the volumetric crossing instead.
    assert_eq!(ordering.god_ray_segment, Some(0));
}

#[test]
fn test_night_sky_is_darker_than_day() {
    let mut day = SkyPipeline::new(planet(), small_config()).unwrap();
    let mut night = SkyPipeline::new(planet(), small_config()).unwrap();
    let camera = camera_looking_up(day.planet());
    let depth = sky_only_depth();

    run_frame(&mut day, camera, Vec3::Y, &depth);
    run_frame(&mut night, camera, -Vec3::Y, &depth);

    let mean_day = day.hdr().mean();
    let mean_night = night.hdr().mean();
    let day_sum = mean_day[0] + mean_day[1] + mean_day[2];
    let night_sum = mean_night[0] + mean_night[1] + mean_night[2];
    assert!(
        night_sum < day_sum * 1e-2,
        "midnight sky should be orders of magnitude darker: {night_sum} vs {day_sum}"
    );
}
