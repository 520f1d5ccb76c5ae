//! Top-level sky renderer configuration.

use stratus_atmosphere::{DEFAULT_TABLE_RESOLUTION, ScatteringParams};
use stratus_clouds::ShadowConfig;
use stratus_render::{AdaptationConfig, LuminanceMode, ToneMapConfig, UpsampleConfig};

/// Everything the sky pipeline needs beyond the per-frame inputs.
#[derive(Clone, Debug)]
pub struct SkyConfig {
    /// Output resolution, texels.
    pub width: u32,
    pub height: u32,
    pub scattering: ScatteringParams,
    /// Optical depth table edge length.
    pub table_resolution: usize,
    /// March steps for the background sky pass.
    pub sky_march_steps: u32,
    /// March steps through each cloud layer shell.
    pub layer_march_steps: u32,
    /// Shadow transmittance samples along the god-ray crossing.
    pub god_ray_steps: u32,
    /// March steps for the CPU environment estimate.
    pub environment_march_steps: u32,
    pub upsample: UpsampleConfig,
    pub shadow: ShadowConfig,
    pub luminance_mode: LuminanceMode,
    pub adaptation: AdaptationConfig,
    pub tonemap: ToneMapConfig,
}

impl Default for SkyConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            scattering: ScatteringParams::earth_like(),
            table_resolution: DEFAULT_TABLE_RESOLUTION,
            sky_march_steps: 16,
            layer_march_steps: 24,
            god_ray_steps: 8,
            environment_march_steps: 16,
            upsample: UpsampleConfig::default(),
            shadow: ShadowConfig::default(),
            luminance_mode: LuminanceMode::DownsampleAverage,
            adaptation: AdaptationConfig::default(),
            tonemap: ToneMapConfig::default(),
        }
    }
}
