//! CPU-side render resources and post-processing: RGBA float targets,
//! depth buffers with a per-frame downsample cache, camera description,
//! depth-aware resolution refinement, luminance adaptation, and the
//! tone-mapping operator family.

pub mod camera;
pub mod depth;
pub mod error;
pub mod luminance;
pub mod target;
pub mod tonemap;
pub mod upsample;

pub use camera::{Camera, CameraIntrinsics};
pub use depth::{DepthBuffer, DepthCache};
pub use error::RenderError;
pub use luminance::{
    AdaptationConfig, LuminanceMode, LuminanceState, MIN_LUMINANCE, luminance_of,
    measure_immediate, middle_grey, nightness,
};
pub use target::Target;
pub use tonemap::{
    DragoParams, ExponentialParams, FilmicParams, LinearParams, ReinhardParams, ToneMapConfig,
    ToneOperator, apply_tone_map,
};
pub use upsample::{UpsampleConfig, UpsampleTechnique, upsample};
