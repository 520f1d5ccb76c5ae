//! Physically based sky renderer: atmospheric scattering, ordered cloud
//! and fog layers with deep shadow maps, depth-aware resolution
//! refinement, and temporally adapted tone mapping, driven by a four-phase
//! per-frame pipeline.

pub mod compose;
pub mod config;
pub mod pipeline;

pub use config::SkyConfig;
pub use pipeline::{FramePhase, SkyError, SkyPipeline};
