//! Cloud and fog layers: the layer model and active set, the altitude-band
//! classifier, and the multi-layer deep shadow builder.

pub mod layer;
pub mod order;
pub mod shadow;

pub use layer::{
    ActiveLayerSet, CloudLayer, LayerKind, LayerParams, LayerTargets, MAX_ACTIVE_LAYERS,
};
pub use order::{
    ABOVE_ATMOSPHERE_KM, AltitudeBand, LayerBounds, LayerOrdering, LayerSequence, classify,
};
pub use shadow::{
    DeepShadowBuilder, DeepShadowQuality, ShadowConfig, ShadowState, ShadowUniform, Viewport,
};
