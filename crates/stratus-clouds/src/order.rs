//! Altitude-band classification and per-frame layer traversal order.
//!
//! The camera sits in one of nine bands relative to the (up to four)
//! active layers: below a layer, inside a layer, or above them all. The
//! band decides which layers are crossed looking up versus looking down,
//! and which downward crossing carries the god-ray march.

/// Altitude sentinel well above any atmosphere: a bounds slot holding this
/// value means "no layer rendered here this frame".
pub const ABOVE_ATMOSPHERE_KM: f32 = 1.0e4;

/// Vertical extent of one rendered layer, recorded after the layer draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerBounds {
    /// Bottom altitude, km.
    pub min_km: f32,
    /// Top altitude, km.
    pub max_km: f32,
}

impl LayerBounds {
    /// The empty slot: both edges at the sentinel altitude, so every
    /// camera classifies below it and no band can resolve inside it.
    pub const EMPTY: Self = Self {
        min_km: ABOVE_ATMOSPHERE_KM,
        max_km: ABOVE_ATMOSPHERE_KM,
    };

    pub fn new(min_km: f32, max_km: f32) -> Self {
        Self { min_km, max_km }
    }

    pub fn is_empty(&self) -> bool {
        self.min_km >= ABOVE_ATMOSPHERE_KM
    }

    pub fn contains(&self, altitude_km: f32) -> bool {
        !self.is_empty() && altitude_km >= self.min_km && altitude_km <= self.max_km
    }
}

impl Default for LayerBounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Which altitude band the camera occupies, relative to the active layers
/// in ascending-altitude slot order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AltitudeBand {
    /// Below layer slot `n` (and every slot above it). `Below(0)` is the
    /// lowest band, between the surface and the first layer.
    Below(u8),
    /// Inside layer slot `n`.
    Inside(u8),
    /// Above every active layer.
    AboveAll,
}

/// Fixed-capacity ordered list of layer slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LayerSequence {
    slots: [u8; 4],
    len: u8,
}

impl LayerSequence {
    pub fn push(&mut self, slot: u8) {
        debug_assert!((self.len as usize) < self.slots.len());
        self.slots[self.len as usize] = slot;
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots[..self.len as usize].iter().copied()
    }

    pub fn get(&self, i: usize) -> Option<u8> {
        (i < self.len as usize).then(|| self.slots[i])
    }
}

/// Full classification result for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerOrdering {
    pub band: AltitudeBand,
    /// Layer slots crossed looking up, nearest first.
    pub upward: LayerSequence,
    /// Layer slots crossed looking down, nearest first.
    pub downward: LayerSequence,
    /// Index into `downward` of the crossing that carries the god-ray
    /// march, when any does.
    pub god_ray_segment: Option<usize>,
}

/// Classify the camera against the recorded layer bounds.
///
/// `bounds` is in ascending-altitude slot order; slots at and beyond
/// `active_count` must hold [`LayerBounds::EMPTY`]. Gaps between layers
/// classify as `Below(n)` for the next slot up. The god-ray march rides
/// the lowest downward crossing, except that an active fog layer claims
/// the lowest crossing for itself and pushes the march one crossing up.
pub fn classify(
    camera_altitude_km: f32,
    bounds: &[LayerBounds; 4],
    active_count: usize,
    has_fog: bool,
) -> LayerOrdering {
    let count = active_count.min(4);

    let mut band = AltitudeBand::AboveAll;
    for slot in 0..count {
        if bounds[slot].contains(camera_altitude_km) {
            band = AltitudeBand::Inside(slot as u8);
            break;
        }
        if camera_altitude_km < bounds[slot].min_km {
            band = AltitudeBand::Below(slot as u8);
            break;
        }
    }

    let mut upward = LayerSequence::default();
    let mut downward = LayerSequence::default();
    match band {
        AltitudeBand::Below(n) => {
            for slot in n as usize..count {
                upward.push(slot as u8);
            }
            for slot in (0..n as usize).rev() {
                downward.push(slot as u8);
            }
        }
        AltitudeBand::Inside(n) => {
            // The occupied layer is crossed in both directions.
            for slot in n as usize..count {
                upward.push(slot as u8);
            }
            for slot in (0..=n as usize).rev() {
                downward.push(slot as u8);
            }
        }
        AltitudeBand::AboveAll => {
            for slot in (0..count).rev() {
                downward.push(slot as u8);
            }
        }
    }

    let god_ray_segment = if downward.is_empty() {
        None
    } else {
        let last = downward.len() - 1;
        if has_fog {
            // Fog owns the lowest crossing; the march moves one up, or
            // nowhere when fog is the only thing below.
            last.checked_sub(1)
        } else {
            Some(last)
        }
    };

    LayerOrdering {
        band,
        upward,
        downward,
        god_ray_segment,
    }
}
