//! Blit objects and the compositions they are grouped in.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::surface::SurfaceId;

bitflags! {
    /// Per-object flip configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FlipMask: u32 {
        const HFLIP = 1 << 0;
        const VFLIP = 1 << 1;
    }
}

/// A rectangle in pixels. `x`/`y` is the upper left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Region {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// A region anchored at the origin.
    pub const fn sized(w: i32, h: i32) -> Self {
        Self { x: 0, y: 0, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Scale and offset applied to one channel: `(value - offset) * scale`.
///
/// Offsets are given in the 0-255 range of quantized formats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalize {
    pub scale: f32,
    pub offset: f32,
}

impl Normalize {
    pub const fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

/// Blit parameters of one source surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub source_id: SurfaceId,
    #[serde(default)]
    pub mask: FlipMask,
    /// Source crop; an empty region selects the whole surface.
    #[serde(default)]
    pub source: Region,
    pub destination: Region,
    /// 0 = fully transparent, 255 = fully opaque.
    #[serde(default = "opaque")]
    pub alpha: u8,
    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f32,
}

fn opaque() -> u8 {
    0xFF
}

impl Object {
    /// An opaque, unrotated blit of the whole source onto `destination`.
    pub fn new(source_id: SurfaceId, destination: Region) -> Self {
        Self {
            source_id,
            mask: FlipMask::empty(),
            source: Region::default(),
            destination,
            alpha: opaque(),
            rotation: 0.0,
        }
    }

    pub fn with_source(mut self, source: Region) -> Self {
        self.source = source;
        self
    }

    pub fn with_alpha(mut self, alpha: u8) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_mask(mut self, mask: FlipMask) -> Self {
        self.mask = mask;
        self
    }
}

/// Everything drawn into one destination surface in a single pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub destination: SurfaceId,
    #[serde(default)]
    pub background: Color,
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub normalization: Vec<Normalize>,
    #[serde(default)]
    pub objects: Vec<Object>,
}

impl Composition {
    pub fn new(destination: SurfaceId) -> Self {
        Self {
            destination,
            background: Color::default(),
            clear: false,
            normalization: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Clear the destination to `color` before drawing.
    pub fn with_background(mut self, color: Color) -> Self {
        self.background = color;
        self.clear = true;
        self
    }

    pub fn with_normalization(mut self, normalization: Vec<Normalize>) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_object(mut self, object: Object) -> Self {
        self.objects.push(object);
        self
    }

    /// Exactly four channel normalizations, padded with defaults.
    pub fn channel_normalization(&self) -> [Normalize; 4] {
        let mut out = [Normalize::default(); 4];
        for (slot, n) in out.iter_mut().zip(&self.normalization) {
            *slot = *n;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_defaults() {
        let obj = Object::new(SurfaceId(1), Region::sized(10, 10));
        assert_eq!(obj.alpha, 255);
        assert!(obj.source.is_empty());
        assert!(obj.mask.is_empty());
    }

    #[test]
    fn test_normalization_is_padded_to_four() {
        let comp = Composition::new(SurfaceId(1))
            .with_normalization(vec![Normalize::new(2.0, 128.0)]);
        let n = comp.channel_normalization();
        assert_eq!(n[0], Normalize::new(2.0, 128.0));
        assert_eq!(n[3], Normalize::default());

        let comp = comp.with_normalization(vec![Normalize::new(0.5, 1.0); 6]);
        assert_eq!(comp.channel_normalization(), [Normalize::new(0.5, 1.0); 4]);
    }

    #[test]
    fn test_background_implies_clear() {
        let comp = Composition::new(SurfaceId(1)).with_background(Color::BLACK);
        assert!(comp.clear);
        assert_eq!(comp.background, Color::BLACK);
    }
}
