use serde::{Deserialize, Serialize};
use std::fmt;

use crate::format::ColorSpace;

/// Background color packed as `0xRRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const TRANSPARENT: Color = Color(0x0000_0000);
    pub const BLACK: Color = Color(0x0000_00FF);
    pub const WHITE: Color = Color(0xFFFF_FFFF);
    pub const RED: Color = Color(0xFF00_00FF);
    pub const GREEN: Color = Color(0x00FF_00FF);
    pub const BLUE: Color = Color(0x0000_FFFF);

    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32)
    }

    /// The four channels in `[r, g, b, a]` order.
    pub const fn to_rgba8(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Channels scaled to `0.0..=1.0`, as handed to a framebuffer clear.
    pub fn to_normalized(self) -> [f32; 4] {
        self.to_rgba8().map(|c| c as f32 / 255.0)
    }

    /// Convert the RGB channels to Y, U and V for the given standard,
    /// keeping alpha. The result is packed the same way (`0xYYUUVVAA`).
    pub fn to_yuv(self, color_space: ColorSpace) -> Color {
        let [r, g, b, a] = self.to_rgba8();
        let (kr, kg, kb) = color_space.coefficients();
        let (r, g, b) = (r as f32, g as f32, b as f32);

        let y = r * kr + g * kg + b * kb;
        let u = 128.0 + r * (-(kr / (1.0 - kb)) / 2.0) + g * (-(kg / (1.0 - kb)) / 2.0) + b * 0.5;
        let v = 128.0 + r * 0.5 + g * (-(kg / (1.0 - kr)) / 2.0) + b * (-(kb / (1.0 - kr)) / 2.0);

        let quantize = |c: f32| c.clamp(0.0, 255.0) as u8;
        Color::from_rgba8(quantize(y), quantize(u), quantize(v), a)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

impl From<u32> for Color {
    fn from(value: u32) -> Self {
        Color(value)
    }
}

/// Normalized RGB to normalized YUV, clamped to `0.0..=1.0`.
///
/// Same weights as [`Color::to_yuv`], with chroma centred on 0.5.
pub fn rgb_to_yuv(rgb: [f32; 3], color_space: ColorSpace) -> [f32; 3] {
    let [r, g, b] = rgb;
    let (kr, kg, kb) = color_space.coefficients();

    let y = r * kr + g * kg + b * kb;
    let u = 0.5 + r * (-(kr / (1.0 - kb)) / 2.0) + g * (-(kg / (1.0 - kb)) / 2.0) + b * 0.5;
    let v = 0.5 + r * 0.5 + g * (-(kg / (1.0 - kr)) / 2.0) + b * (-(kb / (1.0 - kr)) / 2.0);

    [y.clamp(0.0, 1.0), u.clamp(0.0, 1.0), v.clamp(0.0, 1.0)]
}

/// Inverse of [`rgb_to_yuv`], clamped to `0.0..=1.0`.
pub fn yuv_to_rgb(yuv: [f32; 3], color_space: ColorSpace) -> [f32; 3] {
    let [y, u, v] = yuv;
    let (kr, kg, kb) = color_space.coefficients();
    let (u, v) = (u - 0.5, v - 0.5);

    let r = y + 2.0 * (1.0 - kr) * v;
    let b = y + 2.0 * (1.0 - kb) * u;
    let g = (y - kr * r - kb * b) / kg;

    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_packing() {
        let c = Color::from_rgba8(0x12, 0x34, 0x56, 0x78);
        assert_eq!(c.0, 0x1234_5678);
        assert_eq!(c.to_rgba8(), [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(c.to_string(), "#12345678");
        assert_eq!(Color::BLACK.to_normalized(), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_bt601_red() {
        let [y, u, v] = rgb_to_yuv([1.0, 0.0, 0.0], ColorSpace::Bt601);
        assert!(close(y, 0.299));
        assert!(close(u, 0.331_26));
        assert!(close(v, 1.0));
    }

    #[test]
    fn test_bt709_white_is_neutral() {
        let [y, u, v] = rgb_to_yuv([1.0, 1.0, 1.0], ColorSpace::Bt709);
        assert!(close(y, 1.0));
        assert!(close(u, 0.5));
        assert!(close(v, 0.5));
    }

    #[test]
    fn test_packed_yuv_keeps_alpha() {
        let yuv = Color::RED.to_yuv(ColorSpace::Bt601);
        let [y, u, v, a] = yuv.to_rgba8();
        assert_eq!(y, 76);
        assert_eq!(u, 84);
        assert_eq!(v, 255);
        assert_eq!(a, 0xFF);
    }

    #[test]
    fn test_yuv_round_trip_of_gray() {
        let rgb = yuv_to_rgb(rgb_to_yuv([0.25, 0.25, 0.25], ColorSpace::Bt601), ColorSpace::Bt601);
        for c in rgb {
            assert!(close(c, 0.25));
        }
    }
}
