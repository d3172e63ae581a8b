//! Color format codes and the translation to GPU-consumable descriptors.
//!
//! A format code is a `u32` combining a base [`ColorFormat`] id with mode
//! bits:
//!
//! | bits    | meaning                                  |
//! |---------|------------------------------------------|
//! | 0..=7   | base format id                           |
//! | 8       | UBWC compressed layout                   |
//! | 9..=10  | [`ColorSpace`] (0 = unset, BT601 assumed) |
//! | 11..=12 | [`PixelType`] of RGB channels             |
//!
//! Every other bit is reserved and makes the code invalid.

use serde::{Deserialize, Serialize};

use crate::error::{VblitError, VblitResult};

pub const FORMAT_MASK: u32 = 0xFF;
pub const UBWC_BIT: u32 = 1 << 8;
pub const COLOR_SPACE_MASK: u32 = 0b11 << 9;
pub const PIXEL_TYPE_MASK: u32 = 0b11 << 11;
const RESERVED_MASK: u32 = !((1 << 13) - 1);

/// DRM fourcc codes and modifiers used for zero-copy imports.
pub mod fourcc {
    /// Build a little-endian fourcc code.
    pub const fn code(a: u8, b: u8, c: u8, d: u8) -> u32 {
        (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
    }

    const fn qcom(val: u32) -> u32 {
        (0x05 << 28) | (val & 0x0fff_ffff)
    }

    pub const R8: u32 = code(b'R', b'8', b' ', b' ');
    pub const GR88: u32 = code(b'G', b'R', b'8', b'8');
    pub const BGR888: u32 = code(b'B', b'G', b'2', b'4');
    pub const ABGR8888: u32 = code(b'A', b'B', b'2', b'4');

    // The Adreno driver expects vendor codes for float layouts.
    pub const ABGR16161616F: u32 = qcom(54);
    pub const BGR161616F: u32 = qcom(55);
    pub const ABGR32323232F: u32 = qcom(56);
    pub const BGR323232F: u32 = qcom(57);

    pub const YUYV: u32 = code(b'Y', b'U', b'Y', b'V');
    pub const YVYU: u32 = code(b'Y', b'V', b'Y', b'U');
    pub const UYVY: u32 = code(b'U', b'Y', b'V', b'Y');
    pub const VYUY: u32 = code(b'V', b'Y', b'U', b'Y');
    pub const NV12: u32 = code(b'N', b'V', b'1', b'2');
    pub const NV21: u32 = code(b'N', b'V', b'2', b'1');
    pub const NV16: u32 = code(b'N', b'V', b'1', b'6');
    pub const NV61: u32 = code(b'N', b'V', b'6', b'1');
    pub const NV24: u32 = code(b'N', b'V', b'2', b'4');
    pub const NV42: u32 = code(b'N', b'V', b'4', b'2');
    pub const YUV410: u32 = code(b'Y', b'U', b'V', b'9');
    pub const YVU410: u32 = code(b'Y', b'V', b'U', b'9');
    pub const YUV411: u32 = code(b'Y', b'U', b'1', b'1');
    pub const YVU411: u32 = code(b'Y', b'V', b'1', b'1');
    pub const YUV420: u32 = code(b'Y', b'U', b'1', b'2');
    pub const YVU420: u32 = code(b'Y', b'V', b'1', b'2');
    pub const YUV422: u32 = code(b'Y', b'U', b'1', b'6');
    pub const YVU422: u32 = code(b'Y', b'V', b'1', b'6');
    pub const YUV444: u32 = code(b'Y', b'U', b'2', b'4');
    pub const YVU444: u32 = code(b'Y', b'V', b'2', b'4');

    pub const MOD_LINEAR: u64 = 0;
    pub const MOD_QCOM_COMPRESSED: u64 = (0x05u64 << 56) | 1;

    /// Printable form of a fourcc, used in logs.
    pub fn name(fourcc: u32) -> String {
        let bytes = fourcc.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            bytes.iter().map(|b| *b as char).collect::<String>().trim_end().to_string()
        } else {
            format!("{fourcc:#010x}")
        }
    }
}

/// Base format ids, stored in the low byte of a format code.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFormat {
    Gray8 = 0,
    Rg88 = 1,
    Gr88 = 2,
    Rgb888 = 3,
    Bgr888 = 4,
    Argb8888 = 5,
    Xrgb8888 = 6,
    Abgr8888 = 7,
    Xbgr8888 = 8,
    Rgba8888 = 9,
    Rgbx8888 = 10,
    Bgra8888 = 11,
    Bgrx8888 = 12,

    Yuyv = 32,
    Yvyu = 33,
    Uyvy = 34,
    Vyuy = 35,
    Nv12 = 36,
    Nv21 = 37,
    Nv16 = 38,
    Nv61 = 39,
    Nv24 = 40,
    Nv42 = 41,
    Yuv410 = 42,
    Yvu410 = 43,
    Yuv411 = 44,
    Yvu411 = 45,
    Yuv420 = 46,
    Yvu420 = 47,
    Yuv422 = 48,
    Yvu422 = 49,
    Yuv444 = 50,
    Yvu444 = 51,
}

/// Channel layout of an RGB family format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbLayout {
    pub channels: u32,
    /// Alpha (or padding) comes first in memory.
    pub inverted: bool,
    /// Red and blue are swapped in memory.
    pub swapped: bool,
}

/// How the samples of a YUV format are laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YuvPacking {
    /// One plane of interleaved 4:2:2 macro pixels.
    Packed { luma_first: bool },
    /// Luma plane followed by one interleaved chroma plane.
    SemiPlanar,
    /// Luma plane followed by two chroma planes.
    Planar,
}

/// Memory layout of a YUV family format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvLayout {
    pub packing: YuvPacking,
    /// Horizontal chroma subsampling factor.
    pub h_sub: u32,
    /// Vertical chroma subsampling factor.
    pub v_sub: u32,
    /// V (Cr) is stored before U (Cb).
    pub v_first: bool,
}

impl YuvLayout {
    pub fn num_planes(&self) -> usize {
        match self.packing {
            YuvPacking::Packed { .. } => 1,
            YuvPacking::SemiPlanar => 2,
            YuvPacking::Planar => 3,
        }
    }

    /// Chroma plane dimensions for a luma plane of `width` x `height`.
    pub fn chroma_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.h_sub), height.div_ceil(self.v_sub))
    }
}

impl ColorFormat {
    pub const ALL: [ColorFormat; 33] = [
        ColorFormat::Gray8,
        ColorFormat::Rg88,
        ColorFormat::Gr88,
        ColorFormat::Rgb888,
        ColorFormat::Bgr888,
        ColorFormat::Argb8888,
        ColorFormat::Xrgb8888,
        ColorFormat::Abgr8888,
        ColorFormat::Xbgr8888,
        ColorFormat::Rgba8888,
        ColorFormat::Rgbx8888,
        ColorFormat::Bgra8888,
        ColorFormat::Bgrx8888,
        ColorFormat::Yuyv,
        ColorFormat::Yvyu,
        ColorFormat::Uyvy,
        ColorFormat::Vyuy,
        ColorFormat::Nv12,
        ColorFormat::Nv21,
        ColorFormat::Nv16,
        ColorFormat::Nv61,
        ColorFormat::Nv24,
        ColorFormat::Nv42,
        ColorFormat::Yuv410,
        ColorFormat::Yvu410,
        ColorFormat::Yuv411,
        ColorFormat::Yvu411,
        ColorFormat::Yuv420,
        ColorFormat::Yvu420,
        ColorFormat::Yuv422,
        ColorFormat::Yvu422,
        ColorFormat::Yuv444,
        ColorFormat::Yvu444,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        ColorFormat::ALL.iter().copied().find(|f| *f as u8 == id)
    }

    /// The plain format code: unsigned pixels, default colorspace, linear.
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn is_yuv(self) -> bool {
        self.yuv_layout().is_some()
    }

    pub fn rgb_layout(self) -> Option<RgbLayout> {
        let (channels, inverted, swapped) = match self {
            ColorFormat::Gray8 => (1, false, false),
            ColorFormat::Rg88 => (2, false, false),
            ColorFormat::Gr88 => (2, false, true),
            ColorFormat::Rgb888 => (3, false, false),
            ColorFormat::Bgr888 => (3, false, true),
            ColorFormat::Argb8888 | ColorFormat::Xrgb8888 => (4, true, false),
            ColorFormat::Abgr8888 | ColorFormat::Xbgr8888 => (4, true, true),
            ColorFormat::Rgba8888 | ColorFormat::Rgbx8888 => (4, false, false),
            ColorFormat::Bgra8888 | ColorFormat::Bgrx8888 => (4, false, true),
            _ => return None,
        };
        Some(RgbLayout {
            channels,
            inverted,
            swapped,
        })
    }

    pub fn yuv_layout(self) -> Option<YuvLayout> {
        use YuvPacking::*;

        let (packing, h_sub, v_sub, v_first) = match self {
            ColorFormat::Yuyv => (Packed { luma_first: true }, 2, 1, false),
            ColorFormat::Yvyu => (Packed { luma_first: true }, 2, 1, true),
            ColorFormat::Uyvy => (Packed { luma_first: false }, 2, 1, false),
            ColorFormat::Vyuy => (Packed { luma_first: false }, 2, 1, true),
            ColorFormat::Nv12 => (SemiPlanar, 2, 2, false),
            ColorFormat::Nv21 => (SemiPlanar, 2, 2, true),
            ColorFormat::Nv16 => (SemiPlanar, 2, 1, false),
            ColorFormat::Nv61 => (SemiPlanar, 2, 1, true),
            ColorFormat::Nv24 => (SemiPlanar, 1, 1, false),
            ColorFormat::Nv42 => (SemiPlanar, 1, 1, true),
            ColorFormat::Yuv410 => (Planar, 4, 4, false),
            ColorFormat::Yvu410 => (Planar, 4, 4, true),
            ColorFormat::Yuv411 => (Planar, 4, 1, false),
            ColorFormat::Yvu411 => (Planar, 4, 1, true),
            ColorFormat::Yuv420 => (Planar, 2, 2, false),
            ColorFormat::Yvu420 => (Planar, 2, 2, true),
            ColorFormat::Yuv422 => (Planar, 2, 1, false),
            ColorFormat::Yvu422 => (Planar, 2, 1, true),
            ColorFormat::Yuv444 => (Planar, 1, 1, false),
            ColorFormat::Yvu444 => (Planar, 1, 1, true),
            _ => return None,
        };
        Some(YuvLayout {
            packing,
            h_sub,
            v_sub,
            v_first,
        })
    }

    fn yuv_fourcc(self) -> Option<u32> {
        let code = match self {
            ColorFormat::Yuyv => fourcc::YUYV,
            ColorFormat::Yvyu => fourcc::YVYU,
            ColorFormat::Uyvy => fourcc::UYVY,
            ColorFormat::Vyuy => fourcc::VYUY,
            ColorFormat::Nv12 => fourcc::NV12,
            ColorFormat::Nv21 => fourcc::NV21,
            ColorFormat::Nv16 => fourcc::NV16,
            ColorFormat::Nv61 => fourcc::NV61,
            ColorFormat::Nv24 => fourcc::NV24,
            ColorFormat::Nv42 => fourcc::NV42,
            ColorFormat::Yuv410 => fourcc::YUV410,
            ColorFormat::Yvu410 => fourcc::YVU410,
            ColorFormat::Yuv411 => fourcc::YUV411,
            ColorFormat::Yvu411 => fourcc::YVU411,
            ColorFormat::Yuv420 => fourcc::YUV420,
            ColorFormat::Yvu420 => fourcc::YVU420,
            ColorFormat::Yuv422 => fourcc::YUV422,
            ColorFormat::Yvu422 => fourcc::YVU422,
            ColorFormat::Yuv444 => fourcc::YUV444,
            ColorFormat::Yvu444 => fourcc::YVU444,
            _ => return None,
        };
        Some(code)
    }
}

/// Numeric representation of RGB channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    Unsigned,
    Float16,
    Float32,
    Signed,
}

impl PixelType {
    pub const fn bits(self) -> u32 {
        match self {
            PixelType::Unsigned => 0,
            PixelType::Float16 => 1 << 11,
            PixelType::Float32 => 2 << 11,
            PixelType::Signed => 3 << 11,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match (code & PIXEL_TYPE_MASK) >> 11 {
            1 => PixelType::Float16,
            2 => PixelType::Float32,
            3 => PixelType::Signed,
            _ => PixelType::Unsigned,
        }
    }

    pub fn bytes_per_channel(self) -> u32 {
        match self {
            PixelType::Unsigned | PixelType::Signed => 1,
            PixelType::Float16 => 2,
            PixelType::Float32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PixelType::Float16 | PixelType::Float32)
    }
}

/// YUV color standard carried in bits 9..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    Bt601,
    Bt601FullRange,
    Bt709,
}

impl ColorSpace {
    pub const fn bits(self) -> u32 {
        match self {
            ColorSpace::Bt601 => 1 << 9,
            ColorSpace::Bt601FullRange => 2 << 9,
            ColorSpace::Bt709 => 3 << 9,
        }
    }

    /// Colorspace of a format code; unset bits mean BT601.
    pub fn from_code(code: u32) -> Self {
        match (code & COLOR_SPACE_MASK) >> 9 {
            2 => ColorSpace::Bt601FullRange,
            3 => ColorSpace::Bt709,
            _ => ColorSpace::Bt601,
        }
    }

    /// Red, green and blue luma weights.
    pub fn coefficients(self) -> (f32, f32, f32) {
        match self {
            ColorSpace::Bt601 | ColorSpace::Bt601FullRange => (0.299, 0.587, 0.114),
            ColorSpace::Bt709 => (0.2126, 0.7152, 0.0722),
        }
    }
}

/// Internal storage format of GPU textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuInternalFormat {
    Rgba8,
    Rgba16F,
    Rgba32F,
    Rgba8Snorm,
}

impl GpuInternalFormat {
    /// The matching GLES sized internal format enum.
    pub const fn gl_enum(self) -> u32 {
        match self {
            GpuInternalFormat::Rgba8 => 0x8058,
            GpuInternalFormat::Rgba16F => 0x881A,
            GpuInternalFormat::Rgba32F => 0x8814,
            GpuInternalFormat::Rgba8Snorm => 0x8F97,
        }
    }

    pub fn bytes_per_channel(self) -> u32 {
        match self {
            GpuInternalFormat::Rgba8 | GpuInternalFormat::Rgba8Snorm => 1,
            GpuInternalFormat::Rgba16F => 2,
            GpuInternalFormat::Rgba32F => 4,
        }
    }
}

/// Everything the engine needs to know about a valid format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format: ColorFormat,
    pub pixel_type: PixelType,
    pub color_space: ColorSpace,
    pub ubwc: bool,
    pub channels: u32,
    pub bytes_per_channel: u32,
    pub inverted: bool,
    pub swapped: bool,
}

impl FormatDescriptor {
    pub fn is_yuv(&self) -> bool {
        self.format.is_yuv()
    }

    pub fn is_rgb(&self) -> bool {
        !self.is_yuv()
    }

    pub fn is_signed(&self) -> bool {
        self.pixel_type == PixelType::Signed
    }

    pub fn is_float(&self) -> bool {
        self.pixel_type.is_float()
    }

    /// Native fourcc and modifier for a zero-copy import.
    pub fn native(&self) -> (u32, u64) {
        let modifier = if self.ubwc {
            fourcc::MOD_QCOM_COMPRESSED
        } else {
            fourcc::MOD_LINEAR
        };

        if let Some(code) = self.format.yuv_fourcc() {
            return (code, modifier);
        }

        let code = match (self.channels, self.pixel_type) {
            (1, _) => fourcc::R8,
            (2, _) => fourcc::GR88,
            (3, PixelType::Float16) => fourcc::BGR161616F,
            (3, PixelType::Float32) => fourcc::BGR323232F,
            (3, _) => fourcc::BGR888,
            (_, PixelType::Float16) => fourcc::ABGR16161616F,
            (_, PixelType::Float32) => fourcc::ABGR32323232F,
            _ => fourcc::ABGR8888,
        };
        (code, modifier)
    }

    pub fn gpu_internal_format(&self) -> GpuInternalFormat {
        if self.is_yuv() {
            return GpuInternalFormat::Rgba8;
        }
        match self.pixel_type {
            PixelType::Unsigned => GpuInternalFormat::Rgba8,
            PixelType::Float16 => GpuInternalFormat::Rgba16F,
            PixelType::Float32 => GpuInternalFormat::Rgba32F,
            PixelType::Signed => GpuInternalFormat::Rgba8Snorm,
        }
    }
}

/// Look up a format code. Fails with `UnsupportedFormat` for unknown base
/// ids, reserved bits, or mode bits the base format cannot carry.
pub fn describe(code: u32) -> VblitResult<FormatDescriptor> {
    if code & RESERVED_MASK != 0 {
        return Err(VblitError::UnsupportedFormat(code));
    }

    let format = ColorFormat::from_id((code & FORMAT_MASK) as u8)
        .ok_or(VblitError::UnsupportedFormat(code))?;
    let pixel_type = PixelType::from_code(code);
    let color_space = ColorSpace::from_code(code);
    let ubwc = code & UBWC_BIT != 0;

    if let Some(layout) = format.rgb_layout() {
        // Float layouts only exist for 3 and 4 channel formats.
        if pixel_type.is_float() && layout.channels < 3 {
            return Err(VblitError::UnsupportedFormat(code));
        }
        return Ok(FormatDescriptor {
            format,
            pixel_type,
            color_space,
            ubwc,
            channels: layout.channels,
            bytes_per_channel: pixel_type.bytes_per_channel(),
            inverted: layout.inverted,
            swapped: layout.swapped,
        });
    }

    if pixel_type != PixelType::Unsigned {
        return Err(VblitError::UnsupportedFormat(code));
    }

    Ok(FormatDescriptor {
        format,
        pixel_type,
        color_space,
        ubwc,
        channels: 3,
        bytes_per_channel: 1,
        inverted: false,
        swapped: false,
    })
}

/// Native fourcc and modifier of a format code.
pub fn to_native(code: u32) -> VblitResult<(u32, u64)> {
    describe(code).map(|d| d.native())
}

/// Internal format of a texture holding pixels of `code`. Unknown codes
/// fall back to 8-bit RGBA.
pub fn to_gpu_internal_format(code: u32) -> GpuInternalFormat {
    describe(code)
        .map(|d| d.gpu_internal_format())
        .unwrap_or(GpuInternalFormat::Rgba8)
}

pub fn is_rgb(code: u32) -> bool {
    describe(code).map(|d| d.is_rgb()).unwrap_or(false)
}

pub fn is_yuv(code: u32) -> bool {
    describe(code).map(|d| d.is_yuv()).unwrap_or(false)
}

fn rgb_query<T>(code: u32, default: T, f: impl FnOnce(&FormatDescriptor) -> T) -> T {
    match describe(code) {
        Ok(d) if d.is_rgb() => f(&d),
        _ => default,
    }
}

/// Channel count of an RGB format; 0 for YUV or invalid codes.
pub fn num_channels(code: u32) -> u32 {
    rgb_query(code, 0, |d| d.channels)
}

/// Bytes per channel; YUV formats are 8-bit, invalid codes report 0.
pub fn bytes_per_channel(code: u32) -> u32 {
    describe(code).map(|d| d.bytes_per_channel).unwrap_or(0)
}

pub fn is_inverted(code: u32) -> bool {
    rgb_query(code, false, |d| d.inverted)
}

pub fn is_swapped(code: u32) -> bool {
    rgb_query(code, false, |d| d.swapped)
}

pub fn is_signed(code: u32) -> bool {
    rgb_query(code, false, |d| d.is_signed())
}

pub fn is_float(code: u32) -> bool {
    rgb_query(code, false, |d| d.is_float())
}

pub fn is_float16(code: u32) -> bool {
    rgb_query(code, false, |d| d.pixel_type == PixelType::Float16)
}

pub fn is_float32(code: u32) -> bool {
    rgb_query(code, false, |d| d.pixel_type == PixelType::Float32)
}

pub fn is_ubwc(code: u32) -> bool {
    describe(code).map(|d| d.ubwc).unwrap_or(false)
}

pub fn color_space(code: u32) -> ColorSpace {
    ColorSpace::from_code(code)
}
