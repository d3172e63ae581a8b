//! Pixel access to imported images and stage storage.
//!
//! Reads outside a buffer return zero, writes outside a buffer are dropped.

use half::f16;
use vblit_core::color::yuv_to_rgb;
use vblit_core::format::{self, fourcc, ColorFormat, YuvLayout, YuvPacking};
use vblit_core::{ColorSpace, GpuInternalFormat};

use super::memory::Buffers;
use crate::device::ImageImport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Unorm8,
    Snorm8,
    Half,
    Float,
}

impl Channel {
    fn size(self) -> usize {
        match self {
            Channel::Unorm8 | Channel::Snorm8 => 1,
            Channel::Half => 2,
            Channel::Float => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            Channel::Unorm8 => bytes[0] as f32 / 255.0,
            Channel::Snorm8 => (bytes[0] as i8 as f32 / 127.0).max(-1.0),
            Channel::Half => f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            Channel::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    fn encode(self, value: f32, out: &mut Vec<u8>) {
        match self {
            Channel::Unorm8 => out.push(unorm8(value)),
            Channel::Snorm8 => out.push((value.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8),
            Channel::Half => out.extend_from_slice(&f16::from_f32(value).to_le_bytes()),
            Channel::Float => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Channel count and width of the RGB fourccs the reference device handles.
fn rgb_layout(code: u32) -> Option<(usize, Channel)> {
    let layout = match code {
        fourcc::R8 => (1, Channel::Unorm8),
        fourcc::GR88 => (2, Channel::Unorm8),
        fourcc::BGR888 => (3, Channel::Unorm8),
        fourcc::ABGR8888 => (4, Channel::Unorm8),
        fourcc::BGR161616F => (3, Channel::Half),
        fourcc::ABGR16161616F => (4, Channel::Half),
        fourcc::BGR323232F => (3, Channel::Float),
        fourcc::ABGR32323232F => (4, Channel::Float),
        _ => return None,
    };
    Some(layout)
}

pub(crate) fn yuv_layout(code: u32) -> Option<YuvLayout> {
    ColorFormat::ALL
        .iter()
        .filter(|f| f.is_yuv())
        .find(|f| format::to_native(f.code()).map(|(c, _)| c).ok() == Some(code))
        .and_then(|f| f.yuv_layout())
}

pub(crate) fn is_supported(code: u32) -> bool {
    rgb_layout(code).is_some() || yuv_layout(code).is_some()
}

pub(crate) fn is_yuv(code: u32) -> bool {
    yuv_layout(code).is_some()
}

/// Memory planes an image of this fourcc needs.
pub(crate) fn plane_count(code: u32) -> Option<usize> {
    if rgb_layout(code).is_some() {
        Some(1)
    } else {
        yuv_layout(code).map(|l| l.num_planes())
    }
}

fn read_bytes<const N: usize>(buffers: &Buffers, fd: i32, offset: u64) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(buffer) = buffers.get(&fd) {
        let start = offset as usize;
        if let Some(src) = buffer.get(start..start + N) {
            out.copy_from_slice(src);
        }
    }
    out
}

fn write_bytes(buffers: &mut Buffers, fd: i32, offset: u64, bytes: &[u8]) {
    if let Some(buffer) = buffers.get_mut(&fd) {
        let start = offset as usize;
        if let Some(dst) = buffer.get_mut(start..start + bytes.len()) {
            dst.copy_from_slice(bytes);
        }
    }
}

fn byte_at(image: &ImageImport, plane: usize, x: u32, y: u32, bytes_per_pixel: u32) -> Option<(i32, u64)> {
    let plane = image.planes.get(plane)?;
    let offset = plane.offset as u64 + y as u64 * plane.pitch as u64 + (x * bytes_per_pixel) as u64;
    Some((plane.fd, offset))
}

/// Luma and chroma sample positions of pixel `(x, y)`.
fn yuv_positions(image: &ImageImport, layout: &YuvLayout, x: u32, y: u32) -> [Option<(i32, u64)>; 3] {
    let (cx, cy) = (x / layout.h_sub, y / layout.v_sub);
    // Offsets of Y, U, V.
    match layout.packing {
        YuvPacking::Packed { luma_first } => {
            let Some((fd, base)) = byte_at(image, 0, x / 2, y, 4) else {
                return [None; 3];
            };
            let (luma, chroma) = if luma_first { ([0, 2], [1, 3]) } else { ([1, 3], [0, 2]) };
            let (u, v) = if layout.v_first {
                (chroma[1], chroma[0])
            } else {
                (chroma[0], chroma[1])
            };
            [
                Some((fd, base + luma[(x % 2) as usize])),
                Some((fd, base + u)),
                Some((fd, base + v)),
            ]
        }
        YuvPacking::SemiPlanar => {
            let chroma = byte_at(image, 1, cx, cy, 2);
            let (u, v) = if layout.v_first { (1, 0) } else { (0, 1) };
            [
                byte_at(image, 0, x, y, 1),
                chroma.map(|(fd, off)| (fd, off + u)),
                chroma.map(|(fd, off)| (fd, off + v)),
            ]
        }
        YuvPacking::Planar => {
            let (u, v) = if layout.v_first { (2, 1) } else { (1, 2) };
            [
                byte_at(image, 0, x, y, 1),
                byte_at(image, u, cx, cy, 1),
                byte_at(image, v, cx, cy, 1),
            ]
        }
    }
}

/// Stored channel values of a pixel. YUV images report `(y, u, v, 1)`.
pub(crate) fn read_raw(buffers: &Buffers, image: &ImageImport, x: u32, y: u32) -> [f32; 4] {
    if let Some((channels, kind)) = rgb_layout(image.fourcc) {
        let mut out = [0.0, 0.0, 0.0, 1.0];
        let Some((fd, offset)) = byte_at(image, 0, x, y, (channels * kind.size()) as u32) else {
            return out;
        };
        let start = offset as usize;
        let Some(bytes) = buffers
            .get(&fd)
            .and_then(|b| b.get(start..start + channels * kind.size()))
        else {
            return [0.0; 4];
        };
        for (c, value) in out.iter_mut().enumerate().take(channels) {
            *value = kind.decode(&bytes[c * kind.size()..]);
        }
        return out;
    }

    if let Some(layout) = yuv_layout(image.fourcc) {
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for (value, position) in out.iter_mut().zip(yuv_positions(image, &layout, x, y)) {
            if let Some((fd, offset)) = position {
                *value = read_bytes::<1>(buffers, fd, offset)[0] as f32 / 255.0;
            }
        }
        return out;
    }

    [0.0; 4]
}

/// A pixel as a sampler sees it: YUV images are converted to RGB.
pub(crate) fn sample(buffers: &Buffers, image: &ImageImport, x: u32, y: u32) -> [f32; 4] {
    let raw = read_raw(buffers, image, x, y);
    if is_yuv(image.fourcc) {
        let [r, g, b] = yuv_to_rgb([raw[0], raw[1], raw[2]], ColorSpace::Bt601);
        return [r, g, b, 1.0];
    }
    raw
}

/// Store a fragment. YUV images take `(y, u, v, _)`; chroma is shared by
/// the pixels of a subsampling block and the last write wins.
pub(crate) fn write_raw(buffers: &mut Buffers, image: &ImageImport, x: u32, y: u32, value: [f32; 4]) {
    if x >= image.width || y >= image.height {
        return;
    }

    if let Some((channels, kind)) = rgb_layout(image.fourcc) {
        let Some((fd, offset)) = byte_at(image, 0, x, y, (channels * kind.size()) as u32) else {
            return;
        };
        let mut bytes = Vec::with_capacity(16);
        for value in value.iter().take(channels) {
            kind.encode(*value, &mut bytes);
        }
        write_bytes(buffers, fd, offset, &bytes);
        return;
    }

    if let Some(layout) = yuv_layout(image.fourcc) {
        for (value, position) in value.iter().zip(yuv_positions(image, &layout, x, y)) {
            if let Some((fd, offset)) = position {
                write_bytes(buffers, fd, offset, &[unorm8(*value)]);
            }
        }
    }
}

/// Compute-shader store of a whole texel in the image unit's format.
pub(crate) fn store_texel(
    buffers: &mut Buffers,
    image: &ImageImport,
    x: u32,
    y: u32,
    value: [f32; 4],
    format: GpuInternalFormat,
) {
    if x >= image.width || y >= image.height {
        return;
    }
    let kind = match format {
        GpuInternalFormat::Rgba8 => Channel::Unorm8,
        GpuInternalFormat::Rgba8Snorm => Channel::Snorm8,
        GpuInternalFormat::Rgba16F => Channel::Half,
        GpuInternalFormat::Rgba32F => Channel::Float,
    };
    let Some((fd, offset)) = byte_at(image, 0, x, y, 4 * kind.size() as u32) else {
        return;
    };
    let mut bytes = Vec::with_capacity(16);
    for channel in value {
        kind.encode(channel, &mut bytes);
    }
    write_bytes(buffers, fd, offset, &bytes);
}

/// Immutable 2D storage of a stage texture.
#[derive(Debug, Clone)]
pub struct Storage {
    pub format: GpuInternalFormat,
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl Storage {
    pub(crate) fn new(format: GpuInternalFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            texels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    /// `texelFetch` semantics: zero outside the texture.
    pub(crate) fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return [0.0; 4];
        }
        self.texels[y as usize * self.width as usize + x as usize]
    }

    pub(crate) fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x < self.width && y < self.height {
            let idx = y as usize * self.width as usize + x as usize;
            self.texels[idx] = quantize(self.format, value);
        }
    }

    pub(crate) fn fill(&mut self, value: [f32; 4]) {
        let value = quantize(self.format, value);
        self.texels.fill(value);
    }
}

/// Round a value to what a texture of `format` can hold.
pub(crate) fn quantize(format: GpuInternalFormat, value: [f32; 4]) -> [f32; 4] {
    match format {
        GpuInternalFormat::Rgba8 => value.map(|c| unorm8(c) as f32 / 255.0),
        GpuInternalFormat::Rgba8Snorm => value.map(|c| (c.clamp(-1.0, 1.0) * 127.0).round() / 127.0),
        GpuInternalFormat::Rgba16F => value.map(|c| f16::from_f32(c).to_f32()),
        GpuInternalFormat::Rgba32F => value,
    }
}
