//! Direct versus staged rendering.

use vblit_core::format::{self, ColorFormat};
use vblit_core::{GpuInternalFormat, Surface};

use crate::context::Capabilities;

/// How the objects of one composition reach the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    /// Draw into the destination RGB image.
    DirectRgb,
    /// Draw into the destination YUV image with the YUV program.
    DirectYuv,
    /// Draw into a stage texture, then convert into the destination.
    Staged {
        width: u32,
        height: u32,
        format: GpuInternalFormat,
    },
}

impl RenderPath {
    pub fn is_staged(&self) -> bool {
        matches!(self, RenderPath::Staged { .. })
    }
}

pub fn is_aligned(surface: &Surface, alignment: u32) -> bool {
    alignment <= 1 || surface.stride() % alignment == 0
}

/// Whether an RGB surface can be a render target as it is laid out.
/// Signed and 3-channel float layouts never are.
pub fn is_rgb_renderable(surface: &Surface, alignment: u32) -> bool {
    let Ok(desc) = format::describe(surface.format) else {
        return false;
    };
    desc.is_rgb()
        && is_aligned(surface, alignment)
        && !desc.is_signed()
        && !(desc.channels == 3 && desc.is_float())
}

/// Whether drawing `source_format` with `alpha` has to blend.
pub fn object_needs_blending(alpha: u8, source_format: u32) -> bool {
    alpha != u8::MAX || (format::is_rgb(source_format) && format::num_channels(source_format) == 4)
}

/// Pick the path for one destination. `blending` tells whether any object
/// of the composition has to blend.
pub fn decide(output: &Surface, blending: bool, caps: &Capabilities) -> RenderPath {
    let code = output.format;

    if format::is_rgb(code) {
        if is_rgb_renderable(output, caps.alignment) {
            return RenderPath::DirectRgb;
        }
    } else if caps.yuv_target && !blending {
        return RenderPath::DirectYuv;
    }

    RenderPath::Staged {
        width: output.width,
        height: output.height,
        format: format::to_gpu_internal_format(code),
    }
}

/// Format of the 4-channel view that replaces a non-renderable RGB output.
pub fn reshaped_format(code: u32) -> u32 {
    ColorFormat::Rgba8888.code() | (code & (format::PIXEL_TYPE_MASK | format::UBWC_BIT))
}
