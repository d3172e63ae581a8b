//! The GL-like command interface the composition engine drives.
//!
//! A [`GpuDevice`] is one open connection to a graphics driver with a
//! primary and an auxiliary rendering context. The engine only ever talks
//! to the driver through this trait, so the same composition code runs on
//! the dynamically loaded EGL/GLES backend and on the CPU reference device.

use std::time::Duration;

use vblit_core::{Fence, GpuInternalFormat, Region, VblitResult, WaitStatus};

use crate::shaders::ProgramSource;

/// GLES error codes reported in `GpuCallFailed`.
pub mod gl_error {
    pub const INVALID_ENUM: u32 = 0x0500;
    pub const INVALID_VALUE: u32 = 0x0501;
    pub const INVALID_OPERATION: u32 = 0x0502;
    pub const OUT_OF_MEMORY: u32 = 0x0505;
    pub const INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;
}

/// EGL error codes reported by context and image calls.
pub mod egl_error {
    pub const NOT_INITIALIZED: u32 = 0x3001;
    pub const BAD_ACCESS: u32 = 0x3002;
    pub const BAD_ALLOC: u32 = 0x3003;
    pub const BAD_CONTEXT: u32 = 0x3006;
    pub const BAD_MATCH: u32 = 0x3009;
    pub const BAD_PARAMETER: u32 = 0x300C;
}

/// Extension enabling `layout(yuv)` render targets.
pub const YUV_TARGET_EXTENSION: &str = "GL_EXT_YUV_target";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Which of the two contexts of a device to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Used for imports and draw submission.
    Primary,
    /// Used for fence waits.
    Auxiliary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Bound to externally allocated memory, sampled through
    /// `samplerExternalOES`.
    External,
    Texture2D,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn as_f32(&self) -> f32 {
        match *self {
            UniformValue::Bool(b) => b as i32 as f32,
            UniformValue::Int(i) => i as f32,
            UniformValue::Float(f) => f,
            UniformValue::Vec4(v) => v[0],
        }
    }

    pub fn as_i32(&self) -> i32 {
        match *self {
            UniformValue::Bool(b) => b as i32,
            UniformValue::Int(i) => i,
            UniformValue::Float(f) => f as i32,
            UniformValue::Vec4(v) => v[0] as i32,
        }
    }

    pub fn as_bool(&self) -> bool {
        self.as_i32() != 0
    }

    pub fn as_vec4(&self) -> [f32; 4] {
        match *self {
            UniformValue::Vec4(v) => v,
            other => [other.as_f32(); 4],
        }
    }
}

/// One plane of a dma-buf import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneImport {
    pub fd: i32,
    pub offset: u32,
    pub pitch: u32,
}

/// Zero-copy import request for a dma-buf backed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageImport {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub modifier: u64,
    pub planes: Vec<PlaneImport>,
}

// EGL_EXT_image_dma_buf_import(_modifiers) attribute names.
const EGL_NONE: i32 = 0x3038;
const EGL_WIDTH: i32 = 0x3057;
const EGL_HEIGHT: i32 = 0x3056;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const PLANE_ATTRIBS: [[i32; 5]; 3] = [
    // fd, offset, pitch, modifier lo, modifier hi
    [0x3272, 0x3273, 0x3274, 0x3443, 0x3444],
    [0x3275, 0x3276, 0x3277, 0x3445, 0x3446],
    [0x3278, 0x3279, 0x327A, 0x3447, 0x3448],
];

impl ImageImport {
    /// `EGL_NONE` terminated attribute list for `eglCreateImageKHR`.
    pub fn attrib_list(&self) -> Vec<i32> {
        let mut attribs = vec![
            EGL_WIDTH,
            self.width as i32,
            EGL_HEIGHT,
            self.height as i32,
            EGL_LINUX_DRM_FOURCC_EXT,
            self.fourcc as i32,
        ];

        for (plane, names) in self.planes.iter().zip(PLANE_ATTRIBS.iter()) {
            attribs.extend_from_slice(&[
                names[0],
                plane.fd,
                names[1],
                plane.offset as i32,
                names[2],
                plane.pitch as i32,
                names[3],
                (self.modifier & 0xFFFF_FFFF) as u32 as i32,
                names[4],
                (self.modifier >> 32) as u32 as i32,
            ]);
        }

        attribs.push(EGL_NONE);
        attribs
    }
}

/// An open driver connection.
///
/// Every call except [`GpuDevice::make_current`], [`GpuDevice::release_current`]
/// and the read-only queries requires one of the contexts to be current.
pub trait GpuDevice: Send {
    fn name(&self) -> &str;

    fn has_extension(&self, name: &str) -> bool;

    fn make_current(&mut self, context: ContextKind) -> VblitResult<()>;

    fn release_current(&mut self) -> VblitResult<()>;

    /// Import a dma-buf without copying. Errors are `ImportFailed`.
    fn create_image(&mut self, import: &ImageImport) -> VblitResult<ImageId>;

    fn destroy_image(&mut self, image: ImageId) -> VblitResult<()>;

    fn create_texture(&mut self) -> VblitResult<TextureId>;

    fn delete_texture(&mut self, texture: TextureId) -> VblitResult<()>;

    /// Bind `texture` to `target` on texture unit `unit`.
    fn bind_texture(&mut self, unit: u32, target: TextureTarget, texture: TextureId)
        -> VblitResult<()>;

    /// Back `texture` with the memory of an imported image.
    fn attach_image(
        &mut self,
        texture: TextureId,
        target: TextureTarget,
        image: ImageId,
    ) -> VblitResult<()>;

    /// Allocate immutable 2D storage for `texture`.
    fn allocate_storage(
        &mut self,
        texture: TextureId,
        format: GpuInternalFormat,
        width: u32,
        height: u32,
    ) -> VblitResult<()>;

    /// Compile and link a program. Errors are `ShaderCompileFailed` or
    /// `ShaderLinkFailed`.
    fn create_program(&mut self, source: &ProgramSource) -> VblitResult<ProgramId>;

    fn delete_program(&mut self, program: ProgramId) -> VblitResult<()>;

    fn use_program(&mut self, program: ProgramId) -> VblitResult<()>;

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<i32>;

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32>;

    /// Set a uniform of the program in use.
    fn set_uniform(&mut self, location: i32, value: UniformValue) -> VblitResult<()>;

    /// Source a 2-component vertex attribute from four vertices.
    fn set_vertex_attrib(&mut self, location: u32, data: &[f32; 8]) -> VblitResult<()>;

    fn create_framebuffer(&mut self) -> VblitResult<FramebufferId>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) -> VblitResult<()>;

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> VblitResult<()>;

    /// Attach `texture` as color attachment 0 of the bound framebuffer.
    fn attach_render_target(&mut self, target: TextureTarget, texture: TextureId)
        -> VblitResult<()>;

    /// Clear the whole color attachment.
    fn clear(&mut self, color: [f32; 4]) -> VblitResult<()>;

    fn set_viewport(&mut self, region: Region) -> VblitResult<()>;

    /// Toggle `src * srcAlpha + dst * (1 - srcAlpha)` blending.
    fn set_blending(&mut self, enabled: bool) -> VblitResult<()>;

    /// Draw a triangle strip from the current attributes.
    fn draw_triangle_strip(&mut self, vertices: u32) -> VblitResult<()>;

    /// Bind a level 0 texture image for compute writes.
    fn bind_image_unit(
        &mut self,
        unit: u32,
        texture: TextureId,
        format: GpuInternalFormat,
    ) -> VblitResult<()>;

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> VblitResult<()>;

    /// Block until all submitted work has completed.
    fn finish(&mut self) -> VblitResult<()>;

    fn fence_sync(&mut self) -> VblitResult<Fence>;

    /// Wait on a fence; `None` waits without a bound. A wait failure is
    /// `FenceWaitFailed`.
    fn client_wait_sync(&mut self, fence: Fence, timeout: Option<Duration>)
        -> VblitResult<WaitStatus>;

    fn delete_sync(&mut self, fence: Fence) -> VblitResult<()>;

    /// Tear the connection down. Called once, when the owning context drops.
    fn close(&mut self);
}
