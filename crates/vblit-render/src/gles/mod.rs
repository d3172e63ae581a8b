//! EGL/GLES driver.
//!
//! Opens the default EGL display with two surfaceless GLES 3.1 contexts
//! sharing one object namespace: the primary context draws, the auxiliary
//! context waits on fences.

mod ffi;

use std::collections::HashMap;
use std::ffi::{c_char, CStr, CString};
use std::time::Duration;

use tracing::{debug, info, warn};
use vblit_core::{
    EngineConfig, Fence, GpuInternalFormat, Region, ShaderStage, VblitError, VblitResult,
    WaitStatus,
};

use crate::device::{
    egl_error, gl_error, ContextKind, FramebufferId, GpuDevice, ImageId, ImageImport, ProgramId,
    TextureId, TextureTarget, UniformValue,
};
use crate::driver::GpuDriver;
use crate::shaders::ProgramSource;
use ffi::*;

/// Opens [`GlesDevice`]s through the libraries named in the configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct EglDriver;

impl EglDriver {
    pub fn new() -> Self {
        Self
    }
}

impl GpuDriver for EglDriver {
    fn name(&self) -> &str {
        "egl"
    }

    fn open(&self, config: &EngineConfig) -> VblitResult<Box<dyn GpuDevice>> {
        let library = GlesLibrary::load(&config.driver.egl_library, &config.driver.gles_library)
            .map_err(|err| VblitError::Context(format!("{err:#}")))?;
        Ok(Box::new(GlesDevice::open(library)?))
    }
}

fn target_enum(target: TextureTarget) -> GLenum {
    match target {
        TextureTarget::External => GL_TEXTURE_EXTERNAL_OES,
        TextureTarget::Texture2D => GL_TEXTURE_2D,
    }
}

fn stage_enum(stage: ShaderStage) -> GLenum {
    match stage {
        ShaderStage::Vertex => GL_VERTEX_SHADER,
        ShaderStage::Fragment => GL_FRAGMENT_SHADER,
        ShaderStage::Compute => GL_COMPUTE_SHADER,
    }
}

/// A GLES device on the default EGL display.
pub struct GlesDevice {
    lib: GlesLibrary,
    display: EGLDisplay,
    primary: EGLContext,
    auxiliary: EGLContext,
    renderer: String,
    extensions: Vec<String>,
    images: HashMap<u64, EGLImageKHR>,
    next_image: u64,
    /// Client-side vertex arrays; GL reads them at draw time.
    attribs: HashMap<u32, Box<[f32; 8]>>,
    closed: bool,
}

// SAFETY: the EGL handles are only used while the owning GraphicsContext
// mutex is held, and a context is bound to the calling thread before any
// GL call. EGL display and context handles may move between threads.
unsafe impl Send for GlesDevice {}

impl std::fmt::Debug for GlesDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlesDevice")
            .field("renderer", &self.renderer)
            .field("images", &self.images.len())
            .field("closed", &self.closed)
            .finish()
    }
}

fn split_extensions(ptr: *const c_char) -> Vec<String> {
    if ptr.is_null() {
        return Vec::new();
    }
    // SAFETY: EGL and GL return nul terminated static strings.
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_string_lossy().split_whitespace().map(str::to_string).collect()
}

impl GlesDevice {
    fn open(lib: GlesLibrary) -> VblitResult<Self> {
        let egl = lib.egl;
        // SAFETY: plain EGL initialization on the default display.
        unsafe {
            let display = (egl.get_display)(EGL_DEFAULT_DISPLAY);
            if display.is_null() {
                return Err(VblitError::Context("no EGL display".into()));
            }
            let (mut major, mut minor) = (0, 0);
            if (egl.initialize)(display, &mut major, &mut minor) == EGL_FALSE {
                return Err(VblitError::Context(format!(
                    "eglInitialize failed (error {:#x})",
                    (egl.get_error)()
                )));
            }
            (egl.bind_api)(EGL_OPENGL_ES_API);

            let attribs = [EGL_CONTEXT_CLIENT_VERSION, 3, EGL_CONTEXT_MINOR_VERSION_KHR, 1, EGL_NONE];
            let primary = (egl.create_context)(display, EGL_NO_CONFIG_KHR, EGL_NO_CONTEXT, attribs.as_ptr());
            if primary.is_null() {
                let code = (egl.get_error)();
                (egl.terminate)(display);
                return Err(VblitError::Context(format!("eglCreateContext failed (error {code:#x})")));
            }
            let auxiliary = (egl.create_context)(display, EGL_NO_CONFIG_KHR, primary, attribs.as_ptr());
            if auxiliary.is_null() {
                let code = (egl.get_error)();
                (egl.destroy_context)(display, primary);
                (egl.terminate)(display);
                return Err(VblitError::Context(format!("eglCreateContext failed (error {code:#x})")));
            }

            let mut extensions = split_extensions((egl.query_string)(display, EGL_EXTENSIONS));
            let mut renderer = String::from("unknown");
            if (egl.make_current)(display, EGL_NO_SURFACE, EGL_NO_SURFACE, primary) != EGL_FALSE {
                extensions.extend(split_extensions((lib.gl.get_string)(GL_EXTENSIONS) as *const c_char));
                let name = (lib.gl.get_string)(GL_RENDERER);
                if !name.is_null() {
                    renderer = CStr::from_ptr(name as *const c_char).to_string_lossy().into_owned();
                }
                (egl.make_current)(display, EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT);
            }

            info!(
                "EGL {}.{} on {}: {} extensions",
                major,
                minor,
                renderer,
                extensions.len()
            );
            Ok(Self {
                lib,
                display,
                primary,
                auxiliary,
                renderer,
                extensions,
                images: HashMap::new(),
                next_image: 1,
                attribs: HashMap::new(),
                closed: false,
            })
        }
    }

    /// Turn a pending GL error into `GpuCallFailed`.
    fn check(&self, call: &str) -> VblitResult<()> {
        // SAFETY: glGetError has no preconditions besides a current context.
        let code = unsafe { (self.lib.gl.get_error)() };
        if code != GL_NO_ERROR {
            return Err(VblitError::gpu(code, format!("{call} failed")));
        }
        Ok(())
    }

    fn last_egl_error(&self) -> u32 {
        // SAFETY: no preconditions.
        unsafe { (self.lib.egl.get_error)() as u32 }
    }

    fn compile(&self, stage: ShaderStage, src: &str) -> VblitResult<GLuint> {
        let gl = self.lib.gl;
        let source = CString::new(src)
            .map_err(|_| VblitError::compile(stage, "source contains a nul byte"))?;
        // SAFETY: the source pointer outlives the call; info logs are read
        // into buffers of the reported length.
        unsafe {
            let shader = (gl.create_shader)(stage_enum(stage));
            let ptr = source.as_ptr();
            (gl.shader_source)(shader, 1, &ptr, std::ptr::null());
            (gl.compile_shader)(shader);

            let mut status = 0;
            (gl.get_shaderiv)(shader, GL_COMPILE_STATUS, &mut status);
            if status == 0 {
                let mut len = 0;
                (gl.get_shaderiv)(shader, GL_INFO_LOG_LENGTH, &mut len);
                let mut log = vec![0u8; len.max(1) as usize];
                (gl.get_shader_info_log)(shader, len, std::ptr::null_mut(), log.as_mut_ptr() as *mut c_char);
                (gl.delete_shader)(shader);
                let log = String::from_utf8_lossy(&log).trim_end_matches('\0').to_string();
                return Err(VblitError::compile(stage, log));
            }
            Ok(shader)
        }
    }
}

impl GpuDevice for GlesDevice {
    fn name(&self) -> &str {
        &self.renderer
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    fn make_current(&mut self, context: ContextKind) -> VblitResult<()> {
        if self.closed {
            return Err(VblitError::Context("device is closed".into()));
        }
        let ctx = match context {
            ContextKind::Primary => self.primary,
            ContextKind::Auxiliary => self.auxiliary,
        };
        // SAFETY: display and context are alive until close().
        let ok = unsafe { (self.lib.egl.make_current)(self.display, EGL_NO_SURFACE, EGL_NO_SURFACE, ctx) };
        if ok == EGL_FALSE {
            return Err(VblitError::Context(format!(
                "eglMakeCurrent failed (error {:#x})",
                self.last_egl_error()
            )));
        }
        Ok(())
    }

    fn release_current(&mut self) -> VblitResult<()> {
        if self.closed {
            return Ok(());
        }
        // SAFETY: unbinding is always valid on an initialized display.
        let ok = unsafe {
            (self.lib.egl.make_current)(self.display, EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT)
        };
        if ok == EGL_FALSE {
            return Err(VblitError::Context(format!(
                "eglMakeCurrent(EGL_NO_CONTEXT) failed (error {:#x})",
                self.last_egl_error()
            )));
        }
        Ok(())
    }

    fn create_image(&mut self, import: &ImageImport) -> VblitResult<ImageId> {
        let attribs = import.attrib_list();
        // SAFETY: the attribute list is EGL_NONE terminated and outlives the call.
        let image = unsafe {
            (self.lib.egl.create_image_khr)(
                self.display,
                EGL_NO_CONTEXT,
                EGL_LINUX_DMA_BUF_EXT,
                std::ptr::null_mut(),
                attribs.as_ptr(),
            )
        };
        if image == EGL_NO_IMAGE_KHR {
            let code = self.last_egl_error();
            return Err(VblitError::import(
                code,
                format!("eglCreateImageKHR({}x{}, fourcc {:#x})", import.width, import.height, import.fourcc),
            ));
        }
        let id = self.next_image;
        self.next_image += 1;
        self.images.insert(id, image);
        Ok(ImageId(id))
    }

    fn destroy_image(&mut self, image: ImageId) -> VblitResult<()> {
        let handle = self.images.remove(&image.0).ok_or_else(|| {
            VblitError::gpu(egl_error::BAD_PARAMETER, format!("unknown image {}", image.0))
        })?;
        // SAFETY: the handle came from eglCreateImageKHR on this display.
        if unsafe { (self.lib.egl.destroy_image_khr)(self.display, handle) } == EGL_FALSE {
            return Err(VblitError::gpu(self.last_egl_error(), "eglDestroyImageKHR failed"));
        }
        Ok(())
    }

    fn create_texture(&mut self) -> VblitResult<TextureId> {
        let mut texture = 0;
        // SAFETY: writes one name.
        unsafe { (self.lib.gl.gen_textures)(1, &mut texture) };
        self.check("glGenTextures")?;
        Ok(TextureId(texture))
    }

    fn delete_texture(&mut self, texture: TextureId) -> VblitResult<()> {
        // SAFETY: reads one name.
        unsafe { (self.lib.gl.delete_textures)(1, &texture.0) };
        self.check("glDeleteTextures")
    }

    fn bind_texture(&mut self, unit: u32, target: TextureTarget, texture: TextureId) -> VblitResult<()> {
        // SAFETY: plain state calls.
        unsafe {
            (self.lib.gl.active_texture)(GL_TEXTURE0 + unit);
            (self.lib.gl.bind_texture)(target_enum(target), texture.0);
        }
        self.check("glBindTexture")
    }

    fn attach_image(&mut self, texture: TextureId, target: TextureTarget, image: ImageId) -> VblitResult<()> {
        let handle = *self.images.get(&image.0).ok_or_else(|| {
            VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown image {}", image.0))
        })?;
        let gl = self.lib.gl;
        // SAFETY: the image handle is alive in `images`.
        unsafe {
            (gl.bind_texture)(target_enum(target), texture.0);
            (gl.tex_parameteri)(target_enum(target), GL_TEXTURE_MIN_FILTER, GL_NEAREST);
            (gl.tex_parameteri)(target_enum(target), GL_TEXTURE_MAG_FILTER, GL_NEAREST);
            (gl.egl_image_target_texture_2d_oes)(target_enum(target), handle);
        }
        self.check("glEGLImageTargetTexture2DOES")
    }

    fn allocate_storage(
        &mut self,
        texture: TextureId,
        format: GpuInternalFormat,
        width: u32,
        height: u32,
    ) -> VblitResult<()> {
        let gl = self.lib.gl;
        // SAFETY: plain state calls on a generated texture name.
        unsafe {
            (gl.bind_texture)(GL_TEXTURE_2D, texture.0);
            (gl.tex_storage_2d)(GL_TEXTURE_2D, 1, format.gl_enum(), width as GLsizei, height as GLsizei);
            (gl.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_MIN_FILTER, GL_NEAREST);
            (gl.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_MAG_FILTER, GL_NEAREST);
        }
        self.check("glTexStorage2D")
    }

    fn create_program(&mut self, source: &ProgramSource) -> VblitResult<ProgramId> {
        let gl = self.lib.gl;
        let mut shaders = Vec::new();
        for (stage, src) in source.stages() {
            match self.compile(stage, src) {
                Ok(shader) => shaders.push(shader),
                Err(err) => {
                    // SAFETY: deleting shaders this call created.
                    unsafe { shaders.iter().for_each(|s| (gl.delete_shader)(*s)) };
                    return Err(err);
                }
            }
        }

        // SAFETY: shader names are valid; the info log buffer has the
        // reported length.
        unsafe {
            let program = (gl.create_program)();
            for shader in &shaders {
                (gl.attach_shader)(program, *shader);
            }
            (gl.link_program)(program);
            for shader in &shaders {
                (gl.delete_shader)(*shader);
            }

            let mut status = 0;
            (gl.get_programiv)(program, GL_LINK_STATUS, &mut status);
            if status == 0 {
                let mut len = 0;
                (gl.get_programiv)(program, GL_INFO_LOG_LENGTH, &mut len);
                let mut log = vec![0u8; len.max(1) as usize];
                (gl.get_program_info_log)(program, len, std::ptr::null_mut(), log.as_mut_ptr() as *mut c_char);
                (gl.delete_program)(program);
                return Err(VblitError::ShaderLinkFailed {
                    log: String::from_utf8_lossy(&log).trim_end_matches('\0').to_string(),
                });
            }
            debug!(kind = source.kind.name(), program, "Linked GLES program");
            Ok(ProgramId(program))
        }
    }

    fn delete_program(&mut self, program: ProgramId) -> VblitResult<()> {
        // SAFETY: plain state call.
        unsafe { (self.lib.gl.delete_program)(program.0) };
        self.check("glDeleteProgram")
    }

    fn use_program(&mut self, program: ProgramId) -> VblitResult<()> {
        // SAFETY: plain state call.
        unsafe { (self.lib.gl.use_program)(program.0) };
        self.check("glUseProgram")
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<i32> {
        let name = CString::new(name).ok()?;
        // SAFETY: nul terminated name.
        let location = unsafe { (self.lib.gl.get_uniform_location)(program.0, name.as_ptr()) };
        (location >= 0).then_some(location)
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let name = CString::new(name).ok()?;
        // SAFETY: nul terminated name.
        let location = unsafe { (self.lib.gl.get_attrib_location)(program.0, name.as_ptr()) };
        (location >= 0).then_some(location as u32)
    }

    fn set_uniform(&mut self, location: i32, value: UniformValue) -> VblitResult<()> {
        let gl = self.lib.gl;
        // SAFETY: plain state calls.
        unsafe {
            match value {
                UniformValue::Bool(_) | UniformValue::Int(_) => (gl.uniform1i)(location, value.as_i32()),
                UniformValue::Float(v) => (gl.uniform1f)(location, v),
                UniformValue::Vec4([x, y, z, w]) => (gl.uniform4f)(location, x, y, z, w),
            }
        }
        self.check("glUniform")
    }

    fn set_vertex_attrib(&mut self, location: u32, data: &[f32; 8]) -> VblitResult<()> {
        let array = self.attribs.entry(location).or_insert_with(|| Box::new([0.0; 8]));
        **array = *data;
        let ptr = array.as_ptr() as *const std::ffi::c_void;
        // SAFETY: the boxed array lives in `attribs` until close(), so the
        // pointer stays valid for every later draw.
        unsafe {
            (self.lib.gl.enable_vertex_attrib_array)(location);
            (self.lib.gl.vertex_attrib_pointer)(location, 2, GL_FLOAT, GL_FALSE, 0, ptr);
        }
        self.check("glVertexAttribPointer")
    }

    fn create_framebuffer(&mut self) -> VblitResult<FramebufferId> {
        let mut fbo = 0;
        // SAFETY: writes one name.
        unsafe { (self.lib.gl.gen_framebuffers)(1, &mut fbo) };
        self.check("glGenFramebuffers")?;
        Ok(FramebufferId(fbo))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) -> VblitResult<()> {
        // SAFETY: reads one name.
        unsafe { (self.lib.gl.delete_framebuffers)(1, &framebuffer.0) };
        self.check("glDeleteFramebuffers")
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> VblitResult<()> {
        // SAFETY: plain state call.
        unsafe { (self.lib.gl.bind_framebuffer)(GL_FRAMEBUFFER, framebuffer.0) };
        self.check("glBindFramebuffer")
    }

    fn attach_render_target(&mut self, target: TextureTarget, texture: TextureId) -> VblitResult<()> {
        let gl = self.lib.gl;
        // SAFETY: plain state calls.
        let status = unsafe {
            (gl.framebuffer_texture_2d)(GL_FRAMEBUFFER, GL_COLOR_ATTACHMENT0, target_enum(target), texture.0, 0);
            (gl.check_framebuffer_status)(GL_FRAMEBUFFER)
        };
        self.check("glFramebufferTexture2D")?;
        if status != GL_FRAMEBUFFER_COMPLETE {
            return Err(VblitError::gpu(
                gl_error::INVALID_FRAMEBUFFER_OPERATION,
                format!("framebuffer incomplete ({status:#x})"),
            ));
        }
        Ok(())
    }

    fn clear(&mut self, [r, g, b, a]: [f32; 4]) -> VblitResult<()> {
        // SAFETY: plain state calls.
        unsafe {
            (self.lib.gl.clear_color)(r, g, b, a);
            (self.lib.gl.clear)(GL_COLOR_BUFFER_BIT);
        }
        self.check("glClear")
    }

    fn set_viewport(&mut self, region: Region) -> VblitResult<()> {
        // SAFETY: plain state call.
        unsafe { (self.lib.gl.viewport)(region.x, region.y, region.w, region.h) };
        self.check("glViewport")
    }

    fn set_blending(&mut self, enabled: bool) -> VblitResult<()> {
        // SAFETY: plain state calls.
        unsafe {
            if enabled {
                (self.lib.gl.enable)(GL_BLEND);
                (self.lib.gl.blend_func)(GL_SRC_ALPHA, GL_ONE_MINUS_SRC_ALPHA);
            } else {
                (self.lib.gl.disable)(GL_BLEND);
            }
        }
        self.check("glBlendFunc")
    }

    fn draw_triangle_strip(&mut self, vertices: u32) -> VblitResult<()> {
        // SAFETY: attribute arrays point into `attribs`.
        unsafe { (self.lib.gl.draw_arrays)(GL_TRIANGLE_STRIP, 0, vertices as GLsizei) };
        self.check("Failed to render array data")
    }

    fn bind_image_unit(&mut self, unit: u32, texture: TextureId, format: GpuInternalFormat) -> VblitResult<()> {
        // SAFETY: plain state call.
        unsafe {
            (self.lib.gl.bind_image_texture)(unit, texture.0, 0, GL_FALSE, 0, GL_WRITE_ONLY, format.gl_enum())
        };
        self.check("glBindImageTexture")
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> VblitResult<()> {
        // SAFETY: plain state calls.
        unsafe {
            (self.lib.gl.dispatch_compute)(x, y, z);
            (self.lib.gl.memory_barrier)(GL_ALL_BARRIER_BITS);
        }
        self.check("glDispatchCompute")
    }

    fn finish(&mut self) -> VblitResult<()> {
        // SAFETY: plain call.
        unsafe { (self.lib.gl.finish)() };
        self.check("glFinish")
    }

    fn fence_sync(&mut self) -> VblitResult<Fence> {
        // SAFETY: EGL_SYNC_FENCE_KHR takes an empty attribute list.
        let sync = unsafe { (self.lib.egl.create_sync_khr)(self.display, EGL_SYNC_FENCE_KHR, std::ptr::null()) };
        if sync == EGL_NO_SYNC_KHR {
            return Err(VblitError::gpu(self.last_egl_error(), "eglCreateSyncKHR failed"));
        }
        Ok(Fence::from_raw(sync as usize))
    }

    fn client_wait_sync(&mut self, fence: Fence, timeout: Option<Duration>) -> VblitResult<WaitStatus> {
        let nanos = timeout.map_or(EGL_FOREVER_KHR, |t| t.as_nanos().min(u64::MAX as u128 - 1) as u64);
        // SAFETY: the fence came from eglCreateSyncKHR on this display.
        let status = unsafe {
            (self.lib.egl.client_wait_sync_khr)(
                self.display,
                fence.as_raw() as EGLSyncKHR,
                EGL_SYNC_FLUSH_COMMANDS_BIT_KHR,
                nanos,
            )
        };
        match status {
            EGL_CONDITION_SATISFIED_KHR => Ok(WaitStatus::ConditionSatisfied),
            EGL_TIMEOUT_EXPIRED_KHR => Ok(WaitStatus::TimeoutExpired),
            _ => Err(VblitError::FenceWaitFailed(format!(
                "eglClientWaitSyncKHR on {fence} failed (error {:#x})",
                self.last_egl_error()
            ))),
        }
    }

    fn delete_sync(&mut self, fence: Fence) -> VblitResult<()> {
        // SAFETY: the fence came from eglCreateSyncKHR on this display.
        let ok = unsafe { (self.lib.egl.destroy_sync_khr)(self.display, fence.as_raw() as EGLSyncKHR) };
        if ok == EGL_FALSE {
            return Err(VblitError::gpu(self.last_egl_error(), "eglDestroySyncKHR failed"));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        let egl = self.lib.egl;
        // SAFETY: tears down objects this device created; nothing is used
        // after `closed` is set.
        unsafe {
            (egl.make_current)(self.display, EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT);
            for (_, image) in self.images.drain() {
                (egl.destroy_image_khr)(self.display, image);
            }
            (egl.destroy_context)(self.display, self.auxiliary);
            (egl.destroy_context)(self.display, self.primary);
            if (egl.terminate)(self.display) == EGL_FALSE {
                warn!("eglTerminate failed (error {:#x})", (egl.get_error)());
            }
        }
        self.attribs.clear();
        self.closed = true;
        info!("Closed EGL display");
    }
}

impl Drop for GlesDevice {
    fn drop(&mut self) {
        self.close();
    }
}
