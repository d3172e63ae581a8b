//! EGL and GLES entry points, resolved at runtime with `libloading`.
//!
//! Only the calls the engine issues are bound. Core symbols come straight
//! from the libraries, extension symbols through `eglGetProcAddress`.

use std::ffi::{c_char, c_uint, c_void, CStr};

use anyhow::{anyhow, Context, Result};
use libloading::Library;
use tracing::{debug, info};

pub type EGLDisplay = *mut c_void;
pub type EGLContext = *mut c_void;
pub type EGLConfig = *mut c_void;
pub type EGLSurface = *mut c_void;
pub type EGLImageKHR = *mut c_void;
pub type EGLSyncKHR = *mut c_void;
pub type EGLClientBuffer = *mut c_void;
pub type EGLBoolean = c_uint;
pub type EGLint = i32;
pub type EGLenum = c_uint;

pub type GLenum = c_uint;
pub type GLuint = c_uint;
pub type GLint = i32;
pub type GLsizei = i32;
pub type GLfloat = f32;
pub type GLboolean = u8;
pub type GLbitfield = c_uint;

pub const EGL_DEFAULT_DISPLAY: *mut c_void = std::ptr::null_mut();
pub const EGL_NO_CONTEXT: EGLContext = std::ptr::null_mut();
pub const EGL_NO_SURFACE: EGLSurface = std::ptr::null_mut();
pub const EGL_NO_CONFIG_KHR: EGLConfig = std::ptr::null_mut();
pub const EGL_NO_IMAGE_KHR: EGLImageKHR = std::ptr::null_mut();
pub const EGL_NO_SYNC_KHR: EGLSyncKHR = std::ptr::null_mut();

pub const EGL_FALSE: EGLBoolean = 0;
pub const EGL_SUCCESS: EGLint = 0x3000;
pub const EGL_NONE: EGLint = 0x3038;
pub const EGL_EXTENSIONS: EGLint = 0x3055;
pub const EGL_OPENGL_ES_API: EGLenum = 0x30A0;
pub const EGL_CONTEXT_CLIENT_VERSION: EGLint = 0x3098;
pub const EGL_CONTEXT_MINOR_VERSION_KHR: EGLint = 0x30FB;
pub const EGL_LINUX_DMA_BUF_EXT: EGLenum = 0x3270;
pub const EGL_SYNC_FENCE_KHR: EGLenum = 0x30F9;
pub const EGL_SYNC_FLUSH_COMMANDS_BIT_KHR: EGLint = 0x0001;
pub const EGL_FOREVER_KHR: u64 = u64::MAX;
pub const EGL_TIMEOUT_EXPIRED_KHR: EGLint = 0x30F5;
pub const EGL_CONDITION_SATISFIED_KHR: EGLint = 0x30F6;

pub const GL_NO_ERROR: GLenum = 0;
pub const GL_FALSE: GLboolean = 0;
pub const GL_RENDERER: GLenum = 0x1F01;
pub const GL_EXTENSIONS: GLenum = 0x1F03;
pub const GL_TEXTURE_2D: GLenum = 0x0DE1;
pub const GL_TEXTURE_EXTERNAL_OES: GLenum = 0x8D65;
pub const GL_TEXTURE0: GLenum = 0x84C0;
pub const GL_TEXTURE_MIN_FILTER: GLenum = 0x2801;
pub const GL_TEXTURE_MAG_FILTER: GLenum = 0x2800;
pub const GL_NEAREST: GLint = 0x2600;
pub const GL_VERTEX_SHADER: GLenum = 0x8B31;
pub const GL_FRAGMENT_SHADER: GLenum = 0x8B30;
pub const GL_COMPUTE_SHADER: GLenum = 0x91B9;
pub const GL_COMPILE_STATUS: GLenum = 0x8B81;
pub const GL_LINK_STATUS: GLenum = 0x8B82;
pub const GL_INFO_LOG_LENGTH: GLenum = 0x8B84;
pub const GL_FLOAT: GLenum = 0x1406;
pub const GL_FRAMEBUFFER: GLenum = 0x8D40;
pub const GL_COLOR_ATTACHMENT0: GLenum = 0x8CE0;
pub const GL_FRAMEBUFFER_COMPLETE: GLenum = 0x8CD5;
pub const GL_COLOR_BUFFER_BIT: GLbitfield = 0x4000;
pub const GL_BLEND: GLenum = 0x0BE2;
pub const GL_SRC_ALPHA: GLenum = 0x0302;
pub const GL_ONE_MINUS_SRC_ALPHA: GLenum = 0x0303;
pub const GL_TRIANGLE_STRIP: GLenum = 0x0005;
pub const GL_WRITE_ONLY: GLenum = 0x88B9;
pub const GL_ALL_BARRIER_BITS: GLbitfield = 0xFFFF_FFFF;

/// EGL entry points.
#[derive(Clone, Copy)]
pub struct Egl {
    pub get_display: unsafe extern "C" fn(*mut c_void) -> EGLDisplay,
    pub initialize: unsafe extern "C" fn(EGLDisplay, *mut EGLint, *mut EGLint) -> EGLBoolean,
    pub terminate: unsafe extern "C" fn(EGLDisplay) -> EGLBoolean,
    pub bind_api: unsafe extern "C" fn(EGLenum) -> EGLBoolean,
    pub query_string: unsafe extern "C" fn(EGLDisplay, EGLint) -> *const c_char,
    pub create_context:
        unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLContext, *const EGLint) -> EGLContext,
    pub destroy_context: unsafe extern "C" fn(EGLDisplay, EGLContext) -> EGLBoolean,
    pub make_current:
        unsafe extern "C" fn(EGLDisplay, EGLSurface, EGLSurface, EGLContext) -> EGLBoolean,
    pub get_error: unsafe extern "C" fn() -> EGLint,
    pub create_image_khr: unsafe extern "C" fn(
        EGLDisplay,
        EGLContext,
        EGLenum,
        EGLClientBuffer,
        *const EGLint,
    ) -> EGLImageKHR,
    pub destroy_image_khr: unsafe extern "C" fn(EGLDisplay, EGLImageKHR) -> EGLBoolean,
    pub create_sync_khr: unsafe extern "C" fn(EGLDisplay, EGLenum, *const EGLint) -> EGLSyncKHR,
    pub client_wait_sync_khr: unsafe extern "C" fn(EGLDisplay, EGLSyncKHR, EGLint, u64) -> EGLint,
    pub destroy_sync_khr: unsafe extern "C" fn(EGLDisplay, EGLSyncKHR) -> EGLBoolean,
}

/// GLES 3.1 entry points.
#[derive(Clone, Copy)]
pub struct Gl {
    pub get_error: unsafe extern "C" fn() -> GLenum,
    pub get_string: unsafe extern "C" fn(GLenum) -> *const u8,
    pub gen_textures: unsafe extern "C" fn(GLsizei, *mut GLuint),
    pub delete_textures: unsafe extern "C" fn(GLsizei, *const GLuint),
    pub active_texture: unsafe extern "C" fn(GLenum),
    pub bind_texture: unsafe extern "C" fn(GLenum, GLuint),
    pub tex_parameteri: unsafe extern "C" fn(GLenum, GLenum, GLint),
    pub tex_storage_2d: unsafe extern "C" fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei),
    pub egl_image_target_texture_2d_oes: unsafe extern "C" fn(GLenum, *mut c_void),
    pub create_shader: unsafe extern "C" fn(GLenum) -> GLuint,
    pub shader_source: unsafe extern "C" fn(GLuint, GLsizei, *const *const c_char, *const GLint),
    pub compile_shader: unsafe extern "C" fn(GLuint),
    pub get_shaderiv: unsafe extern "C" fn(GLuint, GLenum, *mut GLint),
    pub get_shader_info_log: unsafe extern "C" fn(GLuint, GLsizei, *mut GLsizei, *mut c_char),
    pub delete_shader: unsafe extern "C" fn(GLuint),
    pub create_program: unsafe extern "C" fn() -> GLuint,
    pub attach_shader: unsafe extern "C" fn(GLuint, GLuint),
    pub link_program: unsafe extern "C" fn(GLuint),
    pub get_programiv: unsafe extern "C" fn(GLuint, GLenum, *mut GLint),
    pub get_program_info_log: unsafe extern "C" fn(GLuint, GLsizei, *mut GLsizei, *mut c_char),
    pub delete_program: unsafe extern "C" fn(GLuint),
    pub use_program: unsafe extern "C" fn(GLuint),
    pub get_uniform_location: unsafe extern "C" fn(GLuint, *const c_char) -> GLint,
    pub get_attrib_location: unsafe extern "C" fn(GLuint, *const c_char) -> GLint,
    pub uniform1i: unsafe extern "C" fn(GLint, GLint),
    pub uniform1f: unsafe extern "C" fn(GLint, GLfloat),
    pub uniform4f: unsafe extern "C" fn(GLint, GLfloat, GLfloat, GLfloat, GLfloat),
    pub enable_vertex_attrib_array: unsafe extern "C" fn(GLuint),
    pub vertex_attrib_pointer:
        unsafe extern "C" fn(GLuint, GLint, GLenum, GLboolean, GLsizei, *const c_void),
    pub gen_framebuffers: unsafe extern "C" fn(GLsizei, *mut GLuint),
    pub delete_framebuffers: unsafe extern "C" fn(GLsizei, *const GLuint),
    pub bind_framebuffer: unsafe extern "C" fn(GLenum, GLuint),
    pub framebuffer_texture_2d: unsafe extern "C" fn(GLenum, GLenum, GLenum, GLuint, GLint),
    pub check_framebuffer_status: unsafe extern "C" fn(GLenum) -> GLenum,
    pub clear_color: unsafe extern "C" fn(GLfloat, GLfloat, GLfloat, GLfloat),
    pub clear: unsafe extern "C" fn(GLbitfield),
    pub viewport: unsafe extern "C" fn(GLint, GLint, GLsizei, GLsizei),
    pub enable: unsafe extern "C" fn(GLenum),
    pub disable: unsafe extern "C" fn(GLenum),
    pub blend_func: unsafe extern "C" fn(GLenum, GLenum),
    pub draw_arrays: unsafe extern "C" fn(GLenum, GLint, GLsizei),
    pub bind_image_texture:
        unsafe extern "C" fn(GLuint, GLuint, GLint, GLboolean, GLint, GLenum, GLenum),
    pub dispatch_compute: unsafe extern "C" fn(GLuint, GLuint, GLuint),
    pub memory_barrier: unsafe extern "C" fn(GLbitfield),
    pub finish: unsafe extern "C" fn(),
}

/// The loaded libraries and their entry points.
pub struct GlesLibrary {
    _egl_lib: Library,
    _gl_lib: Library,
    pub egl: Egl,
    pub gl: Gl,
}

impl std::fmt::Debug for GlesLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlesLibrary").field("loaded", &true).finish()
    }
}

/// Copy a symbol out of `lib`. `name` is nul terminated.
///
/// # Safety
/// `T` must be the function pointer type of the symbol.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]).into_owned();
    let symbol = lib
        .get::<T>(name)
        .with_context(|| format!("missing symbol {printable}"))?;
    Ok(*symbol)
}

/// Resolve an extension entry point.
///
/// # Safety
/// `T` must be the function pointer type of the entry point.
unsafe fn proc_address<T: Copy>(
    get_proc_address: unsafe extern "C" fn(*const c_char) -> *const c_void,
    name: &CStr,
) -> Result<T> {
    debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<*const c_void>());
    let ptr = get_proc_address(name.as_ptr());
    if ptr.is_null() {
        return Err(anyhow!("eglGetProcAddress returned null for {}", name.to_string_lossy()));
    }
    Ok(std::mem::transmute_copy::<*const c_void, T>(&ptr))
}

impl GlesLibrary {
    /// Open both libraries and resolve every entry point. A missing symbol
    /// fails the whole load.
    pub fn load(egl_path: &str, gles_path: &str) -> Result<Self> {
        info!(egl = egl_path, gles = gles_path, "Loading EGL/GLES libraries");

        // SAFETY: loading the platform EGL and GLES drivers; their
        // initializers only register driver state.
        let egl_lib = unsafe { Library::new(egl_path) }
            .with_context(|| format!("failed to load {egl_path}"))?;
        // SAFETY: as above.
        let gl_lib = unsafe { Library::new(gles_path) }
            .with_context(|| format!("failed to load {gles_path}"))?;

        // SAFETY: every type below matches the Khronos prototype of the
        // symbol it is resolved for.
        let (egl, gl) = unsafe {
            let get_proc_address: unsafe extern "C" fn(*const c_char) -> *const c_void =
                symbol(&egl_lib, b"eglGetProcAddress\0")?;

            let egl = Egl {
                get_display: symbol(&egl_lib, b"eglGetDisplay\0")?,
                initialize: symbol(&egl_lib, b"eglInitialize\0")?,
                terminate: symbol(&egl_lib, b"eglTerminate\0")?,
                bind_api: symbol(&egl_lib, b"eglBindAPI\0")?,
                query_string: symbol(&egl_lib, b"eglQueryString\0")?,
                create_context: symbol(&egl_lib, b"eglCreateContext\0")?,
                destroy_context: symbol(&egl_lib, b"eglDestroyContext\0")?,
                make_current: symbol(&egl_lib, b"eglMakeCurrent\0")?,
                get_error: symbol(&egl_lib, b"eglGetError\0")?,
                create_image_khr: proc_address(get_proc_address, c"eglCreateImageKHR")?,
                destroy_image_khr: proc_address(get_proc_address, c"eglDestroyImageKHR")?,
                create_sync_khr: proc_address(get_proc_address, c"eglCreateSyncKHR")?,
                client_wait_sync_khr: proc_address(get_proc_address, c"eglClientWaitSyncKHR")?,
                destroy_sync_khr: proc_address(get_proc_address, c"eglDestroySyncKHR")?,
            };

            let gl = Gl {
                get_error: symbol(&gl_lib, b"glGetError\0")?,
                get_string: symbol(&gl_lib, b"glGetString\0")?,
                gen_textures: symbol(&gl_lib, b"glGenTextures\0")?,
                delete_textures: symbol(&gl_lib, b"glDeleteTextures\0")?,
                active_texture: symbol(&gl_lib, b"glActiveTexture\0")?,
                bind_texture: symbol(&gl_lib, b"glBindTexture\0")?,
                tex_parameteri: symbol(&gl_lib, b"glTexParameteri\0")?,
                tex_storage_2d: symbol(&gl_lib, b"glTexStorage2D\0")?,
                egl_image_target_texture_2d_oes: proc_address(
                    get_proc_address,
                    c"glEGLImageTargetTexture2DOES",
                )?,
                create_shader: symbol(&gl_lib, b"glCreateShader\0")?,
                shader_source: symbol(&gl_lib, b"glShaderSource\0")?,
                compile_shader: symbol(&gl_lib, b"glCompileShader\0")?,
                get_shaderiv: symbol(&gl_lib, b"glGetShaderiv\0")?,
                get_shader_info_log: symbol(&gl_lib, b"glGetShaderInfoLog\0")?,
                delete_shader: symbol(&gl_lib, b"glDeleteShader\0")?,
                create_program: symbol(&gl_lib, b"glCreateProgram\0")?,
                attach_shader: symbol(&gl_lib, b"glAttachShader\0")?,
                link_program: symbol(&gl_lib, b"glLinkProgram\0")?,
                get_programiv: symbol(&gl_lib, b"glGetProgramiv\0")?,
                get_program_info_log: symbol(&gl_lib, b"glGetProgramInfoLog\0")?,
                delete_program: symbol(&gl_lib, b"glDeleteProgram\0")?,
                use_program: symbol(&gl_lib, b"glUseProgram\0")?,
                get_uniform_location: symbol(&gl_lib, b"glGetUniformLocation\0")?,
                get_attrib_location: symbol(&gl_lib, b"glGetAttribLocation\0")?,
                uniform1i: symbol(&gl_lib, b"glUniform1i\0")?,
                uniform1f: symbol(&gl_lib, b"glUniform1f\0")?,
                uniform4f: symbol(&gl_lib, b"glUniform4f\0")?,
                enable_vertex_attrib_array: symbol(&gl_lib, b"glEnableVertexAttribArray\0")?,
                vertex_attrib_pointer: symbol(&gl_lib, b"glVertexAttribPointer\0")?,
                gen_framebuffers: symbol(&gl_lib, b"glGenFramebuffers\0")?,
                delete_framebuffers: symbol(&gl_lib, b"glDeleteFramebuffers\0")?,
                bind_framebuffer: symbol(&gl_lib, b"glBindFramebuffer\0")?,
                framebuffer_texture_2d: symbol(&gl_lib, b"glFramebufferTexture2D\0")?,
                check_framebuffer_status: symbol(&gl_lib, b"glCheckFramebufferStatus\0")?,
                clear_color: symbol(&gl_lib, b"glClearColor\0")?,
                clear: symbol(&gl_lib, b"glClear\0")?,
                viewport: symbol(&gl_lib, b"glViewport\0")?,
                enable: symbol(&gl_lib, b"glEnable\0")?,
                disable: symbol(&gl_lib, b"glDisable\0")?,
                blend_func: symbol(&gl_lib, b"glBlendFunc\0")?,
                draw_arrays: symbol(&gl_lib, b"glDrawArrays\0")?,
                bind_image_texture: symbol(&gl_lib, b"glBindImageTexture\0")?,
                dispatch_compute: symbol(&gl_lib, b"glDispatchCompute\0")?,
                memory_barrier: symbol(&gl_lib, b"glMemoryBarrier\0")?,
                finish: symbol(&gl_lib, b"glFinish\0")?,
            };
            (egl, gl)
        };

        debug!("All EGL/GLES symbols resolved");
        Ok(Self {
            _egl_lib: egl_lib,
            _gl_lib: gl_lib,
            egl,
            gl,
        })
    }
}
