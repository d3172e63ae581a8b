//! CPU reference device.
//!
//! `SoftDevice` follows the same call sequence as the EGL/GLES backend and
//! executes the program catalog on the CPU over [`SoftMemory`] buffers. It
//! backs the test suite and hosts without a GPU. Handles are cheap clones
//! of one shared state, so a test can keep one to inspect what the engine
//! did.

mod memory;
mod raster;
mod texel;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;
use vblit_core::{
    EngineConfig, Fence, GpuInternalFormat, Region, VblitError, VblitResult, WaitStatus,
};

pub use memory::SoftMemory;
pub use texel::Storage;

use crate::device::{
    egl_error, gl_error, ContextKind, FramebufferId, GpuDevice, ImageId, ImageImport, ProgramId,
    TextureId, TextureTarget, UniformValue, YUV_TARGET_EXTENSION,
};
use crate::driver::GpuDriver;
use crate::shaders::{ProgramSource, ShaderKind};
use raster::{Bound, Quad, Repack, Samplers, Uniforms};

const EXTERNAL_IMAGE_EXTENSION: &str = "GL_OES_EGL_image_external_essl3";
const FIRST_FENCE: usize = 0x1000;

/// Opens [`SoftDevice`]s over one [`SoftMemory`].
#[derive(Debug, Clone)]
pub struct SoftDriver {
    device: SoftDevice,
}

impl Default for SoftDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDriver {
    pub fn new() -> Self {
        Self {
            device: SoftDevice::new(SoftMemory::new(), vec![EXTERNAL_IMAGE_EXTENSION.to_string()]),
        }
    }

    /// Advertise YUV render targets.
    pub fn with_yuv_target(self) -> Self {
        self.device.lock().extensions.push(YUV_TARGET_EXTENSION.to_string());
        self
    }

    /// Reject imports of `fourcc`, like a driver without that layout.
    pub fn without_fourcc(self, fourcc: u32) -> Self {
        self.device.lock().rejected_fourccs.push(fourcc);
        self
    }

    pub fn memory(&self) -> SoftMemory {
        self.device.lock().memory.clone()
    }

    /// A handle to the device this driver opens.
    pub fn device(&self) -> SoftDevice {
        self.device.clone()
    }
}

impl GpuDriver for SoftDriver {
    fn name(&self) -> &str {
        "soft"
    }

    fn open(&self, _config: &EngineConfig) -> VblitResult<Box<dyn GpuDevice>> {
        let mut state = self.device.lock();
        if state.open {
            return Err(VblitError::Context("soft device is already open".into()));
        }
        state.open = true;
        state.closed = false;
        drop(state);
        Ok(Box::new(self.device.clone()))
    }
}

#[derive(Debug)]
enum Backing {
    Empty,
    Image(u64),
    Storage(Storage),
}

#[derive(Debug)]
struct SoftTexture {
    backing: Backing,
}

#[derive(Debug)]
struct SoftProgram {
    kind: ShaderKind,
    uniforms: Vec<String>,
    attributes: Vec<String>,
    values: HashMap<i32, UniformValue>,
}

/// Counters exposed to tests.
#[derive(Debug, Clone, Default)]
pub struct SoftStats {
    /// Program of every completed draw, in order.
    pub draws: Vec<ShaderKind>,
    pub dispatches: usize,
    pub clears: usize,
    pub finishes: usize,
    pub storage_allocations: usize,
    pub images_created: usize,
    pub fences_created: usize,
}

#[derive(Debug)]
struct SoftState {
    memory: SoftMemory,
    extensions: Vec<String>,
    rejected_fourccs: Vec<u32>,
    open: bool,
    closed: bool,
    current: Option<ContextKind>,
    next_id: u32,
    images: HashMap<u64, ImageImport>,
    textures: HashMap<u32, SoftTexture>,
    programs: HashMap<u32, SoftProgram>,
    framebuffers: HashMap<u32, Option<u32>>,
    bound_framebuffer: Option<u32>,
    program_in_use: Option<u32>,
    units: HashMap<u32, u32>,
    image_units: HashMap<u32, (u32, GpuInternalFormat)>,
    attribs: HashMap<u32, [f32; 8]>,
    viewport: Region,
    blending: bool,
    fences: HashSet<usize>,
    next_fence: usize,
    hold_fences: bool,
    fail_next_wait: bool,
    fail_draw_at: Option<usize>,
    stats: SoftStats,
}

/// A handle to the reference device.
#[derive(Debug, Clone)]
pub struct SoftDevice {
    state: Arc<Mutex<SoftState>>,
}

fn no_context() -> VblitError {
    VblitError::gpu(gl_error::INVALID_OPERATION, "no current context")
}

impl SoftDevice {
    fn new(memory: SoftMemory, extensions: Vec<String>) -> Self {
        let state = SoftState {
            memory,
            extensions,
            rejected_fourccs: Vec::new(),
            open: false,
            closed: false,
            current: None,
            next_id: 1,
            images: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            bound_framebuffer: None,
            program_in_use: None,
            units: HashMap::new(),
            image_units: HashMap::new(),
            attribs: HashMap::new(),
            viewport: Region::default(),
            blending: false,
            fences: HashSet::new(),
            next_fence: FIRST_FENCE,
            hold_fences: false,
            fail_next_wait: false,
            fail_draw_at: None,
            stats: SoftStats::default(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SoftState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock for a GL call, which needs a current context.
    fn gl(&self) -> VblitResult<MutexGuard<'_, SoftState>> {
        let state = self.lock();
        if state.current.is_none() {
            return Err(no_context());
        }
        Ok(state)
    }

    pub fn stats(&self) -> SoftStats {
        self.lock().stats.clone()
    }

    /// Fail the draw issued after `completed` more successful draws.
    pub fn inject_draw_failure(&self, completed: usize) {
        let mut state = self.lock();
        state.fail_draw_at = Some(state.stats.draws.len() + completed);
    }

    /// Make fences stay unsignaled, so bounded waits time out.
    pub fn hold_fences(&self, hold: bool) {
        self.lock().hold_fences = hold;
    }

    pub fn fail_next_wait(&self) {
        self.lock().fail_next_wait = true;
    }

    /// Contents of a texture with allocated storage, as flat RGBA floats.
    pub fn storage_texels(&self, texture: TextureId) -> Option<Vec<f32>> {
        let state = self.lock();
        match &state.textures.get(&texture.0)?.backing {
            Backing::Storage(storage) => Some(bytemuck::cast_slice(&storage.texels).to_vec()),
            _ => None,
        }
    }

    pub fn live_textures(&self) -> usize {
        self.lock().textures.len()
    }

    pub fn live_images(&self) -> usize {
        self.lock().images.len()
    }

    pub fn live_programs(&self) -> usize {
        self.lock().programs.len()
    }

    pub fn live_fences(&self) -> usize {
        self.lock().fences.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn current_context(&self) -> Option<ContextKind> {
        self.lock().current
    }
}

impl SoftState {
    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, texture: TextureId) -> VblitResult<&SoftTexture> {
        self.textures.get(&texture.0).ok_or_else(|| {
            VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown texture {}", texture.0))
        })
    }

    fn bound(&self, texture: Option<u32>) -> Bound<'_> {
        let Some(texture) = texture.and_then(|id| self.textures.get(&id)) else {
            return Bound::Nothing;
        };
        match &texture.backing {
            Backing::Image(image) => self
                .images
                .get(image)
                .map(Bound::Image)
                .unwrap_or(Bound::Nothing),
            Backing::Storage(storage) => Bound::Storage(storage),
            Backing::Empty => Bound::Nothing,
        }
    }

    fn program_in_use(&self) -> VblitResult<&SoftProgram> {
        self.program_in_use
            .and_then(|id| self.programs.get(&id))
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "no program in use"))
    }

    fn attachment(&self) -> VblitResult<u32> {
        self.bound_framebuffer
            .and_then(|fb| self.framebuffers.get(&fb).copied().flatten())
            .ok_or_else(|| {
                VblitError::gpu(
                    gl_error::INVALID_FRAMEBUFFER_OPERATION,
                    "framebuffer has no color attachment",
                )
            })
    }

    fn uniforms<'a>(program: &'a SoftProgram) -> Uniforms<'a> {
        let values = program
            .values
            .iter()
            .filter_map(|(location, value)| {
                program
                    .uniforms
                    .get(*location as usize)
                    .map(|name| (name.as_str(), *value))
            })
            .collect();
        Uniforms::new(values)
    }

    fn sampler_unit(program: &SoftProgram, name: &str) -> Option<u32> {
        let location = program.uniforms.iter().position(|u| u == name)? as i32;
        // Samplers default to unit 0.
        Some(program.values.get(&location).map_or(0, |v| v.as_i32() as u32))
    }

    fn attrib(&self, program: &SoftProgram, name: &str) -> VblitResult<[f32; 8]> {
        let location = program
            .attributes
            .iter()
            .position(|a| a == name)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, format!("no attribute {name}")))?;
        self.attribs.get(&(location as u32)).copied().ok_or_else(|| {
            VblitError::gpu(gl_error::INVALID_OPERATION, format!("attribute {name} has no data"))
        })
    }

    fn draw(&mut self) -> VblitResult<()> {
        let program = self.program_in_use()?;
        let kind = program.kind;
        if kind.is_compute() {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "draw with a compute program"));
        }

        let quad = Quad {
            positions: self.attrib(program, "vPosition")?,
            texcoords: self.attrib(program, "inTexCoord")?,
            rotation: Self::uniforms(program).rotation(),
        };
        if !quad.is_rectangle() {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, "vertices are not a rectangle"));
        }

        let target_id = self.attachment()?;
        let uniforms = Self::uniforms(program);
        let samplers = Samplers {
            ext: self.bound(Self::sampler_unit(program, "extTex").and_then(|u| self.units.get(&u).copied())),
            stage: self.bound(Self::sampler_unit(program, "stageTex").and_then(|u| self.units.get(&u).copied())),
        };

        let memory = self.memory.clone();
        let mut buffers = memory.lock();
        let target_size = match self.bound(Some(target_id)) {
            Bound::Image(image) => (image.width, image.height),
            Bound::Storage(storage) => (storage.width, storage.height),
            Bound::Nothing => return Err(VblitError::gpu(gl_error::INVALID_FRAMEBUFFER_OPERATION, "attachment has no memory")),
        };

        let fragments = {
            let buffers = &*buffers;
            raster::rasterize(&quad, self.viewport, target_size, |t| {
                raster::shade(kind, &uniforms, &samplers, buffers, t)
            })
        };
        drop(uniforms);

        let blending = self.blending;
        let images = &self.images;
        let texture = self
            .textures
            .get_mut(&target_id)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "attachment was deleted"))?;
        match &mut texture.backing {
            Backing::Storage(storage) => {
                for (x, y, value) in fragments {
                    let value = if blending {
                        raster::blend(value, storage.fetch(x as i64, y as i64))
                    } else {
                        value
                    };
                    storage.store(x, y, value);
                }
            }
            Backing::Image(image) => {
                let image = images
                    .get(image)
                    .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "attachment image was destroyed"))?;
                for (x, y, value) in fragments {
                    let value = if blending {
                        raster::blend(value, texel::read_raw(&buffers, image, x, y))
                    } else {
                        value
                    };
                    texel::write_raw(&mut buffers, image, x, y, value);
                }
            }
            Backing::Empty => {}
        }

        self.stats.draws.push(kind);
        Ok(())
    }

    fn dispatch(&mut self, groups: (u32, u32)) -> VblitResult<()> {
        let program = self.program_in_use()?;
        if !program.kind.is_compute() {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "dispatch without a compute program"));
        }
        let uniforms = Self::uniforms(program);

        let input = Self::sampler_unit(program, "inTex").and_then(|u| self.units.get(&u).copied());
        let Bound::Storage(input) = self.bound(input) else {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "inTex is not a 2D texture"));
        };
        let (output, format) = self
            .image_units
            .get(&0)
            .copied()
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "no image bound at unit 0"))?;
        let Bound::Image(output) = self.bound(Some(output)) else {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "image unit 0 has no memory"));
        };

        let params = Repack {
            input,
            target_width: uniforms.int("targetWidth"),
            image_width: uniforms.int("imageWidth").max(1),
            num_pixels: uniforms.int("numPixels"),
            num_channels: uniforms.int("numChannels"),
        };
        let texels = raster::repack(&params, groups);

        let mut buffers = self.memory.lock();
        let width = params.image_width;
        for (id, value) in texels {
            let (x, y) = ((id % width) as u32, (id / width) as u32);
            texel::store_texel(&mut buffers, output, x, y, value, format);
        }
        drop(buffers);

        self.stats.dispatches += 1;
        Ok(())
    }
}

impl GpuDevice for SoftDevice {
    fn name(&self) -> &str {
        "vblit soft rasterizer"
    }

    fn has_extension(&self, name: &str) -> bool {
        self.lock().extensions.iter().any(|e| e == name)
    }

    fn make_current(&mut self, context: ContextKind) -> VblitResult<()> {
        let mut state = self.lock();
        if !state.open || state.closed {
            return Err(VblitError::Context("soft device is not open".into()));
        }
        state.current = Some(context);
        Ok(())
    }

    fn release_current(&mut self) -> VblitResult<()> {
        self.lock().current = None;
        Ok(())
    }

    fn create_image(&mut self, import: &ImageImport) -> VblitResult<ImageId> {
        let mut state = self.gl()?;

        let planes = texel::plane_count(import.fourcc)
            .filter(|_| !state.rejected_fourccs.contains(&import.fourcc))
            .ok_or_else(|| {
                VblitError::import(egl_error::BAD_MATCH, format!("unsupported fourcc {:#x}", import.fourcc))
            })?;
        if import.width == 0 || import.height == 0 {
            return Err(VblitError::import(egl_error::BAD_PARAMETER, "empty image"));
        }
        if import.planes.len() != planes {
            return Err(VblitError::import(
                egl_error::BAD_PARAMETER,
                format!("fourcc {:#x} needs {planes} planes, got {}", import.fourcc, import.planes.len()),
            ));
        }
        if import.modifier != 0 && import.modifier != vblit_core::format::fourcc::MOD_QCOM_COMPRESSED {
            return Err(VblitError::import(egl_error::BAD_MATCH, format!("modifier {:#x}", import.modifier)));
        }
        {
            let buffers = state.memory.lock();
            for plane in &import.planes {
                let Some(buffer) = buffers.get(&plane.fd) else {
                    return Err(VblitError::import(egl_error::BAD_PARAMETER, format!("unknown buffer {}", plane.fd)));
                };
                if plane.offset as usize >= buffer.len() {
                    return Err(VblitError::import(egl_error::BAD_ACCESS, format!("offset {} past buffer end", plane.offset)));
                }
            }
        }

        let id = state.next_id() as u64;
        state.images.insert(id, import.clone());
        state.stats.images_created += 1;
        Ok(ImageId(id))
    }

    fn destroy_image(&mut self, image: ImageId) -> VblitResult<()> {
        let mut state = self.gl()?;
        state
            .images
            .remove(&image.0)
            .map(|_| ())
            .ok_or_else(|| VblitError::gpu(egl_error::BAD_PARAMETER, format!("unknown image {}", image.0)))
    }

    fn create_texture(&mut self) -> VblitResult<TextureId> {
        let mut state = self.gl()?;
        let id = state.next_id();
        state.textures.insert(id, SoftTexture { backing: Backing::Empty });
        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) -> VblitResult<()> {
        let mut state = self.gl()?;
        state.texture(texture)?;
        state.textures.remove(&texture.0);
        state.units.retain(|_, t| *t != texture.0);
        state.image_units.retain(|_, (t, _)| *t != texture.0);
        for attachment in state.framebuffers.values_mut() {
            if *attachment == Some(texture.0) {
                *attachment = None;
            }
        }
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, _target: TextureTarget, texture: TextureId) -> VblitResult<()> {
        let mut state = self.gl()?;
        state.texture(texture)?;
        state.units.insert(unit, texture.0);
        Ok(())
    }

    fn attach_image(&mut self, texture: TextureId, target: TextureTarget, image: ImageId) -> VblitResult<()> {
        let mut state = self.gl()?;
        let fourcc = state
            .images
            .get(&image.0)
            .map(|i| i.fourcc)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown image {}", image.0)))?;
        if target == TextureTarget::Texture2D && texel::is_yuv(fourcc) {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "YUV images need the external target"));
        }
        let texture = state
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown texture {}", texture.0)))?;
        texture.backing = Backing::Image(image.0);
        Ok(())
    }

    fn allocate_storage(
        &mut self,
        texture: TextureId,
        format: GpuInternalFormat,
        width: u32,
        height: u32,
    ) -> VblitResult<()> {
        let mut state = self.gl()?;
        if width == 0 || height == 0 {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, "empty texture storage"));
        }
        let texture = state
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown texture {}", texture.0)))?;
        if !matches!(texture.backing, Backing::Empty) {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "texture storage is immutable"));
        }
        texture.backing = Backing::Storage(Storage::new(format, width, height));
        state.stats.storage_allocations += 1;
        Ok(())
    }

    fn create_program(&mut self, source: &ProgramSource) -> VblitResult<ProgramId> {
        let mut state = self.gl()?;

        for (stage, src) in source.stages() {
            if !src.contains("void main()") {
                return Err(VblitError::compile(stage, "missing entry point main()"));
            }
            if src.contains("GL_EXT_YUV_target") && !state.extensions.iter().any(|e| e == YUV_TARGET_EXTENSION) {
                return Err(VblitError::compile(stage, "extension GL_EXT_YUV_target is not supported"));
            }
        }
        let compute = source.compute.is_some();
        let graphics = source.vertex.is_some() && source.fragment.is_some();
        if compute == graphics || compute != source.kind.is_compute() {
            return Err(VblitError::ShaderLinkFailed {
                log: format!("{} program has an invalid set of stages", source.kind.name()),
            });
        }

        let id = state.next_id();
        state.programs.insert(
            id,
            SoftProgram {
                kind: source.kind,
                uniforms: source.uniform_names(),
                attributes: source.attribute_names(),
                values: HashMap::new(),
            },
        );
        debug!(kind = source.kind.name(), id, "Linked soft program");
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) -> VblitResult<()> {
        let mut state = self.gl()?;
        if state.programs.remove(&program.0).is_none() {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown program {}", program.0)));
        }
        if state.program_in_use == Some(program.0) {
            state.program_in_use = None;
        }
        Ok(())
    }

    fn use_program(&mut self, program: ProgramId) -> VblitResult<()> {
        let mut state = self.gl()?;
        if !state.programs.contains_key(&program.0) {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, format!("unknown program {}", program.0)));
        }
        state.program_in_use = Some(program.0);
        Ok(())
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<i32> {
        let state = self.lock();
        let program = state.programs.get(&program.0)?;
        program.uniforms.iter().position(|u| u == name).map(|p| p as i32)
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let state = self.lock();
        let program = state.programs.get(&program.0)?;
        program.attributes.iter().position(|a| a == name).map(|p| p as u32)
    }

    fn set_uniform(&mut self, location: i32, value: UniformValue) -> VblitResult<()> {
        let mut state = self.gl()?;
        let id = state
            .program_in_use
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "no program in use"))?;
        let program = state
            .programs
            .get_mut(&id)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "program was deleted"))?;
        if location < 0 || location as usize >= program.uniforms.len() {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, format!("bad uniform location {location}")));
        }
        program.values.insert(location, value);
        Ok(())
    }

    fn set_vertex_attrib(&mut self, location: u32, data: &[f32; 8]) -> VblitResult<()> {
        let mut state = self.gl()?;
        state.attribs.insert(location, *data);
        Ok(())
    }

    fn create_framebuffer(&mut self) -> VblitResult<FramebufferId> {
        let mut state = self.gl()?;
        let id = state.next_id();
        state.framebuffers.insert(id, None);
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) -> VblitResult<()> {
        let mut state = self.gl()?;
        if state.framebuffers.remove(&framebuffer.0).is_none() {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, "unknown framebuffer"));
        }
        if state.bound_framebuffer == Some(framebuffer.0) {
            state.bound_framebuffer = None;
        }
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> VblitResult<()> {
        let mut state = self.gl()?;
        if !state.framebuffers.contains_key(&framebuffer.0) {
            return Err(VblitError::gpu(gl_error::INVALID_OPERATION, "unknown framebuffer"));
        }
        state.bound_framebuffer = Some(framebuffer.0);
        Ok(())
    }

    fn attach_render_target(&mut self, _target: TextureTarget, texture: TextureId) -> VblitResult<()> {
        let mut state = self.gl()?;
        let renderable = match &state.texture(texture)?.backing {
            Backing::Image(image) => state.images.get(image).is_some_and(|i| texel::is_supported(i.fourcc)),
            Backing::Storage(_) => true,
            Backing::Empty => false,
        };
        if !renderable {
            return Err(VblitError::gpu(
                gl_error::INVALID_FRAMEBUFFER_OPERATION,
                format!("texture {} is not renderable", texture.0),
            ));
        }
        let fb = state
            .bound_framebuffer
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "no framebuffer bound"))?;
        state.framebuffers.insert(fb, Some(texture.0));
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> VblitResult<()> {
        let mut state = self.gl()?;
        let target = state.attachment()?;
        let memory = state.memory.clone();
        let state = &mut *state;
        let texture = state
            .textures
            .get_mut(&target)
            .ok_or_else(|| VblitError::gpu(gl_error::INVALID_OPERATION, "attachment was deleted"))?;
        match &mut texture.backing {
            Backing::Storage(storage) => storage.fill(color),
            Backing::Image(image) => {
                if let Some(image) = state.images.get(image) {
                    let mut buffers = memory.lock();
                    for y in 0..image.height {
                        for x in 0..image.width {
                            texel::write_raw(&mut buffers, image, x, y, color);
                        }
                    }
                }
            }
            Backing::Empty => {}
        }
        state.stats.clears += 1;
        Ok(())
    }

    fn set_viewport(&mut self, region: Region) -> VblitResult<()> {
        let mut state = self.gl()?;
        if region.w < 0 || region.h < 0 {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, "negative viewport size"));
        }
        state.viewport = region;
        Ok(())
    }

    fn set_blending(&mut self, enabled: bool) -> VblitResult<()> {
        self.gl()?.blending = enabled;
        Ok(())
    }

    fn draw_triangle_strip(&mut self, vertices: u32) -> VblitResult<()> {
        let mut state = self.gl()?;
        if vertices != 4 {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, "only quads are supported"));
        }
        if state.fail_draw_at == Some(state.stats.draws.len()) {
            state.fail_draw_at = None;
            return Err(VblitError::gpu(gl_error::OUT_OF_MEMORY, "draw failed"));
        }
        state.draw()
    }

    fn bind_image_unit(&mut self, unit: u32, texture: TextureId, format: GpuInternalFormat) -> VblitResult<()> {
        let mut state = self.gl()?;
        state.texture(texture)?;
        state.image_units.insert(unit, (texture.0, format));
        Ok(())
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> VblitResult<()> {
        let mut state = self.gl()?;
        if x == 0 || y == 0 || z != 1 {
            return Err(VblitError::gpu(gl_error::INVALID_VALUE, format!("work groups {x}x{y}x{z}")));
        }
        state.dispatch((x, y))
    }

    fn finish(&mut self) -> VblitResult<()> {
        self.gl()?.stats.finishes += 1;
        Ok(())
    }

    fn fence_sync(&mut self) -> VblitResult<Fence> {
        let mut state = self.gl()?;
        let id = state.next_fence;
        state.next_fence += 1;
        state.fences.insert(id);
        state.stats.fences_created += 1;
        Ok(Fence::from_raw(id))
    }

    fn client_wait_sync(&mut self, fence: Fence, timeout: Option<Duration>) -> VblitResult<WaitStatus> {
        let mut state = self.gl()?;
        if std::mem::take(&mut state.fail_next_wait) {
            return Err(VblitError::FenceWaitFailed(format!("wait on {fence} failed")));
        }
        if !state.fences.contains(&fence.as_raw()) {
            return Ok(WaitStatus::AlreadySignaled);
        }
        if state.hold_fences && timeout.is_some() {
            return Ok(WaitStatus::TimeoutExpired);
        }
        Ok(WaitStatus::ConditionSatisfied)
    }

    fn delete_sync(&mut self, fence: Fence) -> VblitResult<()> {
        self.gl()?.fences.remove(&fence.as_raw());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.closed = true;
        state.open = false;
        state.current = None;
        state.images.clear();
        state.textures.clear();
        state.programs.clear();
        state.framebuffers.clear();
        state.fences.clear();
        state.units.clear();
        state.image_units.clear();
        state.bound_framebuffer = None;
        state.program_in_use = None;
    }
}
