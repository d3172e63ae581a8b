//! The composition engine.
//!
//! One engine owns the imported surfaces, the program catalog and the stage
//! textures of a [`GraphicsContext`]. Every public call takes the engine
//! mutex first and then binds a context on the shared device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, info_span, warn};
use vblit_core::format::{self, YuvPacking};
use vblit_core::{
    Color, Composition, FlipMask, Fence, Object, Region, Surface, SurfaceFlags, SurfaceId,
    VblitError, VblitResult, WaitStatus,
};

use crate::context::{Capabilities, GraphicsContext};
use crate::device::{ContextKind, FramebufferId, GpuDevice, TextureTarget};
use crate::importer::{import_surface, GraphicResource, ImportLayout, ImportedSurface};
use crate::renderability::{decide, object_needs_blending, RenderPath};
use crate::shaders::{
    color_space_index, ProgramSet, ShaderKind, ShaderProgram, PIXELS_PER_INVOCATION,
    REPACK_GROUP_SIZE,
};
use crate::stage_cache::{StageTexture, StageTextureCache};

/// Triangle strip corners (top left, bottom left, top right, bottom right)
/// indexed by flip mask bits.
const VERTICES: [[f32; 8]; 4] = [
    [-1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0, -1.0],
    [1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0, -1.0],
    [-1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0],
    [1.0, -1.0, 1.0, 1.0, -1.0, -1.0, -1.0, 1.0],
];

const FULL_TEXTURE: [f32; 8] = [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0];

const MAX_WORK_GROUPS: u32 = 65535;

const SOURCE_UNIT: u32 = 0;
const STAGE_UNIT: u32 = 1;

fn vertices(mask: FlipMask) -> &'static [f32; 8] {
    &VERTICES[(mask & (FlipMask::HFLIP | FlipMask::VFLIP)).bits() as usize]
}

/// Texture coordinates of a source crop. An empty crop is the whole texture.
pub fn texcoords(crop: Region, width: u32, height: u32) -> [f32; 8] {
    if crop.is_empty() || width == 0 || height == 0 {
        return FULL_TEXTURE;
    }
    let (w, h) = (width as f32, height as f32);
    let left = crop.x as f32 / w;
    let right = (crop.x + crop.w) as f32 / w;
    let top = crop.y as f32 / h;
    let bottom = (crop.y + crop.h) as f32 / h;
    bytemuck::cast::<[[f32; 2]; 4], [f32; 8]>([
        [left, bottom],
        [left, top],
        [right, bottom],
        [right, top],
    ])
}

/// Apply the channel order of an RGB destination to an RGBA color.
pub fn swizzle(color: [f32; 4], inverted: bool, swapped: bool) -> [f32; 4] {
    let [r, g, b, a] = color;
    match (inverted, swapped) {
        (true, true) => [a, b, g, r],
        (true, false) => [a, r, g, b],
        (false, true) => [b, g, r, a],
        (false, false) => color,
    }
}

/// Pixel count of a stage as the repack program addresses it.
pub fn pixel_count(width: u32, height: u32) -> VblitResult<i32> {
    width
        .checked_mul(height)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| {
            VblitError::InvalidArgument(format!("stage of {width}x{height} pixels is too large to repack"))
        })
}

/// Work groups of a repack over `pixels` stage pixels, spread over y when
/// x would exceed the dispatch limit.
pub fn repack_groups(pixels: u64) -> (u32, u32) {
    let per_group = (REPACK_GROUP_SIZE * PIXELS_PER_INVOCATION) as u64;
    let groups = pixels.div_ceil(per_group).max(1);
    if groups <= MAX_WORK_GROUPS as u64 {
        return (groups as u32, 1);
    }
    let rows = groups.div_ceil(MAX_WORK_GROUPS as u64);
    (MAX_WORK_GROUPS, rows as u32)
}

struct EngineState {
    surfaces: HashMap<SurfaceId, ImportedSurface>,
    stage_cache: StageTextureCache,
    programs: ProgramSet,
    framebuffer: FramebufferId,
}

/// Which pixels a draw reads and how it lands in the render target.
struct Draw<'a> {
    source: &'a GraphicResource,
    object: Object,
    /// Copy the destination into the stage without conversion.
    passthrough: bool,
}

/// GPU image compositor.
pub struct Engine {
    context: Arc<GraphicsContext>,
    state: Mutex<EngineState>,
}

impl Engine {
    /// Build the program catalog and the framebuffer on `context`.
    pub fn new(context: Arc<GraphicsContext>) -> VblitResult<Self> {
        let caps = context.capabilities();

        let state = {
            let mut ctx = context.make_current(ContextKind::Primary)?;
            let framebuffer = ctx.create_framebuffer()?;
            let programs = match ProgramSet::build(&mut *ctx, caps.yuv_target) {
                Ok(programs) => programs,
                Err(err) => {
                    if let Err(cleanup) = ctx.delete_framebuffer(framebuffer) {
                        warn!("Failed to delete framebuffer: {}", cleanup);
                    }
                    return Err(err);
                }
            };
            ctx.release()?;

            info!(
                "Created engine on {} with {} programs",
                context.driver_name(),
                programs.len()
            );
            EngineState {
                surfaces: HashMap::new(),
                stage_cache: StageTextureCache::new(),
                programs,
                framebuffer,
            }
        };

        Ok(Self {
            context,
            state: Mutex::new(state),
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.context.capabilities()
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }

    fn lock(&self) -> VblitResult<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| VblitError::Context("engine mutex poisoned".into()))
    }

    /// Import `surface` for the roles in `flags`. Registering a surface
    /// whose id is already known returns that id without importing again.
    ///
    /// Outputs drawn through a stage also get an import of their native
    /// layout so that compositions without a clear can start from the
    /// current contents. When the driver rejects that import the surface
    /// still registers, but composing into it requires a background.
    pub fn register_surface(&self, surface: &Surface, flags: SurfaceFlags) -> VblitResult<SurfaceId> {
        let id = surface.id();
        let mut state = self.lock()?;
        if state.surfaces.contains_key(&id) {
            debug!("Surface {} is already registered", id);
            return Ok(id);
        }

        let caps = self.context.capabilities();
        let mut ctx = self.context.make_current(ContextKind::Primary)?;
        let imported = import_surface(&mut *ctx, surface, flags, &caps)?;
        ctx.release()?;

        state.surfaces.insert(id, imported);
        Ok(id)
    }

    /// Destroy every resource of a registered surface.
    pub fn deregister_surface(&self, id: SurfaceId) -> VblitResult<()> {
        let mut state = self.lock()?;
        let imported = state
            .surfaces
            .remove(&id)
            .ok_or(VblitError::SurfaceNotFound(id.0))?;

        let mut ctx = self.context.make_current(ContextKind::Primary)?;
        imported.release(&mut *ctx)?;
        ctx.release()?;
        debug!("Deregistered surface {}", id);
        Ok(())
    }

    pub fn is_registered(&self, id: SurfaceId) -> bool {
        self.lock().is_ok_and(|state| state.surfaces.contains_key(&id))
    }

    /// Layout a registered surface was imported with.
    pub fn import_layout(&self, id: SurfaceId) -> VblitResult<ImportLayout> {
        let state = self.lock()?;
        state
            .surfaces
            .get(&id)
            .map(|s| s.layout)
            .ok_or(VblitError::SurfaceNotFound(id.0))
    }

    /// The path `composition` would take if it were composed now.
    pub fn decide_renderability(&self, composition: &Composition) -> VblitResult<RenderPath> {
        let state = self.lock()?;
        state.path_for(composition, &self.context.capabilities())
    }

    /// Every stage texture allocated so far.
    pub fn stage_textures(&self) -> Vec<StageTexture> {
        self.lock()
            .map(|state| state.stage_cache.entries())
            .unwrap_or_default()
    }

    /// Render a batch of compositions in order.
    ///
    /// A synchronous call returns once the GPU is done, with the null fence.
    /// Otherwise the returned fence signals completion and must be passed to
    /// [`Engine::finish`]. On error nothing after the failing draw is
    /// issued and no fence is created.
    pub fn compose(&self, compositions: &[Composition], synchronous: bool) -> VblitResult<Fence> {
        let span = info_span!("compose", batch = compositions.len());
        let _enter = span.enter();

        let mut guard = self.lock()?;
        let state = &mut *guard;
        let caps = self.context.capabilities();

        let mut ctx = self.context.make_current(ContextKind::Primary)?;
        let fence = {
            let device: &mut dyn GpuDevice = &mut *ctx;
            device.bind_framebuffer(state.framebuffer)?;
            for composition in compositions {
                state.compose_one(device, composition, &caps)?;
            }

            if synchronous {
                device.finish()?;
                Fence::NULL
            } else {
                device.fence_sync()?
            }
        };
        ctx.release()?;

        debug!(synchronous, %fence, "Submitted {} composition(s)", compositions.len());
        Ok(fence)
    }

    /// Wait for a fence returned by [`Engine::compose`] and delete it.
    pub fn finish(&self, fence: Fence) -> VblitResult<()> {
        if fence.is_null() {
            return Ok(());
        }

        let _state = self.lock()?;
        let timeout = self.context.config().sync.fence_timeout();
        let mut ctx = self.context.make_current(ContextKind::Auxiliary)?;

        if ctx.client_wait_sync(fence, timeout)? == WaitStatus::TimeoutExpired {
            return Err(VblitError::FenceWaitFailed(format!(
                "{fence} not signaled within {timeout:?}"
            )));
        }
        ctx.delete_sync(fence)?;
        ctx.release()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut ctx = match self.context.make_current(ContextKind::Primary) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!("Engine teardown without a context, GPU resources leak: {}", err);
                return;
            }
        };

        let surfaces = state.surfaces.len();
        for (id, imported) in state.surfaces.drain() {
            if let Err(err) = imported.release(&mut *ctx) {
                warn!("Failed to release surface {}: {}", id, err);
            }
        }
        state.stage_cache.clear(&mut *ctx);
        state.programs.destroy(&mut *ctx);
        if let Err(err) = ctx.delete_framebuffer(state.framebuffer) {
            warn!("Failed to delete framebuffer: {}", err);
        }
        drop(ctx);

        info!("Destroyed engine, released {} surface(s)", surfaces);
    }
}

impl EngineState {
    fn surface(&self, id: SurfaceId) -> VblitResult<&ImportedSurface> {
        self.surfaces.get(&id).ok_or(VblitError::SurfaceNotFound(id.0))
    }

    fn destination(&self, composition: &Composition) -> VblitResult<&ImportedSurface> {
        let destination = self.surface(composition.destination)?;
        if !destination.flags.contains(SurfaceFlags::OUTPUT) {
            return Err(VblitError::InvalidArgument(format!(
                "surface {} was not registered as an output",
                composition.destination
            )));
        }
        Ok(destination)
    }

    fn readable(&self, id: SurfaceId) -> VblitResult<&GraphicResource> {
        self.surface(id)?.source().ok_or_else(|| {
            VblitError::InvalidArgument(format!("surface {id} cannot be sampled"))
        })
    }

    fn path_for(&self, composition: &Composition, caps: &Capabilities) -> VblitResult<RenderPath> {
        let destination = self.destination(composition)?;
        let mut blending = false;
        for object in &composition.objects {
            let source = self.surface(object.source_id)?;
            blending |= object_needs_blending(object.alpha, source.surface.format);
        }
        Ok(decide(&destination.surface, blending, caps))
    }

    fn compose_one(
        &mut self,
        device: &mut dyn GpuDevice,
        composition: &Composition,
        caps: &Capabilities,
    ) -> VblitResult<()> {
        let path = self.path_for(composition, caps)?;
        debug!(
            "Composing {} object(s) into {} via {:?}",
            composition.objects.len(),
            composition.destination,
            path
        );

        let stage = match path {
            RenderPath::Staged {
                width,
                height,
                format,
            } => Some(self.stage_cache.acquire(device, width, height, format)?),
            _ => None,
        };
        let destination = self.destination(composition)?;
        let code = destination.surface.format;

        let mut draws = Vec::with_capacity(composition.objects.len() + 1);
        if !composition.clear && stage.is_some() {
            let source = destination.source().ok_or_else(|| {
                VblitError::InvalidArgument(format!(
                    "surface {} cannot be read back, compose it with a background",
                    composition.destination
                ))
            })?;
            let full = Region::sized(destination.surface.width as i32, destination.surface.height as i32);
            draws.push(Draw {
                source,
                object: Object::new(composition.destination, full),
                passthrough: true,
            });
        }
        for object in &composition.objects {
            draws.push(Draw {
                source: self.readable(object.source_id)?,
                object: object.clone(),
                passthrough: false,
            });
        }

        // Render target and clear.
        match stage {
            Some(stage) => device.attach_render_target(TextureTarget::Texture2D, stage.texture)?,
            None => {
                let target = primary_target(destination)?;
                device.attach_render_target(target.target, target.texture)?;
            }
        }
        if composition.clear || stage.is_some() {
            device.clear(clear_color(
                composition.background,
                code,
                path == RenderPath::DirectYuv,
            ))?;
        }

        // Objects.
        let direct_yuv = path == RenderPath::DirectYuv;
        let program = if direct_yuv {
            self.programs.require(ShaderKind::Yuv)?
        } else {
            self.programs.require(ShaderKind::Rgb)?
        };
        program.activate(device)?;
        program.set_int(device, "extTex", SOURCE_UNIT as i32)?;
        if direct_yuv {
            program.set_bool(device, "stageInput", false)?;
            program.set_int(device, "colorSpace", color_space_index(format::color_space(code)))?;
        }

        for draw in &draws {
            if !direct_yuv {
                set_rgb_conversion(device, program, composition, code, draw.passthrough)?;
            }
            device.set_blending(!direct_yuv && !draw.passthrough)?;
            draw_object(device, program, draw)?;
        }

        // Conversion into the destination.
        if let Some(stage) = stage {
            if format::is_rgb(code) {
                self.repack(device, destination, &stage)?;
            } else {
                self.convert_yuv(device, destination, &stage)?;
            }
        }
        Ok(())
    }

    /// Write the stage into the reshaped view of an RGB destination.
    fn repack(
        &self,
        device: &mut dyn GpuDevice,
        destination: &ImportedSurface,
        stage: &StageTexture,
    ) -> VblitResult<()> {
        if destination.layout != ImportLayout::Reshaped {
            return Err(VblitError::InvalidArgument(format!(
                "surface {} has no repack view",
                destination.surface.id()
            )));
        }
        let view = primary_target(destination)?;
        let code = destination.surface.format;
        let program = self.programs.require(ShaderKind::repack_for(code))?;

        program.activate(device)?;
        device.bind_texture(STAGE_UNIT, TextureTarget::Texture2D, stage.texture)?;
        program.set_int(device, "inTex", STAGE_UNIT as i32)?;
        program.set_int(device, "targetWidth", stage.width as i32)?;
        program.set_int(device, "imageWidth", view.width as i32)?;
        program.set_int(device, "numPixels", pixel_count(stage.width, stage.height)?)?;
        program.set_int(device, "numChannels", format::num_channels(code) as i32)?;
        device.bind_image_unit(0, view.texture, format::to_gpu_internal_format(view.format))?;

        let (x, y) = repack_groups(stage.width as u64 * stage.height as u64);
        debug!(groups_x = x, groups_y = y, kind = program.kind().name(), "Repacking stage");
        device.dispatch_compute(x, y, 1)
    }

    /// Convert the RGB stage into a YUV destination.
    fn convert_yuv(
        &self,
        device: &mut dyn GpuDevice,
        destination: &ImportedSurface,
        stage: &StageTexture,
    ) -> VblitResult<()> {
        let code = destination.surface.format;
        let color_space = color_space_index(format::color_space(code));
        device.set_blending(false)?;
        device.bind_texture(STAGE_UNIT, TextureTarget::Texture2D, stage.texture)?;

        if let Some(program) = self.programs.get(ShaderKind::Yuv) {
            let target = primary_target(destination)?;
            device.attach_render_target(target.target, target.texture)?;
            program.activate(device)?;
            program.set_int(device, "extTex", SOURCE_UNIT as i32)?;
            program.set_int(device, "stageTex", STAGE_UNIT as i32)?;
            program.set_bool(device, "stageInput", true)?;
            program.set_int(device, "colorSpace", color_space)?;
            program.set_float(device, "globalAlpha", 1.0)?;
            return plane_pass(device, program, target);
        }

        if destination.layout != ImportLayout::Split {
            return Err(VblitError::InvalidArgument(format!(
                "surface {} has no per-plane views",
                destination.surface.id()
            )));
        }
        let layout = format::describe(code)?
            .format
            .yuv_layout()
            .ok_or(VblitError::UnsupportedFormat(code))?;
        let targets = destination.targets();

        let luma = self.programs.require(ShaderKind::Luma)?;
        luma.activate(device)?;
        luma.set_int(device, "stageTex", STAGE_UNIT as i32)?;
        luma.set_int(device, "colorSpace", color_space)?;
        if luma.has_variable("globalAlpha") {
            luma.set_float(device, "globalAlpha", 1.0)?;
        }
        plane_pass(device, luma, primary_target(destination)?)?;

        let chroma = self.programs.require(ShaderKind::Chroma)?;
        chroma.activate(device)?;
        chroma.set_int(device, "stageTex", STAGE_UNIT as i32)?;
        chroma.set_int(device, "colorSpace", color_space)?;
        match layout.packing {
            YuvPacking::SemiPlanar => {
                let plane = plane_target(targets, 1)?;
                chroma.set_bool(device, "rbSwapped", format::is_swapped(plane.format))?;
                chroma.set_int(device, "chromaSelect", 0)?;
                plane_pass(device, chroma, plane)?;
            }
            YuvPacking::Planar => {
                chroma.set_bool(device, "rbSwapped", false)?;
                // 1 selects U, 2 selects V.
                let order = if layout.v_first { [2, 1] } else { [1, 2] };
                for (idx, select) in [1, 2].into_iter().zip(order) {
                    chroma.set_int(device, "chromaSelect", select)?;
                    plane_pass(device, chroma, plane_target(targets, idx)?)?;
                }
            }
            YuvPacking::Packed { .. } => return Err(VblitError::UnsupportedFormat(code)),
        }
        Ok(())
    }
}

fn primary_target(surface: &ImportedSurface) -> VblitResult<&GraphicResource> {
    plane_target(surface.targets(), 0)
}

fn plane_target(targets: &[GraphicResource], idx: usize) -> VblitResult<&GraphicResource> {
    targets.get(idx).ok_or_else(|| {
        VblitError::InvalidArgument(format!("surface has no render target for plane {idx}"))
    })
}

fn set_rgb_conversion(
    device: &mut dyn GpuDevice,
    program: &ShaderProgram,
    composition: &Composition,
    code: u32,
    passthrough: bool,
) -> VblitResult<()> {
    let (mut scale, mut offset) = ([1.0f32; 4], [0.0f32; 4]);
    if !passthrough {
        let signed = format::is_signed(code);
        for (c, n) in composition.channel_normalization().iter().enumerate() {
            scale[c] = if signed { n.scale * 2.0 } else { n.scale };
            offset[c] = n.offset / 255.0;
        }
    }
    program.set_vec4(device, "rgbaScale", scale)?;
    program.set_vec4(device, "rgbaOffset", offset)?;
    program.set_bool(device, "rgbaInverted", !passthrough && format::is_inverted(code))?;
    program.set_bool(device, "rbSwapped", !passthrough && format::is_swapped(code))
}

fn draw_object(device: &mut dyn GpuDevice, program: &ShaderProgram, draw: &Draw<'_>) -> VblitResult<()> {
    let object = &draw.object;
    device.bind_texture(SOURCE_UNIT, draw.source.target, draw.source.texture)?;
    if program.has_variable("globalAlpha") {
        program.set_float(device, "globalAlpha", object.alpha as f32 / 255.0)?;
    }
    program.set_float(device, "rotationAngle", object.rotation.to_radians())?;
    program.set_attribute(device, "vPosition", vertices(object.mask))?;
    program.set_attribute(
        device,
        "inTexCoord",
        &texcoords(object.source, draw.source.width, draw.source.height),
    )?;
    device.set_viewport(object.destination)?;
    device.draw_triangle_strip(4)
}

/// Draw the whole stage into one full-size plane.
fn plane_pass(device: &mut dyn GpuDevice, program: &ShaderProgram, target: &GraphicResource) -> VblitResult<()> {
    device.attach_render_target(target.target, target.texture)?;
    program.set_float(device, "rotationAngle", 0.0)?;
    program.set_attribute(device, "vPosition", vertices(FlipMask::empty()))?;
    program.set_attribute(device, "inTexCoord", &FULL_TEXTURE)?;
    device.set_viewport(Region::sized(target.width as i32, target.height as i32))?;
    device.draw_triangle_strip(4)
}

/// Background of a composition as the reference device stores it.
pub fn clear_color(background: Color, destination_format: u32, direct_yuv: bool) -> [f32; 4] {
    if direct_yuv {
        return background
            .to_yuv(format::color_space(destination_format))
            .to_normalized();
    }
    swizzle(
        background.to_normalized(),
        format::is_inverted(destination_format),
        format::is_swapped(destination_format),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vblit_core::ColorFormat;

    #[test]
    fn test_flip_vertices() {
        assert_eq!(vertices(FlipMask::empty())[..2], [-1.0, 1.0]);
        assert_eq!(vertices(FlipMask::HFLIP)[..2], [1.0, 1.0]);
        assert_eq!(vertices(FlipMask::VFLIP)[..2], [-1.0, -1.0]);
        assert_eq!(vertices(FlipMask::HFLIP | FlipMask::VFLIP)[..2], [1.0, -1.0]);
    }

    #[test]
    fn test_texcoords_of_crop() {
        assert_eq!(texcoords(Region::default(), 64, 64), FULL_TEXTURE);
        let t = texcoords(Region::new(16, 0, 32, 32), 64, 64);
        assert_eq!(t, [0.25, 0.5, 0.25, 0.0, 0.75, 0.5, 0.75, 0.0]);
    }

    #[test]
    fn test_swizzle_matches_fragment_stage() {
        let c = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(swizzle(c, false, false), c);
        assert_eq!(swizzle(c, false, true), [0.3, 0.2, 0.1, 0.4]);
        assert_eq!(swizzle(c, true, false), [0.4, 0.1, 0.2, 0.3]);
        assert_eq!(swizzle(c, true, true), [0.4, 0.3, 0.2, 0.1]);
    }

    #[test]
    fn test_repack_groups() {
        assert_eq!(repack_groups(1), (1, 1));
        assert_eq!(repack_groups(128), (1, 1));
        assert_eq!(repack_groups(129), (2, 1));
        assert_eq!(repack_groups(128 * 65535), (65535, 1));
        assert_eq!(repack_groups(128 * 65536), (65535, 2));
    }

    #[test]
    fn test_pixel_count_fits_an_int() {
        assert_eq!(pixel_count(100, 50).unwrap(), 5000);
        assert_eq!(pixel_count(46340, 46340).unwrap(), 46340 * 46340);
        assert!(matches!(pixel_count(65536, 32768), Err(VblitError::InvalidArgument(_))));
        assert!(matches!(pixel_count(u32::MAX, 2), Err(VblitError::InvalidArgument(_))));
    }

    #[test]
    fn test_clear_color_of_yuv_target() {
        let rgb = clear_color(Color::RED, ColorFormat::Bgra8888.code(), false);
        assert_eq!(rgb, [0.0, 0.0, 1.0, 1.0]);
        let yuv = clear_color(Color::BLACK, ColorFormat::Nv12.code(), true);
        assert_eq!(yuv[3], 1.0);
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
