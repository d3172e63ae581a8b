//! Zero-copy import of caller surfaces.
//!
//! Most surfaces become one external image. Two kinds of outputs cannot be
//! written as they are laid out and get replacement views instead:
//!
//! * RGB outputs that are not renderable are viewed as one dense 4-channel
//!   image over the same memory, which the compute repack writes into.
//! * YUV outputs on drivers without YUV render targets are split into one
//!   single-channel or two-channel image per plane.
//!
//! Both also keep an external import of the real layout, when the driver
//! accepts one, so that they can be read back for in-place blending.

use tracing::{debug, warn};
use vblit_core::format::{self, ColorFormat, YuvPacking};
use vblit_core::{Plane, Surface, SurfaceFlags, VblitError, VblitResult};

use crate::context::Capabilities;
use crate::device::{GpuDevice, ImageId, ImageImport, PlaneImport, TextureId, TextureTarget};
use crate::renderability::{is_rgb_renderable, reshaped_format};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportLayout {
    /// Imported as laid out.
    Native,
    /// A 4-channel view of an RGB output.
    Reshaped,
    /// One image per plane of a YUV output.
    Split,
}

/// A texture bound to imported memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicResource {
    pub texture: TextureId,
    pub image: ImageId,
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub format: u32,
}

/// Every GPU resource of one registered surface.
#[derive(Debug)]
pub struct ImportedSurface {
    pub surface: Surface,
    pub flags: SurfaceFlags,
    pub layout: ImportLayout,
    resources: Vec<GraphicResource>,
    targets: usize,
    source: Option<usize>,
}

impl ImportedSurface {
    pub fn resources(&self) -> &[GraphicResource] {
        &self.resources
    }

    /// Images written when the surface is a destination.
    pub fn targets(&self) -> &[GraphicResource] {
        &self.resources[..self.targets]
    }

    /// Image sampled when the surface is read.
    pub fn source(&self) -> Option<&GraphicResource> {
        self.source.map(|idx| &self.resources[idx])
    }

    /// Destroy every texture and image. All resources are released even if
    /// one fails; the first error is returned.
    pub fn release(self, device: &mut dyn GpuDevice) -> VblitResult<()> {
        let mut result = Ok(());
        for resource in &self.resources {
            let deleted = device
                .delete_texture(resource.texture)
                .and(device.destroy_image(resource.image));
            if result.is_ok() {
                result = deleted;
            }
        }
        result
    }
}

/// Reinterpret a non-renderable RGB output as a dense 4-channel image with
/// an aligned row pitch.
pub fn reshape(surface: &Surface, alignment: u32) -> VblitResult<Surface> {
    let bpc = format::bytes_per_channel(surface.format);
    if bpc == 0 {
        return Err(VblitError::UnsupportedFormat(surface.format));
    }
    let texel = 4 * bpc;

    let stride = surface.stride().next_multiple_of(alignment.max(1));
    let width = stride / texel;
    let offset = surface.offset() as u64;
    if surface.size <= offset || width == 0 {
        return Err(VblitError::InvalidArgument(format!(
            "surface of {} bytes cannot hold data at offset {}",
            surface.size, offset
        )));
    }
    let height = ((surface.size - offset) / texel as u64).div_ceil(width as u64);

    Ok(Surface {
        format: reshaped_format(surface.format),
        width,
        height: height as u32,
        size: surface.size,
        planes: vec![Plane::new(surface.fd(), surface.offset(), stride)],
    })
}

/// Split a YUV output into per-plane images: `Gray8` luma, then a
/// two-channel chroma plane or two `Gray8` chroma planes.
pub fn split_yuv(surface: &Surface) -> VblitResult<Vec<Surface>> {
    let desc = format::describe(surface.format)?;
    let layout = desc
        .format
        .yuv_layout()
        .ok_or(VblitError::UnsupportedFormat(surface.format))?;

    if let YuvPacking::Packed { .. } = layout.packing {
        return Err(VblitError::UnsupportedFormat(surface.format));
    }
    if surface.num_planes() != layout.num_planes() {
        return Err(VblitError::InvalidArgument(format!(
            "{:?} needs {} planes, got {}",
            desc.format,
            layout.num_planes(),
            surface.num_planes()
        )));
    }

    let (cw, ch) = layout.chroma_size(surface.width, surface.height);
    let plane = |format: ColorFormat, width, height, idx: usize| Surface {
        format: format.code(),
        width,
        height,
        size: surface.size,
        planes: vec![surface.planes[idx]],
    };

    let mut planes = vec![plane(ColorFormat::Gray8, surface.width, surface.height, 0)];
    match layout.packing {
        YuvPacking::SemiPlanar => {
            let chroma = if layout.v_first {
                ColorFormat::Gr88
            } else {
                ColorFormat::Rg88
            };
            planes.push(plane(chroma, cw, ch, 1));
        }
        _ => {
            planes.push(plane(ColorFormat::Gray8, cw, ch, 1));
            planes.push(plane(ColorFormat::Gray8, cw, ch, 2));
        }
    }
    Ok(planes)
}

/// The import request of a surface as it is laid out.
pub fn image_import(surface: &Surface) -> VblitResult<ImageImport> {
    let (fourcc, modifier) = format::to_native(surface.format)?;
    Ok(ImageImport {
        width: surface.width,
        height: surface.height,
        fourcc,
        modifier,
        planes: surface
            .planes
            .iter()
            .map(|p| PlaneImport {
                fd: p.fd,
                offset: p.offset,
                pitch: p.stride,
            })
            .collect(),
    })
}

fn destroy_image(device: &mut dyn GpuDevice, image: ImageId) {
    if let Err(err) = device.destroy_image(image) {
        warn!("Failed to destroy image {:?}: {}", image, err);
    }
}

/// Import one image and bind it to a new texture.
pub fn import_image(
    device: &mut dyn GpuDevice,
    surface: &Surface,
    target: TextureTarget,
) -> VblitResult<GraphicResource> {
    let request = image_import(surface)?;
    let image = device.create_image(&request)?;

    let texture = match device.create_texture() {
        Ok(texture) => texture,
        Err(err) => {
            destroy_image(device, image);
            return Err(err);
        }
    };
    if let Err(err) = device.attach_image(texture, target, image) {
        if let Err(cleanup) = device.delete_texture(texture) {
            warn!("Failed to delete texture {:?}: {}", texture, cleanup);
        }
        destroy_image(device, image);
        return Err(err);
    }

    Ok(GraphicResource {
        texture,
        image,
        target,
        width: surface.width,
        height: surface.height,
        format: surface.format,
    })
}

/// Import every image a surface needs for its role.
pub fn import_surface(
    device: &mut dyn GpuDevice,
    surface: &Surface,
    flags: SurfaceFlags,
    caps: &Capabilities,
) -> VblitResult<ImportedSurface> {
    surface.validate()?;

    let output = flags.contains(SurfaceFlags::OUTPUT);
    let (layout, views) = if !output {
        (ImportLayout::Native, Vec::new())
    } else if format::is_rgb(surface.format) {
        if is_rgb_renderable(surface, caps.alignment) {
            (ImportLayout::Native, Vec::new())
        } else {
            (ImportLayout::Reshaped, vec![reshape(surface, caps.alignment)?])
        }
    } else if caps.yuv_target {
        (ImportLayout::Native, Vec::new())
    } else {
        (ImportLayout::Split, split_yuv(surface)?)
    };

    let mut imported = ImportedSurface {
        surface: surface.clone(),
        flags,
        layout,
        resources: Vec::new(),
        targets: 0,
        source: None,
    };

    if layout == ImportLayout::Native {
        // Direct RGB outputs that are never sampled can use plain 2D textures.
        let write_only = output
            && !flags.contains(SurfaceFlags::INPUT)
            && is_rgb_renderable(surface, caps.alignment);
        let target = if write_only {
            TextureTarget::Texture2D
        } else {
            TextureTarget::External
        };
        let resource = import_image(device, surface, target)?;
        imported.resources.push(resource);
        imported.targets = 1;
        if target == TextureTarget::External {
            imported.source = Some(0);
        }
    } else {
        for view in &views {
            match import_image(device, view, TextureTarget::Texture2D) {
                Ok(resource) => imported.resources.push(resource),
                Err(err) => {
                    if let Err(cleanup) = imported.release(device) {
                        warn!("Failed to release partial import: {}", cleanup);
                    }
                    return Err(err);
                }
            }
        }
        imported.targets = imported.resources.len();

        match import_image(device, surface, TextureTarget::External) {
            Ok(resource) => {
                imported.resources.push(resource);
                imported.source = Some(imported.resources.len() - 1);
            }
            Err(err) => {
                debug!("Surface {} has no readable import: {}", surface.id(), err);
            }
        }
    }

    debug!(
        "Imported surface {} ({}x{}, format {:#x}) as {:?} with {} image(s)",
        surface.id(),
        surface.width,
        surface.height,
        surface.format,
        imported.layout,
        imported.resources.len()
    );
    Ok(imported)
}
