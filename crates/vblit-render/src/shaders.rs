//! GLSL program catalog.
//!
//! Every program the engine can run is built once, when the engine is
//! created. Uniform and attribute locations are resolved at build time so
//! that draws only pay for a map lookup.

use std::collections::HashMap;

use tracing::debug;
use vblit_core::{format, ColorSpace, ShaderStage, VblitError, VblitResult};

use crate::device::{gl_error, GpuDevice, ProgramId, UniformValue};

const VERTEX_SHADER: &str = include_str!("shaders/compose.vert");
const RGB_FRAGMENT: &str = include_str!("shaders/rgb.frag");
const YUV_FRAGMENT: &str = include_str!("shaders/yuv.frag");
const LUMA_FRAGMENT: &str = include_str!("shaders/luma.frag");
const CHROMA_FRAGMENT: &str = include_str!("shaders/chroma.frag");
const REPACK_BODY: &str = include_str!("shaders/repack.comp");

const COMPUTE_HEADER: &str = "#version 320 es

precision highp float;
precision highp int;

layout (local_size_x = 32, local_size_y = 1, local_size_z = 1) in;
";

/// Invocations per compute work group.
pub const REPACK_GROUP_SIZE: u32 = 32;

/// Stage pixels handled by one compute invocation.
pub const PIXELS_PER_INVOCATION: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderKind {
    /// Blends external RGB or YUV sources into RGB targets.
    Rgb,
    /// Writes straight into YUV images through `GL_EXT_YUV_target`.
    Yuv,
    /// Converts a stage texture into a luma plane.
    Luma,
    /// Converts a stage texture into chroma planes.
    Chroma,
    Unaligned8,
    Unaligned16F,
    Unaligned32F,
}

impl ShaderKind {
    pub const ALL: [ShaderKind; 7] = [
        ShaderKind::Rgb,
        ShaderKind::Yuv,
        ShaderKind::Luma,
        ShaderKind::Chroma,
        ShaderKind::Unaligned8,
        ShaderKind::Unaligned16F,
        ShaderKind::Unaligned32F,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShaderKind::Rgb => "rgb",
            ShaderKind::Yuv => "yuv",
            ShaderKind::Luma => "luma",
            ShaderKind::Chroma => "chroma",
            ShaderKind::Unaligned8 => "unaligned8",
            ShaderKind::Unaligned16F => "unaligned16f",
            ShaderKind::Unaligned32F => "unaligned32f",
        }
    }

    pub fn is_compute(self) -> bool {
        matches!(
            self,
            ShaderKind::Unaligned8 | ShaderKind::Unaligned16F | ShaderKind::Unaligned32F
        )
    }

    /// The repack variant writing into outputs of format code `code`.
    pub fn repack_for(code: u32) -> ShaderKind {
        if format::is_float32(code) {
            ShaderKind::Unaligned32F
        } else if format::is_float16(code) {
            ShaderKind::Unaligned16F
        } else {
            ShaderKind::Unaligned8
        }
    }

    fn image_layout(self) -> Option<&'static str> {
        match self {
            ShaderKind::Unaligned8 => Some("rgba8"),
            ShaderKind::Unaligned16F => Some("rgba16f"),
            ShaderKind::Unaligned32F => Some("rgba32f"),
            _ => None,
        }
    }
}

/// Value of the `colorSpace` uniform.
pub fn color_space_index(color_space: ColorSpace) -> i32 {
    match color_space {
        ColorSpace::Bt601 => 0,
        ColorSpace::Bt601FullRange => 1,
        ColorSpace::Bt709 => 2,
    }
}

pub fn color_space_from_index(index: i32) -> ColorSpace {
    match index {
        1 => ColorSpace::Bt601FullRange,
        2 => ColorSpace::Bt709,
        _ => ColorSpace::Bt601,
    }
}

/// Sources of one program, ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub kind: ShaderKind,
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub compute: Option<String>,
}

impl ProgramSource {
    pub fn for_kind(kind: ShaderKind) -> Self {
        if let Some(layout) = kind.image_layout() {
            let compute = format!(
                "{COMPUTE_HEADER}layout (binding = 0, {layout}) writeonly uniform highp image2D outTex;\n\n{REPACK_BODY}"
            );
            return Self {
                kind,
                vertex: None,
                fragment: None,
                compute: Some(compute),
            };
        }

        let fragment = match kind {
            ShaderKind::Rgb => RGB_FRAGMENT,
            ShaderKind::Yuv => YUV_FRAGMENT,
            ShaderKind::Luma => LUMA_FRAGMENT,
            _ => CHROMA_FRAGMENT,
        };
        Self {
            kind,
            vertex: Some(VERTEX_SHADER.to_string()),
            fragment: Some(fragment.to_string()),
            compute: None,
        }
    }

    pub fn stages(&self) -> Vec<(ShaderStage, &str)> {
        let mut stages = Vec::new();
        if let Some(src) = &self.vertex {
            stages.push((ShaderStage::Vertex, src.as_str()));
        }
        if let Some(src) = &self.fragment {
            stages.push((ShaderStage::Fragment, src.as_str()));
        }
        if let Some(src) = &self.compute {
            stages.push((ShaderStage::Compute, src.as_str()));
        }
        stages
    }

    /// Uniform names in declaration order, across all stages.
    pub fn uniform_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (_, src) in self.stages() {
            for name in declared_names(src, |tokens| tokens.contains(&"uniform")) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Vertex inputs in declaration order.
    pub fn attribute_names(&self) -> Vec<String> {
        self.vertex
            .as_deref()
            .map(|src| declared_names(src, |tokens| tokens.first() == Some(&"in")))
            .unwrap_or_default()
    }
}

fn declared_names(src: &str, matches: impl Fn(&[&str]) -> bool) -> Vec<String> {
    src.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("//") && line.ends_with(';'))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if !matches(&tokens) {
                return None;
            }
            tokens
                .last()
                .map(|name| name.trim_end_matches(';').to_string())
                .filter(|name| !name.is_empty())
        })
        .collect()
}

/// A linked program with its resolved variable locations.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    kind: ShaderKind,
    uniforms: HashMap<String, i32>,
    attributes: HashMap<String, u32>,
}

impl ShaderProgram {
    pub fn build(device: &mut dyn GpuDevice, kind: ShaderKind) -> VblitResult<Self> {
        let source = ProgramSource::for_kind(kind);
        let id = device.create_program(&source)?;

        let mut uniforms = HashMap::new();
        for name in source.uniform_names() {
            if let Some(location) = device.uniform_location(id, &name) {
                uniforms.insert(name, location);
            }
        }
        let mut attributes = HashMap::new();
        for name in source.attribute_names() {
            if let Some(location) = device.attrib_location(id, &name) {
                attributes.insert(name, location);
            }
        }

        debug!(
            "Built {} program: {} uniforms, {} attributes",
            kind.name(),
            uniforms.len(),
            attributes.len()
        );
        Ok(Self {
            id,
            kind,
            uniforms,
            attributes,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    /// Whether the linked program kept a uniform or attribute of this name.
    pub fn has_variable(&self, name: &str) -> bool {
        self.uniforms.contains_key(name) || self.attributes.contains_key(name)
    }

    pub fn activate(&self, device: &mut dyn GpuDevice) -> VblitResult<()> {
        device.use_program(self.id)
    }

    pub fn set_uniform(
        &self,
        device: &mut dyn GpuDevice,
        name: &str,
        value: UniformValue,
    ) -> VblitResult<()> {
        let location = self.uniforms.get(name).ok_or_else(|| {
            VblitError::gpu(
                gl_error::INVALID_OPERATION,
                format!("{} program has no uniform {name}", self.kind.name()),
            )
        })?;
        device.set_uniform(*location, value)
    }

    pub fn set_int(&self, device: &mut dyn GpuDevice, name: &str, value: i32) -> VblitResult<()> {
        self.set_uniform(device, name, UniformValue::Int(value))
    }

    pub fn set_bool(&self, device: &mut dyn GpuDevice, name: &str, value: bool) -> VblitResult<()> {
        self.set_uniform(device, name, UniformValue::Bool(value))
    }

    pub fn set_float(&self, device: &mut dyn GpuDevice, name: &str, value: f32) -> VblitResult<()> {
        self.set_uniform(device, name, UniformValue::Float(value))
    }

    pub fn set_vec4(
        &self,
        device: &mut dyn GpuDevice,
        name: &str,
        value: [f32; 4],
    ) -> VblitResult<()> {
        self.set_uniform(device, name, UniformValue::Vec4(value))
    }

    pub fn set_attribute(
        &self,
        device: &mut dyn GpuDevice,
        name: &str,
        data: &[f32; 8],
    ) -> VblitResult<()> {
        let location = self.attributes.get(name).ok_or_else(|| {
            VblitError::gpu(
                gl_error::INVALID_OPERATION,
                format!("{} program has no attribute {name}", self.kind.name()),
            )
        })?;
        device.set_vertex_attrib(*location, data)
    }
}

/// The compiled catalog.
#[derive(Debug, Default)]
pub struct ProgramSet {
    programs: HashMap<ShaderKind, ShaderProgram>,
}

impl ProgramSet {
    /// Build every program; the YUV program only with the YUV target
    /// capability. Programs built before a failure are released again.
    pub fn build(device: &mut dyn GpuDevice, yuv_target: bool) -> VblitResult<Self> {
        let mut set = ProgramSet::default();

        for kind in ShaderKind::ALL {
            if kind == ShaderKind::Yuv && !yuv_target {
                continue;
            }
            match ShaderProgram::build(device, kind) {
                Ok(program) => {
                    set.programs.insert(kind, program);
                }
                Err(err) => {
                    set.destroy(device);
                    return Err(err);
                }
            }
        }

        Ok(set)
    }

    pub fn get(&self, kind: ShaderKind) -> Option<&ShaderProgram> {
        self.programs.get(&kind)
    }

    /// Like [`ProgramSet::get`], for programs the caller requires.
    pub fn require(&self, kind: ShaderKind) -> VblitResult<&ShaderProgram> {
        self.get(kind).ok_or_else(|| {
            VblitError::gpu(
                gl_error::INVALID_OPERATION,
                format!("{} program is not available", kind.name()),
            )
        })
    }

    pub fn has(&self, kind: ShaderKind) -> bool {
        self.programs.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Delete every program. Errors are logged.
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for (kind, program) in self.programs.drain() {
            if let Err(err) = device.delete_program(program.id) {
                tracing::warn!("Failed to delete {} program: {}", kind.name(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vblit_core::format::{ColorFormat, PixelType};

    #[test]
    fn test_rgb_program_declarations() {
        let source = ProgramSource::for_kind(ShaderKind::Rgb);
        let uniforms = source.uniform_names();
        assert_eq!(uniforms[0], "rotationAngle");
        for name in ["extTex", "globalAlpha", "rgbaScale", "rgbaOffset", "rgbaInverted", "rbSwapped"] {
            assert!(uniforms.iter().any(|u| u == name), "missing {name}");
        }
        assert_eq!(source.attribute_names(), vec!["vPosition", "inTexCoord"]);
    }

    #[test]
    fn test_compute_variants_declare_image_layout() {
        for (kind, layout) in [
            (ShaderKind::Unaligned8, "rgba8"),
            (ShaderKind::Unaligned16F, "rgba16f"),
            (ShaderKind::Unaligned32F, "rgba32f"),
        ] {
            let source = ProgramSource::for_kind(kind);
            let compute = source.compute.as_deref().unwrap();
            assert!(compute.starts_with("#version 320 es"));
            assert!(compute.contains(&format!("binding = 0, {layout})")));
            assert!(source.vertex.is_none());
            assert!(source.attribute_names().is_empty());

            let uniforms = source.uniform_names();
            for name in ["outTex", "inTex", "targetWidth", "imageWidth", "numPixels", "numChannels"] {
                assert!(uniforms.iter().any(|u| u == name), "missing {name}");
            }
        }
    }

    #[test]
    fn test_comments_are_not_declarations() {
        let source = ProgramSource::for_kind(ShaderKind::Chroma);
        let uniforms = source.uniform_names();
        assert!(uniforms.iter().any(|u| u == "chromaSelect"));
        assert!(!uniforms.iter().any(|u| u.contains(':')));
    }

    #[test]
    fn test_repack_variant_follows_float_bits() {
        let rgb = ColorFormat::Rgb888.code();
        assert_eq!(ShaderKind::repack_for(rgb), ShaderKind::Unaligned8);
        assert_eq!(
            ShaderKind::repack_for(rgb | PixelType::Float16.bits()),
            ShaderKind::Unaligned16F
        );
        assert_eq!(
            ShaderKind::repack_for(rgb | PixelType::Float32.bits()),
            ShaderKind::Unaligned32F
        );
        assert_eq!(
            ShaderKind::repack_for(rgb | PixelType::Signed.bits()),
            ShaderKind::Unaligned8
        );
    }

    #[test]
    fn test_color_space_index_round_trips() {
        for cs in [ColorSpace::Bt601, ColorSpace::Bt601FullRange, ColorSpace::Bt709] {
            assert_eq!(color_space_from_index(color_space_index(cs)), cs);
        }
    }
}
