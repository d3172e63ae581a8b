//! Reference execution of the program catalog.

use std::collections::HashMap;

use rayon::prelude::*;
use vblit_core::color::rgb_to_yuv;
use vblit_core::{ColorSpace, Region};

use super::memory::Buffers;
use super::texel::{self, Storage};
use crate::device::{ImageImport, UniformValue};
use crate::shaders::{color_space_from_index, ShaderKind, PIXELS_PER_INVOCATION, REPACK_GROUP_SIZE};

/// What a sampler unit is bound to.
#[derive(Clone, Copy)]
pub(crate) enum Bound<'a> {
    Image(&'a ImageImport),
    Storage(&'a Storage),
    Nothing,
}

impl Bound<'_> {
    fn size(&self) -> (u32, u32) {
        match self {
            Bound::Image(image) => (image.width, image.height),
            Bound::Storage(storage) => (storage.width, storage.height),
            Bound::Nothing => (0, 0),
        }
    }

    /// Nearest sample at normalized coordinates.
    fn sample(&self, buffers: &Buffers, t: [f32; 2]) -> [f32; 4] {
        let (w, h) = self.size();
        if w == 0 || h == 0 {
            return [0.0; 4];
        }
        let x = ((t[0] * w as f32).floor() as i64).clamp(0, w as i64 - 1) as u32;
        let y = ((t[1] * h as f32).floor() as i64).clamp(0, h as i64 - 1) as u32;
        match self {
            Bound::Image(image) => texel::sample(buffers, image, x, y),
            Bound::Storage(storage) => storage.fetch(x as i64, y as i64),
            Bound::Nothing => [0.0; 4],
        }
    }
}

pub(crate) struct Uniforms<'a> {
    values: HashMap<&'a str, UniformValue>,
}

impl<'a> Uniforms<'a> {
    pub(crate) fn new(values: HashMap<&'a str, UniformValue>) -> Self {
        Self { values }
    }

    fn float(&self, name: &str, default: f32) -> f32 {
        self.values.get(name).map(UniformValue::as_f32).unwrap_or(default)
    }

    pub(crate) fn int(&self, name: &str) -> i32 {
        self.values.get(name).map(UniformValue::as_i32).unwrap_or(0)
    }

    fn flag(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(UniformValue::as_bool)
    }

    fn vec4(&self, name: &str, default: [f32; 4]) -> [f32; 4] {
        self.values.get(name).map(UniformValue::as_vec4).unwrap_or(default)
    }

    /// Vertex stage rotation in radians.
    pub(crate) fn rotation(&self) -> f32 {
        self.float("rotationAngle", 0.0)
    }

    fn color_space(&self) -> ColorSpace {
        color_space_from_index(self.int("colorSpace"))
    }
}

/// Sampler bindings of one draw, by uniform name.
pub(crate) struct Samplers<'a> {
    pub ext: Bound<'a>,
    pub stage: Bound<'a>,
}

fn clamp01(v: [f32; 4]) -> [f32; 4] {
    v.map(|c| c.clamp(0.0, 1.0))
}

fn luma_weights(color_space: ColorSpace) -> [f32; 3] {
    let (kr, kg, kb) = color_space.coefficients();
    [kr, kg, kb]
}

/// Run the fragment stage of `kind` for one texture coordinate.
pub(crate) fn shade(
    kind: ShaderKind,
    uniforms: &Uniforms<'_>,
    samplers: &Samplers<'_>,
    buffers: &Buffers,
    t: [f32; 2],
) -> [f32; 4] {
    let global_alpha = uniforms.float("globalAlpha", 1.0);

    match kind {
        ShaderKind::Rgb => {
            let mut s = samplers.ext.sample(buffers, t);
            s[3] *= global_alpha;
            let offset = uniforms.vec4("rgbaOffset", [0.0; 4]);
            let scale = uniforms.vec4("rgbaScale", [1.0; 4]);
            for c in 0..4 {
                s[c] = (s[c] - offset[c]) * scale[c];
            }
            let [r, g, b, a] = s;
            match (uniforms.flag("rgbaInverted"), uniforms.flag("rbSwapped")) {
                (true, true) => [a, b, g, r],
                (true, false) => [a, r, g, b],
                (false, true) => [b, g, r, a],
                (false, false) => s,
            }
        }
        ShaderKind::Yuv => {
            let source = if uniforms.flag("stageInput") {
                samplers.stage.sample(buffers, t)
            } else {
                samplers.ext.sample(buffers, t)
            };
            let s = clamp01(source);
            let [y, u, v] = rgb_to_yuv([s[0], s[1], s[2]], uniforms.color_space());
            [y, u, v, s[3] * global_alpha]
        }
        ShaderKind::Luma => {
            let s = clamp01(samplers.stage.sample(buffers, t));
            let k = luma_weights(uniforms.color_space());
            let luma = s[0] * k[0] + s[1] * k[1] + s[2] * k[2];
            [luma, 0.0, 0.0, s[3] * global_alpha]
        }
        ShaderKind::Chroma => {
            let s = clamp01(samplers.stage.sample(buffers, t));
            let [_, u, v] = rgb_to_yuv([s[0], s[1], s[2]], uniforms.color_space());
            match uniforms.int("chromaSelect") {
                1 => [u, 0.0, 0.0, 1.0],
                2 => [v, 0.0, 0.0, 1.0],
                _ if uniforms.flag("rbSwapped") => [v, u, 0.0, 1.0],
                _ => [u, v, 0.0, 1.0],
            }
        }
        _ => [0.0; 4],
    }
}

/// Four vertices of a triangle strip covering an axis-aligned rectangle.
pub(crate) struct Quad {
    pub positions: [f32; 8],
    pub texcoords: [f32; 8],
    pub rotation: f32,
}

impl Quad {
    /// Texture coordinate under the viewport pixel `(px, py)`, if the
    /// rotated quad covers its centre.
    fn texcoord(&self, viewport: &Region, px: i32, py: i32) -> Option<[f32; 2]> {
        let ndc_x = ((px - viewport.x) as f32 + 0.5) / viewport.w as f32 * 2.0 - 1.0;
        let ndc_y = ((py - viewport.y) as f32 + 0.5) / viewport.h as f32 * 2.0 - 1.0;

        // Undo the vertex stage rotation.
        let (s, c) = self.rotation.sin_cos();
        let x = c * ndc_x + s * ndc_y;
        let y = -s * ndc_x + c * ndc_y;
        const EDGE: f32 = 1.0 + 1e-5;
        if x.abs() > EDGE || y.abs() > EDGE {
            return None;
        }

        let p = &self.positions;
        let t = &self.texcoords;
        let a = (x - p[0]) / (p[4] - p[0]);
        let b = (y - p[1]) / (p[3] - p[1]);
        Some([
            t[0] + a * (t[4] - t[0]) + b * (t[2] - t[0]),
            t[1] + a * (t[5] - t[1]) + b * (t[3] - t[1]),
        ])
    }

    /// Whether the vertices form an axis-aligned rectangle.
    pub(crate) fn is_rectangle(&self) -> bool {
        let p = &self.positions;
        p[0] == p[2] && p[4] == p[6] && p[1] == p[5] && p[3] == p[7] && p[0] != p[4] && p[1] != p[3]
    }
}

/// Shade every covered pixel of the viewport clipped to the target.
pub(crate) fn rasterize(
    quad: &Quad,
    viewport: Region,
    target_size: (u32, u32),
    shader: impl Fn([f32; 2]) -> [f32; 4] + Sync,
) -> Vec<(u32, u32, [f32; 4])> {
    if viewport.is_empty() {
        return Vec::new();
    }
    let x0 = viewport.x.max(0);
    let y0 = viewport.y.max(0);
    let x1 = (viewport.x + viewport.w).min(target_size.0 as i32);
    let y1 = (viewport.y + viewport.h).min(target_size.1 as i32);
    if x0 >= x1 || y0 >= y1 {
        return Vec::new();
    }

    (y0..y1)
        .into_par_iter()
        .flat_map_iter(|py| {
            let shader = &shader;
            (x0..x1).filter_map(move |px| {
                quad.texcoord(&viewport, px, py)
                    .map(|t| (px as u32, py as u32, shader(t)))
            })
        })
        .collect()
}

/// `src * srcAlpha + dst * (1 - srcAlpha)` on all four channels.
pub(crate) fn blend(src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let alpha = src[3];
    [0, 1, 2, 3].map(|c| src[c] * alpha + dst[c] * (1.0 - alpha))
}

/// Parameters of one repack dispatch.
pub(crate) struct Repack<'a> {
    pub input: &'a Storage,
    pub target_width: i32,
    pub image_width: i32,
    pub num_pixels: i32,
    pub num_channels: i32,
}

/// Texels written by a repack dispatch of `groups` work groups, keyed by
/// linear texel id of the output view.
pub(crate) fn repack(params: &Repack<'_>, groups: (u32, u32)) -> Vec<(i32, [f32; 4])> {
    let row = groups.0 * REPACK_GROUP_SIZE;
    let invocations = row as u64 * groups.1 as u64;

    (0..invocations)
        .into_par_iter()
        .flat_map_iter(|invocation| repack_invocation(params, invocation as i64))
        .collect()
}

fn repack_invocation(params: &Repack<'_>, invocation: i64) -> Vec<(i32, [f32; 4])> {
    let n = params.num_pixels as i64;
    let pixel_id = invocation * PIXELS_PER_INVOCATION as i64;
    if pixel_id >= n || params.target_width <= 0 {
        return Vec::new();
    }

    let width = params.target_width as i64;
    let fetch = |id: i64| {
        if id >= n {
            [0.0; 4]
        } else {
            params.input.fetch(id % width, id / width)
        }
    };
    let [p0, p1, p2, p3] = [0, 1, 2, 3].map(|i| fetch(pixel_id + i));
    let pixel_id = pixel_id as i32;
    let num_pixels = params.num_pixels;

    match params.num_channels {
        4 => [p0, p1, p2, p3]
            .into_iter()
            .enumerate()
            .filter(|(i, _)| pixel_id + (*i as i32) < num_pixels)
            .map(|(i, p)| (pixel_id + i as i32, p))
            .collect(),
        3 => {
            let texel = pixel_id * 3 / 4;
            let num_texels = (num_pixels * 3 + 3) / 4;
            [
                [p0[0], p0[1], p0[2], p1[0]],
                [p1[1], p1[2], p2[0], p2[1]],
                [p2[2], p3[0], p3[1], p3[2]],
            ]
            .into_iter()
            .enumerate()
            .filter(|(i, _)| texel + (*i as i32) < num_texels)
            .map(|(i, t)| (texel + i as i32, t))
            .collect()
        }
        2 => {
            let texel = pixel_id / 2;
            let num_texels = (num_pixels + 1) / 2;
            [[p0[0], p0[1], p1[0], p1[1]], [p2[0], p2[1], p3[0], p3[1]]]
                .into_iter()
                .enumerate()
                .filter(|(i, _)| texel + (*i as i32) < num_texels)
                .map(|(i, t)| (texel + i as i32, t))
                .collect()
        }
        _ => {
            let luma = |p: [f32; 4]| p[0] * 0.299 + p[1] * 0.587 + p[2] * 0.114;
            vec![(pixel_id / 4, [luma(p0), luma(p1), luma(p2), luma(p3)])]
        }
    }
}
